mod logger;
mod recorder;

pub use logger::MetricsLogger;
pub use recorder::Recorder;
