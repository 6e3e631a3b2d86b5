pub mod api;
pub mod backend;
pub mod config;
pub mod sanitize;
pub mod tracking;

pub use api::id::RunId;
pub use api::observer::{Observer, RunDescriptor};
pub use api::value::Value;
pub use tracking::Recorder;

/// Utility function to create a run timestamp.
pub fn timestamp() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}
