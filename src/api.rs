pub mod error;
pub mod id;
pub mod metric;
pub mod observer;
pub mod run;
pub mod value;
