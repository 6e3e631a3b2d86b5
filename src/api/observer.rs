use std::path::Path;
use time::OffsetDateTime;

use crate::api::{error::EventError, id::RunId, metric::MetricsBatch, value::Value};

/// Namespace used when the experiment info carries no name.
pub const DEFAULT_NAMESPACE: &str = "default";

/// What a caller knows about a run before it executes.
///
/// All payloads are opaque to the recorder; only `experiment["name"]` is
/// read, to pick the namespace the run is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDescriptor {
    pub experiment: Value,
    pub command: String,
    pub host: Value,
    pub config: Value,
    pub meta: Value,
}

impl RunDescriptor {
    pub fn namespace(&self) -> &str {
        namespace_of(&self.experiment)
    }
}

pub(crate) fn namespace_of(experiment: &Value) -> &str {
    experiment
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_NAMESPACE)
}

/// Receives the lifecycle events of one run at a time.
///
/// Events are delivered sequentially by the single process driving the run.
/// `queued_event` and `started_event` return the id the run is stored under.
#[rustfmt::skip]
pub trait Observer {
    fn queued_event(&mut self, run: &RunDescriptor, queue_time: OffsetDateTime, id: Option<RunId>) -> Result<RunId, EventError>;
    fn started_event(&mut self, run: &RunDescriptor, start_time: OffsetDateTime, id: Option<RunId>) -> Result<RunId, EventError>;
    fn heartbeat_event(&mut self, info: Value, captured_out: &str, beat_time: OffsetDateTime, result: Value) -> Result<(), EventError>;
    fn completed_event(&mut self, stop_time: OffsetDateTime, result: Value) -> Result<(), EventError>;
    fn interrupted_event(&mut self, interrupt_time: OffsetDateTime, status: &str) -> Result<(), EventError>;
    fn failed_event(&mut self, fail_time: OffsetDateTime, fail_trace: &str) -> Result<(), EventError>;

    fn resource_event(&mut self, filename: &Path, digest: Option<&str>) -> Result<(), EventError>;
    fn artifact_event(&mut self, name: &str, filename: &Path) -> Result<(), EventError>;
    fn log_metrics(&mut self, metrics: &MetricsBatch) -> Result<(), EventError>;
}
