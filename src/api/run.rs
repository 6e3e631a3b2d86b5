use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::api::{id::RunId, observer::RunDescriptor, value::Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    /// Carries the caller's sub-status, `INTERRUPTED` unless told otherwise.
    Interrupted(String),
    Failed,
}

/// Version tag of the persisted document layout, stored as `format`.
pub const FORMAT: &str = concat!("runlog-", env!("CARGO_PKG_VERSION"));

const INTERRUPTED: &str = "INTERRUPTED";

impl RunStatus {
    /// An interrupted status carrying `status`.
    ///
    /// An empty sub-status, or one spelled like another lifecycle state, would
    /// not read back as interrupted and becomes `INTERRUPTED`.
    pub fn interrupted(status: &str) -> Self {
        match RunStatus::from(status.to_owned()) {
            RunStatus::Interrupted(status) if !status.is_empty() => RunStatus::Interrupted(status),
            _ => RunStatus::Interrupted(INTERRUPTED.to_owned()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Interrupted(_) | RunStatus::Failed
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Interrupted(status) => status,
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RunStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "QUEUED" => RunStatus::Queued,
            "RUNNING" => RunStatus::Running,
            "COMPLETED" => RunStatus::Completed,
            "FAILED" => RunStatus::Failed,
            _ => RunStatus::Interrupted(status),
        }
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_owned()
    }
}

/// A file the run depended on, optionally with its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub filename: String,
    pub digest: Option<String>,
}

impl From<&Resource> for Value {
    fn from(resource: &Resource) -> Self {
        match &resource.digest {
            Some(digest) => (resource.filename.as_str(), digest.as_str()).into(),
            None => resource.filename.as_str().into(),
        }
    }
}

impl From<&RunId> for Value {
    fn from(id: &RunId) -> Self {
        match id {
            RunId::Number(n) => Value::from(*n),
            RunId::Text(s) => Value::from(s.as_str()),
        }
    }
}

/// The authoritative snapshot of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDocument {
    pub id: RunId,
    pub experiment: Value,
    pub command: String,
    pub host: Value,
    pub config: Value,
    pub meta: Value,
    pub status: RunStatus,
    pub queue_time: Option<OffsetDateTime>,
    pub start_time: Option<OffsetDateTime>,
    pub heartbeat: Option<OffsetDateTime>,
    pub stop_time: Option<OffsetDateTime>,
    pub result: Value,
    pub info: Value,
    pub resources: Vec<Resource>,
    pub artifacts: Vec<String>,
    pub fail_trace: Option<String>,
    pub captured_out: String,
}

impl RunDocument {
    pub(crate) fn new(id: RunId, descriptor: &RunDescriptor, status: RunStatus) -> Self {
        RunDocument {
            id,
            experiment: descriptor.experiment.clone(),
            command: descriptor.command.clone(),
            host: descriptor.host.clone(),
            config: descriptor.config.clone(),
            meta: descriptor.meta.clone(),
            status,
            queue_time: None,
            start_time: None,
            heartbeat: None,
            stop_time: None,
            result: Value::Null,
            info: Value::map(),
            resources: Vec::new(),
            artifacts: Vec::new(),
            fail_trace: None,
            captured_out: String::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        crate::api::observer::namespace_of(&self.experiment)
    }

    /// The document as a value tree, in the shape backends persist.
    ///
    /// Unset timestamps and the failure trace are left out, the heartbeat is
    /// always present so readers can tell "never beat" from "missing".
    pub fn to_value(&self) -> Value {
        let mut doc = Value::map();
        doc.insert("_id", &self.id);
        doc.insert("format", FORMAT);
        doc.insert("experiment", self.experiment.clone());
        doc.insert("command", self.command.as_str());
        doc.insert("host", self.host.clone());
        doc.insert("config", self.config.clone());
        doc.insert("meta", self.meta.clone());
        doc.insert("status", self.status.as_str());
        if let Some(queue_time) = self.queue_time {
            doc.insert("queue_time", queue_time);
        }
        if let Some(start_time) = self.start_time {
            doc.insert("start_time", start_time);
        }
        doc.insert("heartbeat", self.heartbeat);
        if let Some(stop_time) = self.stop_time {
            doc.insert("stop_time", stop_time);
        }
        if !self.result.is_null() {
            doc.insert("result", self.result.clone());
        }
        doc.insert("info", self.info.clone());
        doc.insert(
            "resources",
            Value::List(self.resources.iter().map(Value::from).collect()),
        );
        doc.insert("artifacts", self.artifacts.clone());
        doc.insert("captured_out", self.captured_out.as_str());
        if let Some(fail_trace) = &self.fail_trace {
            doc.insert("fail_trace", fail_trace.as_str());
        }
        doc
    }
}
