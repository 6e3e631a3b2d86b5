use std::path::Path;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    api::{
        error::{EventError, StorageError},
        id::RunId,
        metric::MetricsBatch,
        observer::{Observer, RunDescriptor},
        run::{Resource, RunDocument, RunStatus},
        value::Value,
    },
    backend::Backend,
    config::StorageConfig,
};

/// Records the lifecycle of runs through a [`Backend`].
///
/// Holds the document of the current run in memory and persists all of it
/// after every event, so the stored state is never more than one event behind.
///
/// Lifecycle events outside their state are rejected:
/// `heartbeat` and `completed` need a running run, `interrupted` a queued or
/// running one. `failed` is accepted in any state.
pub struct Recorder<B: Backend> {
    backend: B,
    run: Option<RunDocument>,
}

impl<B: Backend> Recorder<B> {
    pub fn new(backend: B) -> Self {
        Recorder { backend, run: None }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The current run, if one was queued or started.
    pub fn run(&self) -> Option<&RunDocument> {
        self.run.as_ref()
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn save(&mut self) -> Result<(), EventError> {
        if let Some(run) = &self.run {
            persist(&mut self.backend, run)?;
        }
        Ok(())
    }

    fn create(
        &mut self,
        descriptor: &RunDescriptor,
        id: Option<RunId>,
        status: RunStatus,
    ) -> Result<RunDocument, EventError> {
        let id = self.backend.create_or_locate(descriptor.namespace(), id)?;
        Ok(RunDocument::new(id, descriptor, status))
    }
}

impl Recorder<Box<dyn Backend>> {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Recorder::new(config.open()?))
    }
}

fn persist<B: Backend + ?Sized>(backend: &mut B, run: &RunDocument) -> Result<(), StorageError> {
    backend.write_run_document(run)?;
    backend.write_captured_output(run)?;
    debug!(id = %run.id, status = %run.status, "run persisted");
    Ok(())
}

fn current<'a>(run: &'a mut Option<RunDocument>, event: &'static str) -> Result<&'a mut RunDocument, EventError> {
    match run.as_mut() {
        Some(run) => Ok(run),
        None => {
            warn!(event, "event without a queued or started run");
            Err(EventError::NoActiveRun)
        }
    }
}

fn in_state<'a>(
    run: &'a mut Option<RunDocument>,
    event: &'static str,
    allowed: fn(&RunStatus) -> bool,
) -> Result<&'a mut RunDocument, EventError> {
    let run = current(run, event)?;
    if !allowed(&run.status) {
        warn!(event, id = %run.id, status = %run.status, "rejected out-of-state event");
        return Err(EventError::InvalidTransition {
            event,
            status: run.status.clone(),
        });
    }
    Ok(run)
}

fn is_running(status: &RunStatus) -> bool {
    *status == RunStatus::Running
}

fn is_live(status: &RunStatus) -> bool {
    matches!(status, RunStatus::Running | RunStatus::Queued)
}

impl<B: Backend> Observer for Recorder<B> {
    fn queued_event(&mut self, run: &RunDescriptor, queue_time: OffsetDateTime, id: Option<RunId>) -> Result<RunId, EventError> {
        let mut doc = self.create(run, id, RunStatus::Queued)?;
        doc.queue_time = Some(queue_time);
        let id = doc.id.clone();
        self.run = Some(doc);
        self.save()?;
        info!(namespace = run.namespace(), id = %id, "run queued");
        Ok(id)
    }

    fn started_event(&mut self, run: &RunDescriptor, start_time: OffsetDateTime, id: Option<RunId>) -> Result<RunId, EventError> {
        // A run that was queued keeps its id when it starts.
        let queued = self
            .run
            .as_ref()
            .filter(|doc| doc.status == RunStatus::Queued && doc.namespace() == run.namespace());
        let queue_time = queued.and_then(|doc| doc.queue_time);
        let id = id.or_else(|| queued.map(|doc| doc.id.clone()));

        let mut doc = self.create(run, id, RunStatus::Running)?;
        doc.start_time = Some(start_time);
        doc.queue_time = queue_time;
        let id = doc.id.clone();
        self.run = Some(doc);
        self.save()?;
        info!(namespace = run.namespace(), id = %id, "run started");
        Ok(id)
    }

    fn heartbeat_event(&mut self, info: Value, captured_out: &str, beat_time: OffsetDateTime, result: Value) -> Result<(), EventError> {
        let doc = in_state(&mut self.run, "heartbeat", is_running)?;
        doc.heartbeat = Some(beat_time);
        doc.result = result;
        if !info.is_empty() {
            let mut info = info;
            if info.get("metrics").is_none() {
                if let Some(refs) = doc.info.get("metrics") {
                    info.insert("metrics", refs.clone());
                }
            }
            doc.info = info;
        }
        doc.captured_out = captured_out.to_owned();
        self.save()
    }

    fn completed_event(&mut self, stop_time: OffsetDateTime, result: Value) -> Result<(), EventError> {
        let doc = in_state(&mut self.run, "completed", is_running)?;
        doc.stop_time = Some(stop_time);
        doc.result = result;
        doc.status = RunStatus::Completed;
        self.save()?;
        if let Some(doc) = &self.run {
            self.backend.write_result(doc)?;
            info!(id = %doc.id, "run completed");
        }
        Ok(())
    }

    fn interrupted_event(&mut self, interrupt_time: OffsetDateTime, status: &str) -> Result<(), EventError> {
        let doc = in_state(&mut self.run, "interrupted", is_live)?;
        doc.stop_time = Some(interrupt_time);
        doc.status = RunStatus::interrupted(status);
        if doc.status.as_str() != status {
            warn!(id = %doc.id, requested = status, status = %doc.status, "replaced interrupt status");
        }
        self.save()?;
        if let Some(doc) = &self.run {
            info!(id = %doc.id, status = %doc.status, "run interrupted");
        }
        Ok(())
    }

    fn failed_event(&mut self, fail_time: OffsetDateTime, fail_trace: &str) -> Result<(), EventError> {
        let doc = current(&mut self.run, "failed")?;
        doc.stop_time = Some(fail_time);
        doc.status = RunStatus::Failed;
        doc.fail_trace = Some(fail_trace.to_owned());
        self.save()?;
        if let Some(doc) = &self.run {
            info!(id = %doc.id, "run failed");
        }
        Ok(())
    }

    fn resource_event(&mut self, filename: &Path, digest: Option<&str>) -> Result<(), EventError> {
        let doc = current(&mut self.run, "resource")?;
        self.backend.write_resource(doc, filename)?;
        doc.resources.push(Resource {
            filename: filename.to_string_lossy().into_owned(),
            digest: digest.map(str::to_owned),
        });
        self.save()
    }

    fn artifact_event(&mut self, name: &str, filename: &Path) -> Result<(), EventError> {
        let doc = current(&mut self.run, "artifact")?;
        self.backend.write_artifact(doc, name, filename)?;
        doc.artifacts.push(name.to_owned());
        self.save()
    }

    fn log_metrics(&mut self, metrics: &MetricsBatch) -> Result<(), EventError> {
        if metrics.is_empty() {
            return Ok(());
        }
        let doc = current(&mut self.run, "log_metrics")?;
        self.backend.write_metrics(doc, metrics)?;
        self.save()
    }
}
