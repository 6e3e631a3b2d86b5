use std::path::Path;

use crate::api::{
    error::{ArtifactError, StorageError},
    id::RunId,
    metric::MetricsBatch,
    run::RunDocument,
};

pub mod allocator;
pub mod database;
pub mod file;
mod results;

pub use allocator::{DirectoryCounter, IdAllocator, UlidAllocator};
pub use database::DatabaseStorage;
pub use file::{FileStorage, FileStorageOptions};

/// A sink for run state.
///
/// Every method writes complete state for its destination; nothing is
/// buffered between calls. Failures are returned as-is, there are no retries.
#[rustfmt::skip]
pub trait Backend {
    /// Assigns the run's id unless one is given and prepares its storage location.
    /// Calling it again for an existing run is harmless.
    fn create_or_locate(&mut self, namespace: &str, id: Option<RunId>) -> Result<RunId, StorageError>;
    fn write_run_document(&mut self, run: &RunDocument) -> Result<(), StorageError>;
    fn write_captured_output(&mut self, run: &RunDocument) -> Result<(), StorageError>;
    /// Appends to the run's stored series. May register references in `run.info`.
    fn write_metrics(&mut self, run: &mut RunDocument, metrics: &MetricsBatch) -> Result<(), StorageError>;
    fn write_resource(&mut self, run: &RunDocument, filename: &Path) -> Result<(), StorageError>;
    fn write_artifact(&mut self, run: &RunDocument, name: &str, filename: &Path) -> Result<(), ArtifactError>;
    /// Called once a run completed, to update any derived result index.
    fn write_result(&mut self, _run: &RunDocument) -> Result<(), StorageError> { Ok(()) }
}

#[rustfmt::skip]
impl<B: Backend + ?Sized> Backend for Box<B> {
    fn create_or_locate(&mut self, namespace: &str, id: Option<RunId>) -> Result<RunId, StorageError> { (**self).create_or_locate(namespace, id) }
    fn write_run_document(&mut self, run: &RunDocument) -> Result<(), StorageError> { (**self).write_run_document(run) }
    fn write_captured_output(&mut self, run: &RunDocument) -> Result<(), StorageError> { (**self).write_captured_output(run) }
    fn write_metrics(&mut self, run: &mut RunDocument, metrics: &MetricsBatch) -> Result<(), StorageError> { (**self).write_metrics(run, metrics) }
    fn write_resource(&mut self, run: &RunDocument, filename: &Path) -> Result<(), StorageError> { (**self).write_resource(run, filename) }
    fn write_artifact(&mut self, run: &RunDocument, name: &str, filename: &Path) -> Result<(), ArtifactError> { (**self).write_artifact(run, name, filename) }
    fn write_result(&mut self, run: &RunDocument) -> Result<(), StorageError> { (**self).write_result(run) }
}
