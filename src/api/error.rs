use thiserror::Error;

use crate::api::run::RunStatus;

pub type StorageError = anyhow::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("no run has been queued or started")]
    NoActiveRun,
    #[error("cannot apply the {event} event to a run in state {status}")]
    InvalidTransition { event: &'static str, status: RunStatus },
    #[error("the path {0} is reserved for run state")]
    ReservedPath(String),
    #[error("an error ocurred in the storage backend: {0:?}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("the path {0} is reserved for run state")]
    ReservedPath(String),
    #[error("an error ocurred in the storage backend: {0:?}")]
    Storage(#[from] StorageError),
}

impl From<ArtifactError> for EventError {
    fn from(error: ArtifactError) -> Self {
        match error {
            ArtifactError::ReservedPath(path) => EventError::ReservedPath(path),
            ArtifactError::Storage(error) => EventError::Storage(error),
        }
    }
}
