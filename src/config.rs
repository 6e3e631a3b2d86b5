use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

use crate::{
    api::error::StorageError,
    backend::{Backend, DatabaseStorage, FileStorage, FileStorageOptions},
};

/// Which backend to record runs into, as read from a settings file.
///
/// ```json
/// { "backend": "file", "base_dir": "runs", "options": { "id_width": 4 } }
/// { "backend": "database", "path": "runs.sqlite" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    File {
        base_dir: PathBuf,
        #[serde(default)]
        options: FileStorageOptions,
    },
    /// Without a path the database lives in memory.
    Database {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl StorageConfig {
    pub fn from_json_str(text: &str) -> Result<Self, StorageError> {
        let config = serde_json::from_str(text).context("invalid storage configuration")?;
        Ok(config)
    }

    pub fn open(&self) -> Result<Box<dyn Backend>, StorageError> {
        match self {
            StorageConfig::File { base_dir, options } => {
                info!(base_dir = %base_dir.display(), "recording runs to files");
                Ok(Box::new(FileStorage::new(base_dir.clone(), options.clone())))
            }
            StorageConfig::Database { path: Some(path) } => {
                info!(path = %path.display(), "recording runs to database");
                Ok(Box::new(DatabaseStorage::open(path)?))
            }
            StorageConfig::Database { path: None } => {
                info!("recording runs to in-memory database");
                Ok(Box::new(DatabaseStorage::open_in_memory()?))
            }
        }
    }
}
