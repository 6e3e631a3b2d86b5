use anyhow::Context;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;
use ulid::Ulid;

use crate::api::{error::StorageError, id::RunId};

/// Hands out ids for runs whose caller did not bring one.
pub trait IdAllocator {
    fn allocate(&mut self, namespace: &str) -> Result<RunId, StorageError>;
}

/// Numbers runs by counting the run directories already in the namespace.
///
/// Only directories with purely numeric names count, so stray files and
/// hand-made folders do not shift the sequence.
#[derive(Debug, Clone)]
pub struct DirectoryCounter {
    base_dir: PathBuf,
    width: usize,
}

impl DirectoryCounter {
    pub fn new(base_dir: impl Into<PathBuf>, width: usize) -> Self {
        DirectoryCounter {
            base_dir: base_dir.into(),
            width,
        }
    }

    fn count_runs(dir: &Path) -> Result<u64, StorageError> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        let entries = fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let is_run = entry.file_type()?.is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()));
            if is_run {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl IdAllocator for DirectoryCounter {
    fn allocate(&mut self, namespace: &str) -> Result<RunId, StorageError> {
        let dir = self.base_dir.join(namespace);
        let mut next = Self::count_runs(&dir)?;
        // A gap left by a removed run would make the count collide with the
        // highest existing directory.
        while dir.join(RunId::Number(next).padded(self.width)).exists() {
            next += 1;
        }
        debug!(namespace, id = next, "allocated run id");
        Ok(RunId::Number(next))
    }
}

/// Generates a fresh ULID per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct UlidAllocator;

impl IdAllocator for UlidAllocator {
    fn allocate(&mut self, _namespace: &str) -> Result<RunId, StorageError> {
        Ok(RunId::Text(Ulid::new().to_string()))
    }
}
