//! Runs as directories of JSON files.
//!
//! ```text
//! base_dir/
//!   <experiment>/
//!     experiments.csv
//!     000/
//!       <command>-run.json
//!       <command>-config.json
//!       <command>-metrics.json
//!       <command>-cout.txt
//! ```

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::{
    api::{
        error::{ArtifactError, StorageError},
        id::RunId,
        metric::{MetricSeries, MetricsBatch},
        run::RunDocument,
        value::Value,
    },
    backend::{results, Backend, DirectoryCounter, IdAllocator},
    sanitize::{flatten, JsonFormat},
};

/// One of the files a run directory is made of.
trait RunFile {
    const SUFFIX: &'static str;

    fn file_name(command: &str) -> String {
        format!("{}{}", command, Self::SUFFIX)
    }
}

struct RunJson;
impl RunFile for RunJson {
    const SUFFIX: &'static str = "-run.json";
}

struct ConfigJson;
impl RunFile for ConfigJson {
    const SUFFIX: &'static str = "-config.json";
}

struct MetricsJson;
impl RunFile for MetricsJson {
    const SUFFIX: &'static str = "-metrics.json";
}

struct CapturedOut;
impl RunFile for CapturedOut {
    const SUFFIX: &'static str = "-cout.txt";
}

/// Names artifact writers may not use, since they would overwrite run state.
pub const RESERVED_SUFFIXES: [&str; 4] = [
    RunJson::SUFFIX,
    ConfigJson::SUFFIX,
    MetricsJson::SUFFIX,
    CapturedOut::SUFFIX,
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Replaces `path` with `contents` via a sibling temp file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let temp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&temp, contents).with_context(|| format!("writing {}", temp.display()))?;
    fs::rename(&temp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileStorageOptions {
    /// Digits numeric run ids are zero-padded to.
    pub id_width: usize,
    pub indent: Option<usize>,
    pub sort_keys: bool,
    pub ensure_ascii: bool,
}

impl Default for FileStorageOptions {
    fn default() -> Self {
        FileStorageOptions {
            id_width: 3,
            indent: Some(4),
            sort_keys: true,
            ensure_ascii: true,
        }
    }
}

impl FileStorageOptions {
    fn json_format(&self) -> JsonFormat {
        JsonFormat {
            indent: self.indent,
            sort_keys: self.sort_keys,
            ensure_ascii: self.ensure_ascii,
        }
    }
}

#[derive(Debug)]
pub struct FileStorage<A = DirectoryCounter> {
    base_dir: PathBuf,
    options: FileStorageOptions,
    allocator: A,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>, options: FileStorageOptions) -> Self {
        let base_dir = base_dir.into();
        let allocator = DirectoryCounter::new(&base_dir, options.id_width);
        FileStorage {
            base_dir,
            options,
            allocator,
        }
    }
}

impl<A: IdAllocator> FileStorage<A> {
    pub fn with_allocator(base_dir: impl Into<PathBuf>, options: FileStorageOptions, allocator: A) -> Self {
        FileStorage {
            base_dir: base_dir.into(),
            options,
            allocator,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn options(&self) -> &FileStorageOptions {
        &self.options
    }

    pub fn run_dir(&self, namespace: &str, id: &RunId) -> PathBuf {
        self.base_dir
            .join(namespace)
            .join(id.padded(self.options.id_width))
    }

    pub fn results_path(&self, namespace: &str) -> PathBuf {
        self.base_dir.join(namespace).join(results::INDEX_FILE)
    }

    /// Where a caller may write an artifact of the given name for `run`.
    pub fn artifact_path(&self, run: &RunDocument, name: &str) -> Result<PathBuf, ArtifactError> {
        if is_reserved(name) {
            warn!(name, "refusing reserved artifact path");
            return Err(ArtifactError::ReservedPath(name.to_owned()));
        }
        Ok(self.run_dir(run.namespace(), &run.id).join(name))
    }

    /// Reassembles a stored run document, config and captured output included.
    pub fn load_run(&self, namespace: &str, id: &RunId, command: &str) -> Result<Json, StorageError> {
        let dir = self.run_dir(namespace, id);
        let mut doc = read_json(&dir.join(RunJson::file_name(command)))?;
        let config = read_json(&dir.join(ConfigJson::file_name(command)))?;
        let cout_path = dir.join(CapturedOut::file_name(command));
        let captured_out = fs::read_to_string(&cout_path)
            .with_context(|| format!("reading {}", cout_path.display()))?;
        if let Json::Object(map) = &mut doc {
            map.insert("config".to_owned(), config);
            map.insert("captured_out".to_owned(), Json::String(captured_out));
        }
        Ok(doc)
    }

    /// The stored metric series of a run, empty if none were logged.
    pub fn load_metrics(&self, namespace: &str, id: &RunId, command: &str) -> Result<MetricsBatch, StorageError> {
        let path = self
            .run_dir(namespace, id)
            .join(MetricsJson::file_name(command));
        if !path.exists() {
            return Ok(MetricsBatch::new());
        }
        let stored: Map<String, Json> = serde_json::from_value(read_json(&path)?)
            .with_context(|| format!("{} is not a metrics mapping", path.display()))?;
        stored
            .into_iter()
            .map(|(name, series)| {
                let series: MetricSeries = serde_json::from_value(series)
                    .with_context(|| format!("decoding metric {}", name))?;
                Ok::<_, StorageError>((name, series))
            })
            .collect()
    }

    /// Writes `contents` into the run's directory, or skips quietly if the
    /// directory does not exist yet.
    fn write_run_file<F: RunFile>(&self, run: &RunDocument, contents: &[u8]) -> Result<(), StorageError> {
        let dir = self.run_dir(run.namespace(), &run.id);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "run directory missing, skipping write");
            return Ok(());
        }
        write_atomic(&dir.join(F::file_name(&run.command)), contents)
    }

    fn render(&self, value: &Json) -> Result<Vec<u8>, StorageError> {
        let mut text = self.options.json_format().to_string(value)?;
        text.push('\n');
        Ok(text.into_bytes())
    }
}

fn read_json(path: &Path) -> Result<Json, StorageError> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

impl<A: IdAllocator> Backend for FileStorage<A> {
    fn create_or_locate(&mut self, namespace: &str, id: Option<RunId>) -> Result<RunId, StorageError> {
        let id = match id {
            Some(id) => id,
            None => self.allocator.allocate(namespace)?,
        };
        let dir = self.run_dir(namespace, &id);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        info!(namespace, id = %id, dir = %dir.display(), "run directory ready");
        Ok(id)
    }

    fn write_run_document(&mut self, run: &RunDocument) -> Result<(), StorageError> {
        let mut doc = run.to_value();
        if let Value::Map(entries) = &mut doc {
            entries.retain(|(key, _)| !matches!(key.as_str(), Some("config") | Some("captured_out")));
        }
        let doc = self.render(&flatten(&doc))?;
        self.write_run_file::<RunJson>(run, &doc)?;
        let config = self.render(&flatten(&run.config))?;
        self.write_run_file::<ConfigJson>(run, &config)
    }

    fn write_captured_output(&mut self, run: &RunDocument) -> Result<(), StorageError> {
        self.write_run_file::<CapturedOut>(run, run.captured_out.as_bytes())
    }

    fn write_metrics(&mut self, run: &mut RunDocument, metrics: &MetricsBatch) -> Result<(), StorageError> {
        let mut stored = self.load_metrics(run.namespace(), &run.id, &run.command)?;
        stored.append(metrics);
        let mut json = Map::new();
        for (name, series) in stored.iter() {
            json.insert(name.to_owned(), serde_json::to_value(series)?);
        }
        let contents = self.render(&Json::Object(json))?;
        self.write_run_file::<MetricsJson>(run, &contents)
    }

    fn write_resource(&mut self, _run: &RunDocument, filename: &Path) -> Result<(), StorageError> {
        debug!(filename = %filename.display(), "recording resource reference");
        Ok(())
    }

    fn write_artifact(&mut self, run: &RunDocument, name: &str, filename: &Path) -> Result<(), ArtifactError> {
        let target = self.artifact_path(run, name)?;
        debug!(source = %filename.display(), target = %target.display(), "recording artifact reference");
        Ok(())
    }

    fn write_result(&mut self, run: &RunDocument) -> Result<(), StorageError> {
        let path = self.results_path(run.namespace());
        let row = run.id.padded(self.options.id_width);
        if results::record_result(&path, &row, &run.result)? {
            debug!(path = %path.display(), run = %row, "result index updated");
        }
        Ok(())
    }
}
