//! Runs as documents in an embedded SQLite database.
//!
//! Three collections: `runs` holds one JSON document per run, `metrics` one
//! record per `(name, run_id)` series, and `blobs` the bytes of resources and
//! artifacts addressed by file name.

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;
use std::{fs, path::Path};
use tracing::{debug, info};
use ulid::Ulid;

use crate::{
    api::{
        error::{ArtifactError, StorageError},
        id::RunId,
        metric::{format_timestamp, stored_values, MetricSeries, MetricsBatch},
        run::RunDocument,
        value::Value,
    },
    backend::{Backend, IdAllocator, UlidAllocator},
    sanitize::{bson_safe, flatten},
};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY,
  namespace TEXT NOT NULL,
  document TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metrics (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  run_id TEXT NOT NULL,
  steps TEXT NOT NULL,
  vals TEXT NOT NULL,
  timestamps TEXT NOT NULL,
  UNIQUE (name, run_id)
);

CREATE TABLE IF NOT EXISTS blobs (
  filename TEXT PRIMARY KEY,
  content BLOB NOT NULL,
  length INTEGER NOT NULL,
  uploaded_at TEXT NOT NULL
);
";

/// Blob name an artifact of `run` is stored under.
pub fn artifact_blob_name(run: &RunId, name: &str) -> String {
    format!("artifact://runs/{}/{}", run, name)
}

/// Adds a `{name, id}` reference to `info.metrics` unless `name` already has one.
fn register_metric(info: &mut Value, name: &str, id: &str) {
    if !matches!(info.get("metrics"), Some(Value::List(_))) {
        info.insert("metrics", Value::List(Vec::new()));
    }
    if let Some(Value::List(refs)) = info.get_mut("metrics") {
        let known = refs
            .iter()
            .any(|r| r.get("name").and_then(Value::as_str) == Some(name));
        if !known {
            refs.push(vec![("name", name), ("id", id)].into_iter().collect());
        }
    }
}

/// Rebuilds a series from its stored JSON columns.
fn decode_series(steps: &str, values: &str, timestamps: &str) -> Result<MetricSeries, StorageError> {
    let values = serde_json::from_str(values).context("decoding metric values")?;
    Ok(MetricSeries {
        steps: serde_json::from_str(steps).context("decoding metric steps")?,
        values: stored_values::from_json(values).map_err(anyhow::Error::msg)?,
        timestamps: serde_json::from_str(timestamps).context("decoding metric timestamps")?,
    })
}

fn encode_values(values: &[f64]) -> Result<String, StorageError> {
    Ok(serde_json::to_string(&stored_values::to_json(values))?)
}

pub struct DatabaseStorage<A = UlidAllocator> {
    conn: Connection,
    allocator: A,
}

impl DatabaseStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::with_connection(conn, UlidAllocator)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, UlidAllocator)
    }
}

impl<A: IdAllocator> DatabaseStorage<A> {
    pub fn with_connection(conn: Connection, allocator: A) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)
            .context("creating run store schema")?;
        Ok(DatabaseStorage { conn, allocator })
    }

    /// The stored document of a run, `None` if it was never written.
    pub fn load_run(&self, id: &RunId) -> Result<Option<Json>, StorageError> {
        let document: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM runs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        document
            .map(|text| serde_json::from_str(&text).context("decoding run document"))
            .transpose()
    }

    /// Looks up the series `name` of `run`, with its record id.
    pub fn metric_series(&self, run: &RunId, name: &str) -> Result<Option<(String, MetricSeries)>, StorageError> {
        let row: Option<(String, String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, steps, vals, timestamps FROM metrics WHERE name = ?1 AND run_id = ?2",
                params![name, run.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let (id, steps, values, timestamps) = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        Ok(Some((id, decode_series(&steps, &values, &timestamps)?)))
    }

    pub fn blob_exists(&self, filename: &str) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM blobs WHERE filename = ?1",
                params![filename],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn blob(&self, filename: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let content = self
            .conn
            .query_row(
                "SELECT content FROM blobs WHERE filename = ?1",
                params![filename],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }

    pub fn run_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(usize::try_from(count)?)
    }

    pub fn metric_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
        Ok(usize::try_from(count)?)
    }

    fn put_blob(&self, filename: &str, filepath: &Path) -> Result<(), StorageError> {
        let content = fs::read(filepath).with_context(|| format!("reading {}", filepath.display()))?;
        self.conn.execute(
            "INSERT INTO blobs (filename, content, length, uploaded_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(filename) DO UPDATE SET
               content = excluded.content,
               length = excluded.length,
               uploaded_at = excluded.uploaded_at",
            params![
                filename,
                content,
                i64::try_from(content.len())?,
                format_timestamp(crate::timestamp())
            ],
        )?;
        debug!(filename, bytes = content.len(), "stored blob");
        Ok(())
    }
}

impl<A: IdAllocator> Backend for DatabaseStorage<A> {
    fn create_or_locate(&mut self, namespace: &str, id: Option<RunId>) -> Result<RunId, StorageError> {
        let id = match id {
            Some(id) => id,
            None => self.allocator.allocate(namespace)?,
        };
        info!(namespace, id = %id, "run registered");
        Ok(id)
    }

    fn write_run_document(&mut self, run: &RunDocument) -> Result<(), StorageError> {
        let document = flatten(&bson_safe(&run.to_value()));
        self.conn.execute(
            "INSERT INTO runs (id, namespace, document, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
               namespace = excluded.namespace,
               document = excluded.document,
               updated_at = excluded.updated_at",
            params![
                run.id.to_string(),
                run.namespace(),
                serde_json::to_string(&document)?,
                format_timestamp(crate::timestamp())
            ],
        )?;
        debug!(id = %run.id, status = %run.status, "run document written");
        Ok(())
    }

    fn write_captured_output(&mut self, _run: &RunDocument) -> Result<(), StorageError> {
        // Part of the run document.
        Ok(())
    }

    fn write_metrics(&mut self, run: &mut RunDocument, metrics: &MetricsBatch) -> Result<(), StorageError> {
        let run_id = run.id.to_string();
        let mut registered = Vec::new();
        let tx = self.conn.transaction()?;
        for (name, incoming) in metrics.iter() {
            let existing: Option<(String, String, String, String)> = tx
                .query_row(
                    "SELECT id, steps, vals, timestamps FROM metrics WHERE name = ?1 AND run_id = ?2",
                    params![name, run_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let id = match existing {
                Some((id, steps, values, timestamps)) => {
                    let mut series = decode_series(&steps, &values, &timestamps)?;
                    series.append(incoming);
                    tx.execute(
                        "UPDATE metrics SET steps = ?1, vals = ?2, timestamps = ?3 WHERE id = ?4",
                        params![
                            serde_json::to_string(&series.steps)?,
                            encode_values(&series.values)?,
                            serde_json::to_string(&series.timestamps)?,
                            id
                        ],
                    )?;
                    id
                }
                None => {
                    let id = Ulid::new().to_string();
                    tx.execute(
                        "INSERT INTO metrics (id, name, run_id, steps, vals, timestamps)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            id,
                            name,
                            run_id,
                            serde_json::to_string(&incoming.steps)?,
                            encode_values(&incoming.values)?,
                            serde_json::to_string(&incoming.timestamps)?
                        ],
                    )?;
                    debug!(name, id = %id, run = %run_id, "metric series created");
                    id
                }
            };
            registered.push((name, id));
        }
        tx.commit()?;
        for (name, id) in registered {
            register_metric(&mut run.info, name, &id);
        }
        Ok(())
    }

    fn write_resource(&mut self, _run: &RunDocument, filename: &Path) -> Result<(), StorageError> {
        let name = filename.to_string_lossy();
        if self.blob_exists(&name)? {
            debug!(filename = %name, "resource already stored");
            return Ok(());
        }
        self.put_blob(&name, filename)
    }

    fn write_artifact(&mut self, run: &RunDocument, name: &str, filename: &Path) -> Result<(), ArtifactError> {
        self.put_blob(&artifact_blob_name(&run.id, name), filename)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunDocument {
        let descriptor = crate::api::observer::RunDescriptor {
            experiment: vec![("name", "exp")].into_iter().collect(),
            command: "main".to_owned(),
            host: Value::map(),
            config: Value::map(),
            meta: Value::map(),
        };
        RunDocument::new(RunId::from("r"), &descriptor, crate::api::run::RunStatus::Running)
    }

    #[test]
    fn metric_refs_are_not_duplicated() {
        let mut info = Value::map();
        register_metric(&mut info, "loss", "A");
        register_metric(&mut info, "loss", "A");
        register_metric(&mut info, "accuracy", "B");

        let refs = info.get("metrics").and_then(Value::as_list).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].get("id").and_then(Value::as_str), Some("B"));
    }

    #[test]
    fn non_finite_values_do_not_block_appends() {
        let mut storage = DatabaseStorage::open_in_memory().unwrap();
        let mut run = run();
        let t = crate::timestamp();
        let batch = |step, value| {
            let mut series = MetricSeries::default();
            series.push(step, value, t);
            vec![("loss".to_owned(), series)].into_iter().collect::<MetricsBatch>()
        };

        storage.write_metrics(&mut run, &batch(0, f64::INFINITY)).unwrap();
        storage.write_metrics(&mut run, &batch(1, f64::NAN)).unwrap();
        storage.write_metrics(&mut run, &batch(2, 0.5)).unwrap();

        let (_, loss) = storage.metric_series(&run.id, "loss").unwrap().unwrap();
        assert_eq!(loss.steps, [0, 1, 2]);
        assert_eq!(loss.values[0], f64::INFINITY);
        assert!(loss.values[1].is_nan());
        assert_eq!(loss.values[2], 0.5);
    }

    #[test]
    fn artifact_blobs_are_scoped_by_run() {
        assert_eq!(
            artifact_blob_name(&RunId::from("FEDCBA"), "mysetup"),
            "artifact://runs/FEDCBA/mysetup"
        );
    }

    #[test]
    fn resources_are_uploaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "first").unwrap();

        let mut storage = DatabaseStorage::open_in_memory().unwrap();
        let run = run();

        storage.write_resource(&run, &file).unwrap();
        fs::write(&file, "second").unwrap();
        storage.write_resource(&run, &file).unwrap();

        let name = file.to_string_lossy();
        assert_eq!(storage.blob(&name).unwrap().as_deref(), Some(&b"first"[..]));
    }
}
