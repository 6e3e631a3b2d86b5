//! The `experiments.csv` result index.
//!
//! One row per completed run, one column per result key. It is derived from
//! the per-run JSON and may be rebuilt from it; the JSON stays authoritative.

use anyhow::{anyhow, Context};
use serde_json::Value as Json;
use std::{collections::HashMap, path::Path};

use crate::{
    api::{error::StorageError, value::Value},
    sanitize::flatten,
};

pub(crate) const INDEX_FILE: &str = "experiments.csv";
pub(crate) const ID_COLUMN: &str = "experiment";
/// Column used for results that are a single value rather than a mapping.
pub(crate) const RESULT_COLUMN: &str = "result";

type Row = HashMap<String, String>;

fn cell(value: &Value) -> String {
    match flatten(value) {
        Json::Null => String::new(),
        Json::String(s) => s,
        other => other.to_string(),
    }
}

fn result_cells(result: &Value) -> Vec<(String, String)> {
    match result {
        Value::Map(entries) => entries
            .iter()
            .map(|(k, v)| (k.to_string(), cell(v)))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![(RESULT_COLUMN.to_owned(), cell(other))],
    }
}

fn read_index(path: &Path) -> Result<(Vec<String>, Vec<Row>), StorageError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        rows.push(
            columns
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_owned))
                .collect(),
        );
    }
    Ok((columns, rows))
}

fn render_index(columns: &[String], rows: &[Row]) -> Result<Vec<u8>, StorageError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(
            columns
                .iter()
                .map(|column| row.get(column).map_or("", String::as_str)),
        )?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("flushing the result index failed: {}", err.error()))
}

/// Merges one run's result into the index at `path`.
///
/// Columns are the union of the existing ones and the result's keys. An
/// existing row for `run` is updated in place, keeping values the new result
/// does not mention. Returns `false` when the result had nothing to index.
pub(crate) fn record_result(path: &Path, run: &str, result: &Value) -> Result<bool, StorageError> {
    let cells = result_cells(result);
    if cells.is_empty() {
        return Ok(false);
    }

    let (mut columns, mut rows) = if path.exists() {
        read_index(path)?
    } else {
        (vec![ID_COLUMN.to_owned()], Vec::new())
    };
    if !columns.iter().any(|c| c == ID_COLUMN) {
        columns.insert(0, ID_COLUMN.to_owned());
    }
    for (key, _) in &cells {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }

    let existing = rows
        .iter_mut()
        .find(|row| row.get(ID_COLUMN).map(String::as_str) == Some(run));
    match existing {
        Some(row) => row.extend(cells),
        None => {
            let mut row: Row = cells.into_iter().collect();
            row.insert(ID_COLUMN.to_owned(), run.to_owned());
            rows.push(row);
        }
    }

    let contents = render_index(&columns, &rows)?;
    super::file::write_atomic(path, &contents)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(entries: Vec<(&str, Value)>) -> Value {
        entries.into_iter().collect()
    }

    #[test]
    fn merges_into_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        std::fs::write(&path, "experiment,accuracy\n000,0.5\n").unwrap();

        record_result(&path, "000", &result(vec![("loss", 0.1.into())])).unwrap();

        let (columns, rows) = read_index(&path).unwrap();
        assert_eq!(columns, ["experiment", "accuracy", "loss"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["experiment"], "000");
        assert_eq!(rows[0]["accuracy"], "0.5");
        assert_eq!(rows[0]["loss"], "0.1");
    }

    #[test]
    fn appends_new_runs_and_fills_missing_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);

        record_result(&path, "000", &result(vec![("accuracy", 0.5.into())])).unwrap();
        record_result(&path, "001", &result(vec![("loss", 0.25.into())])).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "experiment,accuracy,loss\n000,0.5,\n001,,0.25\n");
    }

    #[test]
    fn scalar_results_use_result_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);

        record_result(&path, "000", &Value::Int(42)).unwrap();

        let (columns, rows) = read_index(&path).unwrap();
        assert_eq!(columns, ["experiment", "result"]);
        assert_eq!(rows[0]["result"], "42");
    }

    #[test]
    fn empty_results_are_not_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);

        assert!(!record_result(&path, "000", &Value::Null).unwrap());
        assert!(!record_result(&path, "000", &Value::map()).unwrap());
        assert!(!path.exists());
    }
}
