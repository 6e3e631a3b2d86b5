use std::collections::HashMap;

use crate::api::{
    error::EventError,
    metric::{linearize_metrics, ScalarMetric},
    observer::Observer,
};

/// Buffers scalar measurements between submissions.
///
/// The running experiment logs into this, and whoever drives the heartbeat
/// [submits][MetricsLogger::submit] the buffer to an [`Observer`] in one batch.
pub struct MetricsLogger {
    buffer: Vec<ScalarMetric>,
    last_steps: HashMap<String, i64>,
}

impl Default for MetricsLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsLogger {
    pub fn new() -> Self {
        MetricsLogger {
            buffer: Vec::with_capacity(1000),
            last_steps: HashMap::new(),
        }
    }

    /// Logs `value` for `name` now.
    ///
    /// Without an explicit step the metric's previous step plus one is used,
    /// starting at zero.
    pub fn log_scalar(&mut self, name: &str, value: f64, step: Option<i64>) {
        let step = match step {
            Some(step) => step,
            None => self.last_steps.get(name).map_or(0, |last| last + 1),
        };
        self.last_steps.insert(name.to_owned(), step);
        self.buffer.push(ScalarMetric::new(name, step, value));
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Sends everything buffered so far and clears the buffer.
    ///
    /// On failure the buffer is kept, so the caller may submit again.
    pub fn submit<O: Observer + ?Sized>(&mut self, observer: &mut O) -> Result<(), EventError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        observer.log_metrics(&linearize_metrics(&self.buffer))?;
        self.buffer.clear();
        Ok(())
    }
}
