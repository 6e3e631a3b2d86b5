use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// One scalar measurement, as logged by the running experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarMetric {
    pub name: String,
    pub step: i64,
    pub timestamp: OffsetDateTime,
    pub value: f64,
}

impl ScalarMetric {
    /// A measurement taken now.
    pub fn new(name: impl Into<String>, step: i64, value: f64) -> Self {
        ScalarMetric {
            name: name.into(),
            step,
            timestamp: crate::timestamp(),
            value,
        }
    }
}

/// The time series of one metric.
///
/// The three columns always have the same length. Timestamps are kept in
/// their canonical RFC 3339 text form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub steps: Vec<i64>,
    #[serde(with = "stored_values")]
    pub values: Vec<f64>,
    pub timestamps: Vec<String>,
}

impl MetricSeries {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn push(&mut self, step: i64, value: f64, timestamp: OffsetDateTime) {
        self.steps.push(step);
        self.values.push(value);
        self.timestamps.push(format_timestamp(timestamp));
    }

    /// Appends `other` after the existing points. Nothing is merged,
    /// deduplicated or re-sorted.
    pub fn append(&mut self, other: &MetricSeries) {
        self.steps.extend_from_slice(&other.steps);
        self.values.extend_from_slice(&other.values);
        self.timestamps.extend_from_slice(&other.timestamps);
    }
}

/// Metric series keyed by name, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsBatch {
    series: Vec<(String, MetricSeries)>,
}

impl MetricsBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&MetricSeries> {
        self.series
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, series)| series)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricSeries)> {
        self.series.iter().map(|(name, series)| (name.as_str(), series))
    }

    fn entry(&mut self, name: &str) -> &mut MetricSeries {
        let index = match self.series.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.series.push((name.to_owned(), MetricSeries::default()));
                self.series.len() - 1
            }
        };
        &mut self.series[index].1
    }

    pub fn push(&mut self, metric: &ScalarMetric) {
        self.entry(&metric.name)
            .push(metric.step, metric.value, metric.timestamp);
    }

    /// Appends every series of `other` to the series of the same name,
    /// starting a new series for names not seen before.
    pub fn append(&mut self, other: &MetricsBatch) {
        for (name, series) in other.iter() {
            self.entry(name).append(series);
        }
    }
}

impl FromIterator<(String, MetricSeries)> for MetricsBatch {
    fn from_iter<I: IntoIterator<Item = (String, MetricSeries)>>(iter: I) -> Self {
        let mut batch = MetricsBatch::new();
        for (name, series) in iter {
            batch.entry(&name).append(&series);
        }
        batch
    }
}

/// Groups a flat log of measurements by metric name.
///
/// Names keep the order in which they were first seen, and the measurements
/// of each name keep their relative order.
pub fn linearize_metrics<'a>(entries: impl IntoIterator<Item = &'a ScalarMetric>) -> MetricsBatch {
    let mut batch = MetricsBatch::new();
    for entry in entries {
        batch.push(entry);
    }
    batch
}

/// Metric values as persisted.
///
/// JSON has no number for NaN and the infinities, so those are stored as the
/// text `flatten` uses for them (`NaN`, `inf`, `-inf`). Reading also accepts
/// `null` for a lost non-finite value.
pub(crate) mod stored_values {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::{Number, Value as Json};

    pub fn to_json(values: &[f64]) -> Json {
        Json::Array(
            values
                .iter()
                .map(|&value| match Number::from_f64(value) {
                    Some(n) => Json::Number(n),
                    None => Json::String(value.to_string()),
                })
                .collect(),
        )
    }

    pub fn from_json(stored: Vec<Json>) -> Result<Vec<f64>, String> {
        stored
            .into_iter()
            .map(|value| match value {
                Json::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| format!("metric value {} is not a float", n)),
                Json::String(text) => text
                    .parse()
                    .map_err(|_| format!("invalid metric value {:?}", text)),
                Json::Null => Ok(f64::NAN),
                other => Err(format!("invalid metric value {}", other)),
            })
            .collect()
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        to_json(values).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        from_json(Vec::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

pub(crate) fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn logged() -> Vec<ScalarMetric> {
        let t = datetime!(1999-05-04 03:02:01 UTC);
        let entry = |name: &str, step, value, offset| ScalarMetric {
            name: name.to_owned(),
            step,
            timestamp: t + time::Duration::seconds(offset),
            value,
        };
        vec![
            entry("training.loss", 10, 1.0, 0),
            entry("training.loss", 20, 2.0, 1),
            entry("training.accuracy", 10, 100.0, 2),
            entry("training.loss", 30, 3.0, 3),
            entry("training.accuracy", 20, 200.0, 4),
        ]
    }

    #[test]
    fn linearize_groups_by_first_seen_name() {
        let batch = linearize_metrics(&logged());
        let names: Vec<_> = batch.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["training.loss", "training.accuracy"]);

        let loss = batch.get("training.loss").unwrap();
        assert_eq!(loss.steps, [10, 20, 30]);
        assert_eq!(loss.values, [1.0, 2.0, 3.0]);
        assert_eq!(loss.timestamps[0], "1999-05-04T03:02:01Z");
    }

    #[test]
    fn linearized_timestamps_are_monotonic() {
        let batch = linearize_metrics(&logged());
        for (_, series) in batch.iter() {
            assert!(series.timestamps.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn append_concatenates_without_sorting() {
        let entries = logged();
        let mut first = linearize_metrics(&entries[..3]);
        let second = linearize_metrics(&entries[3..]);
        first.append(&second);

        let loss = first.get("training.loss").unwrap();
        assert_eq!(loss.steps, [10, 20, 30]);
        let accuracy = first.get("training.accuracy").unwrap();
        assert_eq!(accuracy.steps, [10, 20]);
        assert_eq!(accuracy.values, [100.0, 200.0]);

        let mut again = first.clone();
        again.append(&linearize_metrics(&entries[..1]));
        assert_eq!(again.get("training.loss").unwrap().steps, [10, 20, 30, 10]);
    }

    #[test]
    fn non_finite_values_survive_serialization() {
        let mut series = MetricSeries::default();
        let t = datetime!(1999-05-04 03:02:01 UTC);
        series.push(0, f64::NAN, t);
        series.push(1, f64::INFINITY, t);
        series.push(2, f64::NEG_INFINITY, t);
        series.push(3, 0.5, t);

        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json["values"], serde_json::json!(["NaN", "inf", "-inf", 0.5]));

        let back: MetricSeries = serde_json::from_value(json).unwrap();
        assert!(back.values[0].is_nan());
        assert_eq!(back.values[1..], [f64::INFINITY, f64::NEG_INFINITY, 0.5]);
    }

    #[test]
    fn null_values_read_back_as_nan() {
        let back: MetricSeries = serde_json::from_str(
            r#"{"steps": [0, 1], "values": [null, 2], "timestamps": ["a", "b"]}"#,
        )
        .unwrap();
        assert!(back.values[0].is_nan());
        assert_eq!(back.values[1], 2.0);
    }

    #[test]
    fn scalar_metric_is_stamped_now() {
        let before = crate::timestamp();
        let metric = ScalarMetric::new("loss", 1, 0.5);
        assert!(metric.timestamp >= before);
    }
}
