//! Analytics sink wire format.
//!
//! A sink batch looks like:
//!
//! ```json
//! {
//!   "data": [{"$company_revenue": 1200.5, "date": "2026-10-15", "company_id": "42"}],
//!   "source": "crm-sync"
//! }
//! ```
//!
//! The metric name is carried as a `$`-prefixed key whose value is the data
//! point; every other key except `date` is an attribute.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix marking the metric key of a data point.
pub const METRIC_KEY_PREFIX: char = '$';

/// `POST /` request body sent to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkBatch {
    pub data: Vec<SinkDataPoint>,
    pub source: String,
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct SinkDataPoint {
    /// Metric name without the `$` prefix.
    pub metric: String,
    pub value: f64,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub attributes: Map<String, Value>,
}

/// Errors when reading a data point back from JSON.
#[derive(Debug, thiserror::Error)]
pub enum SinkDataPointError {
    #[error("data point has no `$metric` key")]
    MissingMetric,
    #[error("data point has more than one `$metric` key")]
    DuplicateMetric,
    #[error("metric value is not a number")]
    NonNumericValue,
    #[error("data point has no `date`")]
    MissingDate,
}

impl From<SinkDataPoint> for Map<String, Value> {
    fn from(point: SinkDataPoint) -> Self {
        let mut map = Map::with_capacity(point.attributes.len() + 2);
        map.insert(
            format!("{METRIC_KEY_PREFIX}{}", point.metric),
            Value::from(point.value),
        );
        map.insert("date".to_owned(), Value::String(point.date));
        for (key, value) in point.attributes {
            map.entry(key).or_insert(value);
        }
        map
    }
}

impl TryFrom<Map<String, Value>> for SinkDataPoint {
    type Error = SinkDataPointError;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut metric_keys = map
            .keys()
            .filter(|k| k.starts_with(METRIC_KEY_PREFIX))
            .cloned();
        let key = metric_keys.next().ok_or(SinkDataPointError::MissingMetric)?;
        if metric_keys.next().is_some() {
            return Err(SinkDataPointError::DuplicateMetric);
        }
        let value = map
            .remove(&key)
            .and_then(|v| v.as_f64())
            .ok_or(SinkDataPointError::NonNumericValue)?;
        let date = match map.remove("date") {
            Some(Value::String(date)) => date,
            _ => return Err(SinkDataPointError::MissingDate),
        };
        Ok(Self {
            metric: key[METRIC_KEY_PREFIX.len_utf8()..].to_owned(),
            value,
            date,
            attributes: map,
        })
    }
}

/// Sink acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkResponse {
    pub status: String,
    #[serde(default)]
    pub metrics_processed: u64,
}
