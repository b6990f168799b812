//! Decoded remote-write batch types
//!
//! These mirror the Prometheus remote-write message after protobuf decoding.
//! Decoding itself happens upstream; the writer only sees these structures.

use serde::{Deserialize, Serialize};

/// Reserved label holding the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A batch of time series submitted together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub timeseries: Vec<TimeSeries>,
}

impl WriteRequest {
    pub fn new(timeseries: Vec<TimeSeries>) -> Self {
        Self { timeseries }
    }

    /// Total number of samples across all series
    pub fn sample_count(&self) -> usize {
        self.timeseries.iter().map(|ts| ts.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.timeseries.is_empty()
    }
}

/// Time series in Prometheus format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Vec<Label>,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    /// Build a series from a metric name and label pairs, `__name__` first.
    pub fn new<N, I, K, V>(metric_name: N, labels: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut all = vec![Label::new(METRIC_NAME_LABEL, metric_name)];
        all.extend(labels.into_iter().map(|(k, v)| Label::new(k, v)));
        Self {
            labels: all,
            samples: Vec::new(),
        }
    }

    pub fn with_sample(mut self, timestamp_ms: i64, value: f64) -> Self {
        self.samples.push(Sample {
            timestamp_ms,
            value,
        });
        self
    }
}

/// Label key-value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sample with timestamp and value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}
