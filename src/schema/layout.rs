//! Table layouts and their Arrow schemas

use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef, TimeUnit};
use std::sync::Arc;

/// Standard field names
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const METRIC_NAME_FIELD: &str = "metric_name";
pub const FINGERPRINT_FIELD: &str = "fingerprint";
pub const LABELS_FIELD: &str = "labels";
pub const VALUE_FIELD: &str = "value";

/// Physical row layout of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowLayout {
    /// (timestamp, metric_name, labels: list<utf8>, value)
    InlineSamples,
    /// (timestamp, metric_name, fingerprint, value)
    FingerprintSamples,
    /// (metric_name, fingerprint, labels: utf8)
    Series,
    /// (metric_name, fingerprint)
    MetricFingerprint,
    /// (metric_name, fingerprint, labels: map<utf8, utf8>)
    SeriesLabels,
}

impl RowLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowLayout::InlineSamples => "inline_samples",
            RowLayout::FingerprintSamples => "fingerprint_samples",
            RowLayout::Series => "series",
            RowLayout::MetricFingerprint => "metric_fingerprint",
            RowLayout::SeriesLabels => "series_labels",
        }
    }

    /// Arrow schema of the layout
    pub fn schema(&self) -> SchemaRef {
        let fields = match self {
            RowLayout::InlineSamples => vec![
                timestamp_field(),
                metric_name_field(),
                Field::new(LABELS_FIELD, inline_labels_type(), false),
                value_field(),
            ],
            RowLayout::FingerprintSamples => vec![
                timestamp_field(),
                metric_name_field(),
                fingerprint_field(),
                value_field(),
            ],
            RowLayout::Series => vec![
                metric_name_field(),
                fingerprint_field(),
                Field::new(LABELS_FIELD, DataType::Utf8, false),
            ],
            RowLayout::MetricFingerprint => vec![metric_name_field(), fingerprint_field()],
            RowLayout::SeriesLabels => vec![
                metric_name_field(),
                fingerprint_field(),
                Field::new(LABELS_FIELD, label_map_type(), false),
            ],
        };
        Arc::new(Schema::new(fields))
    }
}

impl std::fmt::Display for RowLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn timestamp_field() -> Field {
    Field::new(
        TIMESTAMP_FIELD,
        DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
        false,
    )
}

fn metric_name_field() -> Field {
    Field::new(METRIC_NAME_FIELD, DataType::Utf8, false)
}

fn fingerprint_field() -> Field {
    Field::new(FINGERPRINT_FIELD, DataType::UInt64, false)
}

fn value_field() -> Field {
    Field::new(VALUE_FIELD, DataType::Float64, false)
}

/// `ListBuilder<StringBuilder>` output type
pub(crate) fn inline_labels_type() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
}

/// `MapBuilder<StringBuilder, StringBuilder>` output type.
///
/// Keys are written in sorted order but the flag stays unset, matching what
/// the builder reports.
pub(crate) fn label_map_type() -> DataType {
    let entries = Fields::from(vec![
        Field::new("keys", DataType::Utf8, false),
        Field::new("values", DataType::Utf8, true),
    ]);
    DataType::Map(
        Arc::new(Field::new("entries", DataType::Struct(entries), false)),
        false,
    )
}
