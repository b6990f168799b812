//! Row layouts for the fingerprinted tables
//!
//! Five layouts exist: three sample/series layouts selected by write mode and
//! the two series metadata layouts. Each maps to a fixed Arrow schema.

mod layout;
mod rows;

pub use layout::{
    RowLayout, FINGERPRINT_FIELD, LABELS_FIELD, METRIC_NAME_FIELD, TIMESTAMP_FIELD, VALUE_FIELD,
};
pub use rows::{
    rows_to_batch, InlineSampleRow, MetricFingerprintRow, Row, SampleRow, SeriesLabelsRow,
    SeriesRow,
};
