//! Typed rows and their conversion to Arrow record batches

use super::layout::RowLayout;
use crate::fingerprint::Fingerprint;
use crate::{Error, Result};

use arrow_array::builder::{ListBuilder, MapBuilder, MapFieldNames, StringBuilder};
use arrow_array::{
    ArrayRef, Float64Array, RecordBatch, StringArray, TimestampNanosecondArray, UInt64Array,
};
use arrow_schema::{Field, Schema};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One sample with its labels inlined
#[derive(Debug, Clone, PartialEq)]
pub struct InlineSampleRow {
    pub timestamp_ns: i64,
    pub metric_name: Arc<str>,
    /// `name=value` tokens, shared by every sample of the series
    pub labels: Arc<[String]>,
    pub value: f64,
}

/// One sample referencing its series by fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub timestamp_ns: i64,
    pub metric_name: Arc<str>,
    pub fingerprint: Fingerprint,
    pub value: f64,
}

/// One series with its canonical label string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRow {
    pub metric_name: String,
    pub fingerprint: Fingerprint,
    pub labels: String,
}

/// Metric name to fingerprint mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFingerprintRow {
    pub metric_name: String,
    pub fingerprint: Fingerprint,
}

/// Fingerprint to sorted label mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesLabelsRow {
    pub metric_name: String,
    pub fingerprint: Fingerprint,
    pub labels: BTreeMap<String, String>,
}

/// A row staged for one table
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    InlineSample(InlineSampleRow),
    Sample(SampleRow),
    Series(SeriesRow),
    MetricFingerprint(MetricFingerprintRow),
    SeriesLabels(SeriesLabelsRow),
}

impl Row {
    pub fn layout(&self) -> RowLayout {
        match self {
            Row::InlineSample(_) => RowLayout::InlineSamples,
            Row::Sample(_) => RowLayout::FingerprintSamples,
            Row::Series(_) => RowLayout::Series,
            Row::MetricFingerprint(_) => RowLayout::MetricFingerprint,
            Row::SeriesLabels(_) => RowLayout::SeriesLabels,
        }
    }
}

macro_rules! expect_rows {
    ($rows:expr, $variant:ident, $layout:expr) => {
        $rows
            .iter()
            .map(|row| match row {
                Row::$variant(r) => Ok(r),
                other => Err(Error::InvalidSchema(format!(
                    "{} row staged into {} table",
                    other.layout(),
                    $layout
                ))),
            })
            .collect::<Result<Vec<_>>>()?
    };
}

/// Build a record batch of `layout` from staged rows.
///
/// Every row must have the given layout.
pub fn rows_to_batch(layout: RowLayout, rows: &[Row]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = match layout {
        RowLayout::InlineSamples => {
            let rows = expect_rows!(rows, InlineSample, layout);
            let mut labels = ListBuilder::new(StringBuilder::new());
            for row in &rows {
                for token in row.labels.iter() {
                    labels.values().append_value(token);
                }
                labels.append(true);
            }
            vec![
                timestamps(rows.iter().map(|r| r.timestamp_ns)),
                Arc::new(StringArray::from_iter_values(
                    rows.iter().map(|r| r.metric_name.as_ref()),
                )),
                Arc::new(labels.finish()),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.value))),
            ]
        }
        RowLayout::FingerprintSamples => {
            let rows = expect_rows!(rows, Sample, layout);
            vec![
                timestamps(rows.iter().map(|r| r.timestamp_ns)),
                Arc::new(StringArray::from_iter_values(
                    rows.iter().map(|r| r.metric_name.as_ref()),
                )),
                fingerprints(rows.iter().map(|r| r.fingerprint)),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.value))),
            ]
        }
        RowLayout::Series => {
            let rows = expect_rows!(rows, Series, layout);
            vec![
                Arc::new(StringArray::from_iter_values(
                    rows.iter().map(|r| r.metric_name.as_str()),
                )),
                fingerprints(rows.iter().map(|r| r.fingerprint)),
                Arc::new(StringArray::from_iter_values(
                    rows.iter().map(|r| r.labels.as_str()),
                )),
            ]
        }
        RowLayout::MetricFingerprint => {
            let rows = expect_rows!(rows, MetricFingerprint, layout);
            vec![
                Arc::new(StringArray::from_iter_values(
                    rows.iter().map(|r| r.metric_name.as_str()),
                )),
                fingerprints(rows.iter().map(|r| r.fingerprint)),
            ]
        }
        RowLayout::SeriesLabels => {
            let rows = expect_rows!(rows, SeriesLabels, layout);
            let names = MapFieldNames {
                entry: "entries".to_string(),
                key: "keys".to_string(),
                value: "values".to_string(),
            };
            let mut labels = MapBuilder::new(Some(names), StringBuilder::new(), StringBuilder::new());
            for row in &rows {
                // BTreeMap iteration is key-ordered
                for (name, value) in &row.labels {
                    labels.keys().append_value(name);
                    labels.values().append_value(value);
                }
                labels.append(true)?;
            }
            vec![
                Arc::new(StringArray::from_iter_values(
                    rows.iter().map(|r| r.metric_name.as_str()),
                )),
                fingerprints(rows.iter().map(|r| r.fingerprint)),
                Arc::new(labels.finish()),
            ]
        }
    };

    // Builder output types win over the template so nested field naming never
    // drifts between arrow releases.
    let template = layout.schema();
    let fields: Vec<Field> = template
        .fields()
        .iter()
        .zip(&columns)
        .map(|(field, column)| {
            field
                .as_ref()
                .clone()
                .with_data_type(column.data_type().clone())
        })
        .collect();

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

fn timestamps(values: impl Iterator<Item = i64>) -> ArrayRef {
    Arc::new(TimestampNanosecondArray::from_iter_values(values).with_timezone("UTC"))
}

fn fingerprints(values: impl Iterator<Item = Fingerprint>) -> ArrayRef {
    Arc::new(UInt64Array::from_iter_values(values.map(Fingerprint::as_u64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FINGERPRINT_FIELD, LABELS_FIELD};
    use arrow_array::cast::AsArray;
    use arrow_array::types::UInt64Type;
    use arrow_array::Array;

    fn inline(ts: i64, labels: &[&str]) -> Row {
        Row::InlineSample(InlineSampleRow {
            timestamp_ns: ts,
            metric_name: Arc::from("cpu_usage"),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            value: 0.5,
        })
    }

    #[test]
    fn test_inline_batch() {
        let rows = vec![inline(1, &["host=a", "env=prod"]), inline(2, &[])];
        let batch = rows_to_batch(RowLayout::InlineSamples, &rows).unwrap();

        assert_eq!(batch.num_rows(), 2);
        let labels = batch.column_by_name(LABELS_FIELD).unwrap().as_list::<i32>();
        assert_eq!(labels.value(0).len(), 2);
        assert_eq!(labels.value(1).len(), 0);
        let first = labels.value(0);
        assert_eq!(first.as_string::<i32>().value(0), "host=a");
    }

    #[test]
    fn test_series_labels_batch_keeps_key_order() {
        let mut labels = BTreeMap::new();
        labels.insert("zone".to_string(), "b".to_string());
        labels.insert("__name__".to_string(), "up".to_string());
        labels.insert("job".to_string(), "node".to_string());

        let rows = vec![Row::SeriesLabels(SeriesLabelsRow {
            metric_name: "up".to_string(),
            fingerprint: Fingerprint::from_u64(42),
            labels,
        })];
        let batch = rows_to_batch(RowLayout::SeriesLabels, &rows).unwrap();

        let map = batch.column_by_name(LABELS_FIELD).unwrap().as_map();
        let keys = map.keys().as_string::<i32>();
        let keys: Vec<&str> = (0..keys.len()).map(|i| keys.value(i)).collect();
        assert_eq!(keys, vec!["__name__", "job", "zone"]);

        let fp = batch
            .column_by_name(FINGERPRINT_FIELD)
            .unwrap()
            .as_primitive::<UInt64Type>();
        assert_eq!(fp.value(0), 42);
    }

    #[test]
    fn test_mixed_layouts_rejected() {
        let rows = vec![
            inline(1, &[]),
            Row::MetricFingerprint(MetricFingerprintRow {
                metric_name: "up".to_string(),
                fingerprint: Fingerprint::from_u64(1),
            }),
        ];
        let err = rows_to_batch(RowLayout::InlineSamples, &rows).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn test_empty_rows_give_empty_batch() {
        let batch = rows_to_batch(RowLayout::MetricFingerprint, &[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
    }
}
