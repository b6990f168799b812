//! Batch writer
//!
//! Turns a decoded write request into rows for one of four table layouts.
//! Each call is all-or-nothing: rows are staged in a single transaction and
//! any failure drops it, rolling back everything staged so far. The dedup
//! mode is the exception: it only writes series metadata, registering each
//! series in its own unit of work.

use crate::config::{MetadataCacheConfig, TableConfig};
use crate::fingerprint::{LabelCanonicalizer, SeriesIdentity};
use crate::metadata::{MetadataTables, Registration, SeriesMetadataStore};
use crate::model::WriteRequest;
use crate::schema::{InlineSampleRow, Row, SampleRow, SeriesRow};
use crate::storage::WritePool;
use crate::{Error, Result};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Which table layout a batch is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// One row per sample with the raw label list inline
    Inline,
    /// One row per sample keyed by fingerprint
    FingerprintSamples,
    /// One row per distinct series in the batch
    FingerprintSeries,
    /// Register unseen series in the metadata tables
    FingerprintSeriesDedup,
}

impl WriteMode {
    pub const ALL: [WriteMode; 4] = [
        WriteMode::Inline,
        WriteMode::FingerprintSamples,
        WriteMode::FingerprintSeries,
        WriteMode::FingerprintSeriesDedup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Inline => "inline",
            WriteMode::FingerprintSamples => "samples",
            WriteMode::FingerprintSeries => "series",
            WriteMode::FingerprintSeriesDedup => "series-dedup",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        WriteMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown write mode '{}', expected one of inline, samples, series, series-dedup",
                    s
                ))
            })
    }
}

/// Convert a millisecond timestamp to nanoseconds.
fn timestamp_nanos(timestamp_ms: i64) -> Result<i64> {
    timestamp_ms.checked_mul(1_000_000).ok_or_else(|| {
        Error::InvalidSample(format!(
            "timestamp {}ms is out of range for nanosecond precision",
            timestamp_ms
        ))
    })
}

/// Writes request batches through a shared pool
pub struct SampleWriter {
    pool: Arc<WritePool>,
    tables: TableConfig,
    metadata: SeriesMetadataStore,
}

impl SampleWriter {
    pub fn new(pool: Arc<WritePool>, tables: TableConfig, cache: &MetadataCacheConfig) -> Self {
        let metadata =
            SeriesMetadataStore::new(Arc::clone(&pool), MetadataTables::from(&tables), cache);
        Self {
            pool,
            tables,
            metadata,
        }
    }

    pub fn tables(&self) -> &TableConfig {
        &self.tables
    }

    pub fn metadata(&self) -> &SeriesMetadataStore {
        &self.metadata
    }

    /// Write `req` using `mode`, returning the number of rows the mode counts.
    pub async fn write(
        &self,
        mode: WriteMode,
        req: &WriteRequest,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        match mode {
            WriteMode::Inline => self.write_inline(req, cancel).await,
            WriteMode::FingerprintSamples => self.write_fingerprint_samples(req, cancel).await,
            WriteMode::FingerprintSeries => self.write_fingerprint_series(req, cancel).await,
            WriteMode::FingerprintSeriesDedup => self.write_series_dedup(req, cancel).await,
        }
    }

    /// One row per sample into the main table, labels in input order.
    pub async fn write_inline(&self, req: &WriteRequest, cancel: &CancellationToken) -> Result<usize> {
        if req.sample_count() == 0 {
            return Ok(0);
        }

        let table = &self.tables.table;
        let mut tx = self.pool.begin(cancel).await?;
        let mut written = 0;

        for ts in &req.timeseries {
            let metric_name: Arc<str> = LabelCanonicalizer::metric_name(&ts.labels).into();
            let labels: Arc<[String]> = LabelCanonicalizer::raw_tokens(&ts.labels).into();

            for sample in &ts.samples {
                tx.append(
                    table,
                    Row::InlineSample(InlineSampleRow {
                        timestamp_ns: timestamp_nanos(sample.timestamp_ms)?,
                        metric_name: Arc::clone(&metric_name),
                        labels: Arc::clone(&labels),
                        value: sample.value,
                    }),
                )?;
                written += 1;
            }
        }

        let receipt = tx.commit().await?;
        debug!(table = %table, rows = written, commit = %receipt.commit_id, "Wrote inline samples");
        Ok(written)
    }

    /// One row per sample into the samples table, keyed by fingerprint.
    pub async fn write_fingerprint_samples(
        &self,
        req: &WriteRequest,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if req.sample_count() == 0 {
            return Ok(0);
        }

        let table = &self.tables.samples_table;
        let mut tx = self.pool.begin(cancel).await?;
        let mut written = 0;

        for ts in &req.timeseries {
            if ts.samples.is_empty() {
                continue;
            }
            let identity = SeriesIdentity::from_labels(&ts.labels);
            let metric_name: Arc<str> = identity.metric_name.into();

            for sample in &ts.samples {
                tx.append(
                    table,
                    Row::Sample(SampleRow {
                        timestamp_ns: timestamp_nanos(sample.timestamp_ms)?,
                        metric_name: Arc::clone(&metric_name),
                        fingerprint: identity.fingerprint,
                        value: sample.value,
                    }),
                )?;
                written += 1;
            }
        }

        let receipt = tx.commit().await?;
        debug!(table = %table, rows = written, commit = %receipt.commit_id, "Wrote fingerprinted samples");
        Ok(written)
    }

    /// One row per distinct series into the time-series table.
    ///
    /// Repeats within the batch are skipped; series written by earlier
    /// batches are not consulted.
    pub async fn write_fingerprint_series(
        &self,
        req: &WriteRequest,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if req.is_empty() {
            return Ok(0);
        }

        let table = &self.tables.time_series_table;
        let mut tx = self.pool.begin(cancel).await?;
        let mut seen = HashSet::with_capacity(req.timeseries.len());

        for ts in &req.timeseries {
            let identity = SeriesIdentity::from_labels(&ts.labels);
            if !seen.insert(identity.fingerprint) {
                continue;
            }
            tx.append(
                table,
                Row::Series(SeriesRow {
                    metric_name: identity.metric_name,
                    fingerprint: identity.fingerprint,
                    labels: identity.canonical,
                }),
            )?;
        }

        let written = seen.len();
        let receipt = tx.commit().await?;
        debug!(table = %table, rows = written, commit = %receipt.commit_id, "Wrote series");
        Ok(written)
    }

    /// Register every series not yet in the metadata tables.
    ///
    /// Returns the number of series this call registered. The first failing
    /// series aborts the batch; series registered before it stay registered.
    pub async fn write_series_dedup(
        &self,
        req: &WriteRequest,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut registered = 0;

        for ts in &req.timeseries {
            let identity = SeriesIdentity::from_labels(&ts.labels);
            if self.metadata.exists(identity.fingerprint, cancel).await? {
                continue;
            }
            if self.metadata.register(&identity, &ts.labels, cancel).await?
                == Registration::Registered
            {
                registered += 1;
            }
        }

        debug!(
            series = req.timeseries.len(),
            registered, "Deduplicated series metadata"
        );
        Ok(registered)
    }
}
