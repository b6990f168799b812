//! Series metadata registry
//!
//! Every distinct fingerprint gets exactly one row in the metric/fingerprint
//! table and one row in the fingerprint/label-map table. Registration first
//! claims the fingerprint in storage with a create-if-absent write, so only
//! one writer across processes inserts the rows. Once the rows commit, a
//! registered marker is written; only that marker makes a fingerprint count
//! as registered. A writer that finds someone else's unfinished claim waits
//! until it is either registered or released.
//!
//! The claim owner's work runs on its own task, so a caller that is dropped
//! or times out cannot leave a claim behind without rows. Within a process,
//! concurrent registrations of the same fingerprint are coalesced through the
//! known-registered cache.

use crate::config::{MetadataCacheConfig, TableConfig};
use crate::fingerprint::{Fingerprint, LabelCanonicalizer, SeriesIdentity};
use crate::model::Label;
use crate::schema::{MetricFingerprintRow, Row, SeriesLabelsRow};
use crate::storage::{Claim, CommitReceipt, WritePool};
use crate::{Error, Result};

use metrics::counter;
use moka::future::Cache;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CLAIM_POLL_START: Duration = Duration::from_millis(10);
const CLAIM_POLL_MAX: Duration = Duration::from_millis(250);

/// Outcome of registering a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// This call inserted the metadata rows
    Registered,
    /// The fingerprint was already registered
    AlreadyRegistered,
}

/// How someone else's claim resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimOutcome {
    Registered,
    Released,
}

/// Tables the registry writes to
#[derive(Debug, Clone)]
pub struct MetadataTables {
    pub metric_fingerprint: String,
    pub series_labels: String,
}

impl From<&TableConfig> for MetadataTables {
    fn from(tables: &TableConfig) -> Self {
        Self {
            metric_fingerprint: tables.metric_fingerprint_table.clone(),
            series_labels: tables.time_series_map_table.clone(),
        }
    }
}

/// Race `fut` against the caller's cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// Registry of series metadata backed by the storage engine
pub struct SeriesMetadataStore {
    registrar: Arc<Registrar>,
    /// Fingerprints known to be registered
    known: Cache<Fingerprint, ()>,
}

impl std::fmt::Debug for SeriesMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesMetadataStore")
            .field("tables", &self.registrar.tables)
            .field("claim_wait", &self.registrar.claim_wait)
            .field("cached", &self.known.entry_count())
            .finish()
    }
}

impl SeriesMetadataStore {
    pub fn new(pool: Arc<WritePool>, tables: MetadataTables, config: &MetadataCacheConfig) -> Self {
        Self {
            registrar: Arc::new(Registrar {
                pool,
                tables,
                claim_wait: config.claim_wait,
            }),
            known: Cache::builder().max_capacity(config.capacity).build(),
        }
    }

    pub fn tables(&self) -> &MetadataTables {
        &self.registrar.tables
    }

    /// Whether metadata rows for `fingerprint` have committed.
    ///
    /// A claim whose rows have not committed yet does not count.
    pub async fn exists(&self, fingerprint: Fingerprint, cancel: &CancellationToken) -> Result<bool> {
        if self.known.contains_key(&fingerprint) {
            counter!("seriesink_metadata_cache_hits_total").increment(1);
            return Ok(true);
        }

        let registrar = &self.registrar;
        let registered = cancellable(
            cancel,
            registrar
                .pool
                .engine()
                .is_registered(&registrar.tables.metric_fingerprint, fingerprint),
        )
        .await?;

        if registered {
            self.known.insert(fingerprint, ()).await;
        }
        Ok(registered)
    }

    /// Register `series` unless it already is.
    ///
    /// Exactly one caller per fingerprint gets `Registered`, including callers
    /// racing in other processes against the same storage. A failed,
    /// cancelled or abandoned registration releases its claim and can be
    /// retried.
    pub async fn register(
        &self,
        series: &SeriesIdentity,
        labels: &[Label],
        cancel: &CancellationToken,
    ) -> Result<Registration> {
        let fingerprint = series.fingerprint;

        loop {
            if self.known.contains_key(&fingerprint) {
                counter!("seriesink_metadata_cache_hits_total").increment(1);
                return Ok(Registration::AlreadyRegistered);
            }

            // Set only by the caller whose init future runs
            let outcome = Mutex::new(None);
            let result = self
                .known
                .try_get_with(fingerprint, async {
                    let registrar = Arc::clone(&self.registrar);
                    let task_series = series.clone();
                    let task_labels = labels.to_vec();
                    let task_cancel = cancel.clone();
                    // Detached: dropping this future must not skip the claim release
                    let handle = tokio::spawn(async move {
                        registrar
                            .register(&task_series, &task_labels, &task_cancel)
                            .await
                    });
                    let registration = handle.await.map_err(|e| {
                        Error::Internal(format!("registration task failed: {e}"))
                    })??;
                    *outcome.lock() = Some(registration);
                    Ok::<_, Error>(())
                })
                .await;

            match result {
                Ok(()) => {
                    return Ok(outcome.into_inner().unwrap_or(Registration::AlreadyRegistered));
                }
                // Another caller's cancellation must not fail this one
                Err(err) if err.is_cancellation() && !cancel.is_cancelled() => {
                    debug!(%fingerprint, "Coalesced registration was cancelled, retrying");
                    continue;
                }
                Err(err) if err.is_cancellation() => return Err(Error::Cancelled),
                Err(source) => {
                    counter!("seriesink_registration_failures_total").increment(1);
                    return Err(Error::Registration {
                        fingerprint: fingerprint.as_u64(),
                        source,
                    });
                }
            }
        }
    }
}

/// Storage side of registration, shared with detached registration tasks
struct Registrar {
    pool: Arc<WritePool>,
    tables: MetadataTables,
    claim_wait: Duration,
}

impl Registrar {
    async fn register(
        &self,
        series: &SeriesIdentity,
        labels: &[Label],
        cancel: &CancellationToken,
    ) -> Result<Registration> {
        let engine = self.pool.engine();
        let table = &self.tables.metric_fingerprint;
        let fingerprint = series.fingerprint;

        loop {
            if cancellable(cancel, engine.is_registered(table, fingerprint)).await? {
                counter!("seriesink_series_already_registered_total").increment(1);
                return Ok(Registration::AlreadyRegistered);
            }

            let claim = cancellable(
                cancel,
                engine.claim(table, fingerprint, &series.metric_name),
            )
            .await?;
            if claim == Claim::Acquired {
                break;
            }

            if self.wait_for_claim(fingerprint, cancel).await? == ClaimOutcome::Registered {
                counter!("seriesink_series_already_registered_total").increment(1);
                return Ok(Registration::AlreadyRegistered);
            }
            debug!(%fingerprint, "Competing claim was released, claiming again");
        }

        let receipt = match self.insert_rows(series, labels, cancel).await {
            Ok(receipt) => receipt,
            Err(err) => {
                if let Err(release_err) = engine.release(table, fingerprint).await {
                    warn!(
                        %fingerprint,
                        error = %release_err,
                        "Failed to release fingerprint claim"
                    );
                }
                return Err(err);
            }
        };

        // Rows are durable, so the claim is kept even if marking fails
        engine
            .mark_registered(table, fingerprint, &series.metric_name)
            .await?;

        counter!("seriesink_series_registered_total").increment(1);
        debug!(
            %fingerprint,
            metric = %series.metric_name,
            commit = %receipt.commit_id,
            "Registered series"
        );
        Ok(Registration::Registered)
    }

    /// Poll a claim held by another writer until it is registered or released.
    async fn wait_for_claim(
        &self,
        fingerprint: Fingerprint,
        cancel: &CancellationToken,
    ) -> Result<ClaimOutcome> {
        let engine = self.pool.engine();
        let table = &self.tables.metric_fingerprint;
        let start = Instant::now();
        let mut backoff = CLAIM_POLL_START;

        counter!("seriesink_claim_waits_total").increment(1);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }

            if engine.is_registered(table, fingerprint).await? {
                return Ok(ClaimOutcome::Registered);
            }
            if !engine.is_claimed(table, fingerprint).await? {
                return Ok(ClaimOutcome::Released);
            }
            if start.elapsed() >= self.claim_wait {
                return Err(Error::Metadata(format!(
                    "fingerprint {fingerprint} in {table} is still being registered by another writer after {:?}",
                    self.claim_wait
                )));
            }
            backoff = (backoff * 2).min(CLAIM_POLL_MAX);
        }
    }

    async fn insert_rows(
        &self,
        series: &SeriesIdentity,
        labels: &[Label],
        cancel: &CancellationToken,
    ) -> Result<CommitReceipt> {
        let mut tx = self.pool.begin(cancel).await?;
        tx.append(
            &self.tables.metric_fingerprint,
            Row::MetricFingerprint(MetricFingerprintRow {
                metric_name: series.metric_name.clone(),
                fingerprint: series.fingerprint,
            }),
        )?;
        tx.append(
            &self.tables.series_labels,
            Row::SeriesLabels(SeriesLabelsRow {
                metric_name: series.metric_name.clone(),
                fingerprint: series.fingerprint,
                labels: LabelCanonicalizer::label_map(labels),
            }),
        )?;
        tx.commit().await
    }
}
