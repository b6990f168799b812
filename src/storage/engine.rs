//! Object-store backed storage engine
//!
//! Layout under the configured prefix:
//!
//! ```text
//! <prefix>/<table>/date=YYYY-MM-DD/part-<commit>.parquet   staged rows
//! <prefix>/<table>/fingerprint-claims/<fp>.json            registration claims
//! <prefix>/<table>/fingerprint-registered/<fp>.json        committed registrations
//! <prefix>/commit-log/<nanos>-<commit>.json                commit manifests
//! ```
//!
//! Data files are invisible until a manifest lists them. The manifest is
//! written last with a create-only put, so a commit is all-or-nothing: a
//! failure before that point leaves at most orphaned files that no manifest
//! references, and those are deleted on the way out.
//!
//! The hyphenated directory names cannot collide with table names, which are
//! restricted to identifier characters.

use super::parquet_writer::ParquetWriter;
use super::{Claim, CommitReceipt, StorageEngine, UnitOfWork};
use crate::fingerprint::Fingerprint;
use crate::schema::{rows_to_batch, Row, RowLayout};
use crate::{Error, Result};

use arrow_array::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use metrics::{counter, histogram};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMIT_LOG_DIR: &str = "commit-log";
const CLAIMS_DIR: &str = "fingerprint-claims";
const REGISTERED_DIR: &str = "fingerprint-registered";

/// Record of one commit; its presence is what makes the files visible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitManifest {
    pub commit_id: String,
    pub committed_at: DateTime<Utc>,
    pub files: Vec<ManifestFile>,
}

/// One table file written by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub table: String,
    pub layout: String,
    pub path: String,
    pub rows: usize,
    pub size_bytes: u64,
}

/// Body of a fingerprint claim or registration marker
#[derive(Debug, Serialize, Deserialize)]
struct FingerprintMarker {
    metric_name: String,
    fingerprint: u64,
    written_at: DateTime<Utc>,
}

/// Storage engine writing Parquet files to any `object_store` backend
#[derive(Clone)]
pub struct ObjectStoreEngine {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    writer: Arc<ParquetWriter>,
}

impl std::fmt::Debug for ObjectStoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreEngine")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreEngine {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: Path::from(prefix),
            writer: Arc::new(ParquetWriter::new()),
        }
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn commit_log_root(&self) -> Path {
        self.prefix.child(COMMIT_LOG_DIR)
    }

    fn claim_path(&self, table: &str, fingerprint: Fingerprint) -> Path {
        self.marker_path(table, CLAIMS_DIR, fingerprint)
    }

    fn registered_path(&self, table: &str, fingerprint: Fingerprint) -> Path {
        self.marker_path(table, REGISTERED_DIR, fingerprint)
    }

    fn marker_path(&self, table: &str, dir: &str, fingerprint: Fingerprint) -> Path {
        self.prefix
            .child(table)
            .child(dir)
            .child(format!("{fingerprint}.json"))
    }

    async fn marker_exists(&self, path: &Path) -> std::result::Result<bool, object_store::Error> {
        match self.store.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All commit manifests in commit order
    pub async fn manifests(&self) -> Result<Vec<CommitManifest>> {
        let root = self.commit_log_root();
        let mut objects: Vec<_> = self.store.list(Some(&root)).try_collect().await?;
        objects.sort_by(|a, b| a.location.cmp(&b.location));

        let mut manifests = Vec::with_capacity(objects.len());
        for meta in objects {
            if meta.location.extension() != Some("json") {
                continue;
            }
            let bytes = self.store.get(&meta.location).await?.bytes().await?;
            manifests.push(serde_json::from_slice(&bytes)?);
        }
        Ok(manifests)
    }

    /// Committed rows of `table`, one batch per Parquet row group
    ///
    /// Verification helper: only files referenced by a manifest are read.
    pub async fn committed_batches(&self, table: &str) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        for manifest in self.manifests().await? {
            for file in manifest.files.iter().filter(|f| f.table == table) {
                let bytes = self
                    .store
                    .get(&Path::from(file.path.as_str()))
                    .await?
                    .bytes()
                    .await?;
                let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
                for batch in reader {
                    batches.push(batch?);
                }
            }
        }
        Ok(batches)
    }

    /// Number of committed rows in `table`
    pub async fn committed_rows(&self, table: &str) -> Result<usize> {
        Ok(self
            .manifests()
            .await?
            .iter()
            .flat_map(|m| m.files.iter())
            .filter(|f| f.table == table)
            .map(|f| f.rows)
            .sum())
    }
}

#[async_trait]
impl StorageEngine for ObjectStoreEngine {
    async fn ping(&self) -> Result<()> {
        self.store
            .list_with_delimiter(Some(&self.prefix))
            .await
            .map_err(|e| Error::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(ObjectStoreUnitOfWork {
            engine: self.clone(),
            staged: BTreeMap::new(),
            rows: 0,
        }))
    }

    async fn is_claimed(&self, table: &str, fingerprint: Fingerprint) -> Result<bool> {
        self.marker_exists(&self.claim_path(table, fingerprint))
            .await
            .map_err(|e| {
                Error::Metadata(format!(
                    "claim lookup of fingerprint {fingerprint} in {table} failed: {e}"
                ))
            })
    }

    async fn is_registered(&self, table: &str, fingerprint: Fingerprint) -> Result<bool> {
        self.marker_exists(&self.registered_path(table, fingerprint))
            .await
            .map_err(|e| {
                Error::Metadata(format!(
                    "lookup of fingerprint {fingerprint} in {table} failed: {e}"
                ))
            })
    }

    async fn mark_registered(
        &self,
        table: &str,
        fingerprint: Fingerprint,
        metric_name: &str,
    ) -> Result<()> {
        let marker = FingerprintMarker {
            metric_name: metric_name.to_string(),
            fingerprint: fingerprint.as_u64(),
            written_at: Utc::now(),
        };
        let payload = PutPayload::from(serde_json::to_vec(&marker)?);
        self.store
            .put(&self.registered_path(table, fingerprint), payload)
            .await
            .map_err(|e| {
                Error::Metadata(format!(
                    "marking fingerprint {fingerprint} in {table} registered failed: {e}"
                ))
            })?;
        Ok(())
    }

    async fn claim(
        &self,
        table: &str,
        fingerprint: Fingerprint,
        metric_name: &str,
    ) -> Result<Claim> {
        let marker = FingerprintMarker {
            metric_name: metric_name.to_string(),
            fingerprint: fingerprint.as_u64(),
            written_at: Utc::now(),
        };
        let payload = PutPayload::from(serde_json::to_vec(&marker)?);
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        match self
            .store
            .put_opts(&self.claim_path(table, fingerprint), payload, opts)
            .await
        {
            Ok(_) => Ok(Claim::Acquired),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(Claim::AlreadyClaimed),
            Err(object_store::Error::NotImplemented)
            | Err(object_store::Error::NotSupported { .. }) => Err(Error::Metadata(format!(
                "object store does not support create-only puts required to register {table}"
            ))),
            Err(e) => Err(Error::Metadata(format!(
                "claim of fingerprint {fingerprint} in {table} failed: {e}"
            ))),
        }
    }

    async fn release(&self, table: &str, fingerprint: Fingerprint) -> Result<()> {
        match self.store.delete(&self.claim_path(table, fingerprint)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug)]
struct StagedTable {
    layout: RowLayout,
    rows: Vec<Row>,
}

struct ObjectStoreUnitOfWork {
    engine: ObjectStoreEngine,
    staged: BTreeMap<String, StagedTable>,
    rows: usize,
}

impl ObjectStoreUnitOfWork {
    async fn write_files(
        &self,
        commit_id: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        written: &mut Vec<Path>,
    ) -> Result<Vec<ManifestFile>> {
        let mut files = Vec::with_capacity(self.staged.len());

        for (table, staged) in &self.staged {
            let batch = rows_to_batch(staged.layout, &staged.rows)?;
            let bytes = self.engine.writer.write_batch(&batch)?;
            let size_bytes = bytes.len() as u64;
            let path = self
                .engine
                .prefix
                .child(table.as_str())
                .child(format!("date={}", now.format("%Y-%m-%d")))
                .child(format!("part-{commit_id}.parquet"));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = self.engine.store.put(&path, bytes.into()) => { res?; }
            }
            written.push(path.clone());

            debug!(table = %table, path = %path, rows = staged.rows.len(), size_bytes, "Wrote table file");
            files.push(ManifestFile {
                table: table.clone(),
                layout: staged.layout.as_str().to_string(),
                path: path.to_string(),
                rows: staged.rows.len(),
                size_bytes,
            });
        }

        Ok(files)
    }

    async fn remove_orphans(&self, written: &[Path]) {
        for path in written {
            if let Err(e) = self.engine.store.delete(path).await {
                warn!(path = %path, error = %e, "Failed to remove uncommitted file");
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for ObjectStoreUnitOfWork {
    fn append(&mut self, table: &str, row: Row) -> Result<()> {
        let layout = row.layout();
        let staged = self
            .staged
            .entry(table.to_string())
            .or_insert_with(|| StagedTable {
                layout,
                rows: Vec::new(),
            });
        if staged.layout != layout {
            return Err(Error::InvalidSchema(format!(
                "table {} holds {} rows, cannot append {} row",
                table, staged.layout, layout
            )));
        }
        staged.rows.push(row);
        self.rows += 1;
        Ok(())
    }

    fn staged_rows(&self) -> usize {
        self.rows
    }

    async fn commit(self: Box<Self>, cancel: &CancellationToken) -> Result<CommitReceipt> {
        if self.rows == 0 {
            return Ok(CommitReceipt::default());
        }

        let start = Instant::now();
        let commit_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut written = Vec::new();

        let files = match self.write_files(&commit_id, now, cancel, &mut written).await {
            Ok(files) => files,
            Err(e) => {
                self.remove_orphans(&written).await;
                counter!("seriesink_commits_total", "result" => "aborted").increment(1);
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            self.remove_orphans(&written).await;
            counter!("seriesink_commits_total", "result" => "aborted").increment(1);
            return Err(Error::Cancelled);
        }

        // Commit point
        let bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
        let manifest = CommitManifest {
            commit_id: commit_id.clone(),
            committed_at: now,
            files,
        };
        let manifest_path = self.engine.commit_log_root().child(format!(
            "{:020}-{}.json",
            now.timestamp_nanos_opt().unwrap_or_default(),
            commit_id
        ));
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        let payload = PutPayload::from(serde_json::to_vec(&manifest)?);
        if let Err(e) = self
            .engine
            .store
            .put_opts(&manifest_path, payload, opts)
            .await
        {
            self.remove_orphans(&written).await;
            counter!("seriesink_commits_total", "result" => "failed").increment(1);
            return Err(e.into());
        }

        counter!("seriesink_commits_total", "result" => "ok").increment(1);
        histogram!("seriesink_commit_bytes").record(bytes as f64);
        histogram!("seriesink_commit_duration_seconds").record(start.elapsed().as_secs_f64());
        info!(
            commit_id = %commit_id,
            tables = manifest.files.len(),
            rows = self.rows,
            bytes,
            "Committed unit of work"
        );

        Ok(CommitReceipt {
            commit_id,
            rows: self.rows,
            bytes,
        })
    }

    fn rollback(self: Box<Self>) {
        debug!(rows = self.rows, tables = self.staged.len(), "Discarding staged rows");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MetricFingerprintRow, SeriesRow};
    use object_store::memory::InMemory;

    fn engine() -> ObjectStoreEngine {
        ObjectStoreEngine::new(Arc::new(InMemory::new()), "test")
    }

    fn series_row(fp: u64) -> Row {
        Row::Series(SeriesRow {
            metric_name: "up".to_string(),
            fingerprint: Fingerprint::from_u64(fp),
            labels: format!("job=node{fp}"),
        })
    }

    #[tokio::test]
    async fn test_commit_makes_rows_visible() {
        let engine = engine();
        let mut uow = engine.begin().await.unwrap();
        uow.append("series", series_row(1)).unwrap();
        uow.append("series", series_row(2)).unwrap();
        assert_eq!(engine.committed_rows("series").await.unwrap(), 0);

        let receipt = uow.commit(&CancellationToken::new()).await.unwrap();
        assert_eq!(receipt.rows, 2);
        assert!(receipt.bytes > 0);

        assert_eq!(engine.committed_rows("series").await.unwrap(), 2);
        let batches = engine.committed_batches("series").await.unwrap();
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn test_rollback_writes_nothing() {
        let engine = engine();
        let mut uow = engine.begin().await.unwrap();
        uow.append("series", series_row(1)).unwrap();
        uow.rollback();

        assert!(engine.manifests().await.unwrap().is_empty());
        let objects: Vec<_> = engine.object_store().list(None).try_collect().await.unwrap();
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn test_empty_commit_is_noop() {
        let engine = engine();
        let uow = engine.begin().await.unwrap();
        let receipt = uow.commit(&CancellationToken::new()).await.unwrap();
        assert_eq!(receipt, CommitReceipt::default());
        assert!(engine.manifests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_layout_mismatch_rejected() {
        let engine = engine();
        let mut uow = engine.begin().await.unwrap();
        uow.append("t", series_row(1)).unwrap();
        let err = uow
            .append(
                "t",
                Row::MetricFingerprint(MetricFingerprintRow {
                    metric_name: "up".to_string(),
                    fingerprint: Fingerprint::from_u64(1),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
        assert_eq!(uow.staged_rows(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_commit_leaves_no_files() {
        let engine = engine();
        let mut uow = engine.begin().await.unwrap();
        uow.append("series", series_row(1)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = uow.commit(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let objects: Vec<_> = engine.object_store().list(None).try_collect().await.unwrap();
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let engine = engine();
        let fp = Fingerprint::from_u64(7);

        assert!(!engine.is_claimed("fp", fp).await.unwrap());
        assert_eq!(engine.claim("fp", fp, "up").await.unwrap(), Claim::Acquired);
        assert_eq!(
            engine.claim("fp", fp, "up").await.unwrap(),
            Claim::AlreadyClaimed
        );
        assert!(engine.is_claimed("fp", fp).await.unwrap());

        engine.release("fp", fp).await.unwrap();
        assert!(!engine.is_claimed("fp", fp).await.unwrap());
        // Releasing twice is fine
        engine.release("fp", fp).await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_is_not_registration() {
        let engine = engine();
        let fp = Fingerprint::from_u64(9);

        engine.claim("fp", fp, "up").await.unwrap();
        assert!(engine.is_claimed("fp", fp).await.unwrap());
        assert!(!engine.is_registered("fp", fp).await.unwrap());

        engine.mark_registered("fp", fp, "up").await.unwrap();
        assert!(engine.is_registered("fp", fp).await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_empty_store() {
        assert!(engine().ping().await.is_ok());
    }
}
