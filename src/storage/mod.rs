//! Storage engine abstraction
//!
//! A table is a key prefix in object storage. Rows are staged in a unit of
//! work and become visible all at once when the unit of work commits. Series
//! registration additionally relies on an atomic create-if-absent write so a
//! fingerprint can be claimed by exactly one writer, and on a second marker
//! written once the claimed rows have committed.

mod engine;
mod parquet_writer;
mod transaction;

pub use engine::{CommitManifest, ManifestFile, ObjectStoreEngine};
pub use parquet_writer::ParquetWriter;
pub use transaction::{Transaction, WritePool};

use crate::fingerprint::Fingerprint;
use crate::schema::Row;
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Outcome of a fingerprint claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller now owns the registration
    Acquired,
    /// Someone registered the fingerprint first
    AlreadyClaimed,
}

/// What a commit made durable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Identifier of the commit, empty when nothing was staged
    pub commit_id: String,
    /// Rows persisted across all tables
    pub rows: usize,
    /// Encoded bytes written across all tables
    pub bytes: u64,
}

/// Backend that persists rows and fingerprint claims
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Fail fast when the backend cannot be reached
    async fn ping(&self) -> Result<()>;

    /// Open a unit of work
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Whether `fingerprint` has been claimed under `table`, finished or not
    async fn is_claimed(&self, table: &str, fingerprint: Fingerprint) -> Result<bool>;

    /// Whether the rows for `fingerprint` under `table` have committed
    async fn is_registered(&self, table: &str, fingerprint: Fingerprint) -> Result<bool>;

    /// Record that the rows for a claimed `fingerprint` have committed
    async fn mark_registered(
        &self,
        table: &str,
        fingerprint: Fingerprint,
        metric_name: &str,
    ) -> Result<()>;

    /// Atomically claim `fingerprint` under `table` if nobody has
    async fn claim(&self, table: &str, fingerprint: Fingerprint, metric_name: &str)
        -> Result<Claim>;

    /// Drop a claim whose registration could not be completed
    async fn release(&self, table: &str, fingerprint: Fingerprint) -> Result<()>;
}

/// A group of row appends that commit or roll back together
#[async_trait]
pub trait UnitOfWork: Send {
    /// Stage one row for `table`
    fn append(&mut self, table: &str, row: Row) -> Result<()>;

    /// Rows staged so far
    fn staged_rows(&self) -> usize;

    /// Make every staged row durable, or none of them.
    ///
    /// Cancellation is honoured until the commit point; after it the commit
    /// completes.
    async fn commit(self: Box<Self>, cancel: &CancellationToken) -> Result<CommitReceipt>;

    /// Discard staged rows
    fn rollback(self: Box<Self>);
}
