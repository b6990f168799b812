//! Bounded pool of units of work
//!
//! A `Transaction` holds one pool permit for its whole lifetime. Dropping it
//! without committing rolls the unit of work back, so early returns and
//! cancelled futures never leave staged rows behind.

use super::{CommitReceipt, StorageEngine, UnitOfWork};
use crate::schema::Row;
use crate::{Error, Result};

use metrics::counter;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hands out at most `max_open` concurrent units of work
pub struct WritePool {
    engine: Arc<dyn StorageEngine>,
    permits: Arc<Semaphore>,
    max_open: usize,
}

impl WritePool {
    pub fn new(engine: Arc<dyn StorageEngine>, max_open: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_open)),
            max_open,
        }
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }

    /// Units of work that could be opened right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot and open a unit of work.
    pub async fn begin(&self, cancel: &CancellationToken) -> Result<Transaction> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| Error::Internal("write pool closed".to_string()))?,
        };

        let uow = self.engine.begin().await?;
        Ok(Transaction {
            uow: Some(uow),
            cancel: cancel.clone(),
            _permit: permit,
        })
    }
}

/// An open unit of work bound to a caller's cancellation token
pub struct Transaction {
    uow: Option<Box<dyn UnitOfWork>>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

impl Transaction {
    /// Stage a row; fails once the caller has cancelled.
    pub fn append(&mut self, table: &str, row: Row) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.uow
            .as_mut()
            .ok_or(Error::TransactionClosed)?
            .append(table, row)
    }

    pub fn staged_rows(&self) -> usize {
        self.uow.as_ref().map_or(0, |uow| uow.staged_rows())
    }

    pub async fn commit(mut self) -> Result<CommitReceipt> {
        let uow = self.uow.take().ok_or(Error::TransactionClosed)?;
        uow.commit(&self.cancel).await
    }

    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if let Some(uow) = self.uow.take() {
            debug!(rows = uow.staged_rows(), "Rolling back unit of work");
            counter!("seriesink_rollbacks_total").increment(1);
            uow.rollback();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.discard();
    }
}
