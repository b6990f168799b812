//! Adapter: the public write surface
//!
//! Construction validates every table name, opens the object store and pings
//! it, so an adapter that exists is usable. All four write operations share
//! one pool of units of work and honour the caller's `WriteContext`.

use crate::config::{AdapterConfig, ComponentFactory, TableConfig};
use crate::metadata::SeriesMetadataStore;
use crate::model::WriteRequest;
use crate::storage::{ObjectStoreEngine, StorageEngine, WritePool};
use crate::writer::{SampleWriter, WriteMode};
use crate::{Error, Result};

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call cancellation and deadline
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl WriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `Error::Timeout` if the write has not finished after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tie the write to an existing cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Writes Prometheus remote-write batches to columnar tables
pub struct Adapter {
    config: AdapterConfig,
    pool: Arc<WritePool>,
    writer: SampleWriter,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("tables", &self.config.tables)
            .field("storage", &self.config.storage.backend)
            .field("max_open", &self.pool.max_open())
            .finish()
    }
}

impl Adapter {
    /// Validate `config`, open the configured store and check it is reachable.
    pub async fn connect(config: AdapterConfig) -> Result<Self> {
        config.validate()?;
        let store = ComponentFactory::create_object_store(&config.storage, &config.pool)?;
        let engine = ObjectStoreEngine::new(store, &config.storage.prefix);
        Self::with_engine(config, Arc::new(engine)).await
    }

    /// Build an adapter over an already constructed engine.
    pub async fn with_engine(config: AdapterConfig, engine: Arc<dyn StorageEngine>) -> Result<Self> {
        config.validate()?;

        let timeout = config.pool.connect_timeout;
        match tokio::time::timeout(timeout, engine.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::Unreachable(e.to_string())),
            Err(_) => {
                return Err(Error::Unreachable(format!(
                    "no response within {:?}",
                    timeout
                )))
            }
        }

        let pool = Arc::new(WritePool::new(engine, config.pool.max_open));
        let writer = SampleWriter::new(
            Arc::clone(&pool),
            config.tables.clone(),
            &config.metadata_cache,
        );

        info!(
            backend = config.storage.backend.as_str(),
            prefix = %config.storage.prefix,
            table = %config.tables.table,
            max_open = config.pool.max_open,
            "Adapter ready"
        );

        Ok(Self {
            config,
            pool,
            writer,
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn tables(&self) -> &TableConfig {
        &self.config.tables
    }

    pub fn metadata(&self) -> &SeriesMetadataStore {
        self.writer.metadata()
    }

    /// Write one row per sample with labels inline.
    pub async fn write_request(&self, req: &WriteRequest, ctx: &WriteContext) -> Result<usize> {
        self.write(WriteMode::Inline, req, ctx).await
    }

    /// Write one fingerprinted row per sample.
    pub async fn write_samples(&self, req: &WriteRequest, ctx: &WriteContext) -> Result<usize> {
        self.write(WriteMode::FingerprintSamples, req, ctx).await
    }

    /// Write one row per distinct series in the batch.
    pub async fn write_time_series(&self, req: &WriteRequest, ctx: &WriteContext) -> Result<usize> {
        self.write(WriteMode::FingerprintSeries, req, ctx).await
    }

    /// Register series not yet present in the metadata tables.
    pub async fn write_time_series_dedup(
        &self,
        req: &WriteRequest,
        ctx: &WriteContext,
    ) -> Result<usize> {
        self.write(WriteMode::FingerprintSeriesDedup, req, ctx).await
    }

    /// Write `req` with `mode` under `ctx`.
    pub async fn write(
        &self,
        mode: WriteMode,
        req: &WriteRequest,
        ctx: &WriteContext,
    ) -> Result<usize> {
        let start = Instant::now();
        // Cancelled on timeout so detached registrations abort and release
        let cancel = ctx.cancel.child_token();
        let write = self.writer.write(mode, req, &cancel);

        let result = match ctx.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, write).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(Error::Timeout)
                }
            },
            None => write.await,
        };

        let elapsed = start.elapsed();
        histogram!("seriesink_write_duration_seconds", "mode" => mode.as_str())
            .record(elapsed.as_secs_f64());

        match &result {
            Ok(rows) => {
                counter!("seriesink_rows_written_total", "mode" => mode.as_str())
                    .increment(*rows as u64);
                debug!(
                    mode = mode.as_str(),
                    series = req.timeseries.len(),
                    rows,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Write completed"
                );
            }
            Err(e) => {
                counter!("seriesink_write_failures_total", "mode" => mode.as_str()).increment(1);
                warn!(mode = mode.as_str(), error = %e, "Write failed");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeSeries;
    use object_store::memory::InMemory;

    async fn adapter() -> (ObjectStoreEngine, Adapter) {
        let engine = ObjectStoreEngine::new(Arc::new(InMemory::new()), "adapter");
        let adapter = Adapter::with_engine(AdapterConfig::default(), Arc::new(engine.clone()))
            .await
            .unwrap();
        (engine, adapter)
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let adapter = Adapter::connect(AdapterConfig::default()).await.unwrap();
        let req = WriteRequest::new(vec![TimeSeries::new("up", [("job", "api")]).with_sample(1, 1.0)]);
        assert_eq!(adapter.write_request(&req, &WriteContext::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let (engine, adapter) = adapter().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = WriteContext::new().with_cancellation(cancel);

        let req = WriteRequest::new(vec![TimeSeries::new("up", Vec::<(&str, &str)>::new()).with_sample(1, 1.0)]);
        let err = adapter.write_samples(&req, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(engine.manifests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_table_before_touching_store() {
        let mut config = AdapterConfig::default();
        config.tables.samples_table = "1table".to_string();
        let err = Adapter::connect(config).await.unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(name) if name == "1table"));
    }
}
