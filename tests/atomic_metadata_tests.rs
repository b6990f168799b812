//! Integration tests for at-most-once series registration
//!
//! These tests verify that the dedup mode inserts each fingerprint exactly
//! once under concurrent writers, including writers that do not share an
//! in-process cache.

use seriesink::config::AdapterConfig;
use seriesink::model::{TimeSeries, WriteRequest};
use seriesink::storage::ObjectStoreEngine;
use seriesink::{Adapter, WriteContext};

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::task::JoinSet;

fn request(series: usize) -> WriteRequest {
    WriteRequest::new(
        (0..series)
            .map(|i| {
                TimeSeries::new("http_requests_total", [("instance", format!("host-{i}"))])
                    .with_sample(1_700_000_000_000, 1.0)
            })
            .collect(),
    )
}

async fn adapter_over(store: Arc<dyn ObjectStore>) -> (ObjectStoreEngine, Adapter) {
    let engine = ObjectStoreEngine::new(store, "atomic");
    let adapter = Adapter::with_engine(AdapterConfig::default(), Arc::new(engine.clone()))
        .await
        .unwrap();
    (engine, adapter)
}

#[tokio::test]
async fn test_sequential_dedup_is_idempotent() {
    let (engine, adapter) = adapter_over(Arc::new(InMemory::new())).await;
    let req = request(1);
    let ctx = WriteContext::new();

    assert_eq!(adapter.write_time_series_dedup(&req, &ctx).await.unwrap(), 1);
    for _ in 0..3 {
        assert_eq!(adapter.write_time_series_dedup(&req, &ctx).await.unwrap(), 0);
    }

    assert_eq!(engine.committed_rows("metrics_fingerprint").await.unwrap(), 1);
    assert_eq!(engine.committed_rows("metrics_time_series_map").await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dedup_same_adapter() {
    let (engine, adapter) = adapter_over(Arc::new(InMemory::new())).await;
    let adapter = Arc::new(adapter);
    let req = Arc::new(request(1));

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let adapter = Arc::clone(&adapter);
        let req = Arc::clone(&req);
        tasks.spawn(async move {
            adapter
                .write_time_series_dedup(&req, &WriteContext::new())
                .await
        });
    }

    let mut registered = 0;
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(n)) => registered += n,
            Ok(Err(e)) => panic!("Dedup write failed: {}", e),
            Err(e) => panic!("Task panicked: {}", e),
        }
    }

    assert_eq!(registered, 1, "Exactly one writer should register the series");
    assert_eq!(engine.committed_rows("metrics_fingerprint").await.unwrap(), 1);
    assert_eq!(engine.committed_rows("metrics_time_series_map").await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dedup_independent_adapters() {
    // Separate adapters model separate processes: no shared cache
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let mut adapters = Vec::new();
    for _ in 0..8 {
        adapters.push(Arc::new(adapter_over(Arc::clone(&store)).await.1));
    }
    let req = Arc::new(request(5));

    let mut tasks = JoinSet::new();
    for adapter in &adapters {
        let adapter = Arc::clone(adapter);
        let req = Arc::clone(&req);
        tasks.spawn(async move {
            adapter
                .write_time_series_dedup(&req, &WriteContext::new())
                .await
        });
    }

    let mut registered = 0;
    while let Some(result) = tasks.join_next().await {
        registered += result.unwrap().unwrap();
    }

    let engine = ObjectStoreEngine::new(store, "atomic");
    assert_eq!(registered, 5);
    assert_eq!(engine.committed_rows("metrics_fingerprint").await.unwrap(), 5);
    assert_eq!(engine.committed_rows("metrics_time_series_map").await.unwrap(), 5);
}

#[tokio::test]
async fn test_registration_survives_restart_on_local_store() {
    let dir = tempdir().unwrap();
    let req = request(3);
    let ctx = WriteContext::new();

    {
        let store = Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap());
        let (_, adapter) = adapter_over(store).await;
        assert_eq!(adapter.write_time_series_dedup(&req, &ctx).await.unwrap(), 3);
    }

    let store = Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap());
    let (engine, adapter) = adapter_over(store).await;
    assert_eq!(adapter.write_time_series_dedup(&req, &ctx).await.unwrap(), 0);
    assert_eq!(engine.committed_rows("metrics_fingerprint").await.unwrap(), 3);
}
