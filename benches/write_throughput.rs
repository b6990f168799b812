//! Write throughput benchmark

use seriesink::config::AdapterConfig;
use seriesink::fingerprint::SeriesIdentity;
use seriesink::model::{TimeSeries, WriteRequest};
use seriesink::schema::{rows_to_batch, Row, RowLayout, SampleRow};
use seriesink::storage::ParquetWriter;
use seriesink::{Adapter, WriteContext, WriteMode};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

const HOSTS: [&str; 10] = [
    "server-01", "server-02", "server-03", "server-04", "server-05", "server-06", "server-07",
    "server-08", "server-09", "server-10",
];
const SERVICES: [&str; 5] = [
    "api-gateway",
    "auth-service",
    "user-service",
    "order-service",
    "payment-service",
];

fn create_request(series: usize, samples_per_series: usize) -> WriteRequest {
    let now = chrono::Utc::now().timestamp_millis();
    let timeseries = (0..series)
        .map(|i| {
            let mut ts = TimeSeries::new(
                "http_requests_total",
                [
                    ("service", SERVICES[i % SERVICES.len()].to_string()),
                    ("host", HOSTS[i % HOSTS.len()].to_string()),
                    ("instance", format!("{i}")),
                ],
            );
            for j in 0..samples_per_series {
                ts = ts.with_sample(now + j as i64 * 1_000, (i * j) as f64);
            }
            ts
        })
        .collect();
    WriteRequest::new(timeseries)
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for series in [1_000, 10_000] {
        group.throughput(Throughput::Elements(series as u64));
        let req = create_request(series, 0);

        group.bench_function(format!("{}_series", series), |b| {
            b.iter(|| {
                for ts in &req.timeseries {
                    black_box(SeriesIdentity::from_labels(&ts.labels));
                }
            });
        });
    }

    group.finish();
}

fn benchmark_parquet_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("parquet_encode");
    let writer = ParquetWriter::new();

    for rows in [1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(rows as u64));

        let req = create_request(rows / 10, 10);
        let mut staged = Vec::with_capacity(rows);
        for ts in &req.timeseries {
            let identity = SeriesIdentity::from_labels(&ts.labels);
            let metric: Arc<str> = identity.metric_name.as_str().into();
            for s in &ts.samples {
                staged.push(Row::Sample(SampleRow {
                    timestamp_ns: s.timestamp_ms * 1_000_000,
                    metric_name: Arc::clone(&metric),
                    fingerprint: identity.fingerprint,
                    value: s.value,
                }));
            }
        }

        group.bench_function(format!("{}_rows", rows), |b| {
            b.iter(|| {
                let batch = rows_to_batch(RowLayout::FingerprintSamples, &staged).unwrap();
                black_box(writer.write_batch(&batch).unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_adapter_write(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let adapter = runtime
        .block_on(Adapter::connect(AdapterConfig::default()))
        .unwrap();
    let req = create_request(500, 20);
    let ctx = WriteContext::new();

    let mut group = c.benchmark_group("adapter_write");
    group.throughput(Throughput::Elements(req.sample_count() as u64));

    for mode in [WriteMode::Inline, WriteMode::FingerprintSamples] {
        group.bench_function(mode.as_str(), |b| {
            b.to_async(&runtime)
                .iter(|| async { black_box(adapter.write(mode, &req, &ctx).await.unwrap()) });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fingerprint,
    benchmark_parquet_encode,
    benchmark_adapter_write
);
criterion_main!(benches);
