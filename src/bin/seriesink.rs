//! seriesink CLI
//!
//! Loads a decoded write request from a JSON file and writes it with the
//! chosen mode. Storage and table settings come from `SERIESINK_*`
//! environment variables; the flags below override the storage location.

use seriesink::config::{AdapterConfig, StorageBackend};
use seriesink::model::WriteRequest;
use seriesink::telemetry::{init_logging, LogFormat};
use seriesink::{Adapter, WriteContext, WriteMode};

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Write a remote-write batch to columnar tables
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding a write request
    input: PathBuf,

    /// Write mode: inline, samples, series, series-dedup
    #[arg(long, env = "SERIESINK_MODE", default_value = "inline")]
    mode: String,

    /// Storage backend override: memory, local, s3
    #[arg(long)]
    backend: Option<String>,

    /// Root directory for the local backend
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// Key prefix (logical database)
    #[arg(long)]
    prefix: Option<String>,

    /// Abort the write after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log level
    #[arg(long, env = "SERIESINK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(long, env = "SERIESINK_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    init_logging(level, LogFormat::from_env()?)?;

    let mode: WriteMode = args.mode.parse()?;

    let mut config = AdapterConfig::from_env()?;
    if let Some(backend) = &args.backend {
        config.storage.backend = backend.parse::<StorageBackend>()?;
    }
    if let Some(root) = args.local_root {
        config.storage.local_root = root;
    }
    if let Some(prefix) = args.prefix {
        config.storage.prefix = prefix;
    }

    let raw = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;
    let req: WriteRequest = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", args.input.display()))?;

    info!(
        mode = mode.as_str(),
        series = req.timeseries.len(),
        samples = req.sample_count(),
        "Loaded write request"
    );

    let adapter = Adapter::connect(config).await?;

    let cancel = CancellationToken::new();
    let mut ctx = WriteContext::new().with_cancellation(cancel.clone());
    if let Some(secs) = args.timeout_secs {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling write");
            cancel.cancel();
        }
    });

    let rows = adapter.write(mode, &req, &ctx).await?;
    info!(mode = mode.as_str(), rows, "Write finished");
    println!("{rows}");

    Ok(())
}
