//! Logging bootstrap for seriesink binaries.

use crate::{Error, Result};

use tracing::{info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }

    /// `SERIESINK_LOG_JSON` toggles JSON output; JSON is the default.
    pub fn from_env() -> Result<Self> {
        Ok(match parse_optional_bool("SERIESINK_LOG_JSON")? {
            Some(false) => LogFormat::Text,
            _ => LogFormat::Json,
        })
    }
}

/// Install the global subscriber. Fails if one is already installed.
///
/// `log_level` is the default; `RUST_LOG` directives such as
/// `seriesink::metadata=trace` refine it per target.
pub fn init_logging(log_level: &str, format: LogFormat) -> Result<()> {
    let level = parse_log_level(log_level)?;
    let directives = std::env::var("RUST_LOG").ok();
    let builder = FmtSubscriber::builder()
        .with_env_filter(log_filter(level, directives.as_deref()))
        .with_target(true)
        .with_thread_ids(true);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed
        .map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

    info!(level = %level, format = format.as_str(), "Logging initialized");
    Ok(())
}

/// Filter at `level` unless `directives` say otherwise. Bad directives are skipped.
pub fn log_filter(level: Level, directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse_lossy(directives.unwrap_or_default())
}

pub fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

fn parse_optional_bool(name: &str) -> Result<Option<bool>> {
    let Some(raw) = std::env::var(name).ok() else {
        return Ok(None);
    };
    parse_bool(name, &raw).map(Some)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0), got '{raw}'"
        ))),
    }
}
