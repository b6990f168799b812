//! Configuration and component factory
//!
//! Table names are interpolated into object keys, so every one of them is
//! checked against the non-quoted identifier rule before an adapter exists.
//! Everything else can be supplied programmatically or read from
//! `SERIESINK_*` environment variables.

use crate::{Error, Result};

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ClientOptions, ObjectStore};
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;

/// Non-quoted identifier: letter or underscore, then letters, digits,
/// underscores or dots.
fn identifier_regex() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_][0-9a-zA-Z_.]*$").expect("identifier pattern is valid")
    })
}

/// Reject anything that is not a plain identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_regex().is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// Target tables, one per write mode plus the two metadata tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Inline samples (labels on every row)
    pub table: String,
    /// Fingerprinted samples
    pub samples_table: String,
    /// Series rows written by fingerprint-series mode
    pub time_series_table: String,
    /// Fingerprint to label map written by dedup mode
    pub time_series_map_table: String,
    /// Metric name to fingerprint mapping written by dedup mode
    pub metric_fingerprint_table: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table: "metrics".to_string(),
            samples_table: "metrics_samples".to_string(),
            time_series_table: "metrics_time_series".to_string(),
            time_series_map_table: "metrics_time_series_map".to_string(),
            metric_fingerprint_table: "metrics_fingerprint".to_string(),
        }
    }
}

impl TableConfig {
    /// Every configured table name with its setting key
    pub fn names(&self) -> [(&'static str, &str); 5] {
        [
            ("table", &self.table),
            ("samples_table", &self.samples_table),
            ("time_series_table", &self.time_series_table),
            ("time_series_map_table", &self.time_series_map_table),
            ("metric_fingerprint_table", &self.metric_fingerprint_table),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (_, name) in self.names() {
            validate_identifier(name)?;
        }
        Ok(())
    }
}

/// Bounds on concurrent work against the store
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum units of work open at once
    pub max_open: usize,
    /// Idle connections kept per host by the HTTP client
    pub max_idle: usize,
    /// Idle pooled connections are closed after this long. The HTTP client
    /// has no maximum connection age, so this stands in for one.
    pub pool_idle_timeout: Duration,
    /// Dial timeout for new connections
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 16,
            max_idle: 2,
            pool_idle_timeout: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_open == 0 {
            return Err(Error::Config("pool max_open must be at least 1".to_string()));
        }
        if self.max_idle > self.max_open {
            return Err(Error::Config(format!(
                "pool max_idle ({}) exceeds max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        Ok(())
    }

    fn client_options(&self) -> ClientOptions {
        ClientOptions::new()
            .with_pool_max_idle_per_host(self.max_idle)
            .with_pool_idle_timeout(self.pool_idle_timeout)
            .with_connect_timeout(self.connect_timeout)
    }
}

/// Supported object storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Local,
    S3,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" | "file" => Ok(Self::Local),
            "s3" | "aws" => Ok(Self::S3),
            other => Err(Error::Config(format!(
                "unknown storage backend '{}'; expected one of memory, local, s3",
                other
            ))),
        }
    }
}

/// Object storage location
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Bucket name (s3)
    pub bucket: String,
    /// Region (s3)
    pub region: String,
    /// Custom endpoint, e.g. MinIO (s3)
    pub endpoint: Option<String>,
    /// Root directory (local)
    pub local_root: PathBuf,
    /// Key prefix under which all tables live, the logical database
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            bucket: "seriesink-data".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            local_root: PathBuf::from("/var/lib/seriesink"),
            prefix: "default".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.prefix).map_err(|_| {
            Error::Config(format!(
                "storage prefix '{}' must be a non-quoted identifier",
                self.prefix
            ))
        })?;
        if self.backend == StorageBackend::S3 && self.bucket.trim().is_empty() {
            return Err(Error::Config("bucket required for s3 backend".to_string()));
        }
        Ok(())
    }
}

/// Known-registered fingerprint cache and claim handling
#[derive(Debug, Clone)]
pub struct MetadataCacheConfig {
    /// Maximum fingerprints remembered in process
    pub capacity: u64,
    /// How long to wait on another writer's unfinished registration before
    /// giving up with an error
    pub claim_wait: Duration,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            claim_wait: Duration::from_secs(30),
        }
    }
}

/// Everything an adapter needs
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    pub tables: TableConfig,
    pub pool: PoolConfig,
    pub storage: StorageConfig,
    pub metadata_cache: MetadataCacheConfig,
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<()> {
        self.tables.validate()?;
        self.pool.validate()?;
        self.storage.validate()
    }

    /// Load configuration from the environment
    ///
    /// Environment variables (all optional):
    /// - SERIESINK_TABLE, SERIESINK_SAMPLES_TABLE, SERIESINK_TIME_SERIES_TABLE,
    ///   SERIESINK_TIME_SERIES_MAP_TABLE, SERIESINK_METRIC_FINGERPRINT_TABLE
    /// - SERIESINK_STORAGE_BACKEND: "memory" (default), "local" or "s3"
    /// - SERIESINK_BUCKET, SERIESINK_REGION, SERIESINK_ENDPOINT
    /// - SERIESINK_LOCAL_ROOT, SERIESINK_PREFIX
    /// - SERIESINK_MAX_OPEN, SERIESINK_MAX_IDLE
    /// - SERIESINK_METADATA_CACHE_CAPACITY, SERIESINK_CLAIM_WAIT_MS
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let tables = &mut config.tables;
        for (key, slot) in [
            ("SERIESINK_TABLE", &mut tables.table),
            ("SERIESINK_SAMPLES_TABLE", &mut tables.samples_table),
            ("SERIESINK_TIME_SERIES_TABLE", &mut tables.time_series_table),
            (
                "SERIESINK_TIME_SERIES_MAP_TABLE",
                &mut tables.time_series_map_table,
            ),
            (
                "SERIESINK_METRIC_FINGERPRINT_TABLE",
                &mut tables.metric_fingerprint_table,
            ),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value.trim().to_string();
            }
        }

        let storage = &mut config.storage;
        if let Some(backend) = lookup("SERIESINK_STORAGE_BACKEND") {
            storage.backend = backend.parse()?;
        }
        if let Some(bucket) = lookup("SERIESINK_BUCKET") {
            storage.bucket = bucket;
        }
        if let Some(region) = lookup("SERIESINK_REGION") {
            storage.region = region;
        }
        storage.endpoint = lookup("SERIESINK_ENDPOINT").filter(|s| !s.trim().is_empty());
        if let Some(root) = lookup("SERIESINK_LOCAL_ROOT") {
            storage.local_root = PathBuf::from(root);
        }
        if let Some(prefix) = lookup("SERIESINK_PREFIX") {
            storage.prefix = prefix.trim().to_string();
        }

        if let Some(max_open) = lookup("SERIESINK_MAX_OPEN") {
            config.pool.max_open = parse_number("SERIESINK_MAX_OPEN", &max_open)?;
        }
        if let Some(max_idle) = lookup("SERIESINK_MAX_IDLE") {
            config.pool.max_idle = parse_number("SERIESINK_MAX_IDLE", &max_idle)?;
        }
        if let Some(capacity) = lookup("SERIESINK_METADATA_CACHE_CAPACITY") {
            config.metadata_cache.capacity =
                parse_number("SERIESINK_METADATA_CACHE_CAPACITY", &capacity)?;
        }
        if let Some(wait) = lookup("SERIESINK_CLAIM_WAIT_MS") {
            config.metadata_cache.claim_wait =
                Duration::from_millis(parse_number("SERIESINK_CLAIM_WAIT_MS", &wait)?);
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key} must be a number, got '{raw}': {e}")))
}

/// Builds storage components from configuration
pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the object store for a storage configuration
    ///
    /// S3 credentials come from AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY when
    /// set, otherwise from the instance role.
    pub fn create_object_store(
        storage: &StorageConfig,
        pool: &PoolConfig,
    ) -> Result<Arc<dyn ObjectStore>> {
        match storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory object store (development mode)");
                Ok(Arc::new(InMemory::new()))
            }
            StorageBackend::Local => {
                std::fs::create_dir_all(&storage.local_root)?;
                info!(root = %storage.local_root.display(), "Using local filesystem object store");
                Ok(Arc::new(LocalFileSystem::new_with_prefix(
                    &storage.local_root,
                )?))
            }
            StorageBackend::S3 => {
                info!(
                    bucket = %storage.bucket,
                    region = %storage.region,
                    "Using S3 object store"
                );

                let mut options = pool.client_options();
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&storage.bucket)
                    .with_region(&storage.region);

                // Support custom endpoints (MinIO, LocalStack)
                if let Some(endpoint) = &storage.endpoint {
                    info!("Using custom S3 endpoint: {}", endpoint);
                    builder = builder.with_endpoint(endpoint);
                    options = options.with_allow_http(true);
                }

                if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
                    builder = builder.with_access_key_id(&key);
                }
                if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                    builder = builder.with_secret_access_key(&secret);
                }

                Ok(Arc::new(builder.with_client_options(options).build()?))
            }
        }
    }
}
