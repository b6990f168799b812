//! # seriesink
//!
//! Writes Prometheus remote-write batches into columnar tables on object
//! storage.
//!
//! Every series is identified by a 64-bit fingerprint of its canonical label
//! set, so the same series sent with labels in any order maps to the same
//! identity. Four write modes trade row size against lookups:
//!
//! - **Inline**: one row per sample, labels repeated on every row
//! - **Samples**: one row per sample, labels replaced by the fingerprint
//! - **Series**: one row per distinct series in a batch
//! - **Series dedup**: each series registered once in two metadata tables,
//!   across batches and across processes sharing the same store
//!
//! ## Layout
//!
//! - `fingerprint`: canonical label string and SHA-1 based fingerprint
//! - `schema`: Arrow schemas and row types for each table layout
//! - `storage`: Parquet files on `object_store`, committed via manifests
//! - `metadata`: at-most-once series registration
//! - `writer`: batch to rows for each write mode
//! - `adapter`: validated configuration, cancellation and timeouts

pub mod adapter;
pub mod config;
pub mod fingerprint;
pub mod metadata;
pub mod model;
pub mod schema;
pub mod storage;
pub mod telemetry;
pub mod writer;

mod error;

pub use adapter::{Adapter, WriteContext};
pub use error::{Error, Result};
pub use writer::WriteMode;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::adapter::{Adapter, WriteContext};
    pub use crate::config::{AdapterConfig, PoolConfig, StorageBackend, StorageConfig, TableConfig};
    pub use crate::fingerprint::{Fingerprint, SeriesIdentity};
    pub use crate::model::{Label, Sample, TimeSeries, WriteRequest};
    pub use crate::writer::WriteMode;
    pub use crate::{Error, Result};
}
