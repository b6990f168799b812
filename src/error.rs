//! Error types for seriesink

use std::fmt;
use std::sync::Arc;

/// Result type alias for seriesink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for seriesink
#[derive(Debug)]
pub enum Error {
    /// Arrow-related errors
    Arrow(arrow_schema::ArrowError),
    /// Parquet-related errors
    Parquet(parquet::errors::ParquetError),
    /// Object store errors
    ObjectStore(object_store::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Table name is not a valid non-quoted identifier
    InvalidIdentifier(String),
    /// A row does not fit the layout of the table it was appended to
    InvalidSchema(String),
    /// A sample could not be converted to a stored row
    InvalidSample(String),
    /// Connectivity check against the store failed at construction
    Unreachable(String),
    /// Series metadata lookup or registration failed
    Metadata(String),
    /// Registration of a fingerprint failed (shared between coalesced callers)
    Registration { fingerprint: u64, source: Arc<Error> },
    /// The unit of work was already committed or rolled back
    TransactionClosed,
    /// Cancelled by the caller
    Cancelled,
    /// Timeout
    Timeout,
    /// Internal error
    Internal(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Arrow(e) => Some(e),
            Error::Parquet(e) => Some(e),
            Error::ObjectStore(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Registration { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Arrow(e) => write!(f, "Arrow error: {}", e),
            Error::Parquet(e) => write!(f, "Parquet error: {}", e),
            Error::ObjectStore(e) => write!(f, "Object store error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidIdentifier(name) => write!(
                f,
                "Invalid table name '{}': use a non-quoted identifier",
                name
            ),
            Error::InvalidSchema(msg) => write!(f, "Invalid schema: {}", msg),
            Error::InvalidSample(msg) => write!(f, "Invalid sample: {}", msg),
            Error::Unreachable(msg) => write!(f, "Store unreachable: {}", msg),
            Error::Metadata(msg) => write!(f, "Metadata error: {}", msg),
            Error::Registration {
                fingerprint,
                source,
            } => write!(
                f,
                "Registration of fingerprint {:016x} failed: {}",
                fingerprint, source
            ),
            Error::TransactionClosed => write!(f, "Unit of work already closed"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl Error {
    /// Whether the error came from the caller's context rather than the store.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled | Error::Timeout => true,
            Error::Registration { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(e: arrow_schema::ArrowError) -> Self {
        Error::Arrow(e)
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Parquet(e)
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStore(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_error_exposes_source() {
        let err = Error::Registration {
            fingerprint: 0xabcd,
            source: Arc::new(Error::Metadata("boom".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("000000000000abcd"));
        assert!(msg.contains("boom"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::Timeout.is_cancellation());
        assert!(!Error::Metadata("x".into()).is_cancellation());
        let shared = Error::Registration {
            fingerprint: 1,
            source: Arc::new(Error::Cancelled),
        };
        assert!(shared.is_cancellation());
    }
}
