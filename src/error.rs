//! Error types for Millwright

use std::fmt;

/// Result type alias for Millwright operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Millwright
#[derive(Debug)]
pub enum Error {
    /// Backing engine unreachable or liveness probe failed
    Connectivity(String),
    /// Table or view creation failed for a reason other than "already exists"
    Schema(String),
    /// Malformed request rejected before any I/O
    InvalidInput(String),
    /// A chunk write failed mid-ingestion; earlier chunks remain committed
    PartialBatch {
        /// Zero-based index of the chunk that failed
        chunk_index: usize,
        /// Number of records in the failed chunk
        records_in_chunk: usize,
        /// Chunks acknowledged before the failure
        committed_chunks: usize,
        /// Underlying cause
        source: Box<Error>,
    },
    /// A lifecycle stage failed or a transition was rejected
    Lifecycle(String),
    /// Cluster does not exist in the control plane
    ClusterNotFound(String),
    /// Cluster exists but is not serving traffic
    ClusterNotActive { cluster_id: String, status: String },
    /// Engine call exceeded its deadline
    Timeout(String),
    /// Configuration errors
    Config(String),
    /// Serialization errors
    Serialization(String),
    /// Arrow-related errors
    Arrow(arrow_schema::ArrowError),
    /// ClickHouse client errors
    ClickHouse(clickhouse::error::Error),
    /// IO errors
    Io(std::io::Error),
    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the lifecycle manager may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connectivity(_) | Error::Timeout(_) => true,
            Error::ClickHouse(e) => matches!(
                e,
                clickhouse::error::Error::Network(_) | clickhouse::error::Error::TimedOut
            ),
            _ => false,
        }
    }

    /// Resumption metadata for a failed ingestion call: `(chunk_index, records_in_chunk)`.
    pub fn resume_point(&self) -> Option<(usize, usize)> {
        match self {
            Error::PartialBatch {
                chunk_index,
                records_in_chunk,
                ..
            } => Some((*chunk_index, *records_in_chunk)),
            _ => None,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PartialBatch { source, .. } => Some(source.as_ref()),
            Error::Arrow(e) => Some(e),
            Error::ClickHouse(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connectivity(msg) => write!(f, "Connectivity error: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::PartialBatch {
                chunk_index,
                records_in_chunk,
                committed_chunks,
                source,
            } => write!(
                f,
                "Chunk {} ({} records) failed after {} committed chunks: {}",
                chunk_index, records_in_chunk, committed_chunks, source
            ),
            Error::Lifecycle(msg) => write!(f, "Lifecycle error: {}", msg),
            Error::ClusterNotFound(id) => write!(f, "Cluster not found: {}", id),
            Error::ClusterNotActive { cluster_id, status } => {
                write!(f, "Cluster {} is not active (status: {})", cluster_id, status)
            }
            Error::Timeout(op) => write!(f, "Operation timed out: {}", op),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Arrow(e) => write!(f, "Arrow error: {}", e),
            Error::ClickHouse(e) => write!(f, "ClickHouse error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(e: arrow_schema::ArrowError) -> Self {
        Error::Arrow(e)
    }
}

impl From<clickhouse::error::Error> for Error {
    fn from(e: clickhouse::error::Error) -> Self {
        Error::ClickHouse(e)
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

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Config(format!("invalid connection descriptor: {}", e))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout("deadline elapsed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_batch_resume_point() {
        let err = Error::PartialBatch {
            chunk_index: 2,
            records_in_chunk: 5_000,
            committed_chunks: 2,
            source: Box::new(Error::Connectivity("reset by peer".into())),
        };
        assert_eq!(err.resume_point(), Some((2, 5_000)));
        assert!(err.to_string().contains("Chunk 2"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Connectivity("down".into()).is_transient());
        assert!(Error::Timeout("ping".into()).is_transient());
        assert!(!Error::Schema("denied".into()).is_transient());
        assert!(!Error::InvalidInput("empty".into()).is_transient());
    }
}
