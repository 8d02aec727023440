//! Error types for the causal layer.

use vclocked_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("malformed metadata for key {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("metadata encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cleanup of discarded versions for key {key:?} failed: {reason}")]
    Cleanup { key: String, reason: String },
    #[error("write stream is closed")]
    IngestClosed,
}

/// A background cleanup failure, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairFailure {
    pub key: String,
    pub reason: String,
}

impl From<RepairFailure> for KvError {
    fn from(f: RepairFailure) -> Self {
        Self::Cleanup {
            key: f.key,
            reason: f.reason,
        }
    }
}
