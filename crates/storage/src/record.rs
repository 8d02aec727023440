//! Physical record and batch formats.

use serde::{Deserialize, Serialize};

/// A physical `(key, value)` pair as stored in the ordered table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<Vec<u8>>) -> Self {
        Self::Del { key: key.into() }
    }

    /// The physical key this operation touches.
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Del { key } => key,
        }
    }
}

/// A batch as written to the WAL: applied all-or-nothing on replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalBatch {
    pub ops: Vec<BatchOp>,
    /// Wall-clock timestamp (millis since epoch).
    pub timestamp_ms: u64,
}

impl WalBatch {
    pub fn new(ops: Vec<BatchOp>) -> Self {
        Self {
            ops,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}
