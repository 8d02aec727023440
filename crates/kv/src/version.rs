//! Version records as seen by callers and by the repair pass.

use crate::keys::{self, EntryKind};
use crate::vclock::VClock;
use serde::{Deserialize, Serialize};
use vclocked_storage::BatchOp;

/// One surviving version of a logical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub clock: VClock,
}

/// A version without its key (values-only projection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockedValue {
    pub value: Vec<u8>,
    pub clock: VClock,
}

impl From<VersionedRecord> for ClockedValue {
    fn from(r: VersionedRecord) -> Self {
        Self {
            value: r.value,
            clock: r.clock,
        }
    }
}

/// Persisted metadata payload: `{"clock": {node: counter}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub clock: VClock,
}

/// A version together with the discriminator addressing its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    pub discriminator: String,
    pub record: VersionedRecord,
}

impl StoredVersion {
    pub fn clock(&self) -> &VClock {
        &self.record.clock
    }

    /// Delete ops for both entries of this version.
    pub fn delete_ops(&self) -> [BatchOp; 2] {
        [
            BatchOp::del(keys::encode(
                &self.record.key,
                &self.discriminator,
                EntryKind::Value,
            )),
            BatchOp::del(keys::encode(
                &self.record.key,
                &self.discriminator,
                EntryKind::Meta,
            )),
        ]
    }
}
