//! Grouping of a sorted physical stream into per-key candidate batches.
//!
//! A `ScanCursor` is fed physical entries in store order (either
//! direction). It pairs the value and metadata entries that share a
//! discriminator and hands back a [`KeyBatch`] each time the logical key
//! changes. State lives in the cursor, so concurrent scans never share it.

use crate::error::KvError;
use crate::keys::{self, EntryKind};
use crate::vclock::VClock;
use crate::version::{StoredVersion, VersionMeta, VersionedRecord};
use vclocked_storage::Entry;

/// All candidate versions read for one logical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBatch {
    pub key: String,
    pub candidates: Vec<StoredVersion>,
}

#[derive(Debug)]
pub enum CursorEvent {
    /// The previous logical key has no more entries.
    Complete(KeyBatch),
    /// A metadata entry failed to parse; its version was dropped.
    Malformed(KvError),
}

#[derive(Debug, Default)]
pub struct ScanCursor {
    current_key: Option<String>,
    current_discriminator: Option<String>,
    pending_value: Option<Vec<u8>>,
    pending_clock: Option<VClock>,
    batch: Vec<StoredVersion>,
}

impl ScanCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next physical entry.
    pub fn push(&mut self, entry: Entry) -> Vec<CursorEvent> {
        let mut events = Vec::new();

        let Some(physical) = keys::decode(&entry.key) else {
            tracing::debug!("skipping foreign entry {:?}", entry.key);
            return events;
        };

        if self.current_discriminator.as_deref() != Some(physical.discriminator.as_str()) {
            self.drop_partial_pair();
            self.current_discriminator = Some(physical.discriminator.clone());
        }

        if self.current_key.as_deref() != Some(physical.logical.as_str()) {
            if let Some(batch) = self.take_batch() {
                events.push(CursorEvent::Complete(batch));
            }
            self.current_key = Some(physical.logical.clone());
        }

        match physical.kind {
            EntryKind::Value => self.pending_value = Some(entry.value),
            EntryKind::Meta => match serde_json::from_slice::<VersionMeta>(&entry.value) {
                Ok(meta) => self.pending_clock = Some(meta.clock),
                Err(source) => {
                    tracing::warn!(
                        "dropping version {} of key {:?}: malformed metadata",
                        physical.discriminator,
                        physical.logical
                    );
                    self.pending_value = None;
                    self.pending_clock = None;
                    events.push(CursorEvent::Malformed(KvError::Decode {
                        key: physical.logical,
                        source,
                    }));
                    return events;
                }
            },
        }

        if self.pending_value.is_some() && self.pending_clock.is_some() {
            if let (Some(value), Some(clock), Some(key), Some(disc)) = (
                self.pending_value.take(),
                self.pending_clock.take(),
                self.current_key.clone(),
                self.current_discriminator.clone(),
            ) {
                self.batch.push(StoredVersion {
                    discriminator: disc,
                    record: VersionedRecord { key, value, clock },
                });
            }
        }

        events
    }

    /// Flush the last key once the input is exhausted.
    pub fn finish(&mut self) -> Option<KeyBatch> {
        self.drop_partial_pair();
        self.current_discriminator = None;
        let batch = self.take_batch();
        self.current_key = None;
        batch
    }

    fn take_batch(&mut self) -> Option<KeyBatch> {
        if self.batch.is_empty() {
            return None;
        }
        let key = self.current_key.clone()?;
        Some(KeyBatch {
            key,
            candidates: std::mem::take(&mut self.batch),
        })
    }

    fn drop_partial_pair(&mut self) {
        if self.pending_value.is_some() || self.pending_clock.is_some() {
            tracing::debug!(
                "dropping incomplete version {:?} of key {:?}",
                self.current_discriminator,
                self.current_key
            );
        }
        self.pending_value = None;
        self.pending_clock = None;
    }
}
