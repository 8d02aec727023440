//! Storage engine: combines WAL + Memtable.
//!
//! Every batch goes through the WAL first (for durability) as one framed
//! entry, then into the sorted memtable (for reads). A batch whose WAL
//! append fails is never applied.

use crate::memtable::Memtable;
use crate::record::{BatchOp, Entry, WalBatch};
use crate::store::{OrderedStore, RangeQuery};
use crate::wal::{FsyncPolicy, Wal, WalError};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage is closed")]
    Closed,
}

/// The storage engine. All operations are synchronous (blocking I/O).
/// The async boundary is at the caller (KV layer).
#[derive(Debug)]
pub struct StorageEngine {
    memtable: Memtable,
    /// `None` once closed.
    wal: Option<Wal>,
    wal_path: PathBuf,
    batches_written: u64,
}

impl StorageEngine {
    /// Open or create a storage engine at the given directory.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join("wal.log");

        let replay = Wal::replay(&wal_path)?;
        let replayed = replay.batches.len();
        let mut memtable = Memtable::new();
        for batch in &replay.batches {
            memtable.apply(&batch.ops);
        }

        // New appends must follow the last valid entry, not a torn one.
        let dropped = Wal::truncate_tail(&wal_path, replay.valid_len)?;
        if dropped > 0 {
            tracing::warn!(
                "dropped {} bytes of torn WAL tail at {:?}",
                dropped,
                wal_path
            );
        }

        let wal = Wal::open(&wal_path, fsync)?;

        tracing::info!(
            "storage engine opened: {} entries recovered from {} batches at {:?}",
            memtable.len(),
            replayed,
            wal_path
        );

        Ok(Self {
            memtable,
            wal: Some(wal),
            wal_path,
            batches_written: 0,
        })
    }

    /// Read a single physical key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.ensure_open()?;
        Ok(self.memtable.get(key).map(<[u8]>::to_vec))
    }

    /// Number of physical entries.
    pub fn len(&self) -> usize {
        self.memtable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memtable.is_empty()
    }

    /// Batches applied since open.
    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Sync the WAL to disk (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.as_mut().ok_or(StorageError::Closed)?.sync()?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.wal.is_some() {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }
}

impl OrderedStore for StorageEngine {
    fn scan(&self, query: &RangeQuery) -> Result<Vec<Entry>, StorageError> {
        self.ensure_open()?;
        Ok(self.memtable.scan(query))
    }

    fn write_batch(&mut self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let wal = self.wal.as_mut().ok_or(StorageError::Closed)?;
        if ops.is_empty() {
            return Ok(());
        }
        let batch = WalBatch::new(ops);
        wal.append(&batch)?;
        self.memtable.apply(&batch.ops);
        self.batches_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut wal) = self.wal.take() {
            wal.sync()?;
            tracing::info!(
                "storage engine closed after {} batches ({:?})",
                self.batches_written,
                self.wal_path
            );
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.wal.is_some()
    }
}
