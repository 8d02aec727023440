//! Ordered storage engine for vclocked: WAL + sorted memtable.
//!
//! Physical entries are opaque `(key, value)` byte pairs kept in byte
//! order. Writes are atomic batches; the WAL provides durability and the
//! memtable serves range scans.

pub mod engine;
pub mod memtable;
pub mod record;
pub mod store;
pub mod wal;

pub use engine::{StorageEngine, StorageError};
pub use record::{BatchOp, Entry};
pub use store::{OrderedStore, RangeQuery};
pub use wal::{FsyncPolicy, WalReplay};
