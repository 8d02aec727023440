//! Causally consistent multi-version KV layer over an ordered store.
//!
//! Provides: vector-clock versioning, co-located physical encoding of
//! sibling versions, read repair on every read, and streaming scan / bulk
//! ingest pipelines built on the same per-key logic.

pub mod cursor;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod repair;
pub mod store;
pub mod stream;
pub mod vclock;
pub mod version;

pub use error::{KvError, RepairFailure};
pub use ingest::{IngestSummary, PendingWrite, WriteAck, WriteMode, WriteRequest, WriteStream};
pub use store::{PutOutcome, StoreOptions, VersionStore};
pub use stream::{ReadOptions, ReadStream, ScanItem};
pub use vclock::{ParentContext, VClock, VClockOrder};
pub use version::{ClockedValue, VersionedRecord};
