//! Version store: causal put/get/del over an ordered store.
//!
//! The store:
//! 1. Tags every put with a fresh clock derived from the caller's context
//! 2. Writes the value and metadata entries of a version in one batch
//! 3. Resolves reads through read repair, returning only live versions
//! 4. Deletes discarded versions in the background, off the read path
//!
//! No state is shared between calls beyond the storage handle.

use crate::cursor::{CursorEvent, ScanCursor};
use crate::error::{KvError, RepairFailure};
use crate::ingest::{WriteMode, WriteStream};
use crate::keys::{self, EntryKind};
use crate::repair::read_repair;
use crate::stream::{ReadOptions, ReadStream};
use crate::vclock::{ParentContext, VClock};
use crate::version::{StoredVersion, VersionMeta, VersionedRecord};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use vclocked_config::StoreConfig;
use vclocked_metrics::{metrics, start_op_timer};
use vclocked_storage::{BatchOp, FsyncPolicy, OrderedStore, StorageEngine};

/// Capacity of the repair-failure broadcast channel.
const REPAIR_EVENTS_CAPACITY: usize = 64;

/// Result of a put: the new clock and the key it was written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub key: String,
    pub clock: VClock,
}

/// Tunables taken from [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Physically delete discarded versions.
    pub repair_enabled: bool,
    /// Physical entries fetched per scan round trip.
    pub page_size: usize,
    /// Depth of the bulk-write channel.
    pub channel_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            repair_enabled: true,
            page_size: 256,
            channel_capacity: 1024,
        }
    }
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            repair_enabled: config.repair.enabled,
            page_size: config.scan.page_size,
            channel_capacity: config.ingest.channel_capacity,
        }
    }
}

/// Causal multi-version store.
///
/// Generic over `S: OrderedStore` so tests can substitute the engine;
/// real use goes through [`VersionStore::open`].
pub struct VersionStore<S: OrderedStore = StorageEngine> {
    node: String,
    storage: Arc<RwLock<S>>,
    options: StoreOptions,
    repair_events: broadcast::Sender<RepairFailure>,
}

impl<S: OrderedStore> Clone for VersionStore<S> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            storage: self.storage.clone(),
            options: self.options.clone(),
            repair_events: self.repair_events.clone(),
        }
    }
}

impl<S: OrderedStore> std::fmt::Debug for VersionStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("node", &self.node)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl VersionStore<StorageEngine> {
    /// Open a WAL-backed store as described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self, KvError> {
        config
            .validate()
            .map_err(|e| KvError::InvalidArgument(e.to_string()))?;
        let fsync = FsyncPolicy::from_str_config(&config.storage.fsync);
        let engine = StorageEngine::open(&config.storage.data_dir, fsync)?;
        tracing::info!(
            "version store for node {:?} opened at {:?}",
            config.node_id,
            config.storage.data_dir
        );
        Self::new(engine, config.node_id.clone(), StoreOptions::from(config))
    }
}

impl<S: OrderedStore> VersionStore<S> {
    pub fn new(storage: S, node: impl Into<String>, options: StoreOptions) -> Result<Self, KvError> {
        let node = node.into();
        validate_node(&node)?;
        if options.page_size == 0 || options.channel_capacity == 0 {
            return Err(KvError::InvalidArgument(
                "page_size and channel_capacity must be > 0".into(),
            ));
        }
        let (repair_events, _) = broadcast::channel(REPAIR_EVENTS_CAPACITY);
        Ok(Self {
            node,
            storage: Arc::new(RwLock::new(storage)),
            options,
            repair_events,
        })
    }

    /// A handle over the same storage that tags increments with `node`.
    pub fn with_node(&self, node: impl Into<String>) -> Result<Self, KvError> {
        let node = node.into();
        validate_node(&node)?;
        Ok(Self {
            node,
            ..self.clone()
        })
    }

    /// The node id used as this handle's vclock key.
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub(crate) fn storage(&self) -> &Arc<RwLock<S>> {
        &self.storage
    }

    /// Receive background cleanup failures from every handle of this store.
    pub fn subscribe_repair_failures(&self) -> broadcast::Receiver<RepairFailure> {
        self.repair_events.subscribe()
    }

    // -----------------------------------------------------------------------
    // PUT
    // -----------------------------------------------------------------------

    /// Write a new version of `key` whose clock succeeds `parent`.
    pub async fn put(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        parent: impl Into<ParentContext>,
    ) -> Result<PutOutcome, KvError> {
        let _timer = start_op_timer("put");
        let (ops, clock) = self.prepare_put(key, value.into(), parent.into())?;

        self.storage.write().await.write_batch(ops)?;
        metrics().puts.inc();
        tracing::debug!("put {:?} with clock {:?}", key, clock.entries());

        Ok(PutOutcome {
            key: key.to_string(),
            clock,
        })
    }

    /// Build the two physical entries of a new version.
    pub(crate) fn prepare_put(
        &self,
        key: &str,
        value: Vec<u8>,
        parent: ParentContext,
    ) -> Result<(Vec<BatchOp>, VClock), KvError> {
        keys::validate_key(key)?;
        let clock = parent.resolve().increment(&self.node);
        let discriminator = keys::new_discriminator();
        let meta = serde_json::to_vec(&VersionMeta {
            clock: clock.clone(),
        })?;

        let ops = vec![
            BatchOp::put(keys::encode(key, &discriminator, EntryKind::Value), value),
            BatchOp::put(keys::encode(key, &discriminator, EntryKind::Meta), meta),
        ];
        Ok((ops, clock))
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Read the live versions of `key`. Empty when the key does not exist.
    pub async fn get(&self, key: &str) -> Result<Vec<VersionedRecord>, KvError> {
        let _timer = start_op_timer("get");
        keys::validate_key(key)?;

        let entries = {
            let s = self.storage.read().await;
            s.scan(&keys::bracket(key))?
        };
        metrics().gets.inc();

        let mut cursor = ScanCursor::new();
        let mut candidates = Vec::new();
        for entry in entries {
            for event in cursor.push(entry) {
                match event {
                    CursorEvent::Complete(batch) => candidates.extend(batch.candidates),
                    CursorEvent::Malformed(e) => return Err(e),
                }
            }
        }
        if let Some(batch) = cursor.finish() {
            candidates.extend(batch.candidates);
        }

        let outcome = read_repair(candidates);
        self.spawn_cleanup(key, outcome.discarded, None);

        Ok(outcome.repaired.into_iter().map(|v| v.record).collect())
    }

    // -----------------------------------------------------------------------
    // DEL
    // -----------------------------------------------------------------------

    /// Remove every version of `key`. No tombstone is kept.
    pub async fn del(&self, key: &str) -> Result<(), KvError> {
        let _timer = start_op_timer("del");
        keys::validate_key(key)?;

        let mut s = self.storage.write().await;
        let ops = delete_ops(s.scan(&keys::bracket(key))?);
        let removed = ops.len();
        if !ops.is_empty() {
            s.write_batch(ops)?;
        }
        drop(s);

        metrics().deletes.inc();
        tracing::debug!("del {:?} removed {} entries", key, removed);
        Ok(())
    }

    /// Resolve the delete batch for `key` without applying it.
    pub(crate) async fn prepare_del(&self, key: &str) -> Result<Vec<BatchOp>, KvError> {
        keys::validate_key(key)?;
        let s = self.storage.read().await;
        Ok(delete_ops(s.scan(&keys::bracket(key))?))
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    /// Scan logical keys in store order, repairing as it goes.
    pub fn read_stream(&self, options: ReadOptions) -> Result<ReadStream<S>, KvError> {
        ReadStream::new(self.clone(), options)
    }

    /// Values-only shorthand for [`read_stream`](Self::read_stream).
    pub fn value_stream(&self, options: ReadOptions) -> Result<ReadStream<S>, KvError> {
        self.read_stream(options.include_keys(false).include_values(true))
    }

    /// Bulk put or delete through a single writer task.
    pub fn write_stream(&self, mode: WriteMode) -> WriteStream<S> {
        WriteStream::new(self.clone(), mode)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn close(&self) -> Result<(), KvError> {
        self.storage.write().await.close()?;
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.storage.read().await.is_open()
    }

    pub async fn is_closed(&self) -> bool {
        self.storage.read().await.is_closed()
    }

    // -----------------------------------------------------------------------
    // Internal: background cleanup
    // -----------------------------------------------------------------------

    /// Delete discarded versions off the caller's path. Failures are logged,
    /// counted, broadcast, and forwarded to `stream_errors` when given.
    pub(crate) fn spawn_cleanup(
        &self,
        key: &str,
        discarded: Vec<StoredVersion>,
        stream_errors: Option<mpsc::UnboundedSender<KvError>>,
    ) {
        if discarded.is_empty() {
            return;
        }
        let m = metrics();
        m.read_repairs.inc();
        m.versions_discarded.inc_by(discarded.len() as u64);

        if !self.options.repair_enabled {
            tracing::debug!(
                "repair disabled; leaving {} discarded version(s) of {:?}",
                discarded.len(),
                key
            );
            return;
        }

        let ops: Vec<BatchOp> = discarded.iter().flat_map(StoredVersion::delete_ops).collect();
        let storage = self.storage.clone();
        let events = self.repair_events.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            let result = storage.write().await.write_batch(ops);
            if let Err(e) = result {
                tracing::warn!("read repair cleanup for {:?} failed: {}", key, e);
                metrics().repair_cleanup_failures.inc();
                let failure = RepairFailure {
                    key,
                    reason: e.to_string(),
                };
                if let Some(tx) = stream_errors {
                    let _ = tx.send(failure.clone().into());
                }
                // No subscribers is fine.
                let _ = events.send(failure);
            }
        });
    }
}

fn validate_node(node: &str) -> Result<(), KvError> {
    if node.is_empty() {
        return Err(KvError::InvalidArgument("node id must not be empty".into()));
    }
    if node.contains(['\0', '\u{1}']) {
        return Err(KvError::InvalidArgument(
            "node id must not contain reserved separator bytes".into(),
        ));
    }
    Ok(())
}

fn delete_ops(entries: Vec<vclocked_storage::Entry>) -> Vec<BatchOp> {
    entries.into_iter().map(|e| BatchOp::del(e.key)).collect()
}
