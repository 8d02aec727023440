//! Streaming scan with in-stream read repair.
//!
//! A [`ReadStream`] pages through the physical keyspace, groups entries per
//! logical key with a [`ScanCursor`], and yields one repaired item per key.
//! No storage iterator is held between pages, so dropping the stream at any
//! point ends the scan cleanly.

use crate::cursor::{CursorEvent, KeyBatch, ScanCursor};
use crate::error::KvError;
use crate::repair::read_repair;
use crate::store::VersionStore;
use crate::version::{ClockedValue, VersionedRecord};
use futures::Stream;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use vclocked_metrics::metrics;
use vclocked_storage::{OrderedStore, RangeQuery, StorageEngine};

/// Options for [`VersionStore::read_stream`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Inclusive lower bound on logical keys.
    pub start: Option<String>,
    /// Exclusive upper bound on logical keys.
    pub end: Option<String>,
    pub reverse: bool,
    pub include_keys: bool,
    pub include_values: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            reverse: false,
            include_keys: true,
            include_values: true,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, key: impl Into<String>) -> Self {
        self.start = Some(key.into());
        self
    }

    pub fn end(mut self, key: impl Into<String>) -> Self {
        self.end = Some(key.into());
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn include_keys(mut self, include: bool) -> Self {
        self.include_keys = include;
        self
    }

    pub fn include_values(mut self, include: bool) -> Self {
        self.include_values = include;
        self
    }

    fn projection(&self) -> Result<Projection, KvError> {
        match (self.include_keys, self.include_values) {
            (true, true) => Ok(Projection::Records),
            (true, false) => Ok(Projection::Keys),
            (false, true) => Ok(Projection::Values),
            (false, false) => Err(KvError::InvalidArgument(
                "read stream must include keys, values, or both".into(),
            )),
        }
    }

    /// Logical bounds map directly onto physical bytes: every entry of `k`
    /// sorts after `k` itself and before any key greater than `k`.
    fn range(&self) -> RangeQuery {
        let mut query = RangeQuery::all().reverse(self.reverse);
        if let Some(start) = &self.start {
            query = query.start(start.as_bytes().to_vec());
        }
        if let Some(end) = &self.end {
            query = query.end(end.as_bytes().to_vec());
        }
        query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Records,
    Keys,
    Values,
}

/// One logical key's worth of scan output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    Key(String),
    Values(Vec<ClockedValue>),
    Records(Vec<VersionedRecord>),
}

impl ScanItem {
    /// The logical key, when the projection kept it.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Key(k) => Some(k),
            Self::Records(r) => r.first().map(|r| r.key.as_str()),
            Self::Values(_) => None,
        }
    }
}

pub struct ReadStream<S: OrderedStore = StorageEngine> {
    store: VersionStore<S>,
    query: RangeQuery,
    projection: Projection,
    cursor: ScanCursor,
    /// Last physical key read; the next page starts strictly past it.
    after: Option<Vec<u8>>,
    exhausted: bool,
    ready: VecDeque<Result<ScanItem, KvError>>,
    /// Dropped once the range is exhausted so the receiver closes when the
    /// last spawned cleanup finishes.
    cleanup_tx: Option<mpsc::UnboundedSender<KvError>>,
    cleanup_rx: mpsc::UnboundedReceiver<KvError>,
}

impl<S: OrderedStore> std::fmt::Debug for ReadStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream")
            .field("query", &self.query)
            .field("projection", &self.projection)
            .field("exhausted", &self.exhausted)
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl<S: OrderedStore> ReadStream<S> {
    pub(crate) fn new(store: VersionStore<S>, options: ReadOptions) -> Result<Self, KvError> {
        let projection = options.projection()?;
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();
        metrics().scans.inc();
        tracing::debug!(
            "read stream over {:?}..{:?} (reverse={})",
            options.start,
            options.end,
            options.reverse
        );
        Ok(Self {
            store,
            query: options.range(),
            projection,
            cursor: ScanCursor::new(),
            after: None,
            exhausted: false,
            ready: VecDeque::new(),
            cleanup_tx: Some(cleanup_tx),
            cleanup_rx,
        })
    }

    /// Next item, or `None` once the range is exhausted. Cleanup failures
    /// are reported in-band as `Err` items and do not end the scan; a
    /// storage error does. Before returning `None` the stream waits for the
    /// cleanups it spawned, so failures on the final keys are not lost.
    pub async fn next(&mut self) -> Option<Result<ScanItem, KvError>> {
        loop {
            if let Ok(e) = self.cleanup_rx.try_recv() {
                return Some(Err(e));
            }
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.exhausted {
                self.cleanup_tx = None;
                return self.cleanup_rx.recv().await.map(Err);
            }
            if let Err(e) = self.fill_page().await {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }

    /// Adapt into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<ScanItem, KvError>> {
        futures::stream::unfold(self, |mut s| async move {
            let item = s.next().await?;
            Some((item, s))
        })
    }

    async fn fill_page(&mut self) -> Result<(), KvError> {
        let page_size = self.store.options().page_size;
        let mut query = self.query.clone().limit(page_size);
        if let Some(after) = &self.after {
            query = query.after(after.clone());
        }

        let entries = {
            let s = self.store.storage().read().await;
            s.scan(&query)?
        };

        if entries.len() < page_size {
            self.exhausted = true;
        }
        if let Some(last) = entries.last() {
            self.after = Some(last.key.clone());
        }

        for entry in entries {
            for event in self.cursor.push(entry) {
                match event {
                    CursorEvent::Complete(batch) => self.emit(batch),
                    CursorEvent::Malformed(e) => self.ready.push_back(Err(e)),
                }
            }
        }
        if self.exhausted {
            if let Some(batch) = self.cursor.finish() {
                self.emit(batch);
            }
        }
        Ok(())
    }

    fn emit(&mut self, batch: KeyBatch) {
        let outcome = read_repair(batch.candidates);
        self.store
            .spawn_cleanup(&batch.key, outcome.discarded, self.cleanup_tx.clone());

        let item = match self.projection {
            Projection::Keys => ScanItem::Key(batch.key),
            Projection::Values => ScanItem::Values(
                outcome
                    .repaired
                    .into_iter()
                    .map(|v| ClockedValue::from(v.record))
                    .collect(),
            ),
            Projection::Records => {
                ScanItem::Records(outcome.repaired.into_iter().map(|v| v.record).collect())
            }
        };
        self.ready.push_back(Ok(item));
    }
}
