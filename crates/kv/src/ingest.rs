//! Bulk ingest through a single writer task.
//!
//! Records are prepared on the caller's side (clock and discriminator for
//! puts, the physical bracket for deletes) and queued on a bounded channel.
//! The writer task applies each record as its own atomic batch and answers
//! on a per-record oneshot, so one failed record never aborts the rest.

use crate::error::KvError;
use crate::store::VersionStore;
use crate::vclock::{ParentContext, VClock};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use vclocked_metrics::metrics;
use vclocked_storage::{BatchOp, OrderedStore, StorageEngine};

/// Upper bound on jobs applied under one write-lock acquisition.
const MAX_JOBS_PER_LOCK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Put,
    Del,
}

/// One record handed to a [`WriteStream`].
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub parent: ParentContext,
}

impl WriteRequest {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::put_with(key, value, ParentContext::None)
    }

    pub fn put_with(
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        parent: impl Into<ParentContext>,
    ) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            parent: parent.into(),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            parent: ParentContext::None,
        }
    }
}

/// Acknowledgement of one applied record. `clock` is set in put mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub key: String,
    pub clock: Option<VClock>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records applied to storage.
    pub written: u64,
    /// Records whose batch the store rejected.
    pub failed: u64,
    /// Records refused before queueing (bad key, missing value).
    pub rejected: u64,
}

type Reply = oneshot::Sender<Result<WriteAck, KvError>>;

struct Job {
    key: String,
    ops: Vec<BatchOp>,
    clock: Option<VClock>,
    reply: Reply,
}

/// Completion of one queued record.
#[derive(Debug)]
pub struct PendingWrite {
    rx: oneshot::Receiver<Result<WriteAck, KvError>>,
}

impl PendingWrite {
    fn resolved(result: Result<WriteAck, KvError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for PendingWrite {
    type Output = Result<WriteAck, KvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(KvError::IngestClosed)))
    }
}

pub struct WriteStream<S: OrderedStore = StorageEngine> {
    store: VersionStore<S>,
    mode: WriteMode,
    tx: Option<mpsc::Sender<Job>>,
    writer: Option<JoinHandle<IngestSummary>>,
    rejected: u64,
}

impl<S: OrderedStore> WriteStream<S> {
    pub(crate) fn new(store: VersionStore<S>, mode: WriteMode) -> Self {
        let (tx, rx) = mpsc::channel(store.options().channel_capacity);
        let writer = tokio::spawn(run_writer(store.storage().clone(), rx));
        tracing::debug!("write stream opened in {:?} mode", mode);
        Self {
            store,
            mode,
            tx: Some(tx),
            writer: Some(writer),
            rejected: 0,
        }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Queue one record. Waits only for channel capacity, not for the write.
    pub async fn write(&mut self, request: WriteRequest) -> PendingWrite {
        let prepared = match self.prepare(request).await {
            Ok(job) => job,
            Err(e) => {
                self.rejected += 1;
                return PendingWrite::resolved(Err(e));
            }
        };
        let (key, ops, clock) = prepared;

        let Some(tx) = &self.tx else {
            return PendingWrite::resolved(Err(KvError::IngestClosed));
        };
        let (reply, rx) = oneshot::channel();
        let job = Job {
            key,
            ops,
            clock,
            reply,
        };
        if tx.send(job).await.is_err() {
            return PendingWrite::resolved(Err(KvError::IngestClosed));
        }
        PendingWrite { rx }
    }

    /// Queue every record, then wait for all of them. Results follow input
    /// order.
    pub async fn write_all<I>(&mut self, requests: I) -> Vec<Result<WriteAck, KvError>>
    where
        I: IntoIterator<Item = WriteRequest>,
    {
        let mut pending = Vec::new();
        for request in requests {
            pending.push(self.write(request).await);
        }
        futures::future::join_all(pending).await
    }

    /// Close the channel and wait for every queued record to land.
    pub async fn finish(mut self) -> Result<IngestSummary, KvError> {
        self.tx = None;
        let Some(writer) = self.writer.take() else {
            return Err(KvError::IngestClosed);
        };
        let mut summary = writer.await.map_err(|e| {
            tracing::warn!("ingest writer task failed: {}", e);
            KvError::IngestClosed
        })?;
        summary.rejected = self.rejected;
        tracing::debug!(
            "write stream finished: {} written, {} failed, {} rejected",
            summary.written,
            summary.failed,
            summary.rejected
        );
        Ok(summary)
    }

    async fn prepare(
        &self,
        request: WriteRequest,
    ) -> Result<(String, Vec<BatchOp>, Option<VClock>), KvError> {
        match self.mode {
            WriteMode::Put => {
                let value = request.value.ok_or_else(|| {
                    KvError::InvalidArgument(format!("put of {:?} has no value", request.key))
                })?;
                let (ops, clock) = self.store.prepare_put(&request.key, value, request.parent)?;
                Ok((request.key, ops, Some(clock)))
            }
            WriteMode::Del => {
                let ops = self.store.prepare_del(&request.key).await?;
                Ok((request.key, ops, None))
            }
        }
    }
}

async fn run_writer<S: OrderedStore>(
    storage: Arc<RwLock<S>>,
    mut rx: mpsc::Receiver<Job>,
) -> IngestSummary {
    let mut summary = IngestSummary::default();

    while let Some(first) = rx.recv().await {
        let mut jobs = vec![first];
        while jobs.len() < MAX_JOBS_PER_LOCK {
            match rx.try_recv() {
                Ok(job) => jobs.push(job),
                Err(_) => break,
            }
        }

        let mut s = storage.write().await;
        for job in jobs {
            let result = if job.ops.is_empty() {
                Ok(())
            } else {
                s.write_batch(job.ops)
            };
            match result {
                Ok(()) => {
                    summary.written += 1;
                    metrics().ingested_records.inc();
                    let _ = job.reply.send(Ok(WriteAck {
                        key: job.key,
                        clock: job.clock,
                    }));
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!("ingest of {:?} failed: {}", job.key, e);
                    let _ = job.reply.send(Err(e.into()));
                }
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use tempfile::TempDir;
    use vclocked_storage::FsyncPolicy;

    fn setup(channel_capacity: usize) -> (VersionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(dir.path(), FsyncPolicy::None).unwrap();
        let options = StoreOptions {
            channel_capacity,
            ..StoreOptions::default()
        };
        (VersionStore::new(engine, "n1", options).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_bulk_put_then_get() {
        let (store, _dir) = setup(4);
        let mut ws = store.write_stream(WriteMode::Put);

        let acks = ws
            .write_all((0..20).map(|i| WriteRequest::put(format!("k{:02}", i), format!("v{}", i))))
            .await;
        assert_eq!(acks.len(), 20);
        assert_eq!(acks[7].as_ref().unwrap().key, "k07");
        assert!(acks.iter().all(|a| a.is_ok()));

        let summary = ws.finish().await.unwrap();
        assert_eq!(summary.written, 20);
        assert_eq!(summary.failed, 0);

        let recs = store.get("k13").await.unwrap();
        assert_eq!(recs[0].value, b"v13");
    }

    #[tokio::test]
    async fn test_bad_record_does_not_abort_batch() {
        let (store, _dir) = setup(8);
        let mut ws = store.write_stream(WriteMode::Put);

        let acks = ws
            .write_all(vec![
                WriteRequest::put("good1", "a"),
                WriteRequest::put("", "bad"),
                WriteRequest::del("no-value"),
                WriteRequest::put("good2", "b"),
            ])
            .await;
        assert!(acks[0].is_ok());
        assert!(matches!(acks[1], Err(KvError::InvalidArgument(_))));
        assert!(matches!(acks[2], Err(KvError::InvalidArgument(_))));
        assert!(acks[3].is_ok());

        let summary = ws.finish().await.unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.rejected, 2);
    }

    #[tokio::test]
    async fn test_bulk_delete() {
        let (store, _dir) = setup(8);
        store.put("a", "1", ParentContext::None).await.unwrap();
        store.put("b", "2", ParentContext::None).await.unwrap();

        let mut ws = store.write_stream(WriteMode::Del);
        let ack = ws.write(WriteRequest::del("a")).await.await.unwrap();
        assert_eq!(ack.clock, None);
        // Missing keys acknowledge as no-ops.
        ws.write(WriteRequest::del("zzz")).await.await.unwrap();
        ws.finish().await.unwrap();

        assert!(store.get("a").await.unwrap().is_empty());
        assert_eq!(store.get("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_with_parent_context() {
        let (store, _dir) = setup(8);
        let first = store.put("k", "old", ParentContext::None).await.unwrap();

        let mut ws = store.write_stream(WriteMode::Put);
        let ack = ws
            .write(WriteRequest::put_with("k", "new", first.clock))
            .await
            .await
            .unwrap();
        ws.finish().await.unwrap();

        let clock = ack.clock.unwrap();
        assert_eq!(clock.get("n1"), 2);
        let recs = store.get("k").await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].value, b"new");
    }
}
