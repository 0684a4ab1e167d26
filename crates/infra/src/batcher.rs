//! Write batcher: coalesces many logical transactions into few physical
//! commits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::store::{CoreStore, StoreError, WriteBatch};

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Flush as soon as this many logical transactions are queued.
    pub batch_size_threshold: usize,
    /// Flush when this much time has passed since the first queued entry.
    pub flush_interval: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size_threshold: 16,
            flush_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatcherError {
    /// The physical commit for this logical transaction failed.
    #[error("physical commit failed: {0}")]
    Commit(#[from] StoreError),

    #[error("batcher is stopped")]
    Stopped,
}

enum Msg {
    Commit(PendingCommit),
    Stop,
}

struct PendingCommit {
    batch: WriteBatch,
    done: oneshot::Sender<Result<(), BatcherError>>,
}

/// Single serial writer in front of the store.
///
/// All logical transactions in one flush are first attempted as one combined
/// atomic commit. If the combined commit fails, each logical batch is
/// replayed independently so one illegal transaction cannot fail or corrupt
/// its batch-mates.
pub struct TransactionBatcher;

impl TransactionBatcher {
    pub fn spawn(store: Arc<dyn CoreStore>, config: BatcherConfig) -> BatcherHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(batcher_loop(store, config, rx));
        BatcherHandle {
            tx,
            join: Arc::new(Mutex::new(Some(join))),
        }
    }
}

/// Handle for submitting logical transactions to the batcher.
#[derive(Clone)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<Msg>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BatcherHandle {
    /// Submit one logical transaction and suspend until the enclosing
    /// physical flush completes.
    pub async fn submit(&self, batch: WriteBatch) -> Result<(), BatcherError> {
        let (done, result) = oneshot::channel();
        self.tx
            .send(Msg::Commit(PendingCommit { batch, done }))
            .map_err(|_| BatcherError::Stopped)?;
        result.await.map_err(|_| BatcherError::Stopped)?
    }

    /// Drain pending flushes and stop the background task.
    ///
    /// After `stop` returns no background writes happen.
    pub async fn stop(&self) {
        let _ = self.tx.send(Msg::Stop);
        let join = self.join.lock().ok().and_then(|mut j| j.take());
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

async fn batcher_loop(
    store: Arc<dyn CoreStore>,
    config: BatcherConfig,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    info!(
        threshold = config.batch_size_threshold,
        interval_ms = config.flush_interval.as_millis() as u64,
        "transaction batcher started"
    );

    let mut queue: Vec<PendingCommit> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Msg::Commit(pending)) => {
                    queue.push(pending);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + config.flush_interval);
                    }
                    if queue.len() >= config.batch_size_threshold {
                        flush(&store, &mut queue);
                        deadline = None;
                    }
                }
                Some(Msg::Stop) | None => break,
            },
            _ = async { tokio::time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                flush(&store, &mut queue);
                deadline = None;
            }
        }
    }

    // Drain anything already queued behind the stop message.
    while let Ok(msg) = rx.try_recv() {
        if let Msg::Commit(pending) = msg {
            queue.push(pending);
        }
    }
    flush(&store, &mut queue);
    info!("transaction batcher stopped");
}

fn flush(store: &Arc<dyn CoreStore>, queue: &mut Vec<PendingCommit>) {
    if queue.is_empty() {
        return;
    }
    let pendings = std::mem::take(queue);

    let mut combined = WriteBatch::new();
    for pending in &pendings {
        combined.extend_from(&pending.batch);
    }

    match store.apply_batch(&combined) {
        Ok(()) => {
            debug!(
                transactions = pendings.len(),
                ops = combined.len(),
                "flushed combined batch"
            );
            for pending in pendings {
                let _ = pending.done.send(Ok(()));
            }
        }
        Err(combined_err) => {
            warn!(
                transactions = pendings.len(),
                error = %combined_err,
                "combined commit failed, replaying transactions individually"
            );
            for pending in pendings {
                let result = store
                    .apply_batch(&pending.batch)
                    .map_err(BatcherError::Commit);
                let _ = pending.done.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::WriteOp;
    use merchkit_core::{CorrelationId, UserId};
    use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

    fn event(aggregate_id: &str, version: u64) -> DomainEvent {
        let meta = EventMeta::new(UserId::new(), CorrelationId::new(), chrono::Utc::now());
        DomainEvent::record(
            "demo.changed",
            aggregate_id,
            version,
            &meta,
            EventPayload::creation(serde_json::json!({})),
        )
    }

    fn txn(aggregate_id: &str, version: u64) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::AppendEvent(event(aggregate_id, version)));
        batch.push(WriteOp::PutSnapshot(Snapshot::new(
            aggregate_id,
            CorrelationId::new(),
            version,
            "demo",
            serde_json::json!({}),
        )));
        batch
    }

    #[tokio::test]
    async fn concurrent_submissions_all_commit() {
        let store = Arc::new(InMemoryStore::new());
        let handle = TransactionBatcher::spawn(store.clone(), BatcherConfig::default());

        let mut tasks = Vec::new();
        for i in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.submit(txn(&format!("a{i}"), 0)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for i in 0..20 {
            assert_eq!(store.load_events(&format!("a{i}")).unwrap().len(), 1);
        }
        handle.stop().await;
    }

    #[tokio::test]
    async fn bad_transaction_does_not_fail_batch_mates() {
        let store = Arc::new(InMemoryStore::new());
        // Large threshold so both transactions land in the same flush.
        let handle = TransactionBatcher::spawn(
            store.clone(),
            BatcherConfig {
                batch_size_threshold: 64,
                flush_interval: Duration::from_millis(20),
            },
        );

        // Seed a1 so a second version-0 event is a constraint violation.
        handle.submit(txn("a1", 0)).await.unwrap();

        let good = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(txn("a2", 0)).await })
        };
        let bad = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(txn("a1", 0)).await })
        };

        good.await.unwrap().unwrap();
        let err = bad.await.unwrap().unwrap_err();
        assert!(matches!(err, BatcherError::Commit(_)));

        assert_eq!(store.load_events("a2").unwrap().len(), 1);
        assert_eq!(store.load_events("a1").unwrap().len(), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn interval_flush_commits_without_reaching_threshold() {
        let store = Arc::new(InMemoryStore::new());
        let handle = TransactionBatcher::spawn(
            store.clone(),
            BatcherConfig {
                batch_size_threshold: 1000,
                flush_interval: Duration::from_millis(5),
            },
        );

        handle.submit(txn("a1", 0)).await.unwrap();
        assert_eq!(store.load_events("a1").unwrap().len(), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_pending_work() {
        let store = Arc::new(InMemoryStore::new());
        let handle = TransactionBatcher::spawn(
            store.clone(),
            BatcherConfig {
                batch_size_threshold: 1000,
                flush_interval: Duration::from_secs(60),
            },
        );

        let submit = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.submit(txn("a1", 0)).await })
        };
        // Let the submission reach the queue, then stop before any flush.
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.stop().await;

        submit.await.unwrap().unwrap();
        assert_eq!(store.load_events("a1").unwrap().len(), 1);
    }
}
