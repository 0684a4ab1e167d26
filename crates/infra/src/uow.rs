//! Unit of work: the logical transaction boundary.
//!
//! Repositories handed out here buffer row writes into one `WriteBatch`;
//! nothing reaches storage until the batch is submitted to the batcher, and
//! an error at any point discards the buffer whole.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::debug;

use merchkit_events::{DomainEvent, Snapshot};

use crate::batcher::BatcherHandle;
use crate::projection::ProjectionSet;
use crate::services::ServiceError;
use crate::store::{CoreStore, OutboxRow, StoreError, WriteBatch, WriteOp};

pub struct UnitOfWork {
    store: Arc<dyn CoreStore>,
    batch: Mutex<WriteBatch>,
    buffered_events: Mutex<Vec<DomainEvent>>,
}

impl UnitOfWork {
    pub(crate) fn new(store: Arc<dyn CoreStore>) -> Self {
        Self {
            store,
            batch: Mutex::new(WriteBatch::new()),
            buffered_events: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshots(&self) -> SnapshotRepository<'_> {
        SnapshotRepository { uow: self }
    }

    pub fn events(&self) -> EventRepository<'_> {
        EventRepository { uow: self }
    }

    pub fn outbox(&self) -> OutboxRepository<'_> {
        OutboxRepository { uow: self }
    }

    pub fn views(&self) -> ViewWriter<'_> {
        ViewWriter { uow: self }
    }

    /// Events appended so far, in producer order.
    pub(crate) fn drained_events(&self) -> Vec<DomainEvent> {
        self.buffered_events.lock().clone()
    }

    pub(crate) fn take_batch(&self) -> WriteBatch {
        std::mem::take(&mut self.batch.lock())
    }

    fn push_op(&self, op: WriteOp) {
        self.batch.lock().push(op);
    }
}

/// Latest-snapshot repository. Loads read through buffered saves so a
/// transaction observes its own writes.
pub struct SnapshotRepository<'a> {
    uow: &'a UnitOfWork,
}

impl SnapshotRepository<'_> {
    pub fn load(&self, aggregate_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let batch = self.uow.batch.lock();
        for op in batch.ops.iter().rev() {
            if let WriteOp::PutSnapshot(snapshot) = op {
                if snapshot.aggregate_id == aggregate_id {
                    return Ok(Some(snapshot.clone()));
                }
            }
        }
        drop(batch);
        self.uow.store.get_snapshot(aggregate_id)
    }

    pub fn save(&self, snapshot: Snapshot) {
        self.uow.push_op(WriteOp::PutSnapshot(snapshot));
    }
}

/// Append-only event log repository.
pub struct EventRepository<'a> {
    uow: &'a UnitOfWork,
}

impl EventRepository<'_> {
    pub fn append(&self, events: &[DomainEvent]) {
        for event in events {
            self.uow.push_op(WriteOp::AppendEvent(event.clone()));
        }
        self.uow
            .buffered_events
            .lock()
            .extend(events.iter().cloned());
    }

    /// Committed history for one aggregate, ascending by version.
    pub fn load_stream(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, StoreError> {
        self.uow.store.load_events(aggregate_id)
    }
}

/// Transactional outbox repository: every enqueued event gets a fresh row id.
pub struct OutboxRepository<'a> {
    uow: &'a UnitOfWork,
}

impl OutboxRepository<'_> {
    pub fn enqueue(&self, events: &[DomainEvent]) {
        for event in events {
            self.uow
                .push_op(WriteOp::InsertOutbox(OutboxRow::for_event(event)));
        }
    }
}

/// Read-model view access with read-your-writes semantics inside the
/// transaction.
pub struct ViewWriter<'a> {
    uow: &'a UnitOfWork,
}

impl ViewWriter<'_> {
    pub fn get(&self, view: &str, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let batch = self.uow.batch.lock();
        for op in batch.ops.iter().rev() {
            match op {
                WriteOp::PutView {
                    view: v,
                    key: k,
                    value,
                } if v == view && k == key => return Ok(Some(value.clone())),
                WriteOp::DeleteView { view: v, key: k } if v == view && k == key => {
                    return Ok(None);
                }
                _ => {}
            }
        }
        drop(batch);
        self.uow.store.get_view(view, key)
    }

    /// Committed rows merged with this transaction's buffered writes.
    pub fn scan(&self, view: &str) -> Result<Vec<(String, JsonValue)>, StoreError> {
        let mut rows: BTreeMap<String, JsonValue> =
            self.uow.store.scan_view(view)?.into_iter().collect();
        let batch = self.uow.batch.lock();
        for op in &batch.ops {
            match op {
                WriteOp::PutView {
                    view: v,
                    key,
                    value,
                } if v == view => {
                    rows.insert(key.clone(), value.clone());
                }
                WriteOp::DeleteView { view: v, key } if v == view => {
                    rows.remove(key);
                }
                _ => {}
            }
        }
        Ok(rows.into_iter().collect())
    }

    pub fn put(&self, view: &str, key: &str, value: JsonValue) {
        self.uow.push_op(WriteOp::PutView {
            view: view.to_string(),
            key: key.to_string(),
            value,
        });
    }

    pub fn delete(&self, view: &str, key: &str) {
        self.uow.push_op(WriteOp::DeleteView {
            view: view.to_string(),
            key: key.to_string(),
        });
    }
}

/// Opens logical transactions and commits them through the batcher.
pub struct TransactionManager {
    store: Arc<dyn CoreStore>,
    batcher: BatcherHandle,
    projections: Arc<ProjectionSet>,
}

impl TransactionManager {
    pub fn new(
        store: Arc<dyn CoreStore>,
        batcher: BatcherHandle,
        projections: Arc<ProjectionSet>,
    ) -> Self {
        Self {
            store,
            batcher,
            projections,
        }
    }

    pub fn store(&self) -> Arc<dyn CoreStore> {
        Arc::clone(&self.store)
    }

    /// Run `f` inside a fresh unit of work.
    ///
    /// On success the buffered events are dispatched to projections (still
    /// inside the same logical transaction) and the whole batch is submitted
    /// to the batcher; this call suspends until the enclosing physical flush
    /// completes. On any error nothing is written.
    pub async fn with_transaction<T, F, Fut>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(Arc<UnitOfWork>) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let uow = Arc::new(UnitOfWork::new(Arc::clone(&self.store)));
        let value = f(Arc::clone(&uow)).await?;

        self.projections.dispatch(&uow).await?;

        let batch = uow.take_batch();
        if !batch.is_empty() {
            debug!(ops = batch.len(), "submitting logical transaction");
            self.batcher.submit(batch).await?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::{BatcherConfig, TransactionBatcher};
    use crate::store::memory::InMemoryStore;
    use merchkit_core::{CorrelationId, DomainError, UserId};
    use merchkit_events::{EventMeta, EventPayload};

    fn manager(store: Arc<InMemoryStore>) -> TransactionManager {
        let batcher = TransactionBatcher::spawn(store.clone(), BatcherConfig::default());
        TransactionManager::new(store, batcher, Arc::new(ProjectionSet::empty()))
    }

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

    #[tokio::test]
    async fn successful_transaction_persists_all_rows() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(store.clone());

        manager
            .with_transaction(|uow| async move {
                let events = vec![event("a1", 0)];
                uow.events().append(&events);
                uow.snapshots().save(Snapshot::new(
                    "a1",
                    CorrelationId::new(),
                    0,
                    "demo",
                    serde_json::json!({}),
                ));
                uow.outbox().enqueue(&events);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(store.load_events("a1").unwrap().len(), 1);
        assert!(store.get_snapshot("a1").unwrap().is_some());
        assert_eq!(
            store.claim_outbox_batch(10, chrono::Utc::now()).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn failed_transaction_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(store.clone());

        let result: Result<(), ServiceError> = manager
            .with_transaction(|uow| async move {
                uow.events().append(&[event("a1", 0)]);
                Err(ServiceError::Domain(DomainError::invariant("nope")))
            })
            .await;

        assert!(result.is_err());
        assert!(store.load_events("a1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_loads_see_buffered_saves() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(store.clone());

        manager
            .with_transaction(|uow| async move {
                uow.snapshots().save(Snapshot::new(
                    "a1",
                    CorrelationId::new(),
                    0,
                    "demo",
                    serde_json::json!({"n": 1}),
                ));
                let loaded = uow.snapshots().load("a1")?.unwrap();
                assert_eq!(loaded.payload.state, serde_json::json!({"n": 1}));
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn views_read_their_own_writes() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager(store.clone());

        manager
            .with_transaction(|uow| async move {
                let views = uow.views();
                views.put("v", "k", serde_json::json!(1));
                assert_eq!(views.get("v", "k")?, Some(serde_json::json!(1)));

                views.put("v", "k", serde_json::json!(2));
                let scan = views.scan("v")?;
                assert_eq!(scan, vec![("k".to_string(), serde_json::json!(2))]);

                views.delete("v", "k");
                assert_eq!(views.get("v", "k")?, None);
                assert!(views.scan("v")?.is_empty());
                Ok(())
            })
            .await
            .unwrap();
    }
}
