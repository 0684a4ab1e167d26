use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use merchkit_events::{DomainEvent, Snapshot};

use super::{
    CoreStore, OutboxClaim, OutboxDlqRow, OutboxProcessingRow, OutboxRow, OutboxStatus,
    ProcessingStatus, StoreError, WriteBatch, WriteOp,
};

#[derive(Debug, Default)]
struct Inner {
    snapshots: HashMap<String, Snapshot>,
    /// Aggregate id → version → event. BTreeMap keeps replay order.
    events: HashMap<String, BTreeMap<u64, DomainEvent>>,
    /// Outbox in arrival order (v7 ids are time-ordered).
    outbox: BTreeMap<Uuid, OutboxRow>,
    /// Outbox id → handler id → processing row.
    processing: HashMap<Uuid, BTreeMap<String, OutboxProcessingRow>>,
    dlq: Vec<OutboxDlqRow>,
    views: HashMap<String, BTreeMap<String, JsonValue>>,
}

/// In-memory store.
///
/// Intended for tests/dev and as the reference semantics for durable
/// backends. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate batch constraints against current state without mutating.
    ///
    /// Event-log uniqueness and snapshot monotonicity are checked across the
    /// stored rows and the earlier ops of the same batch.
    fn validate(inner: &Inner, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut batch_event_keys: HashSet<(String, u64)> = HashSet::new();
        let mut effective_snapshots: HashMap<String, u64> = HashMap::new();

        for op in &batch.ops {
            match op {
                WriteOp::AppendEvent(event) => {
                    let key = (event.aggregate_id.clone(), event.version);
                    let stored = inner
                        .events
                        .get(&event.aggregate_id)
                        .is_some_and(|stream| stream.contains_key(&event.version));
                    if stored || !batch_event_keys.insert(key) {
                        return Err(StoreError::DuplicateEvent {
                            aggregate_id: event.aggregate_id.clone(),
                            version: event.version,
                        });
                    }
                }
                WriteOp::PutSnapshot(snapshot) => {
                    let stored = effective_snapshots
                        .get(&snapshot.aggregate_id)
                        .copied()
                        .or_else(|| {
                            inner
                                .snapshots
                                .get(&snapshot.aggregate_id)
                                .map(|s| s.version)
                        });
                    if let Some(stored) = stored {
                        if snapshot.version <= stored {
                            return Err(StoreError::StaleSnapshot {
                                aggregate_id: snapshot.aggregate_id.clone(),
                                stored,
                                attempted: snapshot.version,
                            });
                        }
                    }
                    effective_snapshots.insert(snapshot.aggregate_id.clone(), snapshot.version);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(inner: &mut Inner, batch: &WriteBatch) {
        for op in &batch.ops {
            match op {
                WriteOp::PutSnapshot(snapshot) => {
                    inner
                        .snapshots
                        .insert(snapshot.aggregate_id.clone(), snapshot.clone());
                }
                WriteOp::AppendEvent(event) => {
                    inner
                        .events
                        .entry(event.aggregate_id.clone())
                        .or_default()
                        .insert(event.version, event.clone());
                }
                WriteOp::InsertOutbox(row) => {
                    inner.outbox.insert(row.id, row.clone());
                }
                WriteOp::PutView { view, key, value } => {
                    inner
                        .views
                        .entry(view.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                WriteOp::DeleteView { view, key } => {
                    if let Some(rows) = inner.views.get_mut(view) {
                        rows.remove(key);
                    }
                }
                WriteOp::UpsertProcessing(row) => {
                    inner
                        .processing
                        .entry(row.outbox_id)
                        .or_default()
                        .insert(row.handler_id.clone(), row.clone());
                }
                WriteOp::DeleteProcessing {
                    outbox_id,
                    handler_id,
                } => {
                    if let Some(rows) = inner.processing.get_mut(outbox_id) {
                        rows.remove(handler_id);
                        if rows.is_empty() {
                            inner.processing.remove(outbox_id);
                        }
                    }
                }
                WriteOp::SetOutboxStatus { outbox_id, status } => {
                    if let Some(row) = inner.outbox.get_mut(outbox_id) {
                        row.status = *status;
                    }
                }
                WriteOp::DeleteOutbox { outbox_id } => {
                    inner.outbox.remove(outbox_id);
                    inner.processing.remove(outbox_id);
                }
                WriteOp::InsertDlq(row) => {
                    inner.dlq.push(row.clone());
                }
            }
        }
    }
}

impl CoreStore for InMemoryStore {
    fn apply_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        Self::validate(&inner, batch)?;
        Self::apply(&mut inner, batch);
        Ok(())
    }

    fn get_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.snapshots.get(aggregate_id).cloned())
    }

    fn load_events(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .events
            .get(aggregate_id)
            .map(|stream| stream.values().cloned().collect())
            .unwrap_or_default())
    }

    fn claim_outbox_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxClaim>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut claims = Vec::new();

        for row in inner.outbox.values() {
            if claims.len() >= limit {
                break;
            }
            if row.status != OutboxStatus::Pending {
                continue;
            }

            let processing: Vec<OutboxProcessingRow> = inner
                .processing
                .get(&row.id)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default();
            let dlq_handler_ids: Vec<String> = inner
                .dlq
                .iter()
                .filter(|d| d.outbox_id == row.id)
                .map(|d| d.handler_id.clone())
                .collect();

            // Fresh rows (no bookkeeping yet) always have work. Otherwise at
            // least one non-completed handler must be past its backoff.
            let claimable = processing.is_empty()
                || processing.iter().any(|p| {
                    p.status != ProcessingStatus::Completed
                        && p.next_retry_at.is_none_or(|at| at <= now)
                });
            if claimable {
                claims.push(OutboxClaim {
                    row: row.clone(),
                    processing,
                    dlq_handler_ids,
                });
            }
        }

        Ok(claims)
    }

    fn outbox_row(&self, outbox_id: Uuid) -> Result<Option<OutboxRow>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.outbox.get(&outbox_id).cloned())
    }

    fn processing_rows(&self, outbox_id: Uuid) -> Result<Vec<OutboxProcessingRow>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .processing
            .get(&outbox_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn dlq_rows(&self) -> Result<Vec<OutboxDlqRow>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.dlq.clone())
    }

    fn get_view(&self, view: &str, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .views
            .get(view)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn scan_view(&self, view: &str) -> Result<Vec<(String, JsonValue)>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .views
            .get(view)
            .map(|rows| {
                rows.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merchkit_core::{CorrelationId, UserId};
    use merchkit_events::{EventMeta, EventPayload};

    fn event(aggregate_id: &str, version: u64) -> DomainEvent {
        let meta = EventMeta::new(UserId::new(), CorrelationId::new(), Utc::now());
        DomainEvent::record(
            "demo.changed",
            aggregate_id,
            version,
            &meta,
            EventPayload::creation(serde_json::json!({"v": version})),
        )
    }

    fn snapshot(aggregate_id: &str, version: u64) -> Snapshot {
        Snapshot::new(
            aggregate_id,
            CorrelationId::new(),
            version,
            "demo",
            serde_json::json!({"v": version}),
        )
    }

    #[test]
    fn batch_applies_atomically() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::AppendEvent(event("a1", 0)));
        batch.push(WriteOp::PutSnapshot(snapshot("a1", 0)));
        store.apply_batch(&batch).unwrap();

        assert_eq!(store.load_events("a1").unwrap().len(), 1);
        assert_eq!(store.get_snapshot("a1").unwrap().unwrap().version, 0);
    }

    #[test]
    fn duplicate_event_rejects_the_whole_batch() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::AppendEvent(event("a1", 0)));
        store.apply_batch(&batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSnapshot(snapshot("a1", 1)));
        batch.push(WriteOp::AppendEvent(event("a1", 0)));
        let err = store.apply_batch(&batch).unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateEvent {
                aggregate_id: "a1".to_string(),
                version: 0
            }
        );

        // The snapshot op in the failed batch must not have landed.
        assert!(store.get_snapshot("a1").unwrap().is_none());
    }

    #[test]
    fn duplicate_event_within_one_batch_is_rejected() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::AppendEvent(event("a1", 3)));
        batch.push(WriteOp::AppendEvent(event("a1", 3)));
        assert!(store.apply_batch(&batch).is_err());
    }

    #[test]
    fn snapshot_versions_must_increase() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSnapshot(snapshot("a1", 2)));
        store.apply_batch(&batch).unwrap();

        let mut stale = WriteBatch::new();
        stale.push(WriteOp::PutSnapshot(snapshot("a1", 2)));
        let err = store.apply_batch(&stale).unwrap_err();
        assert_eq!(
            err,
            StoreError::StaleSnapshot {
                aggregate_id: "a1".to_string(),
                stored: 2,
                attempted: 2
            }
        );

        let mut next = WriteBatch::new();
        next.push(WriteOp::PutSnapshot(snapshot("a1", 3)));
        store.apply_batch(&next).unwrap();
    }

    #[test]
    fn claim_skips_backoff_and_terminal_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let row = OutboxRow::for_event(&event("a1", 0));
        let outbox_id = row.id;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertOutbox(row));
        store.apply_batch(&batch).unwrap();

        // Fresh row is claimable.
        assert_eq!(store.claim_outbox_batch(10, now).unwrap().len(), 1);

        // A failed handler backing off hides the row until the retry time.
        let mut processing = OutboxProcessingRow::fresh(outbox_id, "email");
        processing.status = ProcessingStatus::Failed;
        processing.retry_count = 1;
        processing.next_retry_at = Some(now + chrono::Duration::seconds(2));
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpsertProcessing(processing.clone()));
        store.apply_batch(&batch).unwrap();

        assert!(store.claim_outbox_batch(10, now).unwrap().is_empty());
        assert_eq!(
            store
                .claim_outbox_batch(10, now + chrono::Duration::seconds(3))
                .unwrap()
                .len(),
            1
        );

        // All-completed rows are not claimable.
        processing.status = ProcessingStatus::Completed;
        processing.next_retry_at = None;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpsertProcessing(processing));
        store.apply_batch(&batch).unwrap();
        assert!(store
            .claim_outbox_batch(10, now + chrono::Duration::seconds(3))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn delete_outbox_drops_processing_rows_too() {
        let store = InMemoryStore::new();
        let row = OutboxRow::for_event(&event("a1", 0));
        let outbox_id = row.id;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertOutbox(row));
        batch.push(WriteOp::UpsertProcessing(OutboxProcessingRow::fresh(
            outbox_id, "email",
        )));
        store.apply_batch(&batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteOutbox { outbox_id });
        store.apply_batch(&batch).unwrap();

        assert!(store.outbox_row(outbox_id).unwrap().is_none());
        assert!(store.processing_rows(outbox_id).unwrap().is_empty());
    }

    #[test]
    fn views_upsert_and_delete() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutView {
            view: "v".to_string(),
            key: "k1".to_string(),
            value: serde_json::json!(1),
        });
        batch.push(WriteOp::PutView {
            view: "v".to_string(),
            key: "k1".to_string(),
            value: serde_json::json!(2),
        });
        store.apply_batch(&batch).unwrap();
        assert_eq!(
            store.get_view("v", "k1").unwrap(),
            Some(serde_json::json!(2))
        );

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteView {
            view: "v".to_string(),
            key: "k1".to_string(),
        });
        store.apply_batch(&batch).unwrap();
        assert!(store.scan_view("v").unwrap().is_empty());
    }
}
