//! Core storage abstraction: snapshots, the event log, the outbox tables,
//! and read-model views, written through atomic multi-row batches.

pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use merchkit_events::{DomainEvent, Snapshot};

/// Delivery status of an outbox row.
///
/// Rows are deleted once every registered handler completed; a row whose
/// handlers are all terminal but with at least one dead-lettered is parked
/// (kept for redrive) instead of deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Parked,
}

/// Event staged for external delivery, written in the same transaction as
/// the snapshot and event rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_name: String,
    pub payload: DomainEvent,
    pub status: OutboxStatus,
}

impl OutboxRow {
    pub fn for_event(event: &DomainEvent) -> Self {
        Self {
            id: Uuid::now_v7(),
            aggregate_id: event.aggregate_id.clone(),
            event_name: event.event_name.clone(),
            payload: event.clone(),
            status: OutboxStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Completed,
    Failed,
}

/// Per-(outbox row, handler) bookkeeping with retry state.
///
/// The idempotency key is derived from `(outbox_id, handler_id)`, so retries
/// of the same delivery always land on the same row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxProcessingRow {
    pub processing_id: Uuid,
    pub outbox_id: Uuid,
    pub handler_id: String,
    pub status: ProcessingStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
}

impl OutboxProcessingRow {
    pub fn idempotency_key_for(outbox_id: Uuid, handler_id: &str) -> String {
        format!("{outbox_id}:{handler_id}")
    }

    pub fn fresh(outbox_id: Uuid, handler_id: impl Into<String>) -> Self {
        let handler_id = handler_id.into();
        Self {
            processing_id: Uuid::now_v7(),
            outbox_id,
            idempotency_key: Self::idempotency_key_for(outbox_id, &handler_id),
            handler_id,
            status: ProcessingStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
        }
    }
}

/// Delivery that exhausted its retries (or failed permanently).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxDlqRow {
    pub outbox_id: Uuid,
    pub handler_id: String,
    pub event_name: String,
    pub final_retry_count: u32,
    pub error_message: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// A single row mutation inside a write batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutSnapshot(Snapshot),
    AppendEvent(DomainEvent),
    InsertOutbox(OutboxRow),
    PutView {
        view: String,
        key: String,
        value: JsonValue,
    },
    DeleteView {
        view: String,
        key: String,
    },
    UpsertProcessing(OutboxProcessingRow),
    DeleteProcessing {
        outbox_id: Uuid,
        handler_id: String,
    },
    SetOutboxStatus {
        outbox_id: Uuid,
        status: OutboxStatus,
    },
    DeleteOutbox {
        outbox_id: Uuid,
    },
    InsertDlq(OutboxDlqRow),
}

/// An ordered group of row mutations applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn extend_from(&mut self, other: &WriteBatch) {
        self.ops.extend(other.ops.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `(aggregate_id, version)` is the natural key of the event log.
    #[error("duplicate event for {aggregate_id} at version {version}")]
    DuplicateEvent { aggregate_id: String, version: u64 },

    /// Snapshot versions are strictly increasing per aggregate.
    #[error("stale snapshot write for {aggregate_id}: stored {stored}, attempted {attempted}")]
    StaleSnapshot {
        aggregate_id: String,
        stored: u64,
        attempted: u64,
    },

    #[error("unknown outbox row {0}")]
    UnknownOutbox(Uuid),

    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// An outbox row claimed for a delivery cycle, together with its current
/// per-handler bookkeeping.
#[derive(Debug, Clone)]
pub struct OutboxClaim {
    pub row: OutboxRow,
    pub processing: Vec<OutboxProcessingRow>,
    pub dlq_handler_ids: Vec<String>,
}

/// Durable key-value store for snapshots, events, outbox tables, and
/// read-model views.
///
/// `apply_batch` is atomic: either every op in the batch lands or none do.
/// Constraint checks (event-log uniqueness, snapshot monotonicity) run
/// before any row is touched.
pub trait CoreStore: Send + Sync {
    fn apply_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    fn get_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// Committed events for one aggregate in ascending version order.
    fn load_events(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, StoreError>;

    /// Claim up to `limit` outbox rows with undelivered work as of `now`.
    ///
    /// Skips parked rows, rows whose per-handler rows are all completed or
    /// dead-lettered, and rows whose only remaining work is backing off
    /// (`next_retry_at > now`).
    fn claim_outbox_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxClaim>, StoreError>;

    fn outbox_row(&self, outbox_id: Uuid) -> Result<Option<OutboxRow>, StoreError>;

    fn processing_rows(&self, outbox_id: Uuid) -> Result<Vec<OutboxProcessingRow>, StoreError>;

    fn dlq_rows(&self) -> Result<Vec<OutboxDlqRow>, StoreError>;

    fn get_view(&self, view: &str, key: &str) -> Result<Option<JsonValue>, StoreError>;

    /// All rows of a view in key order.
    fn scan_view(&self, view: &str) -> Result<Vec<(String, JsonValue)>, StoreError>;
}

impl<S> CoreStore for Arc<S>
where
    S: CoreStore + ?Sized,
{
    fn apply_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        (**self).apply_batch(batch)
    }

    fn get_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>, StoreError> {
        (**self).get_snapshot(aggregate_id)
    }

    fn load_events(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, StoreError> {
        (**self).load_events(aggregate_id)
    }

    fn claim_outbox_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxClaim>, StoreError> {
        (**self).claim_outbox_batch(limit, now)
    }

    fn outbox_row(&self, outbox_id: Uuid) -> Result<Option<OutboxRow>, StoreError> {
        (**self).outbox_row(outbox_id)
    }

    fn processing_rows(&self, outbox_id: Uuid) -> Result<Vec<OutboxProcessingRow>, StoreError> {
        (**self).processing_rows(outbox_id)
    }

    fn dlq_rows(&self) -> Result<Vec<OutboxDlqRow>, StoreError> {
        (**self).dlq_rows()
    }

    fn get_view(&self, view: &str, key: &str) -> Result<Option<JsonValue>, StoreError> {
        (**self).get_view(view, key)
    }

    fn scan_view(&self, view: &str) -> Result<Vec<(String, JsonValue)>, StoreError> {
        (**self).scan_view(view)
    }
}
