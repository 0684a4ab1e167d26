//! Outbox delivery: per-event-name handlers with retry, DLQ, and batched
//! acknowledgement.

pub mod ack;
pub mod poller;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use merchkit_events::DomainEvent;

pub use ack::AckQueue;
pub use poller::{OutboxPoller, OutboxPollerConfig, OutboxPollerHandle};

/// Failure classification for a handler invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerFailure {
    /// Retried with exponential backoff.
    #[error("transient handler failure: {0}")]
    Transient(String),

    /// Sent directly to the DLQ.
    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

/// An external consumer of outbox events.
///
/// Handlers must be idempotent: delivery is exactly-once per
/// (outbox row, handler) under normal operation, but a crash between
/// invocation and acknowledgement redelivers.
#[async_trait]
pub trait OutboxHandler: Send + Sync {
    fn handler_id(&self) -> &str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerFailure>;
}

/// Event name → handlers. Multiple handlers per event fan out.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn OutboxHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_name: impl Into<String>, handler: Arc<dyn OutboxHandler>) {
        self.handlers.entry(event_name.into()).or_default().push(handler);
    }

    pub fn handlers_for(&self, event_name: &str) -> &[Arc<dyn OutboxHandler>] {
        self.handlers
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
