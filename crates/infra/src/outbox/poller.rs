use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use merchkit_scheduling::RetryPolicy;

use super::{AckQueue, HandlerFailure, HandlerRegistry};
use crate::store::{
    CoreStore, OutboxDlqRow, OutboxProcessingRow, OutboxStatus, ProcessingStatus, StoreError,
    WriteOp,
};

#[derive(Debug, Clone)]
pub struct OutboxPollerConfig {
    pub poll_interval: Duration,
    /// Maximum outbox rows claimed per cycle.
    pub batch_size: usize,
    pub retry_policy: RetryPolicy,
    pub ack_flush_threshold: usize,
    pub ack_flush_interval: Duration,
}

impl Default for OutboxPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            batch_size: 32,
            retry_policy: RetryPolicy::default(),
            ack_flush_threshold: 16,
            ack_flush_interval: Duration::from_millis(100),
        }
    }
}

/// Single-writer outbox delivery loop.
///
/// Exactly-once per (outbox row, handler) is enforced by the processing
/// rows' idempotency keys; the loop itself only advances once the current
/// batch's handler invocations have completed.
pub struct OutboxPoller {
    store: Arc<dyn CoreStore>,
    registry: Arc<HandlerRegistry>,
    config: OutboxPollerConfig,
    acks: AckQueue,
}

impl OutboxPoller {
    pub fn new(
        store: Arc<dyn CoreStore>,
        registry: Arc<HandlerRegistry>,
        config: OutboxPollerConfig,
    ) -> Self {
        let acks = AckQueue::new(
            Arc::clone(&store),
            config.ack_flush_threshold,
            config.ack_flush_interval,
        );
        Self {
            store,
            registry,
            config,
            acks,
        }
    }

    /// Run one delivery cycle as of `now`. Returns the number of handler
    /// invocations performed.
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let claims = self.store.claim_outbox_batch(self.config.batch_size, now)?;
        let mut invocations = 0;

        for claim in claims {
            let handlers = self.registry.handlers_for(&claim.row.event_name).to_vec();
            if handlers.is_empty() {
                debug!(event = %claim.row.event_name, "no handlers registered, leaving row pending");
                continue;
            }

            let outbox_id = claim.row.id;
            let mut processing: BTreeMap<String, OutboxProcessingRow> = claim
                .processing
                .into_iter()
                .map(|row| (row.handler_id.clone(), row))
                .collect();
            let mut dlq: HashSet<String> = claim.dlq_handler_ids.into_iter().collect();

            for handler in &handlers {
                let handler_id = handler.handler_id().to_string();
                if dlq.contains(&handler_id) {
                    continue;
                }
                if let Some(row) = processing.get(&handler_id) {
                    if row.status == ProcessingStatus::Completed {
                        continue;
                    }
                    if row.next_retry_at.is_some_and(|at| at > now) {
                        continue;
                    }
                }

                let mut row = processing
                    .remove(&handler_id)
                    .unwrap_or_else(|| OutboxProcessingRow::fresh(outbox_id, &handler_id));

                invocations += 1;
                match handler.handle(&claim.row.payload).await {
                    Ok(()) => {
                        row.status = ProcessingStatus::Completed;
                        row.next_retry_at = None;
                        self.acks.push(WriteOp::UpsertProcessing(row.clone()))?;
                        processing.insert(handler_id, row);
                    }
                    Err(HandlerFailure::Transient(message)) => {
                        row.retry_count += 1;
                        if row.retry_count >= self.config.retry_policy.max_retries {
                            warn!(
                                outbox_id = %outbox_id,
                                handler = %handler_id,
                                retries = row.retry_count,
                                "handler exhausted retries, dead-lettering"
                            );
                            self.dead_letter(&claim.row.event_name, row, message, now)?;
                            dlq.insert(handler_id);
                        } else {
                            row.status = ProcessingStatus::Failed;
                            row.next_retry_at =
                                Some(now + self.config.retry_policy.delay_for(row.retry_count));
                            debug!(
                                outbox_id = %outbox_id,
                                handler = %handler_id,
                                retry = row.retry_count,
                                "transient handler failure, backing off"
                            );
                            self.acks.push(WriteOp::UpsertProcessing(row.clone()))?;
                            processing.insert(handler_id, row);
                        }
                    }
                    Err(HandlerFailure::Permanent(message)) => {
                        warn!(
                            outbox_id = %outbox_id,
                            handler = %handler_id,
                            "permanent handler failure, dead-lettering"
                        );
                        self.dead_letter(&claim.row.event_name, row, message, now)?;
                        dlq.insert(handler_id);
                    }
                }
            }

            let all_completed = handlers.iter().all(|h| {
                processing
                    .get(h.handler_id())
                    .is_some_and(|row| row.status == ProcessingStatus::Completed)
            });
            let all_terminal = handlers.iter().all(|h| {
                dlq.contains(h.handler_id())
                    || processing
                        .get(h.handler_id())
                        .is_some_and(|row| row.status == ProcessingStatus::Completed)
            });

            if dlq.is_empty() && all_completed {
                for handler_id in processing.keys() {
                    self.acks.push(WriteOp::DeleteProcessing {
                        outbox_id,
                        handler_id: handler_id.clone(),
                    })?;
                }
                self.acks.push(WriteOp::DeleteOutbox { outbox_id })?;
            } else if all_terminal {
                self.acks.push(WriteOp::SetOutboxStatus {
                    outbox_id,
                    status: OutboxStatus::Parked,
                })?;
            }
        }

        self.acks.flush_if_due()?;
        Ok(invocations)
    }

    fn dead_letter(
        &mut self,
        event_name: &str,
        row: OutboxProcessingRow,
        error_message: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.acks.push(WriteOp::DeleteProcessing {
            outbox_id: row.outbox_id,
            handler_id: row.handler_id.clone(),
        })?;
        self.acks.push(WriteOp::InsertDlq(OutboxDlqRow {
            outbox_id: row.outbox_id,
            handler_id: row.handler_id,
            event_name: event_name.to_string(),
            final_retry_count: row.retry_count,
            error_message,
            dead_lettered_at: now,
        }))
    }

    pub fn flush_acks(&mut self) -> Result<(), StoreError> {
        self.acks.flush()
    }

    /// Spawn the polling loop as a background task.
    pub fn spawn(mut self) -> OutboxPollerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let poll_interval = self.config.poll_interval;

        let join = tokio::spawn(async move {
            info!("outbox poller started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(poll_interval) => {
                        if let Err(e) = self.poll_once(Utc::now()).await {
                            error!(error = %e, "outbox poll cycle failed");
                        }
                    }
                }
            }
            // In-flight invocations finished above; persist their acks.
            if let Err(e) = self.flush_acks() {
                error!(error = %e, "failed to flush outbox acks on shutdown");
            }
            info!("outbox poller stopped");
        });

        OutboxPollerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to stop a running poller.
pub struct OutboxPollerHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl OutboxPollerHandle {
    /// Request shutdown, wait for in-flight handler invocations, and flush
    /// queued acks before returning.
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}
