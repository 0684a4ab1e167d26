use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::store::{CoreStore, StoreError, WriteBatch, WriteOp};

/// Batches acknowledgement writes (processing-row updates, deletions, DLQ
/// inserts) and flushes them on a size threshold or interval.
pub struct AckQueue {
    store: Arc<dyn CoreStore>,
    ops: Vec<WriteOp>,
    flush_threshold: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl AckQueue {
    pub fn new(store: Arc<dyn CoreStore>, flush_threshold: usize, flush_interval: Duration) -> Self {
        Self {
            store,
            ops: Vec::new(),
            flush_threshold,
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    pub fn push(&mut self, op: WriteOp) -> Result<(), StoreError> {
        self.ops.push(op);
        if self.ops.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.ops.len()
    }

    pub fn flush_if_due(&mut self) -> Result<(), StoreError> {
        if !self.ops.is_empty() && self.last_flush.elapsed() >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.ops.is_empty() {
            self.last_flush = Instant::now();
            return Ok(());
        }
        let batch = WriteBatch {
            ops: std::mem::take(&mut self.ops),
        };
        debug!(ops = batch.len(), "flushing outbox acks");
        self.store.apply_batch(&batch)?;
        self.last_flush = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn put(key: &str) -> WriteOp {
        WriteOp::PutView {
            view: "acks".to_string(),
            key: key.to_string(),
            value: json!(1),
        }
    }

    #[test]
    fn flushes_on_threshold() {
        let store = Arc::new(InMemoryStore::new());
        let mut queue = AckQueue::new(store.clone(), 2, Duration::from_secs(60));

        queue.push(put("a")).unwrap();
        assert!(store.scan_view("acks").unwrap().is_empty());
        assert_eq!(queue.pending(), 1);

        queue.push(put("b")).unwrap();
        assert_eq!(store.scan_view("acks").unwrap().len(), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn interval_flush_only_after_elapsed() {
        let store = Arc::new(InMemoryStore::new());
        let mut queue = AckQueue::new(store.clone(), 100, Duration::from_secs(60));

        queue.push(put("a")).unwrap();
        queue.flush_if_due().unwrap();
        assert!(store.scan_view("acks").unwrap().is_empty());

        queue.flush().unwrap();
        assert_eq!(store.scan_view("acks").unwrap().len(), 1);
    }
}
