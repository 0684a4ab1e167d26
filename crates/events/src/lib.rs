//! Domain events and snapshot envelopes — the units of persistence.

pub mod event;
pub mod snapshot;

pub use event::{DomainEvent, EventMeta, EventPayload};
pub use snapshot::{Snapshot, SnapshotEnvelope, SNAPSHOT_SCHEMA_VERSION};
