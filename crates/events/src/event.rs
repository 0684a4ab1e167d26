use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{CorrelationId, UserId};

/// Event payload carrying the full aggregate state before and after the
/// mutation.
///
/// Projections read only `new_state`; the prior state makes every event a
/// complete, self-describing message for external consumers on the outbox.
/// Creation events carry an empty `prior_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub prior_state: JsonValue,
    pub new_state: JsonValue,
}

impl EventPayload {
    pub fn new(prior_state: JsonValue, new_state: JsonValue) -> Self {
        Self {
            prior_state,
            new_state,
        }
    }

    /// Payload for a `*.created` event: empty prior state.
    pub fn creation(new_state: JsonValue) -> Self {
        Self {
            prior_state: JsonValue::Object(serde_json::Map::new()),
            new_state,
        }
    }

    pub fn is_creation(&self) -> bool {
        matches!(&self.prior_state, JsonValue::Object(m) if m.is_empty())
    }
}

/// Per-command metadata threaded through every mutator.
///
/// Carrying the timestamp here (instead of calling `Utc::now()` inside
/// aggregates) keeps mutations deterministic and testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    pub user_id: UserId,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(user_id: UserId, correlation_id: CorrelationId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            correlation_id,
            occurred_at,
        }
    }
}

/// An immutable domain event.
///
/// `event_name` is a stable lowercase dotted string in the form
/// `<entity>.<past-tense-verb>` (e.g. `collection.archived`). `version` is
/// the aggregate version *after* the mutation; `0` for the creation event.
/// The natural key `(aggregate_id, version)` is unique in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_name: String,
    pub aggregate_id: String,
    pub correlation_id: CorrelationId,
    pub version: u64,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn record(
        event_name: impl Into<String>,
        aggregate_id: impl Into<String>,
        version: u64,
        meta: &EventMeta,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            aggregate_id: aggregate_id.into(),
            correlation_id: meta.correlation_id,
            version,
            user_id: meta.user_id,
            occurred_at: meta.occurred_at,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merchkit_core::{CorrelationId, UserId};

    fn meta() -> EventMeta {
        EventMeta::new(UserId::new(), CorrelationId::new(), Utc::now())
    }

    #[test]
    fn creation_payload_has_empty_prior_state() {
        let payload = EventPayload::creation(serde_json::json!({"status": "draft"}));
        assert!(payload.is_creation());
        assert_eq!(payload.prior_state, serde_json::json!({}));
    }

    #[test]
    fn record_copies_meta_onto_the_event() {
        let meta = meta();
        let event = DomainEvent::record(
            "collection.created",
            "c1",
            0,
            &meta,
            EventPayload::creation(serde_json::json!({})),
        );
        assert_eq!(event.event_name, "collection.created");
        assert_eq!(event.aggregate_id, "c1");
        assert_eq!(event.version, 0);
        assert_eq!(event.user_id, meta.user_id);
        assert_eq!(event.correlation_id, meta.correlation_id);
        assert_eq!(event.occurred_at, meta.occurred_at);
    }

    #[test]
    fn events_round_trip_through_json() {
        let event = DomainEvent::record(
            "product.published",
            "p1",
            3,
            &meta(),
            EventPayload::new(
                serde_json::json!({"status": "draft"}),
                serde_json::json!({"status": "active"}),
            ),
        );
        let json = serde_json::to_value(&event).unwrap();
        let back: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event, back);
    }
}
