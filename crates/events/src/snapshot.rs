use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{CorrelationId, DomainError};

/// Version of the snapshot envelope itself (not the aggregate state schema).
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Uniform outer envelope around an aggregate-kind-specific state blob.
///
/// `kind` tags which aggregate family the state belongs to (`product`,
/// `variant`, `collection`, `positions`, `slug`, `sku`, `schedule`), so a
/// row loaded by id can be checked before deserialization. Legacy state
/// shapes are upcast by the owning aggregate's `load`, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub schema_version: u32,
    pub kind: String,
    pub state: JsonValue,
}

/// Latest serialized aggregate state, version-tagged.
///
/// One row per aggregate id; overwritten in place (latest version wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: String,
    pub correlation_id: CorrelationId,
    pub version: u64,
    pub payload: SnapshotEnvelope,
}

impl Snapshot {
    pub fn new(
        aggregate_id: impl Into<String>,
        correlation_id: CorrelationId,
        version: u64,
        kind: impl Into<String>,
        state: JsonValue,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            correlation_id,
            version,
            payload: SnapshotEnvelope {
                schema_version: SNAPSHOT_SCHEMA_VERSION,
                kind: kind.into(),
                state,
            },
        }
    }

    /// Fail unless the envelope carries the expected aggregate kind.
    pub fn expect_kind(&self, kind: &str) -> Result<(), DomainError> {
        if self.payload.kind != kind {
            return Err(DomainError::serialization(format!(
                "snapshot {} holds kind '{}', expected '{}'",
                self.aggregate_id, self.payload.kind, kind
            )));
        }
        Ok(())
    }

    /// Deserialize the state blob into a typed state struct.
    pub fn state_as<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_value(self.payload.state.clone())
            .map_err(|e| DomainError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_kind_rejects_mismatched_envelope() {
        let snapshot = Snapshot::new(
            "p1",
            CorrelationId::new(),
            0,
            "product",
            serde_json::json!({}),
        );
        assert!(snapshot.expect_kind("product").is_ok());
        let err = snapshot.expect_kind("collection").unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
    }

    #[test]
    fn state_round_trips_through_the_envelope() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Demo {
            name: String,
        }

        let state = Demo {
            name: "tees".to_string(),
        };
        let snapshot = Snapshot::new(
            "c1",
            CorrelationId::new(),
            2,
            "collection",
            serde_json::to_value(&state).unwrap(),
        );
        assert_eq!(snapshot.payload.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snapshot.state_as::<Demo>().unwrap(), state);
    }
}
