use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateRoot, CorrelationId, DomainError};
use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

/// Snapshot envelope kind tag.
pub const KIND: &str = "sku";

pub mod event_names {
    pub const CREATED: &str = "sku.created";
    pub const ACTIVATED: &str = "sku.activated";
    pub const RELEASED: &str = "sku.released";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuStatus {
    Available,
    Active,
    Released,
}

/// Serialized state of a SKU aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuState {
    pub sku: String,
    pub status: SkuStatus,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SKU reservation state machine:
/// `available → active(variant) → released`, with released SKUs returning
/// to the pool.
#[derive(Debug, Clone)]
pub struct Sku {
    state: SkuState,
    version: u64,
    correlation_id: CorrelationId,
    uncommitted: Vec<DomainEvent>,
}

/// Storage key for a SKU aggregate.
pub fn storage_id(sku: &str) -> String {
    format!("sku:{sku}")
}

impl AggregateRoot for Sku {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.state.sku
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Sku {
    pub fn create(sku: impl Into<String>, meta: &EventMeta) -> Result<Self, DomainError> {
        let sku = sku.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }

        let state = SkuState {
            sku,
            status: SkuStatus::Available,
            variant_id: None,
            created_at: meta.occurred_at,
            updated_at: meta.occurred_at,
        };
        let mut aggregate = Self {
            state,
            version: 0,
            correlation_id: meta.correlation_id,
            uncommitted: Vec::new(),
        };
        let new_state = aggregate.state_value()?;
        aggregate.uncommitted.push(DomainEvent::record(
            event_names::CREATED,
            storage_id(&aggregate.state.sku),
            0,
            meta,
            EventPayload::creation(new_state),
        ));
        Ok(aggregate)
    }

    pub fn load(snapshot: &Snapshot) -> Result<Self, DomainError> {
        snapshot.expect_kind(KIND)?;
        Ok(Self {
            state: snapshot.state_as()?,
            version: snapshot.version,
            correlation_id: snapshot.correlation_id,
            uncommitted: Vec::new(),
        })
    }

    pub fn snapshot(&self) -> Result<Snapshot, DomainError> {
        Ok(Snapshot::new(
            storage_id(&self.state.sku),
            self.correlation_id,
            self.version,
            KIND,
            self.state_value()?,
        ))
    }

    pub fn uncommitted_events(&self) -> &[DomainEvent] {
        &self.uncommitted
    }

    pub fn take_uncommitted_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.uncommitted)
    }

    pub fn sku(&self) -> &str {
        &self.state.sku
    }

    pub fn status(&self) -> SkuStatus {
        self.state.status
    }

    pub fn variant_id(&self) -> Option<&str> {
        self.state.variant_id.as_deref()
    }

    pub fn is_active_for(&self, variant_id: &str) -> bool {
        self.state.status == SkuStatus::Active
            && self.state.variant_id.as_deref() == Some(variant_id)
    }

    pub fn activate(
        &mut self,
        variant_id: impl Into<String>,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status == SkuStatus::Active {
            return Err(DomainError::already_in_use("SKU", self.state.sku.clone()));
        }
        let prior = self.state_value()?;
        self.state.status = SkuStatus::Active;
        self.state.variant_id = Some(variant_id.into());
        self.record_mutation(event_names::ACTIVATED, prior, meta)
    }

    pub fn release(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.status != SkuStatus::Active {
            return Err(DomainError::invariant(format!(
                "SKU \"{}\" is not active",
                self.state.sku
            )));
        }
        let prior = self.state_value()?;
        self.state.status = SkuStatus::Released;
        self.record_mutation(event_names::RELEASED, prior, meta)
    }

    fn state_value(&self) -> Result<JsonValue, DomainError> {
        serde_json::to_value(&self.state).map_err(|e| DomainError::serialization(e.to_string()))
    }

    fn record_mutation(
        &mut self,
        event_name: &str,
        prior: JsonValue,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        self.state.updated_at = meta.occurred_at;
        self.correlation_id = meta.correlation_id;
        self.version += 1;
        let new_state = self.state_value()?;
        self.uncommitted.push(DomainEvent::record(
            event_name,
            storage_id(&self.state.sku),
            self.version,
            meta,
            EventPayload::new(prior, new_state),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merchkit_core::UserId;

    fn meta() -> EventMeta {
        EventMeta::new(UserId::new(), CorrelationId::new(), Utc::now())
    }

    #[test]
    fn activate_then_activate_again_reports_in_use() {
        let mut sku = Sku::create("TEE-001", &meta()).unwrap();
        sku.activate("v1", &meta()).unwrap();
        assert!(sku.is_active_for("v1"));

        let err = sku.activate("v2", &meta()).unwrap_err();
        assert_eq!(err.to_string(), "SKU \"TEE-001\" is already in use");
    }

    #[test]
    fn released_sku_can_be_activated_again() {
        let mut sku = Sku::create("TEE-001", &meta()).unwrap();
        sku.activate("v1", &meta()).unwrap();
        sku.release(&meta()).unwrap();
        assert_eq!(sku.status(), SkuStatus::Released);

        sku.activate("v2", &meta()).unwrap();
        assert!(sku.is_active_for("v2"));
        assert_eq!(sku.version(), 3);
    }

    #[test]
    fn release_requires_active() {
        let mut sku = Sku::create("TEE-001", &meta()).unwrap();
        assert!(sku.release(&meta()).is_err());
    }

    #[test]
    fn storage_id_is_prefixed() {
        let sku = Sku::create("TEE-001", &meta()).unwrap();
        assert_eq!(sku.snapshot().unwrap().aggregate_id, "sku:TEE-001");
    }

    #[test]
    fn snapshot_load_round_trips() {
        let mut sku = Sku::create("TEE-001", &meta()).unwrap();
        sku.activate("v1", &meta()).unwrap();
        let snapshot = sku.snapshot().unwrap();
        let loaded = Sku::load(&snapshot).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), snapshot);
        assert_eq!(loaded.variant_id(), Some("v1"));
    }
}
