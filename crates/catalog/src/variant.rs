use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateId, AggregateRoot, CorrelationId, DomainError};
use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

use crate::product::ProductKind;
use crate::status::LifecycleStatus;

/// Snapshot envelope kind tag.
pub const KIND: &str = "variant";

pub mod event_names {
    pub const CREATED: &str = "variant.created";
    pub const PRICE_UPDATED: &str = "variant.price_updated";
    pub const SKU_UPDATED: &str = "variant.sku_updated";
    pub const SALE_UPDATED: &str = "variant.sale_updated";
    pub const SALE_CLEARED: &str = "variant.sale_cleared";
    pub const INVENTORY_ADJUSTED: &str = "variant.inventory_adjusted";
    pub const PUBLISHED: &str = "variant.published";
    pub const UNPUBLISHED: &str = "variant.unpublished";
    pub const ARCHIVED: &str = "variant.archived";
}

/// A time-bounded sale price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub sale_price_cents: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Serialized state of a variant aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantState {
    pub id: AggregateId,
    pub product_id: AggregateId,
    #[serde(default)]
    pub sku: String,
    pub price_cents: i64,
    #[serde(default)]
    pub sale: Option<Sale>,
    /// Option name → chosen value, validated by the service against the
    /// product's declared option set.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub inventory_quantity: i64,
    pub fulfillment: ProductKind,
    pub status: LifecycleStatus,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a variant.
#[derive(Debug, Clone)]
pub struct NewVariant {
    pub id: AggregateId,
    pub product_id: AggregateId,
    pub sku: String,
    pub price_cents: i64,
    pub options: BTreeMap<String, String>,
    pub inventory_quantity: i64,
    pub fulfillment: ProductKind,
}

#[derive(Debug, Clone)]
pub struct Variant {
    state: VariantState,
    version: u64,
    correlation_id: CorrelationId,
    uncommitted: Vec<DomainEvent>,
}

impl AggregateRoot for Variant {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.state.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Variant {
    pub fn create(params: NewVariant, meta: &EventMeta) -> Result<Self, DomainError> {
        if params.price_cents < 0 {
            return Err(DomainError::validation("price cannot be negative"));
        }
        if params.fulfillment == ProductKind::Physical && params.inventory_quantity < 0 {
            return Err(DomainError::validation("inventory cannot be negative"));
        }

        let state = VariantState {
            id: params.id,
            product_id: params.product_id,
            sku: params.sku,
            price_cents: params.price_cents,
            sale: None,
            options: params.options,
            inventory_quantity: params.inventory_quantity,
            fulfillment: params.fulfillment,
            status: LifecycleStatus::Draft,
            published_at: None,
            created_at: meta.occurred_at,
            updated_at: meta.occurred_at,
        };
        let mut variant = Self {
            state,
            version: 0,
            correlation_id: meta.correlation_id,
            uncommitted: Vec::new(),
        };
        let new_state = variant.state_value()?;
        variant.uncommitted.push(DomainEvent::record(
            event_names::CREATED,
            variant.state.id.to_string(),
            0,
            meta,
            EventPayload::creation(new_state),
        ));
        Ok(variant)
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
            self.state.id.to_string(),
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

    pub fn product_id(&self) -> AggregateId {
        self.state.product_id
    }

    pub fn sku(&self) -> &str {
        &self.state.sku
    }

    pub fn price_cents(&self) -> i64 {
        self.state.price_cents
    }

    pub fn sale(&self) -> Option<&Sale> {
        self.state.sale.as_ref()
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.state.options
    }

    pub fn inventory_quantity(&self) -> i64 {
        self.state.inventory_quantity
    }

    pub fn fulfillment(&self) -> ProductKind {
        self.state.fulfillment
    }

    pub fn status(&self) -> LifecycleStatus {
        self.state.status
    }

    pub fn update_price(&mut self, price_cents: i64, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if price_cents < 0 {
            return Err(DomainError::validation("price cannot be negative"));
        }
        if let Some(sale) = &self.state.sale {
            if sale.sale_price_cents >= price_cents {
                return Err(DomainError::invariant(
                    "sale price must stay below the regular price",
                ));
            }
        }
        let prior = self.state_value()?;
        self.state.price_cents = price_cents;
        self.record_mutation(event_names::PRICE_UPDATED, prior, meta)
    }

    pub fn update_sku(&mut self, sku: impl Into<String>, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        let sku = sku.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }
        let prior = self.state_value()?;
        self.state.sku = sku;
        self.record_mutation(event_names::SKU_UPDATED, prior, meta)
    }

    pub fn set_sale(&mut self, sale: Sale, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if sale.ends_at <= sale.starts_at {
            return Err(DomainError::invariant("End date must be after start date"));
        }
        if sale.sale_price_cents < 0 {
            return Err(DomainError::validation("sale price cannot be negative"));
        }
        if sale.sale_price_cents >= self.state.price_cents {
            return Err(DomainError::invariant(
                "sale price must stay below the regular price",
            ));
        }
        let prior = self.state_value()?;
        self.state.sale = Some(sale);
        self.record_mutation(event_names::SALE_UPDATED, prior, meta)
    }

    pub fn clear_sale(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if self.state.sale.is_none() {
            return Err(DomainError::invariant("variant has no sale to clear"));
        }
        let prior = self.state_value()?;
        self.state.sale = None;
        self.record_mutation(event_names::SALE_CLEARED, prior, meta)
    }

    pub fn adjust_inventory(&mut self, delta: i64, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_not_archived()?;
        if self.state.fulfillment != ProductKind::Physical {
            return Err(DomainError::invariant(
                "inventory is not tracked for digital variants",
            ));
        }
        let next = self.state.inventory_quantity + delta;
        if next < 0 {
            return Err(DomainError::invariant(format!(
                "inventory cannot go negative ({} {delta:+})",
                self.state.inventory_quantity
            )));
        }
        let prior = self.state_value()?;
        self.state.inventory_quantity = next;
        self.record_mutation(event_names::INVENTORY_ADJUSTED, prior, meta)
    }

    pub fn publish(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        match self.state.status {
            LifecycleStatus::Active => Err(DomainError::invariant("variant is already published")),
            LifecycleStatus::Archived => {
                Err(DomainError::invariant("cannot publish an archived variant"))
            }
            _ => {
                if self.state.sku.trim().is_empty() {
                    return Err(DomainError::invariant(
                        "cannot publish a variant without a SKU",
                    ));
                }
                if self.state.price_cents < 0 {
                    return Err(DomainError::invariant(
                        "cannot publish a variant with a negative price",
                    ));
                }
                if self.state.fulfillment == ProductKind::Physical
                    && self.state.inventory_quantity < 0
                {
                    return Err(DomainError::invariant(
                        "cannot publish a variant with negative inventory",
                    ));
                }
                let prior = self.state_value()?;
                self.state.status = LifecycleStatus::Active;
                self.state.published_at = Some(meta.occurred_at);
                self.record_mutation(event_names::PUBLISHED, prior, meta)
            }
        }
    }

    pub fn unpublish(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.status != LifecycleStatus::Active {
            return Err(DomainError::invariant(format!(
                "cannot unpublish a {} variant",
                self.state.status.as_str()
            )));
        }
        let prior = self.state_value()?;
        self.state.status = LifecycleStatus::Draft;
        self.state.published_at = None;
        self.record_mutation(event_names::UNPUBLISHED, prior, meta)
    }

    pub fn archive(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.status == LifecycleStatus::Archived {
            return Err(DomainError::invariant("Variant is already archived"));
        }
        let prior = self.state_value()?;
        self.state.status = LifecycleStatus::Archived;
        self.record_mutation(event_names::ARCHIVED, prior, meta)
    }

    fn ensure_not_archived(&self) -> Result<(), DomainError> {
        if self.state.status == LifecycleStatus::Archived {
            return Err(DomainError::invariant("cannot update an archived variant"));
        }
        Ok(())
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
            self.state.id.to_string(),
            self.version,
            meta,
            EventPayload::new(prior, new_state),
        ));
        Ok(())
    }
}
