use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use merchkit_catalog::positions::PositionsState;
use merchkit_catalog::variant::VariantState;
use merchkit_catalog::LifecycleStatus;
use merchkit_core::AggregateId;
use merchkit_events::DomainEvent;

use super::{decode_new_state, Projection, ProjectionError};
use crate::uow::ViewWriter;

pub const VIEW: &str = "product_variants_view";

/// Listing row per variant, keyed by variant id. `position` mirrors the
/// product's positions aggregate where one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariantRow {
    pub variant_id: AggregateId,
    pub product_id: AggregateId,
    pub sku: String,
    pub price_cents: i64,
    pub sale_price_cents: Option<i64>,
    pub status: LifecycleStatus,
    pub options: BTreeMap<String, String>,
    pub inventory_quantity: i64,
    #[serde(default)]
    pub position: Option<u32>,
}

pub struct ProductVariantsProjection;

#[async_trait]
impl Projection for ProductVariantsProjection {
    fn name(&self) -> &'static str {
        "product_variants"
    }

    fn handles(&self, event_name: &str) -> bool {
        event_name.starts_with("variant.") || event_name.starts_with("positions.")
    }

    async fn apply(
        &self,
        views: &ViewWriter<'_>,
        event: &DomainEvent,
    ) -> Result<(), ProjectionError> {
        if event.event_name.starts_with("variant.") {
            let state: VariantState = decode_new_state(event)?;
            let position = views
                .get(VIEW, &event.aggregate_id)?
                .and_then(|existing| {
                    serde_json::from_value::<ProductVariantRow>(existing)
                        .ok()
                        .and_then(|row| row.position)
                });
            let row = ProductVariantRow {
                variant_id: state.id,
                product_id: state.product_id,
                sku: state.sku,
                price_cents: state.price_cents,
                sale_price_cents: state.sale.map(|s| s.sale_price_cents),
                status: state.status,
                options: state.options,
                inventory_quantity: state.inventory_quantity,
                position,
            };
            let value = serde_json::to_value(&row)
                .map_err(|e| ProjectionError::Decode(e.to_string()))?;
            views.put(VIEW, &event.aggregate_id, value);
            return Ok(());
        }

        // Positions events: re-index rows for entries present in this view.
        // Collection-owned positions reference product ids, which never key
        // this view, so those entries fall through harmlessly.
        let state: PositionsState = decode_new_state(event)?;
        for (index, entry) in state.entries.iter().enumerate() {
            if let Some(existing) = views.get(VIEW, entry)? {
                let mut row: ProductVariantRow = serde_json::from_value(existing)
                    .map_err(|e| ProjectionError::Decode(e.to_string()))?;
                row.position = Some(index as u32);
                let value = serde_json::to_value(&row)
                    .map_err(|e| ProjectionError::Decode(e.to_string()))?;
                views.put(VIEW, entry, value);
            }
        }
        Ok(())
    }
}
