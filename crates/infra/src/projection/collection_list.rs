use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use merchkit_catalog::collection::CollectionState;
use merchkit_catalog::positions::PositionsState;
use merchkit_catalog::LifecycleStatus;
use merchkit_core::AggregateId;
use merchkit_events::DomainEvent;

use super::{decode_new_state, Projection, ProjectionError};
use crate::uow::ViewWriter;

pub const VIEW: &str = "collection_list_view";

/// One row per collection, keyed by collection id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionListRow {
    pub id: AggregateId,
    pub name: String,
    pub slug: String,
    pub status: LifecycleStatus,
    pub positions_id: AggregateId,
    pub image_url: Option<String>,
    #[serde(default)]
    pub product_count: u64,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub struct CollectionListProjection;

#[async_trait]
impl Projection for CollectionListProjection {
    fn name(&self) -> &'static str {
        "collection_list"
    }

    fn handles(&self, event_name: &str) -> bool {
        event_name.starts_with("collection.") || event_name.starts_with("positions.")
    }

    async fn apply(
        &self,
        views: &ViewWriter<'_>,
        event: &DomainEvent,
    ) -> Result<(), ProjectionError> {
        if event.event_name.starts_with("collection.") {
            let state: CollectionState = decode_new_state(event)?;
            let product_count = views
                .get(VIEW, &event.aggregate_id)?
                .and_then(|existing| {
                    serde_json::from_value::<CollectionListRow>(existing)
                        .ok()
                        .map(|row| row.product_count)
                })
                .unwrap_or(0);
            let row = CollectionListRow {
                id: state.id,
                name: state.name,
                slug: state.slug,
                status: state.status,
                positions_id: state.positions_id,
                image_url: state.images.first().map(|i| i.url.clone()),
                product_count,
                published_at: state.published_at,
                updated_at: state.updated_at,
            };
            let value = serde_json::to_value(&row)
                .map_err(|e| ProjectionError::Decode(e.to_string()))?;
            views.put(VIEW, &event.aggregate_id, value);
            return Ok(());
        }

        // Positions events: refresh the product count of the owning
        // collection, when the positions aggregate belongs to one.
        let state: PositionsState = decode_new_state(event)?;
        for (key, value) in views.scan(VIEW)? {
            let mut row: CollectionListRow = serde_json::from_value(value)
                .map_err(|e| ProjectionError::Decode(e.to_string()))?;
            if row.positions_id.to_string() == event.aggregate_id {
                row.product_count = state.entries.len() as u64;
                let value = serde_json::to_value(&row)
                    .map_err(|e| ProjectionError::Decode(e.to_string()))?;
                views.put(VIEW, &key, value);
                break;
            }
        }
        Ok(())
    }
}
