use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use merchkit_catalog::product::ProductState;
use merchkit_catalog::{LifecycleStatus, ProductKind};
use merchkit_core::AggregateId;
use merchkit_events::DomainEvent;

use super::{decode_new_state, Projection, ProjectionError};
use crate::uow::ViewWriter;

pub const VIEW: &str = "product_list_view";

/// One row per product, keyed by product id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListRow {
    pub id: AggregateId,
    pub title: String,
    pub slug: String,
    pub kind: ProductKind,
    pub status: LifecycleStatus,
    pub collections: Vec<AggregateId>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub struct ProductListProjection;

#[async_trait]
impl Projection for ProductListProjection {
    fn name(&self) -> &'static str {
        "product_list"
    }

    fn handles(&self, event_name: &str) -> bool {
        event_name.starts_with("product.")
    }

    async fn apply(
        &self,
        views: &ViewWriter<'_>,
        event: &DomainEvent,
    ) -> Result<(), ProjectionError> {
        let state: ProductState = decode_new_state(event)?;
        let row = ProductListRow {
            id: state.id,
            title: state.title,
            slug: state.slug,
            kind: state.kind,
            status: state.status,
            collections: state.collections,
            published_at: state.published_at,
            updated_at: state.updated_at,
        };
        let value = serde_json::to_value(&row)
            .map_err(|e| ProjectionError::Decode(e.to_string()))?;
        views.put(VIEW, &event.aggregate_id, value);
        Ok(())
    }
}
