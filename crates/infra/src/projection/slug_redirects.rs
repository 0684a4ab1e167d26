use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use merchkit_catalog::LifecycleStatus;
use merchkit_events::DomainEvent;
use merchkit_slugs::{EntityType, SlugState};

use super::{decode_new_state, decode_prior_state, Projection, ProjectionError};
use crate::uow::ViewWriter;

pub const PRODUCT_VIEW: &str = "product_slug_redirects";
pub const COLLECTION_VIEW: &str = "collection_slug_redirects";

pub fn view_for(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Product => PRODUCT_VIEW,
        EntityType::Collection => COLLECTION_VIEW,
    }
}

/// Redirect row keyed by the old slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugRedirectRow {
    pub from_slug: String,
    pub to_slug: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub created_at: DateTime<Utc>,
}

/// The slice of product/collection state this projection reads.
#[derive(Debug, Deserialize)]
struct SluggedState {
    slug: String,
    status: LifecycleStatus,
}

/// Preserves inbound links when an active entity's slug changes.
///
/// On a slug change of an active entity, every existing redirect chain
/// ending at the old slug is rewritten to the new slug (`A→B` + `B→C`
/// compresses to `A→C`) and `old→new` is inserted. Draft entities release
/// their slug instead, so no redirect row is written. A re-reserved slug
/// drops any stale redirect still keyed by it.
pub struct SlugRedirectProjection;

#[async_trait]
impl Projection for SlugRedirectProjection {
    fn name(&self) -> &'static str {
        "slug_redirects"
    }

    fn handles(&self, event_name: &str) -> bool {
        event_name == "product.metadata_updated"
            || event_name == "collection.metadata_updated"
            || event_name == merchkit_slugs::slug::event_names::RESERVED
    }

    async fn apply(
        &self,
        views: &ViewWriter<'_>,
        event: &DomainEvent,
    ) -> Result<(), ProjectionError> {
        if event.event_name == merchkit_slugs::slug::event_names::RESERVED {
            let state: SlugState = decode_new_state(event)?;
            views.delete(PRODUCT_VIEW, &state.slug);
            views.delete(COLLECTION_VIEW, &state.slug);
            return Ok(());
        }

        let entity_type = if event.event_name.starts_with("product.") {
            EntityType::Product
        } else {
            EntityType::Collection
        };
        let prior: SluggedState = decode_prior_state(event)?;
        let new: SluggedState = decode_new_state(event)?;

        if prior.slug == new.slug || new.status != LifecycleStatus::Active {
            return Ok(());
        }

        let view = view_for(entity_type);

        // Chain compression: anything pointing at the old slug now points at
        // the new one.
        for (key, value) in views.scan(view)? {
            let mut row: SlugRedirectRow = serde_json::from_value(value)
                .map_err(|e| ProjectionError::Decode(e.to_string()))?;
            if row.to_slug == prior.slug {
                row.to_slug = new.slug.clone();
                let value = serde_json::to_value(&row)
                    .map_err(|e| ProjectionError::Decode(e.to_string()))?;
                views.put(view, &key, value);
            }
        }

        let row = SlugRedirectRow {
            from_slug: prior.slug.clone(),
            to_slug: new.slug.clone(),
            entity_id: event.aggregate_id.clone(),
            entity_type,
            created_at: event.occurred_at,
        };
        let value = serde_json::to_value(&row)
            .map_err(|e| ProjectionError::Decode(e.to_string()))?;
        views.put(view, &prior.slug, value);
        Ok(())
    }
}
