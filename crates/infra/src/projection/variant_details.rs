use async_trait::async_trait;

use merchkit_catalog::variant::VariantState;
use merchkit_events::DomainEvent;

use super::{decode_new_state, Projection, ProjectionError};
use crate::uow::ViewWriter;

pub const VIEW: &str = "variant_details_view";

/// Full variant state keyed by variant id (the detail page read model).
pub struct VariantDetailsProjection;

#[async_trait]
impl Projection for VariantDetailsProjection {
    fn name(&self) -> &'static str {
        "variant_details"
    }

    fn handles(&self, event_name: &str) -> bool {
        event_name.starts_with("variant.")
    }

    async fn apply(
        &self,
        views: &ViewWriter<'_>,
        event: &DomainEvent,
    ) -> Result<(), ProjectionError> {
        // Validate the payload shape, then store the state verbatim.
        let _: VariantState = decode_new_state(event)?;
        views.put(VIEW, &event.aggregate_id, event.payload.new_state.clone());
        Ok(())
    }
}
