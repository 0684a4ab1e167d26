//! Read-model projections, dispatched inside the producing transaction.

pub mod collection_list;
pub mod product_list;
pub mod product_variants;
pub mod schedule_view;
pub mod slug_redirects;
pub mod variant_details;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use merchkit_events::DomainEvent;

use crate::store::StoreError;
use crate::uow::{UnitOfWork, ViewWriter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to decode event payload: {0}")]
    Decode(String),

    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
}

/// A deterministic read-model writer.
///
/// Projections self-select via `handles` and consume only the event payload,
/// so replaying the log from version zero reconstructs every view.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, event_name: &str) -> bool;

    async fn apply(&self, views: &ViewWriter<'_>, event: &DomainEvent)
        -> Result<(), ProjectionError>;
}

/// Decode the post-mutation state carried by an event.
pub(crate) fn decode_new_state<T: DeserializeOwned>(
    event: &DomainEvent,
) -> Result<T, ProjectionError> {
    serde_json::from_value(event.payload.new_state.clone())
        .map_err(|e| ProjectionError::Decode(format!("{}: {e}", event.event_name)))
}

/// Decode the pre-mutation state carried by an event.
pub(crate) fn decode_prior_state<T: DeserializeOwned>(
    event: &DomainEvent,
) -> Result<T, ProjectionError> {
    serde_json::from_value(event.payload.prior_state.clone())
        .map_err(|e| ProjectionError::Decode(format!("{}: {e}", event.event_name)))
}

/// The projections registered for a deployment.
///
/// Constructed once and shared; dispatch itself runs against a single
/// transaction's view writer.
pub struct ProjectionSet {
    projections: Vec<Arc<dyn Projection>>,
}

impl ProjectionSet {
    pub fn empty() -> Self {
        Self {
            projections: Vec::new(),
        }
    }

    /// Every built-in read model.
    pub fn standard() -> Self {
        Self {
            projections: vec![
                Arc::new(product_list::ProductListProjection),
                Arc::new(product_variants::ProductVariantsProjection),
                Arc::new(variant_details::VariantDetailsProjection),
                Arc::new(collection_list::CollectionListProjection),
                Arc::new(schedule_view::ScheduleViewProjection),
                Arc::new(slug_redirects::SlugRedirectProjection),
            ],
        }
    }

    pub fn with(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projections.push(projection);
        self
    }

    /// Apply every buffered event, in producer order, to all matching
    /// projections. Matching projections for one event run concurrently;
    /// each owns its own views, so no cross-projection ordering is needed.
    pub async fn dispatch(&self, uow: &UnitOfWork) -> Result<(), ProjectionError> {
        let events = uow.drained_events();
        let views = uow.views();
        for event in &events {
            let matching = self
                .projections
                .iter()
                .filter(|p| p.handles(&event.event_name));
            futures::future::try_join_all(matching.map(|p| p.apply(&views, event))).await?;
        }
        Ok(())
    }
}
