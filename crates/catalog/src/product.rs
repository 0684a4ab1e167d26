use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateId, AggregateRoot, CorrelationId, DomainError};
use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

use crate::image::ImageRef;
use crate::status::LifecycleStatus;

/// Snapshot envelope kind tag.
pub const KIND: &str = "product";

pub mod event_names {
    pub const CREATED: &str = "product.created";
    pub const METADATA_UPDATED: &str = "product.metadata_updated";
    pub const PUBLISHED: &str = "product.published";
    pub const UNPUBLISHED: &str = "product.unpublished";
    pub const ARCHIVED: &str = "product.archived";
    pub const COLLECTIONS_UPDATED: &str = "product.collections_updated";
    pub const VISIBLE_DROP_SCHEDULED: &str = "product.visible_drop_scheduled";
    pub const HIDDEN_DROP_SCHEDULED: &str = "product.hidden_drop_scheduled";
    pub const PENDING_DROP_CANCELLED: &str = "product.pending_drop_cancelled";
}

/// Fulfillment family of a product and its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Physical,
    DigitalDownload,
}

/// A declared option axis (e.g. `size` with values `s`, `m`, `l`).
///
/// Variants must pick exactly one whitelisted value per declared option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOption {
    pub name: String,
    pub values: Vec<String>,
}

/// Serialized state of a product aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductState {
    pub id: AggregateId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    pub kind: ProductKind,
    pub status: LifecycleStatus,
    #[serde(default)]
    pub options: Vec<ProductOption>,
    #[serde(default)]
    pub collections: Vec<AggregateId>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    /// Id of the positions aggregate ordering this product's variants.
    pub positions_id: AggregateId,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub id: AggregateId,
    pub title: String,
    pub description: String,
    pub slug: String,
    pub kind: ProductKind,
    pub options: Vec<ProductOption>,
    pub images: Vec<ImageRef>,
    pub positions_id: AggregateId,
}

/// Metadata fields updatable in one mutation.
#[derive(Debug, Clone)]
pub struct ProductMetadata {
    pub title: String,
    pub description: String,
    pub slug: String,
    pub options: Vec<ProductOption>,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone)]
pub struct Product {
    state: ProductState,
    version: u64,
    correlation_id: CorrelationId,
    uncommitted: Vec<DomainEvent>,
}

impl AggregateRoot for Product {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.state.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn validate_options(options: &[ProductOption]) -> Result<(), DomainError> {
    for option in options {
        if option.name.trim().is_empty() {
            return Err(DomainError::validation("option name cannot be empty"));
        }
        if option.values.is_empty() {
            return Err(DomainError::validation(format!(
                "option {} must declare at least one value",
                option.name
            )));
        }
    }
    let mut names: Vec<&str> = options.iter().map(|o| o.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != options.len() {
        return Err(DomainError::validation("option names must be unique"));
    }
    Ok(())
}

impl Product {
    pub fn create(params: NewProduct, meta: &EventMeta) -> Result<Self, DomainError> {
        if params.title.trim().is_empty() {
            return Err(DomainError::validation("product title cannot be empty"));
        }
        if params.slug.trim().is_empty() {
            return Err(DomainError::validation("product slug cannot be empty"));
        }
        validate_options(&params.options)?;

        let state = ProductState {
            id: params.id,
            title: params.title,
            description: params.description,
            slug: params.slug,
            kind: params.kind,
            status: LifecycleStatus::Draft,
            options: params.options,
            collections: Vec::new(),
            images: params.images,
            positions_id: params.positions_id,
            published_at: None,
            created_at: meta.occurred_at,
            updated_at: meta.occurred_at,
        };
        let mut product = Self {
            state,
            version: 0,
            correlation_id: meta.correlation_id,
            uncommitted: Vec::new(),
        };
        let new_state = product.state_value()?;
        product.uncommitted.push(DomainEvent::record(
            event_names::CREATED,
            product.state.id.to_string(),
            0,
            meta,
            EventPayload::creation(new_state),
        ));
        Ok(product)
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

    pub fn title(&self) -> &str {
        &self.state.title
    }

    pub fn slug(&self) -> &str {
        &self.state.slug
    }

    pub fn kind(&self) -> ProductKind {
        self.state.kind
    }

    pub fn status(&self) -> LifecycleStatus {
        self.state.status
    }

    pub fn options(&self) -> &[ProductOption] {
        &self.state.options
    }

    pub fn declared_option(&self, name: &str) -> Option<&ProductOption> {
        self.state.options.iter().find(|o| o.name == name)
    }

    pub fn collections(&self) -> &[AggregateId] {
        &self.state.collections
    }

    pub fn positions_id(&self) -> AggregateId {
        self.state.positions_id
    }

    pub fn update_metadata(
        &mut self,
        metadata: ProductMetadata,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status == LifecycleStatus::Archived {
            return Err(DomainError::invariant("cannot update an archived product"));
        }
        if metadata.title.trim().is_empty() {
            return Err(DomainError::validation("product title cannot be empty"));
        }
        if metadata.slug.trim().is_empty() {
            return Err(DomainError::validation("product slug cannot be empty"));
        }
        validate_options(&metadata.options)?;

        let prior = self.state_value()?;
        self.state.title = metadata.title;
        self.state.description = metadata.description;
        self.state.slug = metadata.slug;
        self.state.options = metadata.options;
        self.state.images = metadata.images;
        self.record_mutation(event_names::METADATA_UPDATED, prior, meta)
    }

    /// Replace the set of collections this product belongs to.
    ///
    /// The service orchestrates the matching positions-aggregate updates;
    /// the product only tracks the membership set.
    pub fn set_collections(
        &mut self,
        collections: Vec<AggregateId>,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status == LifecycleStatus::Archived {
            return Err(DomainError::invariant("cannot update an archived product"));
        }
        let mut deduped = collections.clone();
        deduped.sort_by_key(|id| *id.as_uuid());
        deduped.dedup();
        if deduped.len() != collections.len() {
            return Err(DomainError::validation(
                "collection ids must not repeat",
            ));
        }
        let prior = self.state_value()?;
        self.state.collections = collections;
        self.record_mutation(event_names::COLLECTIONS_UPDATED, prior, meta)
    }

    pub fn publish(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        match self.state.status {
            LifecycleStatus::Active => Err(DomainError::invariant("product is already published")),
            LifecycleStatus::Archived => {
                Err(DomainError::invariant("cannot publish an archived product"))
            }
            LifecycleStatus::Draft
            | LifecycleStatus::VisiblePendingDrop
            | LifecycleStatus::HiddenPendingDrop => {
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
                "cannot unpublish a {} product",
                self.state.status.as_str()
            )));
        }
        let prior = self.state_value()?;
        self.state.status = LifecycleStatus::Draft;
        self.state.published_at = None;
        self.record_mutation(event_names::UNPUBLISHED, prior, meta)
    }

    pub fn archive(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        match self.state.status {
            LifecycleStatus::Archived => {
                Err(DomainError::invariant("product is already archived"))
            }
            LifecycleStatus::VisiblePendingDrop | LifecycleStatus::HiddenPendingDrop => Err(
                DomainError::invariant("cannot archive a product with a pending drop"),
            ),
            LifecycleStatus::Draft | LifecycleStatus::Active => {
                let prior = self.state_value()?;
                self.state.status = LifecycleStatus::Archived;
                self.record_mutation(event_names::ARCHIVED, prior, meta)
            }
        }
    }

    pub fn schedule_visible_drop(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        self.schedule_drop(LifecycleStatus::VisiblePendingDrop, meta)
    }

    pub fn schedule_hidden_drop(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        self.schedule_drop(LifecycleStatus::HiddenPendingDrop, meta)
    }

    fn schedule_drop(
        &mut self,
        pending: LifecycleStatus,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status != LifecycleStatus::Draft {
            return Err(DomainError::invariant(format!(
                "can only schedule a drop for a draft product, not {}",
                self.state.status.as_str()
            )));
        }
        let prior = self.state_value()?;
        self.state.status = pending;
        let event_name = match pending {
            LifecycleStatus::VisiblePendingDrop => event_names::VISIBLE_DROP_SCHEDULED,
            _ => event_names::HIDDEN_DROP_SCHEDULED,
        };
        self.record_mutation(event_name, prior, meta)
    }

    pub fn cancel_pending_drop(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if !self.state.status.is_pending_drop() {
            return Err(DomainError::invariant(
                "product has no pending drop to cancel",
            ));
        }
        let prior = self.state_value()?;
        self.state.status = LifecycleStatus::Draft;
        self.record_mutation(event_names::PENDING_DROP_CANCELLED, prior, meta)
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

#[cfg(test)]
mod tests {
    use super::*;
    use merchkit_core::UserId;

    fn meta() -> EventMeta {
        EventMeta::new(UserId::new(), CorrelationId::new(), Utc::now())
    }

    fn new_product() -> NewProduct {
        NewProduct {
            id: AggregateId::new(),
            title: "Logo Tee".to_string(),
            description: String::new(),
            slug: "logo-tee".to_string(),
            kind: ProductKind::Physical,
            options: vec![ProductOption {
                name: "size".to_string(),
                values: vec!["s".to_string(), "m".to_string(), "l".to_string()],
            }],
            images: vec![],
            positions_id: AggregateId::new(),
        }
    }

    fn draft() -> Product {
        Product::create(new_product(), &meta()).unwrap()
    }

    #[test]
    fn create_emits_created_with_empty_prior_state() {
        let product = draft();
        assert_eq!(product.version(), 0);
        assert_eq!(product.status(), LifecycleStatus::Draft);
        let events = product.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, event_names::CREATED);
        assert!(events[0].payload.is_creation());
    }

    #[test]
    fn create_rejects_duplicate_option_names() {
        let mut params = new_product();
        params.options.push(ProductOption {
            name: "size".to_string(),
            values: vec!["xl".to_string()],
        });
        assert!(matches!(
            Product::create(params, &meta()).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn create_rejects_option_without_values() {
        let mut params = new_product();
        params.options = vec![ProductOption {
            name: "color".to_string(),
            values: vec![],
        }];
        assert!(Product::create(params, &meta()).is_err());
    }

    #[test]
    fn publish_from_draft_then_archive() {
        let mut product = draft();
        product.publish(&meta()).unwrap();
        assert_eq!(product.status(), LifecycleStatus::Active);
        assert!(product.publish(&meta()).is_err());

        product.archive(&meta()).unwrap();
        assert_eq!(product.status(), LifecycleStatus::Archived);
        assert!(matches!(
            product.publish(&meta()).unwrap_err(),
            DomainError::InvariantViolation(msg) if msg.contains("archived")
        ));
    }

    #[test]
    fn unpublish_requires_active() {
        let mut product = draft();
        assert!(product.unpublish(&meta()).is_err());
        product.publish(&meta()).unwrap();
        product.unpublish(&meta()).unwrap();
        assert_eq!(product.status(), LifecycleStatus::Draft);
    }

    #[test]
    fn set_collections_replaces_membership() {
        let mut product = draft();
        let x = AggregateId::new();
        let y = AggregateId::new();
        product.set_collections(vec![x], &meta()).unwrap();
        assert_eq!(product.collections(), [x]);

        product.set_collections(vec![y, x], &meta()).unwrap();
        assert_eq!(product.collections(), [y, x]);
        assert_eq!(product.version(), 2);
    }

    #[test]
    fn set_collections_rejects_repeats() {
        let mut product = draft();
        let x = AggregateId::new();
        assert!(matches!(
            product.set_collections(vec![x, x], &meta()).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn visible_drop_flow_reaches_active_through_publish() {
        let mut product = draft();
        product.schedule_visible_drop(&meta()).unwrap();
        assert_eq!(product.status(), LifecycleStatus::VisiblePendingDrop);

        product.publish(&meta()).unwrap();
        assert_eq!(product.status(), LifecycleStatus::Active);
        assert_eq!(product.version(), 2);
    }

    #[test]
    fn metadata_update_keeps_declared_options_queryable() {
        let mut product = draft();
        product
            .update_metadata(
                ProductMetadata {
                    title: "Logo Tee v2".to_string(),
                    description: "Updated".to_string(),
                    slug: "logo-tee-v2".to_string(),
                    options: vec![ProductOption {
                        name: "color".to_string(),
                        values: vec!["black".to_string()],
                    }],
                    images: vec![],
                },
                &meta(),
            )
            .unwrap();

        assert!(product.declared_option("size").is_none());
        let color = product.declared_option("color").unwrap();
        assert_eq!(color.values, ["black"]);
    }

    #[test]
    fn snapshot_load_round_trips() {
        let mut product = draft();
        product.publish(&meta()).unwrap();
        let snapshot = product.snapshot().unwrap();
        let loaded = Product::load(&snapshot).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), snapshot);
        assert_eq!(loaded.version(), 1);
    }
}
