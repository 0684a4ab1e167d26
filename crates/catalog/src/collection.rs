use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateId, AggregateRoot, CorrelationId, DomainError};
use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

use crate::image::ImageRef;
use crate::status::LifecycleStatus;

/// Snapshot envelope kind tag.
pub const KIND: &str = "collection";

pub mod event_names {
    pub const CREATED: &str = "collection.created";
    pub const METADATA_UPDATED: &str = "collection.metadata_updated";
    pub const PUBLISHED: &str = "collection.published";
    pub const UNPUBLISHED: &str = "collection.unpublished";
    pub const ARCHIVED: &str = "collection.archived";
    pub const VISIBLE_DROP_SCHEDULED: &str = "collection.visible_drop_scheduled";
    pub const HIDDEN_DROP_SCHEDULED: &str = "collection.hidden_drop_scheduled";
    pub const PENDING_DROP_CANCELLED: &str = "collection.pending_drop_cancelled";
}

/// Serialized state of a collection aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    pub id: AggregateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    pub status: LifecycleStatus,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    /// Id of the positions aggregate ordering this collection's products.
    pub positions_id: AggregateId,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a collection.
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub id: AggregateId,
    pub name: String,
    pub description: String,
    pub slug: String,
    pub images: Vec<ImageRef>,
    pub positions_id: AggregateId,
}

/// Metadata fields updatable in one mutation.
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    pub name: String,
    pub description: String,
    pub slug: String,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone)]
pub struct Collection {
    state: CollectionState,
    version: u64,
    correlation_id: CorrelationId,
    uncommitted: Vec<DomainEvent>,
}

impl AggregateRoot for Collection {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.state.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Upcast legacy snapshot payloads to the current state shape.
///
/// Early snapshots carried a bare `image_urls: [String]`; current state uses
/// `images: [ImageRef]`. The wrapped images get deterministic synthetic ids.
fn upcast_state(mut state: JsonValue) -> JsonValue {
    if let JsonValue::Object(map) = &mut state {
        if !map.contains_key("images") {
            if let Some(JsonValue::Array(urls)) = map.remove("image_urls") {
                let images: Vec<JsonValue> = urls
                    .iter()
                    .enumerate()
                    .filter_map(|(index, url)| {
                        url.as_str().map(|url| {
                            serde_json::to_value(ImageRef::legacy(index, url))
                                .unwrap_or(JsonValue::Null)
                        })
                    })
                    .collect();
                map.insert("images".to_string(), JsonValue::Array(images));
            }
        }
    }
    state
}

impl Collection {
    pub fn create(params: NewCollection, meta: &EventMeta) -> Result<Self, DomainError> {
        if params.name.trim().is_empty() {
            return Err(DomainError::validation("collection name cannot be empty"));
        }
        if params.slug.trim().is_empty() {
            return Err(DomainError::validation("collection slug cannot be empty"));
        }

        let state = CollectionState {
            id: params.id,
            name: params.name,
            description: params.description,
            slug: params.slug,
            status: LifecycleStatus::Draft,
            images: params.images,
            positions_id: params.positions_id,
            published_at: None,
            created_at: meta.occurred_at,
            updated_at: meta.occurred_at,
        };
        let mut collection = Self {
            state,
            version: 0,
            correlation_id: meta.correlation_id,
            uncommitted: Vec::new(),
        };
        let new_state = collection.state_value()?;
        collection.uncommitted.push(DomainEvent::record(
            event_names::CREATED,
            collection.state.id.to_string(),
            0,
            meta,
            EventPayload::creation(new_state),
        ));
        Ok(collection)
    }

    pub fn load(snapshot: &Snapshot) -> Result<Self, DomainError> {
        snapshot.expect_kind(KIND)?;
        let state_value = upcast_state(snapshot.payload.state.clone());
        let state: CollectionState = serde_json::from_value(state_value)
            .map_err(|e| DomainError::serialization(e.to_string()))?;
        Ok(Self {
            state,
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

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn slug(&self) -> &str {
        &self.state.slug
    }

    pub fn status(&self) -> LifecycleStatus {
        self.state.status
    }

    pub fn positions_id(&self) -> AggregateId {
        self.state.positions_id
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.state.images
    }

    pub fn update_metadata(
        &mut self,
        metadata: CollectionMetadata,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status == LifecycleStatus::Archived {
            return Err(DomainError::invariant(
                "cannot update an archived collection",
            ));
        }
        if metadata.name.trim().is_empty() {
            return Err(DomainError::validation("collection name cannot be empty"));
        }
        if metadata.slug.trim().is_empty() {
            return Err(DomainError::validation("collection slug cannot be empty"));
        }

        let prior = self.state_value()?;
        self.state.name = metadata.name;
        self.state.description = metadata.description;
        self.state.slug = metadata.slug;
        self.state.images = metadata.images;
        self.record_mutation(event_names::METADATA_UPDATED, prior, meta)
    }

    pub fn publish(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        match self.state.status {
            LifecycleStatus::Active => {
                Err(DomainError::invariant("collection is already published"))
            }
            LifecycleStatus::Archived => Err(DomainError::invariant(
                "cannot publish an archived collection",
            )),
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
                "cannot unpublish a {} collection",
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
                Err(DomainError::invariant("collection is already archived"))
            }
            LifecycleStatus::VisiblePendingDrop | LifecycleStatus::HiddenPendingDrop => {
                Err(DomainError::invariant(
                    "cannot archive a collection with a pending drop",
                ))
            }
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
                "can only schedule a drop for a draft collection, not {}",
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
                "collection has no pending drop to cancel",
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

    fn new_collection() -> NewCollection {
        NewCollection {
            id: AggregateId::new(),
            name: "Summer Tees".to_string(),
            description: "Lightweight tees".to_string(),
            slug: "summer-tees".to_string(),
            images: vec![],
            positions_id: AggregateId::new(),
        }
    }

    fn draft() -> Collection {
        Collection::create(new_collection(), &meta()).unwrap()
    }

    #[test]
    fn create_starts_in_draft_at_version_zero() {
        let collection = draft();
        assert_eq!(collection.version(), 0);
        assert_eq!(collection.status(), LifecycleStatus::Draft);
        let events = collection.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, event_names::CREATED);
        assert_eq!(events[0].version, 0);
        assert!(events[0].payload.is_creation());
    }

    #[test]
    fn create_rejects_blank_name_and_slug() {
        let mut params = new_collection();
        params.name = "  ".to_string();
        assert!(matches!(
            Collection::create(params, &meta()).unwrap_err(),
            DomainError::Validation(_)
        ));

        let mut params = new_collection();
        params.slug = String::new();
        assert!(matches!(
            Collection::create(params, &meta()).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn archive_draft_collection_bumps_version_once() {
        let mut collection = draft();
        collection.archive(&meta()).unwrap();
        assert_eq!(collection.version(), 1);
        assert_eq!(collection.status(), LifecycleStatus::Archived);

        let events = collection.uncommitted_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_name, event_names::ARCHIVED);
        assert_eq!(events[1].version, 1);
    }

    #[test]
    fn archive_is_terminal() {
        let mut collection = draft();
        collection.archive(&meta()).unwrap();

        assert!(collection.archive(&meta()).is_err());
        assert!(collection.publish(&meta()).is_err());
        assert!(collection.unpublish(&meta()).is_err());
        assert!(collection
            .update_metadata(
                CollectionMetadata {
                    name: "x".into(),
                    description: String::new(),
                    slug: "x".into(),
                    images: vec![],
                },
                &meta()
            )
            .is_err());
    }

    #[test]
    fn publish_unpublish_cycle() {
        let mut collection = draft();
        let publish_meta = meta();
        collection.publish(&publish_meta).unwrap();
        assert_eq!(collection.status(), LifecycleStatus::Active);

        assert!(collection.publish(&meta()).is_err());

        collection.unpublish(&meta()).unwrap();
        assert_eq!(collection.status(), LifecycleStatus::Draft);
        assert_eq!(collection.version(), 2);
    }

    #[test]
    fn published_at_tracks_publish_state() {
        let mut collection = draft();
        let publish_meta = meta();
        collection.publish(&publish_meta).unwrap();
        let snapshot = collection.snapshot().unwrap();
        let state: CollectionState = snapshot.state_as().unwrap();
        assert_eq!(state.published_at, Some(publish_meta.occurred_at));

        collection.unpublish(&meta()).unwrap();
        let state: CollectionState = collection.snapshot().unwrap().state_as().unwrap();
        assert_eq!(state.published_at, None);
    }

    #[test]
    fn drop_scheduling_gates_archive_until_cancelled() {
        let mut collection = draft();
        collection.schedule_visible_drop(&meta()).unwrap();
        assert_eq!(collection.status(), LifecycleStatus::VisiblePendingDrop);

        assert!(collection.archive(&meta()).is_err());
        assert!(collection.schedule_hidden_drop(&meta()).is_err());

        collection.publish(&meta()).unwrap();
        assert_eq!(collection.status(), LifecycleStatus::Active);
    }

    #[test]
    fn cancel_pending_drop_returns_to_draft() {
        let mut collection = draft();
        collection.schedule_hidden_drop(&meta()).unwrap();
        collection.cancel_pending_drop(&meta()).unwrap();
        assert_eq!(collection.status(), LifecycleStatus::Draft);

        assert!(collection.cancel_pending_drop(&meta()).is_err());
    }

    #[test]
    fn events_carry_prior_and_new_state() {
        let mut collection = draft();
        collection.archive(&meta()).unwrap();
        let event = &collection.uncommitted_events()[1];
        assert_eq!(
            event.payload.prior_state.get("status").unwrap(),
            &serde_json::json!("draft")
        );
        assert_eq!(
            event.payload.new_state.get("status").unwrap(),
            &serde_json::json!("archived")
        );
    }

    #[test]
    fn snapshot_load_round_trips() {
        let mut collection = draft();
        collection.publish(&meta()).unwrap();
        let snapshot = collection.snapshot().unwrap();

        let loaded = Collection::load(&snapshot).unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.status(), LifecycleStatus::Active);
        assert_eq!(loaded.snapshot().unwrap(), snapshot);
    }

    #[test]
    fn load_upcasts_legacy_image_urls() {
        let legacy_state = serde_json::json!({
            "id": AggregateId::new(),
            "name": "Legacy",
            "slug": "legacy",
            "status": "draft",
            "positions_id": AggregateId::new(),
            "image_urls": ["https://img/one.jpg", "https://img/two.jpg"],
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
        });
        let snapshot = Snapshot::new("c-legacy", CorrelationId::new(), 3, KIND, legacy_state);

        let collection = Collection::load(&snapshot).unwrap();
        let images = collection.images();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id, "legacy-0");
        assert_eq!(images[0].url, "https://img/one.jpg");
        assert_eq!(images[1].id, "legacy-1");

        // Re-saving persists the upcast shape.
        let resaved = collection.snapshot().unwrap();
        assert!(resaved.payload.state.get("images").is_some());
        assert!(resaved.payload.state.get("image_urls").is_none());
    }

    #[test]
    fn load_rejects_foreign_kind() {
        let snapshot = Snapshot::new(
            "p1",
            CorrelationId::new(),
            0,
            "product",
            serde_json::json!({}),
        );
        assert!(Collection::load(&snapshot).is_err());
    }
}
