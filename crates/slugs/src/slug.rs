use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateRoot, CorrelationId, DomainError};
use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

/// Snapshot envelope kind tag.
pub const KIND: &str = "slug";

pub mod event_names {
    pub const CREATED: &str = "slug.created";
    pub const RESERVED: &str = "slug.reserved";
    pub const RELEASED: &str = "slug.released";
    pub const REDIRECTED: &str = "slug.redirected";
}

/// Kind of entity holding a slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Collection,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Collection => "collection",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlugStatus {
    Available,
    Reserved,
    Released,
    Redirected,
}

/// Serialized state of a slug aggregate.
///
/// `entity_id`/`entity_type` remain populated after a redirect so the
/// redirect projection can attribute the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugState {
    pub slug: String,
    pub status: SlugStatus,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub target_slug: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Slug reservation state machine:
/// `available → reserved(entity) → released | redirected(target)`.
///
/// Released and redirected slugs return to the pool and may be re-reserved.
#[derive(Debug, Clone)]
pub struct Slug {
    state: SlugState,
    version: u64,
    correlation_id: CorrelationId,
    uncommitted: Vec<DomainEvent>,
}

/// Storage key for a slug aggregate. Prefixed so slug and SKU strings can
/// never collide in the shared snapshot table.
pub fn storage_id(slug: &str) -> String {
    format!("slug:{slug}")
}

impl AggregateRoot for Slug {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.state.slug
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Slug {
    pub fn create(slug: impl Into<String>, meta: &EventMeta) -> Result<Self, DomainError> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(DomainError::validation("slug cannot be empty"));
        }
        if slug.contains(char::is_whitespace) {
            return Err(DomainError::validation("slug cannot contain whitespace"));
        }

        let state = SlugState {
            slug,
            status: SlugStatus::Available,
            entity_id: None,
            entity_type: None,
            target_slug: None,
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
            storage_id(&aggregate.state.slug),
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
            storage_id(&self.state.slug),
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

    pub fn slug(&self) -> &str {
        &self.state.slug
    }

    pub fn status(&self) -> SlugStatus {
        self.state.status
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.state.entity_id.as_deref()
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        self.state.entity_type
    }

    pub fn target_slug(&self) -> Option<&str> {
        self.state.target_slug.as_deref()
    }

    pub fn is_reserved_by(&self, entity_id: &str) -> bool {
        self.state.status == SlugStatus::Reserved
            && self.state.entity_id.as_deref() == Some(entity_id)
    }

    pub fn reserve(
        &mut self,
        entity_id: impl Into<String>,
        entity_type: EntityType,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status == SlugStatus::Reserved {
            return Err(DomainError::already_in_use("slug", self.state.slug.clone()));
        }
        let prior = self.state_value()?;
        self.state.status = SlugStatus::Reserved;
        self.state.entity_id = Some(entity_id.into());
        self.state.entity_type = Some(entity_type);
        self.state.target_slug = None;
        self.record_mutation(event_names::RESERVED, prior, meta)
    }

    pub fn release(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.status != SlugStatus::Reserved {
            return Err(DomainError::invariant(format!(
                "slug \"{}\" is not reserved",
                self.state.slug
            )));
        }
        let prior = self.state_value()?;
        self.state.status = SlugStatus::Released;
        self.record_mutation(event_names::RELEASED, prior, meta)
    }

    pub fn redirect(
        &mut self,
        target_slug: impl Into<String>,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status != SlugStatus::Reserved {
            return Err(DomainError::invariant(format!(
                "slug \"{}\" is not reserved",
                self.state.slug
            )));
        }
        let target_slug = target_slug.into();
        if target_slug == self.state.slug {
            return Err(DomainError::invariant("slug cannot redirect to itself"));
        }
        let prior = self.state_value()?;
        self.state.status = SlugStatus::Redirected;
        self.state.target_slug = Some(target_slug);
        self.record_mutation(event_names::REDIRECTED, prior, meta)
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
            storage_id(&self.state.slug),
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

    fn available(slug: &str) -> Slug {
        Slug::create(slug, &meta()).unwrap()
    }

    #[test]
    fn create_rejects_malformed_slugs() {
        assert!(Slug::create("", &meta()).is_err());
        assert!(Slug::create("has space", &meta()).is_err());
        assert!(Slug::create("summer-drop", &meta()).is_ok());
    }

    #[test]
    fn reserve_then_reserve_again_reports_in_use() {
        let mut slug = available("b");
        slug.reserve("c1", EntityType::Collection, &meta()).unwrap();
        assert!(slug.is_reserved_by("c1"));

        let err = slug.reserve("c2", EntityType::Collection, &meta()).unwrap_err();
        assert_eq!(err.to_string(), "slug \"b\" is already in use");
    }

    #[test]
    fn released_slug_can_be_reserved_again() {
        let mut slug = available("a");
        slug.reserve("c1", EntityType::Collection, &meta()).unwrap();
        slug.release(&meta()).unwrap();
        assert_eq!(slug.status(), SlugStatus::Released);

        slug.reserve("p1", EntityType::Product, &meta()).unwrap();
        assert!(slug.is_reserved_by("p1"));
        assert_eq!(slug.entity_type(), Some(EntityType::Product));
    }

    #[test]
    fn redirect_keeps_owning_entity_for_attribution() {
        let mut slug = available("a");
        slug.reserve("c1", EntityType::Collection, &meta()).unwrap();
        slug.redirect("b", &meta()).unwrap();
        assert_eq!(slug.status(), SlugStatus::Redirected);
        assert_eq!(slug.target_slug(), Some("b"));
        assert_eq!(slug.entity_id(), Some("c1"));
    }

    #[test]
    fn redirected_slug_can_be_reclaimed() {
        let mut slug = available("a");
        slug.reserve("c1", EntityType::Collection, &meta()).unwrap();
        slug.redirect("b", &meta()).unwrap();

        slug.reserve("p9", EntityType::Product, &meta()).unwrap();
        assert_eq!(slug.status(), SlugStatus::Reserved);
        assert_eq!(slug.target_slug(), None);
    }

    #[test]
    fn release_and_redirect_require_a_reservation() {
        let mut slug = available("a");
        assert!(slug.release(&meta()).is_err());
        assert!(slug.redirect("b", &meta()).is_err());
    }

    #[test]
    fn self_redirect_is_rejected() {
        let mut slug = available("a");
        slug.reserve("c1", EntityType::Collection, &meta()).unwrap();
        assert!(slug.redirect("a", &meta()).is_err());
    }

    #[test]
    fn storage_id_is_prefixed() {
        let slug = available("summer");
        let snapshot = slug.snapshot().unwrap();
        assert_eq!(snapshot.aggregate_id, "slug:summer");
        assert_eq!(slug.uncommitted_events()[0].aggregate_id, "slug:summer");
    }

    #[test]
    fn snapshot_load_round_trips() {
        let mut slug = available("a");
        slug.reserve("c1", EntityType::Collection, &meta()).unwrap();
        let snapshot = slug.snapshot().unwrap();
        let loaded = Slug::load(&snapshot).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), snapshot);
        assert_eq!(loaded.version(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve(String),
            Release,
            Redirect(String),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                "[a-z0-9]{1,8}".prop_map(Op::Reserve),
                Just(Op::Release),
                "[a-z0-9]{1,8}".prop_map(|s| Op::Redirect(format!("t-{s}"))),
            ]
        }

        proptest! {
            /// At most one entity holds a reservation at any time, across any
            /// op sequence.
            #[test]
            fn single_holder_invariant(ops in proptest::collection::vec(op_strategy(), 0..32)) {
                let mut slug = available("prop-slug");
                let mut holder: Option<String> = None;
                for op in ops {
                    match op {
                        Op::Reserve(entity) => {
                            if slug.reserve(entity.clone(), EntityType::Product, &meta()).is_ok() {
                                prop_assert!(holder.is_none());
                                holder = Some(entity);
                            }
                        }
                        Op::Release => {
                            if slug.release(&meta()).is_ok() {
                                prop_assert!(holder.is_some());
                                holder = None;
                            }
                        }
                        Op::Redirect(target) => {
                            if slug.redirect(target, &meta()).is_ok() {
                                prop_assert!(holder.is_some());
                                holder = None;
                            }
                        }
                    }
                    match holder.as_deref() {
                        Some(entity) => prop_assert!(slug.is_reserved_by(entity)),
                        None => prop_assert!(slug.status() != SlugStatus::Reserved),
                    }
                }
            }
        }
    }
}
