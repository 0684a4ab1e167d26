use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateId, AggregateRoot, DomainError};
use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

/// Snapshot envelope kind tag.
pub const KIND: &str = "positions";

pub mod event_names {
    pub const CREATED: &str = "positions.created";
    pub const ITEM_ADDED: &str = "positions.item_added";
    pub const ITEM_REMOVED: &str = "positions.item_removed";
    pub const REORDERED: &str = "positions.reordered";
    pub const ARCHIVED: &str = "positions.archived";
}

/// Serialized state of a positions aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionsState {
    pub id: AggregateId,
    /// Aggregate this ordering belongs to (collection or product).
    pub owner_id: String,
    pub entries: Vec<String>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Ordered sequence of member ids.
///
/// One per collection (product ordering) and one per product (variant
/// ordering). Referenced by its owner by id; archived with the owner.
#[derive(Debug, Clone)]
pub struct Positions {
    state: PositionsState,
    version: u64,
    correlation_id: merchkit_core::CorrelationId,
    uncommitted: Vec<DomainEvent>,
}

impl AggregateRoot for Positions {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.state.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Positions {
    pub fn create(
        id: AggregateId,
        owner_id: impl Into<String>,
        meta: &EventMeta,
    ) -> Result<Self, DomainError> {
        let state = PositionsState {
            id,
            owner_id: owner_id.into(),
            entries: Vec::new(),
            archived: false,
            created_at: meta.occurred_at,
            updated_at: meta.occurred_at,
        };
        let mut positions = Self {
            state,
            version: 0,
            correlation_id: meta.correlation_id,
            uncommitted: Vec::new(),
        };
        let new_state = positions.state_value()?;
        positions.uncommitted.push(DomainEvent::record(
            event_names::CREATED,
            id.to_string(),
            0,
            meta,
            EventPayload::creation(new_state),
        ));
        Ok(positions)
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

    pub fn owner_id(&self) -> &str {
        &self.state.owner_id
    }

    pub fn entries(&self) -> &[String] {
        &self.state.entries
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.state.entries.iter().any(|e| e == entry)
    }

    pub fn is_archived(&self) -> bool {
        self.state.archived
    }

    pub fn add(&mut self, entry: impl Into<String>, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_live()?;
        let entry = entry.into();
        if self.contains(&entry) {
            return Err(DomainError::invariant(format!(
                "id {entry} is already positioned"
            )));
        }
        let prior = self.state_value()?;
        self.state.entries.push(entry);
        self.record_mutation(event_names::ITEM_ADDED, prior, meta)
    }

    pub fn remove(&mut self, entry: &str, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_live()?;
        let Some(index) = self.state.entries.iter().position(|e| e == entry) else {
            return Err(DomainError::invariant(format!("id {entry} is not positioned")));
        };
        let prior = self.state_value()?;
        self.state.entries.remove(index);
        self.record_mutation(event_names::ITEM_REMOVED, prior, meta)
    }

    /// Replace the ordering. The multiset of ids must be unchanged.
    pub fn reorder(&mut self, entries: Vec<String>, meta: &EventMeta) -> Result<(), DomainError> {
        self.ensure_live()?;
        let mut current = self.state.entries.clone();
        let mut proposed = entries.clone();
        current.sort();
        proposed.sort();
        if current != proposed {
            return Err(DomainError::invariant(
                "reorder must preserve the set of positioned ids",
            ));
        }
        let prior = self.state_value()?;
        self.state.entries = entries;
        self.record_mutation(event_names::REORDERED, prior, meta)
    }

    pub fn archive(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.archived {
            return Err(DomainError::invariant("positions are already archived"));
        }
        let prior = self.state_value()?;
        self.state.archived = true;
        self.record_mutation(event_names::ARCHIVED, prior, meta)
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        if self.state.archived {
            return Err(DomainError::invariant(
                "cannot modify archived positions",
            ));
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use merchkit_core::{CorrelationId, UserId};

    fn meta() -> EventMeta {
        EventMeta::new(UserId::new(), CorrelationId::new(), Utc::now())
    }

    fn fresh() -> Positions {
        Positions::create(AggregateId::new(), AggregateId::new().to_string(), &meta()).unwrap()
    }

    #[test]
    fn create_emits_a_creation_event_at_version_zero() {
        let positions = fresh();
        assert_eq!(positions.version(), 0);
        let events = positions.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, event_names::CREATED);
        assert_eq!(events[0].version, 0);
        assert!(events[0].payload.is_creation());
    }

    #[test]
    fn add_appends_and_rejects_duplicates() {
        let mut positions = fresh();
        positions.add("p1", &meta()).unwrap();
        positions.add("p2", &meta()).unwrap();
        assert_eq!(positions.entries(), ["p1", "p2"]);
        assert_eq!(positions.version(), 2);

        let err = positions.add("p1", &meta()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(positions.version(), 2);
    }

    #[test]
    fn remove_rejects_absent_ids() {
        let mut positions = fresh();
        positions.add("p1", &meta()).unwrap();
        let err = positions.remove("p9", &meta()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        positions.remove("p1", &meta()).unwrap();
        assert!(positions.entries().is_empty());
    }

    #[test]
    fn reorder_requires_the_same_multiset() {
        let mut positions = fresh();
        positions.add("a", &meta()).unwrap();
        positions.add("b", &meta()).unwrap();
        positions.add("c", &meta()).unwrap();

        positions
            .reorder(vec!["c".into(), "a".into(), "b".into()], &meta())
            .unwrap();
        assert_eq!(positions.entries(), ["c", "a", "b"]);

        let err = positions
            .reorder(vec!["c".into(), "a".into()], &meta())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let err = positions
            .reorder(vec!["c".into(), "a".into(), "a".into()], &meta())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn archived_positions_reject_mutation() {
        let mut positions = fresh();
        positions.add("a", &meta()).unwrap();
        positions.archive(&meta()).unwrap();
        assert!(positions.is_archived());

        let err = positions.add("b", &meta()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        let err = positions.archive(&meta()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn snapshot_load_round_trips() {
        let mut positions = fresh();
        positions.add("x", &meta()).unwrap();
        positions.add("y", &meta()).unwrap();

        let snapshot = positions.snapshot().unwrap();
        let loaded = Positions::load(&snapshot).unwrap();
        assert_eq!(loaded.version(), positions.version());
        assert_eq!(loaded.entries(), positions.entries());
        assert_eq!(loaded.snapshot().unwrap(), snapshot);
        assert!(loaded.uncommitted_events().is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any permutation of the current entries is accepted.
            #[test]
            fn reorder_accepts_any_permutation(
                perm in Just(vec!["a", "b", "c", "d", "e"]).prop_shuffle()
            ) {
                let mut positions = fresh();
                for e in ["a", "b", "c", "d", "e"] {
                    positions.add(e, &meta()).unwrap();
                }
                let proposed: Vec<String> = perm.iter().map(|s| s.to_string()).collect();
                prop_assert!(positions.reorder(proposed, &meta()).is_ok());
            }

            /// Dropping or duplicating an entry is always rejected.
            #[test]
            fn reorder_rejects_multiset_changes(drop_index in 0usize..5) {
                let mut positions = fresh();
                for e in ["a", "b", "c", "d", "e"] {
                    positions.add(e, &meta()).unwrap();
                }
                let mut proposed: Vec<String> = ["a", "b", "c", "d", "e"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                let dropped = proposed.remove(drop_index);

                prop_assert!(positions.reorder(proposed.clone(), &meta()).is_err());

                let mut duplicated = proposed;
                duplicated.push(dropped.clone());
                duplicated.push(dropped);
                prop_assert!(positions.reorder(duplicated, &meta()).is_err());
            }

            /// Version advances exactly once per successful mutation.
            #[test]
            fn version_counts_successful_mutations(entries in proptest::collection::vec("[a-z]{1,8}", 1..8)) {
                let mut positions = fresh();
                let mut expected = 0u64;
                for e in &entries {
                    if positions.add(e.clone(), &meta()).is_ok() {
                        expected += 1;
                    }
                }
                prop_assert_eq!(positions.version(), expected);
                prop_assert_eq!(positions.uncommitted_events().len() as u64, expected + 1);
            }
        }
    }
}
