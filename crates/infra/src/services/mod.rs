//! Command services: one operation per write command, all following the
//! load → check version → mutate → persist shape inside one unit of work.

pub mod bus;
pub mod collections;
pub mod commands;
pub mod products;
pub mod schedules;
pub mod variants;

use thiserror::Error;

use merchkit_core::DomainError;
use merchkit_events::{DomainEvent, EventMeta, Snapshot};
use merchkit_slugs::{EntityType, Slug, SlugStatus};

use crate::batcher::BatcherError;
use crate::projection::ProjectionError;
use crate::store::StoreError;
use crate::uow::UnitOfWork;

/// Failure surface of the command boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Projections are part of the atomic commit; their failure aborts the
    /// producing command.
    #[error("projection failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("transaction commit failed: {0}")]
    Batcher(#[from] BatcherError),

    #[error("storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("malformed command: {0}")]
    InvalidCommand(String),
}

impl ServiceError {
    /// The domain error, when this failure originated in the domain layer.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Load a snapshot or fail with `NotFound`.
pub(crate) fn load_snapshot(uow: &UnitOfWork, aggregate_id: &str) -> Result<Snapshot, ServiceError> {
    uow.snapshots()
        .load(aggregate_id)?
        .ok_or_else(|| DomainError::not_found(aggregate_id).into())
}

/// Optimistic concurrency check. `None` is the explicit skip used by
/// scheduled commands.
pub(crate) fn check_version(
    snapshot: &Snapshot,
    expected_version: Option<u64>,
) -> Result<(), ServiceError> {
    if let Some(expected) = expected_version {
        if snapshot.version != expected {
            return Err(DomainError::version_conflict(
                snapshot.aggregate_id.clone(),
                expected,
                snapshot.version,
            )
            .into());
        }
    }
    Ok(())
}

/// Stage an aggregate's produced events, new snapshot, and outbox rows.
///
/// No-op when the aggregate produced no events, so untouched collaborators
/// never bump their version.
pub(crate) fn persist(uow: &UnitOfWork, snapshot: Snapshot, events: Vec<DomainEvent>) {
    if events.is_empty() {
        return;
    }
    uow.events().append(&events);
    uow.snapshots().save(snapshot);
    uow.outbox().enqueue(&events);
}

/// Reserve `slug_value` for `entity_id`, creating the slug aggregate on
/// first sight. Idempotent when the entity already holds the slug.
pub(crate) fn reserve_slug(
    uow: &UnitOfWork,
    slug_value: &str,
    entity_id: &str,
    entity_type: EntityType,
    meta: &EventMeta,
) -> Result<Slug, ServiceError> {
    let storage_id = merchkit_slugs::slug::storage_id(slug_value);
    let mut slug = match uow.snapshots().load(&storage_id)? {
        Some(snapshot) => Slug::load(&snapshot)?,
        None => Slug::create(slug_value, meta)?,
    };
    if !slug.is_reserved_by(entity_id) {
        slug.reserve(entity_id, entity_type, meta)?;
    }
    Ok(slug)
}

/// Let go of an entity's old slug on a slug change: active entities leave a
/// redirect behind, draft entities release the slug back to the pool.
pub(crate) fn release_or_redirect_slug(
    uow: &UnitOfWork,
    old_slug: &str,
    new_slug: &str,
    entity_is_active: bool,
    meta: &EventMeta,
) -> Result<Option<Slug>, ServiceError> {
    let storage_id = merchkit_slugs::slug::storage_id(old_slug);
    let Some(snapshot) = uow.snapshots().load(&storage_id)? else {
        return Ok(None);
    };
    let mut slug = Slug::load(&snapshot)?;
    if slug.status() != SlugStatus::Reserved {
        return Ok(None);
    }
    if entity_is_active {
        slug.redirect(new_slug, meta)?;
    } else {
        slug.release(meta)?;
    }
    Ok(Some(slug))
}
