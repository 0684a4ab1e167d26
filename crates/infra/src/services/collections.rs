//! Collection command services.

use chrono::Utc;

use merchkit_catalog::{
    Collection, CollectionMetadata, LifecycleStatus, NewCollection, Positions,
};
use merchkit_core::{AggregateId, AggregateRoot, CorrelationId, UserId};
use merchkit_events::EventMeta;
use merchkit_slugs::EntityType;

use super::commands::{
    CollectionLifecycle, CommandOutcome, CreateCollection, ReorderCollectionProducts,
    UpdateCollectionMetadata,
};
use super::{
    check_version, load_snapshot, persist, release_or_redirect_slug, reserve_slug, ServiceError,
};
use crate::uow::TransactionManager;

fn meta_for(user_id: UserId, correlation_id: Option<CorrelationId>) -> EventMeta {
    EventMeta::new(user_id, correlation_id.unwrap_or_default(), Utc::now())
}

pub async fn create_collection(
    manager: &TransactionManager,
    cmd: CreateCollection,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let collection_key = cmd.id.to_string();
            if uow.snapshots().load(&collection_key)?.is_some() {
                return Err(ServiceError::InvalidCommand(format!(
                    "collection {collection_key} already exists"
                )));
            }

            let mut slug =
                reserve_slug(&uow, &cmd.slug, &collection_key, EntityType::Collection, &meta)?;

            let positions_id = AggregateId::new();
            let mut positions = Positions::create(positions_id, collection_key.clone(), &meta)?;

            let mut collection = Collection::create(
                NewCollection {
                    id: cmd.id,
                    name: cmd.name,
                    description: cmd.description,
                    slug: cmd.slug,
                    images: cmd.images,
                    positions_id,
                },
                &meta,
            )?;

            persist(&uow, collection.snapshot()?, collection.take_uncommitted_events());
            persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());
            persist(&uow, slug.snapshot()?, slug.take_uncommitted_events());

            Ok(CommandOutcome::new(
                collection_key,
                collection.version(),
                meta.correlation_id,
            ))
        })
        .await
}

/// Update collection metadata, orchestrating the slug aggregates on a slug
/// change: the old slug of an active collection becomes a redirect to the
/// new one; a draft collection just releases it.
pub async fn update_collection_metadata(
    manager: &TransactionManager,
    cmd: UpdateCollectionMetadata,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let collection_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &collection_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut collection = Collection::load(&snapshot)?;

            let prior_slug = collection.slug().to_string();
            let was_active = collection.status() == LifecycleStatus::Active;

            collection.update_metadata(
                CollectionMetadata {
                    name: cmd.name,
                    description: cmd.description,
                    slug: cmd.slug.clone(),
                    images: cmd.images,
                },
                &meta,
            )?;

            if prior_slug != cmd.slug {
                let mut new_slug =
                    reserve_slug(&uow, &cmd.slug, &collection_key, EntityType::Collection, &meta)?;
                if let Some(mut old_slug) =
                    release_or_redirect_slug(&uow, &prior_slug, &cmd.slug, was_active, &meta)?
                {
                    persist(&uow, old_slug.snapshot()?, old_slug.take_uncommitted_events());
                }
                persist(&uow, new_slug.snapshot()?, new_slug.take_uncommitted_events());
            }

            persist(&uow, collection.snapshot()?, collection.take_uncommitted_events());

            Ok(CommandOutcome::new(
                collection_key,
                collection.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn publish_collection(
    manager: &TransactionManager,
    cmd: CollectionLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let collection_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &collection_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut collection = Collection::load(&snapshot)?;
            collection.publish(&meta)?;
            persist(&uow, collection.snapshot()?, collection.take_uncommitted_events());
            Ok(CommandOutcome::new(
                collection_key,
                collection.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn unpublish_collection(
    manager: &TransactionManager,
    cmd: CollectionLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let collection_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &collection_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut collection = Collection::load(&snapshot)?;
            collection.unpublish(&meta)?;
            persist(&uow, collection.snapshot()?, collection.take_uncommitted_events());
            Ok(CommandOutcome::new(
                collection_key,
                collection.version(),
                meta.correlation_id,
            ))
        })
        .await
}

/// Archive a collection together with its positions aggregate; the ordering
/// cannot outlive its owner.
pub async fn archive_collection(
    manager: &TransactionManager,
    cmd: CollectionLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let collection_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &collection_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut collection = Collection::load(&snapshot)?;
            collection.archive(&meta)?;

            let positions_snapshot = load_snapshot(&uow, &collection.positions_id().to_string())?;
            let mut positions = Positions::load(&positions_snapshot)?;
            if !positions.is_archived() {
                positions.archive(&meta)?;
                persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());
            }

            persist(&uow, collection.snapshot()?, collection.take_uncommitted_events());

            Ok(CommandOutcome::new(
                collection_key,
                collection.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn reorder_collection_products(
    manager: &TransactionManager,
    cmd: ReorderCollectionProducts,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let collection_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &collection_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let collection = Collection::load(&snapshot)?;

            let positions_snapshot = load_snapshot(&uow, &collection.positions_id().to_string())?;
            let mut positions = Positions::load(&positions_snapshot)?;
            let ordering = cmd.product_ids.iter().map(|id| id.to_string()).collect();
            positions.reorder(ordering, &meta)?;
            persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());

            Ok(CommandOutcome::new(
                collection_key,
                collection.version(),
                meta.correlation_id,
            ))
        })
        .await
}
