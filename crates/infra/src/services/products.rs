//! Product command services.

use std::collections::HashSet;

use chrono::Utc;

use merchkit_catalog::{
    Collection, LifecycleStatus, NewProduct, Positions, Product, ProductMetadata,
};
use merchkit_core::{AggregateId, AggregateRoot};
use merchkit_events::EventMeta;
use merchkit_scheduling::{NewSchedule, Schedule};
use merchkit_slugs::EntityType;

use super::commands::{
    CancelProductDrop, Command, CommandOutcome, CreateProduct, DropKind, ProductLifecycle,
    ReorderProductVariants, ScheduleProductDrop, UpdateProductCollections, UpdateProductMetadata,
};
use super::{
    check_version, load_snapshot, persist, release_or_redirect_slug, reserve_slug, ServiceError,
};
use crate::uow::TransactionManager;

fn meta_for(user_id: merchkit_core::UserId, correlation_id: Option<merchkit_core::CorrelationId>) -> EventMeta {
    EventMeta::new(user_id, correlation_id.unwrap_or_default(), Utc::now())
}

pub async fn create_product(
    manager: &TransactionManager,
    cmd: CreateProduct,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            if uow.snapshots().load(&product_key)?.is_some() {
                return Err(ServiceError::InvalidCommand(format!(
                    "product {product_key} already exists"
                )));
            }

            let mut slug = reserve_slug(&uow, &cmd.slug, &product_key, EntityType::Product, &meta)?;

            let positions_id = AggregateId::new();
            let mut positions = Positions::create(positions_id, product_key.clone(), &meta)?;

            let mut product = Product::create(
                NewProduct {
                    id: cmd.id,
                    title: cmd.title,
                    description: cmd.description,
                    slug: cmd.slug,
                    kind: cmd.kind,
                    options: cmd.options,
                    images: cmd.images,
                    positions_id,
                },
                &meta,
            )?;

            persist(&uow, product.snapshot()?, product.take_uncommitted_events());
            persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());
            persist(&uow, slug.snapshot()?, slug.take_uncommitted_events());

            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn update_product_metadata(
    manager: &TransactionManager,
    cmd: UpdateProductMetadata,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut product = Product::load(&snapshot)?;

            let prior_slug = product.slug().to_string();
            let was_active = product.status() == LifecycleStatus::Active;

            product.update_metadata(
                ProductMetadata {
                    title: cmd.title,
                    description: cmd.description,
                    slug: cmd.slug.clone(),
                    options: cmd.options,
                    images: cmd.images,
                },
                &meta,
            )?;

            if prior_slug != cmd.slug {
                let mut new_slug =
                    reserve_slug(&uow, &cmd.slug, &product_key, EntityType::Product, &meta)?;
                if let Some(mut old_slug) =
                    release_or_redirect_slug(&uow, &prior_slug, &cmd.slug, was_active, &meta)?
                {
                    persist(&uow, old_slug.snapshot()?, old_slug.take_uncommitted_events());
                }
                persist(&uow, new_slug.snapshot()?, new_slug.take_uncommitted_events());
            }

            persist(&uow, product.snapshot()?, product.take_uncommitted_events());

            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn publish_product(
    manager: &TransactionManager,
    cmd: ProductLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut product = Product::load(&snapshot)?;
            product.publish(&meta)?;
            persist(&uow, product.snapshot()?, product.take_uncommitted_events());
            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn unpublish_product(
    manager: &TransactionManager,
    cmd: ProductLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut product = Product::load(&snapshot)?;
            product.unpublish(&meta)?;
            persist(&uow, product.snapshot()?, product.take_uncommitted_events());
            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn archive_product(
    manager: &TransactionManager,
    cmd: ProductLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut product = Product::load(&snapshot)?;
            product.archive(&meta)?;
            persist(&uow, product.snapshot()?, product.take_uncommitted_events());
            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}

/// Replace a product's collection memberships.
///
/// Every added collection gets the product appended to its positions
/// aggregate; every removed one drops it (when present). All touched
/// aggregates commit in one transaction: partial success is never
/// observable.
pub async fn update_product_collections(
    manager: &TransactionManager,
    cmd: UpdateProductCollections,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut product = Product::load(&snapshot)?;

            let prior: HashSet<AggregateId> = product.collections().iter().copied().collect();
            let target: HashSet<AggregateId> = cmd.collection_ids.iter().copied().collect();

            product.set_collections(cmd.collection_ids.clone(), &meta)?;

            for added in target.difference(&prior) {
                let collection_snapshot = load_snapshot(&uow, &added.to_string())?;
                let collection = Collection::load(&collection_snapshot)?;
                let positions_snapshot =
                    load_snapshot(&uow, &collection.positions_id().to_string())?;
                let mut positions = Positions::load(&positions_snapshot)?;
                positions.add(product_key.clone(), &meta)?;
                persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());
            }

            for removed in prior.difference(&target) {
                let collection_snapshot = load_snapshot(&uow, &removed.to_string())?;
                let collection = Collection::load(&collection_snapshot)?;
                let positions_snapshot =
                    load_snapshot(&uow, &collection.positions_id().to_string())?;
                let mut positions = Positions::load(&positions_snapshot)?;
                if positions.contains(&product_key) {
                    positions.remove(&product_key, &meta)?;
                    persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());
                }
            }

            persist(&uow, product.snapshot()?, product.take_uncommitted_events());

            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn reorder_product_variants(
    manager: &TransactionManager,
    cmd: ReorderProductVariants,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let product = Product::load(&snapshot)?;

            let positions_snapshot = load_snapshot(&uow, &product.positions_id().to_string())?;
            let mut positions = Positions::load(&positions_snapshot)?;
            let ordering = cmd.variant_ids.iter().map(|id| id.to_string()).collect();
            positions.reorder(ordering, &meta)?;
            persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());

            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}

/// Park the product in a pending-drop state and persist the future publish
/// as a schedule embedding the complete command.
pub async fn schedule_product_drop(
    manager: &TransactionManager,
    cmd: ScheduleProductDrop,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut product = Product::load(&snapshot)?;

            match cmd.drop_kind {
                DropKind::Visible => product.schedule_visible_drop(&meta)?,
                DropKind::Hidden => product.schedule_hidden_drop(&meta)?,
            }

            // The embedded publish expects the version the product will hold
            // once this transaction lands.
            let embedded = Command::PublishProduct(ProductLifecycle {
                id: cmd.id,
                user_id: cmd.user_id,
                correlation_id: None,
                expected_version: Some(product.version()),
            });
            let command_data = serde_json::to_value(&embedded)
                .map_err(|e| ServiceError::InvalidCommand(e.to_string()))?;

            let schedule_id = AggregateId::new();
            let mut schedule = Schedule::create(
                NewSchedule {
                    id: schedule_id,
                    target_aggregate_id: product_key.clone(),
                    target_aggregate_type: "product".to_string(),
                    command_type: embedded.command_type().to_string(),
                    command_data,
                    scheduled_for: cmd.scheduled_for,
                },
                &meta,
            )?;

            persist(&uow, product.snapshot()?, product.take_uncommitted_events());
            persist(&uow, schedule.snapshot()?, schedule.take_uncommitted_events());

            Ok(
                CommandOutcome::new(product_key, product.version(), meta.correlation_id)
                    .with_schedule(schedule_id),
            )
        })
        .await
}

pub async fn cancel_product_drop(
    manager: &TransactionManager,
    cmd: CancelProductDrop,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &product_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut product = Product::load(&snapshot)?;
            product.cancel_pending_drop(&meta)?;

            let schedule_snapshot = load_snapshot(&uow, &cmd.schedule_id.to_string())?;
            let mut schedule = Schedule::load(&schedule_snapshot)?;
            schedule.cancel(&meta)?;

            persist(&uow, product.snapshot()?, product.take_uncommitted_events());
            persist(&uow, schedule.snapshot()?, schedule.take_uncommitted_events());

            Ok(CommandOutcome::new(
                product_key,
                product.version(),
                meta.correlation_id,
            ))
        })
        .await
}
