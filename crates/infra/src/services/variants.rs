//! Variant command services.

use std::collections::BTreeMap;

use chrono::Utc;

use merchkit_catalog::{NewVariant, Positions, Product, Sale, Variant};
use merchkit_core::{AggregateRoot, CorrelationId, DomainError, UserId};
use merchkit_events::EventMeta;
use merchkit_slugs::Sku;

use super::commands::{
    AdjustVariantInventory, ClearVariantSale, CommandOutcome, CreateVariant, UpdateVariantPrice,
    UpdateVariantSale, UpdateVariantSku, VariantLifecycle,
};
use super::{check_version, load_snapshot, persist, ServiceError};
use crate::uow::{TransactionManager, UnitOfWork};

fn meta_for(user_id: UserId, correlation_id: Option<CorrelationId>) -> EventMeta {
    EventMeta::new(user_id, correlation_id.unwrap_or_default(), Utc::now())
}

/// A variant must pick exactly one whitelisted value for every option the
/// product declares, and nothing else.
fn validate_variant_options(
    product: &Product,
    options: &BTreeMap<String, String>,
) -> Result<(), DomainError> {
    for declared in product.options() {
        let Some(value) = options.get(&declared.name) else {
            return Err(DomainError::validation(format!(
                "missing required option {}",
                declared.name
            )));
        };
        if !declared.values.contains(value) {
            return Err(DomainError::validation(format!(
                "value \"{value}\" is not allowed for option {}",
                declared.name
            )));
        }
    }
    for name in options.keys() {
        if product.declared_option(name).is_none() {
            return Err(DomainError::validation(format!(
                "option {name} is not declared on the product"
            )));
        }
    }
    Ok(())
}

/// Claim `sku_value` for `variant_id`, creating the SKU aggregate on first
/// sight. Idempotent when the variant already holds it.
fn activate_sku(
    uow: &UnitOfWork,
    sku_value: &str,
    variant_id: &str,
    meta: &EventMeta,
) -> Result<Sku, ServiceError> {
    let storage_id = merchkit_slugs::sku::storage_id(sku_value);
    let mut sku = match uow.snapshots().load(&storage_id)? {
        Some(snapshot) => Sku::load(&snapshot)?,
        None => Sku::create(sku_value, meta)?,
    };
    if !sku.is_active_for(variant_id) {
        sku.activate(variant_id, meta)?;
    }
    Ok(sku)
}

/// Release `sku_value` when the given variant holds it.
fn release_sku(
    uow: &UnitOfWork,
    sku_value: &str,
    variant_id: &str,
    meta: &EventMeta,
) -> Result<Option<Sku>, ServiceError> {
    let storage_id = merchkit_slugs::sku::storage_id(sku_value);
    let Some(snapshot) = uow.snapshots().load(&storage_id)? else {
        return Ok(None);
    };
    let mut sku = Sku::load(&snapshot)?;
    if !sku.is_active_for(variant_id) {
        return Ok(None);
    }
    sku.release(meta)?;
    Ok(Some(sku))
}

pub async fn create_variant(
    manager: &TransactionManager,
    cmd: CreateVariant,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let product_snapshot = load_snapshot(&uow, &cmd.product_id.to_string())?;
            check_version(&product_snapshot, cmd.expected_version)?;
            let product = Product::load(&product_snapshot)?;
            validate_variant_options(&product, &cmd.options)?;

            let variant_key = cmd.id.to_string();
            if uow.snapshots().load(&variant_key)?.is_some() {
                return Err(ServiceError::InvalidCommand(format!(
                    "variant {variant_key} already exists"
                )));
            }

            let mut variant = Variant::create(
                NewVariant {
                    id: cmd.id,
                    product_id: cmd.product_id,
                    sku: cmd.sku.clone(),
                    price_cents: cmd.price_cents,
                    options: cmd.options,
                    inventory_quantity: cmd.inventory_quantity,
                    fulfillment: product.kind(),
                },
                &meta,
            )?;

            // The variant's creation event must precede the positions event
            // so the variant view row exists when the ordering is indexed.
            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());

            if !cmd.sku.trim().is_empty() {
                let mut sku = activate_sku(&uow, &cmd.sku, &variant_key, &meta)?;
                persist(&uow, sku.snapshot()?, sku.take_uncommitted_events());
            }

            let positions_snapshot = load_snapshot(&uow, &product.positions_id().to_string())?;
            let mut positions = Positions::load(&positions_snapshot)?;
            positions.add(variant_key.clone(), &meta)?;
            persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());

            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn update_variant_price(
    manager: &TransactionManager,
    cmd: UpdateVariantPrice,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;
            variant.update_price(cmd.price_cents, &meta)?;
            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn update_variant_sku(
    manager: &TransactionManager,
    cmd: UpdateVariantSku,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;

            let prior_sku = variant.sku().to_string();
            variant.update_sku(cmd.sku.clone(), &meta)?;

            if prior_sku != cmd.sku {
                let mut new_sku = activate_sku(&uow, &cmd.sku, &variant_key, &meta)?;
                if !prior_sku.trim().is_empty() {
                    if let Some(mut old_sku) = release_sku(&uow, &prior_sku, &variant_key, &meta)? {
                        persist(&uow, old_sku.snapshot()?, old_sku.take_uncommitted_events());
                    }
                }
                persist(&uow, new_sku.snapshot()?, new_sku.take_uncommitted_events());
            }

            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn update_variant_sale(
    manager: &TransactionManager,
    cmd: UpdateVariantSale,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;
            variant.set_sale(
                Sale {
                    sale_price_cents: cmd.sale_price_cents,
                    starts_at: cmd.starts_at,
                    ends_at: cmd.ends_at,
                },
                &meta,
            )?;
            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn clear_variant_sale(
    manager: &TransactionManager,
    cmd: ClearVariantSale,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;
            variant.clear_sale(&meta)?;
            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn adjust_variant_inventory(
    manager: &TransactionManager,
    cmd: AdjustVariantInventory,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;
            variant.adjust_inventory(cmd.delta, &meta)?;
            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn publish_variant(
    manager: &TransactionManager,
    cmd: VariantLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;
            variant.publish(&meta)?;
            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn unpublish_variant(
    manager: &TransactionManager,
    cmd: VariantLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;
            variant.unpublish(&meta)?;
            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}

/// Archive a variant, releasing its SKU and dropping it from the product's
/// ordering.
pub async fn archive_variant(
    manager: &TransactionManager,
    cmd: VariantLifecycle,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let variant_key = cmd.id.to_string();
            let snapshot = load_snapshot(&uow, &variant_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut variant = Variant::load(&snapshot)?;
            variant.archive(&meta)?;

            if !variant.sku().trim().is_empty() {
                if let Some(mut sku) = release_sku(&uow, &variant.sku().to_string(), &variant_key, &meta)? {
                    persist(&uow, sku.snapshot()?, sku.take_uncommitted_events());
                }
            }

            let product_snapshot = load_snapshot(&uow, &variant.product_id().to_string())?;
            let product = Product::load(&product_snapshot)?;
            let positions_snapshot = load_snapshot(&uow, &product.positions_id().to_string())?;
            let mut positions = Positions::load(&positions_snapshot)?;
            if positions.contains(&variant_key) {
                positions.remove(&variant_key, &meta)?;
                persist(&uow, positions.snapshot()?, positions.take_uncommitted_events());
            }

            persist(&uow, variant.snapshot()?, variant.take_uncommitted_events());
            Ok(CommandOutcome::new(
                variant_key,
                variant.version(),
                meta.correlation_id,
            ))
        })
        .await
}
