//! The single command entry point, dispatching on the command's type tag.

use std::sync::Arc;

use tracing::debug;

use merchkit_scheduling::RetryPolicy;

use super::commands::{Command, CommandOutcome};
use super::{collections, products, schedules, variants, ServiceError};
use crate::uow::TransactionManager;

pub struct CommandBus {
    manager: Arc<TransactionManager>,
    schedule_retry: RetryPolicy,
}

impl CommandBus {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self {
            manager,
            schedule_retry: RetryPolicy::default(),
        }
    }

    pub fn with_schedule_retry(mut self, policy: RetryPolicy) -> Self {
        self.schedule_retry = policy;
        self
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub async fn execute(&self, command: Command) -> Result<CommandOutcome, ServiceError> {
        debug!(command = command.command_type(), "executing command");
        match command {
            Command::CreateProduct(cmd) => products::create_product(&self.manager, cmd).await,
            Command::UpdateProductMetadata(cmd) => {
                products::update_product_metadata(&self.manager, cmd).await
            }
            Command::PublishProduct(cmd) => products::publish_product(&self.manager, cmd).await,
            Command::UnpublishProduct(cmd) => {
                products::unpublish_product(&self.manager, cmd).await
            }
            Command::ArchiveProduct(cmd) => products::archive_product(&self.manager, cmd).await,
            Command::UpdateProductCollections(cmd) => {
                products::update_product_collections(&self.manager, cmd).await
            }
            Command::ReorderProductVariants(cmd) => {
                products::reorder_product_variants(&self.manager, cmd).await
            }
            Command::ScheduleProductDrop(cmd) => {
                products::schedule_product_drop(&self.manager, cmd).await
            }
            Command::CancelProductDrop(cmd) => {
                products::cancel_product_drop(&self.manager, cmd).await
            }
            Command::CreateVariant(cmd) => variants::create_variant(&self.manager, cmd).await,
            Command::UpdateVariantPrice(cmd) => {
                variants::update_variant_price(&self.manager, cmd).await
            }
            Command::UpdateVariantSku(cmd) => {
                variants::update_variant_sku(&self.manager, cmd).await
            }
            Command::UpdateVariantSale(cmd) => {
                variants::update_variant_sale(&self.manager, cmd).await
            }
            Command::ClearVariantSale(cmd) => {
                variants::clear_variant_sale(&self.manager, cmd).await
            }
            Command::AdjustVariantInventory(cmd) => {
                variants::adjust_variant_inventory(&self.manager, cmd).await
            }
            Command::PublishVariant(cmd) => variants::publish_variant(&self.manager, cmd).await,
            Command::UnpublishVariant(cmd) => {
                variants::unpublish_variant(&self.manager, cmd).await
            }
            Command::ArchiveVariant(cmd) => variants::archive_variant(&self.manager, cmd).await,
            Command::CreateCollection(cmd) => {
                collections::create_collection(&self.manager, cmd).await
            }
            Command::UpdateCollectionMetadata(cmd) => {
                collections::update_collection_metadata(&self.manager, cmd).await
            }
            Command::PublishCollection(cmd) => {
                collections::publish_collection(&self.manager, cmd).await
            }
            Command::UnpublishCollection(cmd) => {
                collections::unpublish_collection(&self.manager, cmd).await
            }
            Command::ArchiveCollection(cmd) => {
                collections::archive_collection(&self.manager, cmd).await
            }
            Command::ReorderCollectionProducts(cmd) => {
                collections::reorder_collection_products(&self.manager, cmd).await
            }
            Command::CancelSchedule(cmd) => schedules::cancel_schedule(&self.manager, cmd).await,
            Command::RescheduleSchedule(cmd) => {
                schedules::reschedule_schedule(&self.manager, cmd).await
            }
            Command::BeginScheduleExecution(cmd) => {
                schedules::begin_schedule_execution(&self.manager, cmd).await
            }
            Command::CompleteScheduleExecution(cmd) => {
                schedules::complete_schedule_execution(&self.manager, cmd).await
            }
            Command::FailScheduleExecution(cmd) => {
                schedules::fail_schedule_execution(&self.manager, cmd, self.schedule_retry).await
            }
        }
    }
}
