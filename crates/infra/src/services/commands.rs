//! The command surface: tagged records accepted through one entry point.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_catalog::{ImageRef, ProductKind, ProductOption};
use merchkit_core::{AggregateId, CorrelationId, UserId};

/// Which pending-drop state a scheduled drop parks the target in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropKind {
    /// Listed while awaiting the drop.
    Visible,
    /// Hidden until the drop fires.
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProduct {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    pub kind: ProductKind,
    #[serde(default)]
    pub options: Vec<ProductOption>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductMetadata {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    #[serde(default)]
    pub options: Vec<ProductOption>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLifecycle {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductCollections {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub collection_ids: Vec<AggregateId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderProductVariants {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub variant_ids: Vec<AggregateId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleProductDrop {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub drop_kind: DropKind,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelProductDrop {
    pub id: AggregateId,
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVariant {
    pub id: AggregateId,
    pub product_id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    /// Checked against the product snapshot when present.
    #[serde(default)]
    pub expected_version: Option<u64>,
    #[serde(default)]
    pub sku: String,
    pub price_cents: i64,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub inventory_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVariantPrice {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVariantSku {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub sku: String,
}

/// Sale updates accept an absent `expectedVersion`: scheduled sale flips
/// must run regardless of interim edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVariantSale {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub sale_price_cents: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearVariantSale {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustVariantInventory {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantLifecycle {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollection {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollectionMetadata {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub slug: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionLifecycle {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderCollectionProducts {
    pub id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    pub product_ids: Vec<AggregateId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSchedule {
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleSchedule {
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub expected_version: Option<u64>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub command_data: Option<JsonValue>,
}

/// Driver-issued transition commands. These intentionally carry no
/// `expectedVersion`: the driver is the only writer of executing schedules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginScheduleExecution {
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteScheduleExecution {
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailScheduleExecution {
    pub schedule_id: AggregateId,
    pub user_id: UserId,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub error: String,
    #[serde(default)]
    pub permanent: bool,
}

/// Every write command, dispatched on `type` at the system boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    CreateProduct(CreateProduct),
    UpdateProductMetadata(UpdateProductMetadata),
    PublishProduct(ProductLifecycle),
    UnpublishProduct(ProductLifecycle),
    ArchiveProduct(ProductLifecycle),
    UpdateProductCollections(UpdateProductCollections),
    ReorderProductVariants(ReorderProductVariants),
    ScheduleProductDrop(ScheduleProductDrop),
    CancelProductDrop(CancelProductDrop),
    CreateVariant(CreateVariant),
    UpdateVariantPrice(UpdateVariantPrice),
    UpdateVariantSku(UpdateVariantSku),
    UpdateVariantSale(UpdateVariantSale),
    ClearVariantSale(ClearVariantSale),
    AdjustVariantInventory(AdjustVariantInventory),
    PublishVariant(VariantLifecycle),
    UnpublishVariant(VariantLifecycle),
    ArchiveVariant(VariantLifecycle),
    CreateCollection(CreateCollection),
    UpdateCollectionMetadata(UpdateCollectionMetadata),
    PublishCollection(CollectionLifecycle),
    UnpublishCollection(CollectionLifecycle),
    ArchiveCollection(CollectionLifecycle),
    ReorderCollectionProducts(ReorderCollectionProducts),
    CancelSchedule(CancelSchedule),
    RescheduleSchedule(RescheduleSchedule),
    BeginScheduleExecution(BeginScheduleExecution),
    CompleteScheduleExecution(CompleteScheduleExecution),
    FailScheduleExecution(FailScheduleExecution),
}

impl Command {
    /// The wire tag, as carried in a schedule's `command_type`.
    pub fn command_type(&self) -> &'static str {
        match self {
            Command::CreateProduct(_) => "createProduct",
            Command::UpdateProductMetadata(_) => "updateProductMetadata",
            Command::PublishProduct(_) => "publishProduct",
            Command::UnpublishProduct(_) => "unpublishProduct",
            Command::ArchiveProduct(_) => "archiveProduct",
            Command::UpdateProductCollections(_) => "updateProductCollections",
            Command::ReorderProductVariants(_) => "reorderProductVariants",
            Command::ScheduleProductDrop(_) => "scheduleProductDrop",
            Command::CancelProductDrop(_) => "cancelProductDrop",
            Command::CreateVariant(_) => "createVariant",
            Command::UpdateVariantPrice(_) => "updateVariantPrice",
            Command::UpdateVariantSku(_) => "updateVariantSku",
            Command::UpdateVariantSale(_) => "updateVariantSale",
            Command::ClearVariantSale(_) => "clearVariantSale",
            Command::AdjustVariantInventory(_) => "adjustVariantInventory",
            Command::PublishVariant(_) => "publishVariant",
            Command::UnpublishVariant(_) => "unpublishVariant",
            Command::ArchiveVariant(_) => "archiveVariant",
            Command::CreateCollection(_) => "createCollection",
            Command::UpdateCollectionMetadata(_) => "updateCollectionMetadata",
            Command::PublishCollection(_) => "publishCollection",
            Command::UnpublishCollection(_) => "unpublishCollection",
            Command::ArchiveCollection(_) => "archiveCollection",
            Command::ReorderCollectionProducts(_) => "reorderCollectionProducts",
            Command::CancelSchedule(_) => "cancelSchedule",
            Command::RescheduleSchedule(_) => "rescheduleSchedule",
            Command::BeginScheduleExecution(_) => "beginScheduleExecution",
            Command::CompleteScheduleExecution(_) => "completeScheduleExecution",
            Command::FailScheduleExecution(_) => "failScheduleExecution",
        }
    }
}

/// Result of a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// Primary aggregate the command targeted.
    pub aggregate_id: String,
    /// Its version after the command.
    pub version: u64,
    pub correlation_id: CorrelationId,
    /// Set when the command created a schedule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<AggregateId>,
}

impl CommandOutcome {
    pub fn new(aggregate_id: impl Into<String>, version: u64, correlation_id: CorrelationId) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            version,
            correlation_id,
            schedule_id: None,
        }
    }

    pub fn with_schedule(mut self, schedule_id: AggregateId) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_dispatch_on_a_type_tag() {
        let json = serde_json::json!({
            "type": "archiveCollection",
            "id": AggregateId::new(),
            "userId": UserId::new(),
            "expectedVersion": 0,
        });
        let command: Command = serde_json::from_value(json).unwrap();
        assert!(matches!(command, Command::ArchiveCollection(_)));
        assert_eq!(command.command_type(), "archiveCollection");
    }

    #[test]
    fn expected_version_defaults_to_skip() {
        let json = serde_json::json!({
            "type": "updateVariantSale",
            "id": AggregateId::new(),
            "userId": UserId::new(),
            "salePriceCents": 1500,
            "startsAt": Utc::now(),
            "endsAt": Utc::now(),
        });
        let command: Command = serde_json::from_value(json).unwrap();
        let Command::UpdateVariantSale(cmd) = command else {
            panic!("wrong variant");
        };
        assert_eq!(cmd.expected_version, None);
    }

    #[test]
    fn command_round_trips_preserve_the_tag() {
        let command = Command::PublishProduct(ProductLifecycle {
            id: AggregateId::new(),
            user_id: UserId::new(),
            correlation_id: None,
            expected_version: Some(1),
        });
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value.get("type").unwrap(), "publishProduct");
        let back: Command = serde_json::from_value(value).unwrap();
        assert_eq!(back, command);
    }
}
