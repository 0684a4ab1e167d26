//! Typed read-only queries over the projection views.

use chrono::{DateTime, Utc};
use thiserror::Error;

use merchkit_catalog::LifecycleStatus;
use merchkit_core::AggregateId;
use merchkit_slugs::EntityType;

use crate::projection::collection_list::{CollectionListRow, VIEW as COLLECTION_LIST_VIEW};
use crate::projection::product_list::{ProductListRow, VIEW as PRODUCT_LIST_VIEW};
use crate::projection::product_variants::{ProductVariantRow, VIEW as PRODUCT_VARIANTS_VIEW};
use crate::projection::schedule_view::{ScheduleViewRow, VIEW as SCHEDULE_VIEW};
use crate::projection::slug_redirects::{view_for, SlugRedirectRow};
use crate::projection::variant_details::VIEW as VARIANT_DETAILS_VIEW;
use crate::store::{CoreStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("malformed view row in {view}: {message}")]
    Decode { view: String, message: String },
}

fn decode<T: serde::de::DeserializeOwned>(
    view: &str,
    value: serde_json::Value,
) -> Result<T, QueryError> {
    serde_json::from_value(value).map_err(|e| QueryError::Decode {
        view: view.to_string(),
        message: e.to_string(),
    })
}

pub fn product_list(
    store: &dyn CoreStore,
    status: Option<LifecycleStatus>,
) -> Result<Vec<ProductListRow>, QueryError> {
    let mut rows = Vec::new();
    for (_, value) in store.scan_view(PRODUCT_LIST_VIEW)? {
        let row: ProductListRow = decode(PRODUCT_LIST_VIEW, value)?;
        if status.is_none_or(|s| row.status == s) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Parameters of the product-variants listing query.
#[derive(Debug, Clone)]
pub struct ProductVariantsParams {
    pub product_id: AggregateId,
    pub status: Option<LifecycleStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Variants of one product ordered by position (unpositioned rows last).
pub fn product_variants(
    store: &dyn CoreStore,
    params: ProductVariantsParams,
) -> Result<Vec<ProductVariantRow>, QueryError> {
    let mut rows = Vec::new();
    for (_, value) in store.scan_view(PRODUCT_VARIANTS_VIEW)? {
        let row: ProductVariantRow = decode(PRODUCT_VARIANTS_VIEW, value)?;
        if row.product_id != params.product_id {
            continue;
        }
        if params.status.is_some_and(|s| row.status != s) {
            continue;
        }
        rows.push(row);
    }
    rows.sort_by_key(|row| (row.position.is_none(), row.position, row.variant_id.to_string()));

    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(usize::MAX);
    Ok(rows.into_iter().skip(offset).take(limit).collect())
}

pub fn variant_details(
    store: &dyn CoreStore,
    variant_id: AggregateId,
) -> Result<Option<serde_json::Value>, QueryError> {
    Ok(store.get_view(VARIANT_DETAILS_VIEW, &variant_id.to_string())?)
}

pub fn collection_list(store: &dyn CoreStore) -> Result<Vec<CollectionListRow>, QueryError> {
    store
        .scan_view(COLLECTION_LIST_VIEW)?
        .into_iter()
        .map(|(_, value)| decode(COLLECTION_LIST_VIEW, value))
        .collect()
}

pub fn schedules(store: &dyn CoreStore) -> Result<Vec<ScheduleViewRow>, QueryError> {
    store
        .scan_view(SCHEDULE_VIEW)?
        .into_iter()
        .map(|(_, value)| decode(SCHEDULE_VIEW, value))
        .collect()
}

/// Pending schedules due as of `now`, oldest first.
pub fn due_schedules(
    store: &dyn CoreStore,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<ScheduleViewRow>, QueryError> {
    let mut rows: Vec<ScheduleViewRow> = schedules(store)?
        .into_iter()
        .filter(|row| row.is_due(now))
        .collect();
    rows.sort_by_key(|row| row.scheduled_for);
    rows.truncate(limit);
    Ok(rows)
}

pub fn slug_redirect(
    store: &dyn CoreStore,
    entity_type: EntityType,
    from_slug: &str,
) -> Result<Option<SlugRedirectRow>, QueryError> {
    let view = view_for(entity_type);
    match store.get_view(view, from_slug)? {
        Some(value) => Ok(Some(decode(view, value)?)),
        None => Ok(None),
    }
}
