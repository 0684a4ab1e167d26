use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateId, UserId};
use merchkit_events::DomainEvent;
use merchkit_scheduling::{ScheduleState, ScheduleStatus};

use super::{decode_new_state, Projection, ProjectionError};
use crate::uow::ViewWriter;

pub const VIEW: &str = "schedule_view";

/// One row per schedule, keyed by schedule id. The scheduler driver scans
/// this view for due work, so the row carries everything the driver needs
/// to dispatch without loading the aggregate first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleViewRow {
    pub id: AggregateId,
    pub target_aggregate_id: String,
    pub target_aggregate_type: String,
    pub command_type: String,
    pub command_data: JsonValue,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleViewRow {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending
            && self.scheduled_for <= now
            && self.next_retry_at.is_none_or(|at| at <= now)
    }
}

pub struct ScheduleViewProjection;

#[async_trait]
impl Projection for ScheduleViewProjection {
    fn name(&self) -> &'static str {
        "schedule_view"
    }

    fn handles(&self, event_name: &str) -> bool {
        event_name.starts_with("schedule.")
    }

    async fn apply(
        &self,
        views: &ViewWriter<'_>,
        event: &DomainEvent,
    ) -> Result<(), ProjectionError> {
        let state: ScheduleState = decode_new_state(event)?;
        let row = ScheduleViewRow {
            id: state.id,
            target_aggregate_id: state.target_aggregate_id,
            target_aggregate_type: state.target_aggregate_type,
            command_type: state.command_type,
            command_data: state.command_data,
            scheduled_for: state.scheduled_for,
            status: state.status,
            retry_count: state.retry_count,
            next_retry_at: state.next_retry_at,
            error_message: state.error_message,
            created_by: state.created_by,
            updated_at: state.updated_at,
        };
        let value = serde_json::to_value(&row)
            .map_err(|e| ProjectionError::Decode(e.to_string()))?;
        views.put(VIEW, &event.aggregate_id, value);
        Ok(())
    }
}
