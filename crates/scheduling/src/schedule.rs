use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use merchkit_core::{AggregateId, AggregateRoot, CorrelationId, DomainError, UserId};
use merchkit_events::{DomainEvent, EventMeta, EventPayload, Snapshot};

use crate::policy::RetryPolicy;

/// Snapshot envelope kind tag.
pub const KIND: &str = "schedule";

pub mod event_names {
    pub const CREATED: &str = "schedule.created";
    pub const EXECUTION_STARTED: &str = "schedule.execution_started";
    pub const EXECUTED: &str = "schedule.executed";
    pub const RETRY_SCHEDULED: &str = "schedule.retry_scheduled";
    pub const FAILED: &str = "schedule.failed";
    pub const CANCELLED: &str = "schedule.cancelled";
    pub const RESCHEDULED: &str = "schedule.rescheduled";
    pub const COMMAND_DATA_UPDATED: &str = "schedule.command_data_updated";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Executing,
    Executed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Executing => "executing",
            ScheduleStatus::Executed => "executed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

/// Serialized state of a schedule aggregate.
///
/// `command_data` holds the complete serialized future command, tagged the
/// same way boundary commands are, so the driver can dispatch it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub id: AggregateId,
    pub target_aggregate_id: String,
    pub target_aggregate_type: String,
    pub command_type: String,
    pub command_data: JsonValue,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub id: AggregateId,
    pub target_aggregate_id: String,
    pub target_aggregate_type: String,
    pub command_type: String,
    pub command_data: JsonValue,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    state: ScheduleState,
    version: u64,
    correlation_id: CorrelationId,
    uncommitted: Vec<DomainEvent>,
}

impl AggregateRoot for Schedule {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.state.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Schedule {
    pub fn create(params: NewSchedule, meta: &EventMeta) -> Result<Self, DomainError> {
        if params.command_type.trim().is_empty() {
            return Err(DomainError::validation("command type cannot be empty"));
        }
        if params.scheduled_for <= meta.occurred_at {
            return Err(DomainError::validation(
                "scheduled time must be in the future",
            ));
        }

        let state = ScheduleState {
            id: params.id,
            target_aggregate_id: params.target_aggregate_id,
            target_aggregate_type: params.target_aggregate_type,
            command_type: params.command_type,
            command_data: params.command_data,
            scheduled_for: params.scheduled_for,
            status: ScheduleStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            error_message: None,
            created_by: meta.user_id,
            created_at: meta.occurred_at,
            updated_at: meta.occurred_at,
        };
        let mut schedule = Self {
            state,
            version: 0,
            correlation_id: meta.correlation_id,
            uncommitted: Vec::new(),
        };
        let new_state = schedule.state_value()?;
        schedule.uncommitted.push(DomainEvent::record(
            event_names::CREATED,
            schedule.state.id.to_string(),
            0,
            meta,
            EventPayload::creation(new_state),
        ));
        Ok(schedule)
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

    pub fn status(&self) -> ScheduleStatus {
        self.state.status
    }

    pub fn command_type(&self) -> &str {
        &self.state.command_type
    }

    pub fn command_data(&self) -> &JsonValue {
        &self.state.command_data
    }

    pub fn target_aggregate_id(&self) -> &str {
        &self.state.target_aggregate_id
    }

    pub fn scheduled_for(&self) -> DateTime<Utc> {
        self.state.scheduled_for
    }

    pub fn retry_count(&self) -> u32 {
        self.state.retry_count
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.state.next_retry_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.state.error_message.as_deref()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.status == ScheduleStatus::Pending
            && self.state.scheduled_for <= now
            && self.state.next_retry_at.is_none_or(|at| at <= now)
    }

    pub fn begin_execution(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.status != ScheduleStatus::Pending {
            return Err(DomainError::invariant(format!(
                "cannot execute a {} schedule",
                self.state.status.as_str()
            )));
        }
        if !self.is_due(meta.occurred_at) {
            return Err(DomainError::invariant("schedule is not yet due"));
        }
        let prior = self.state_value()?;
        self.state.status = ScheduleStatus::Executing;
        self.record_mutation(event_names::EXECUTION_STARTED, prior, meta)
    }

    pub fn complete(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.status != ScheduleStatus::Executing {
            return Err(DomainError::invariant(
                "only an executing schedule can complete",
            ));
        }
        let prior = self.state_value()?;
        self.state.status = ScheduleStatus::Executed;
        self.state.error_message = None;
        self.record_mutation(event_names::EXECUTED, prior, meta)
    }

    /// Record a failed execution attempt.
    ///
    /// Transient failures re-queue the schedule with exponential backoff
    /// until the policy's retry cap; permanent failures park it immediately.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        permanent: bool,
        policy: &RetryPolicy,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status != ScheduleStatus::Executing {
            return Err(DomainError::invariant(
                "only an executing schedule can record a failure",
            ));
        }
        let prior = self.state_value()?;
        let error = error.into();
        if permanent || !policy.retries_remain(self.state.retry_count) {
            self.state.status = ScheduleStatus::Failed;
            self.state.error_message = Some(error);
            self.state.next_retry_at = None;
            self.record_mutation(event_names::FAILED, prior, meta)
        } else {
            self.state.retry_count += 1;
            self.state.status = ScheduleStatus::Pending;
            self.state.error_message = Some(error);
            self.state.next_retry_at =
                Some(meta.occurred_at + policy.delay_for(self.state.retry_count));
            self.record_mutation(event_names::RETRY_SCHEDULED, prior, meta)
        }
    }

    pub fn cancel(&mut self, meta: &EventMeta) -> Result<(), DomainError> {
        if self.state.status != ScheduleStatus::Pending {
            return Err(DomainError::invariant(format!(
                "cannot cancel a {} schedule",
                self.state.status.as_str()
            )));
        }
        let prior = self.state_value()?;
        self.state.status = ScheduleStatus::Cancelled;
        self.record_mutation(event_names::CANCELLED, prior, meta)
    }

    pub fn reschedule(
        &mut self,
        scheduled_for: DateTime<Utc>,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status != ScheduleStatus::Pending {
            return Err(DomainError::invariant(
                "only a pending schedule can be rescheduled",
            ));
        }
        if scheduled_for <= meta.occurred_at {
            return Err(DomainError::validation(
                "scheduled time must be in the future",
            ));
        }
        let prior = self.state_value()?;
        self.state.scheduled_for = scheduled_for;
        self.state.retry_count = 0;
        self.state.next_retry_at = None;
        self.state.error_message = None;
        self.record_mutation(event_names::RESCHEDULED, prior, meta)
    }

    pub fn update_command_data(
        &mut self,
        command_data: JsonValue,
        meta: &EventMeta,
    ) -> Result<(), DomainError> {
        if self.state.status != ScheduleStatus::Pending {
            return Err(DomainError::invariant(
                "only a pending schedule can change its command",
            ));
        }
        let prior = self.state_value()?;
        self.state.command_data = command_data;
        self.record_mutation(event_names::COMMAND_DATA_UPDATED, prior, meta)
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
    use chrono::Duration;

    fn meta_at(occurred_at: DateTime<Utc>) -> EventMeta {
        EventMeta::new(UserId::new(), CorrelationId::new(), occurred_at)
    }

    fn pending(now: DateTime<Utc>) -> Schedule {
        Schedule::create(
            NewSchedule {
                id: AggregateId::new(),
                target_aggregate_id: AggregateId::new().to_string(),
                target_aggregate_type: "product".to_string(),
                command_type: "publishProduct".to_string(),
                command_data: serde_json::json!({"type": "publishProduct"}),
                scheduled_for: now + Duration::days(1),
            },
            &meta_at(now),
        )
        .unwrap()
    }

    #[test]
    fn create_rejects_past_times() {
        let now = Utc::now();
        let err = Schedule::create(
            NewSchedule {
                id: AggregateId::new(),
                target_aggregate_id: "p1".to_string(),
                target_aggregate_type: "product".to_string(),
                command_type: "publishProduct".to_string(),
                command_data: serde_json::json!({}),
                scheduled_for: now - Duration::minutes(1),
            },
            &meta_at(now),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn executes_only_once_due() {
        let now = Utc::now();
        let mut schedule = pending(now);
        assert!(!schedule.is_due(now));

        let err = schedule.begin_execution(&meta_at(now)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let due = now + Duration::days(1);
        assert!(schedule.is_due(due));
        schedule.begin_execution(&meta_at(due)).unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Executing);

        schedule.complete(&meta_at(due)).unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Executed);
    }

    #[test]
    fn transient_failure_requeues_with_backoff() {
        let now = Utc::now();
        let policy = RetryPolicy::new(3, 2);
        let mut schedule = pending(now);
        let due = now + Duration::days(1);
        schedule.begin_execution(&meta_at(due)).unwrap();

        schedule
            .record_failure("storage timeout", false, &policy, &meta_at(due))
            .unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        assert_eq!(schedule.retry_count(), 1);
        assert_eq!(schedule.next_retry_at(), Some(due + Duration::seconds(2)));
        assert_eq!(schedule.error_message(), Some("storage timeout"));

        assert!(!schedule.is_due(due));
        assert!(schedule.is_due(due + Duration::seconds(2)));
    }

    #[test]
    fn retries_exhaust_into_failed() {
        let now = Utc::now();
        let policy = RetryPolicy::new(2, 2);
        let mut schedule = pending(now);
        let mut at = now + Duration::days(1);

        for _ in 0..2 {
            schedule.begin_execution(&meta_at(at)).unwrap();
            schedule
                .record_failure("boom", false, &policy, &meta_at(at))
                .unwrap();
            assert_eq!(schedule.status(), ScheduleStatus::Pending);
            at = schedule.next_retry_at().unwrap();
        }

        schedule.begin_execution(&meta_at(at)).unwrap();
        schedule
            .record_failure("boom", false, &policy, &meta_at(at))
            .unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Failed);
        assert_eq!(schedule.retry_count(), 2);
        assert_eq!(schedule.next_retry_at(), None);
    }

    #[test]
    fn permanent_failure_fails_immediately() {
        let now = Utc::now();
        let policy = RetryPolicy::default();
        let mut schedule = pending(now);
        let due = now + Duration::days(1);
        schedule.begin_execution(&meta_at(due)).unwrap();
        schedule
            .record_failure("archived target", true, &policy, &meta_at(due))
            .unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Failed);
        assert_eq!(schedule.retry_count(), 0);
    }

    #[test]
    fn cancel_and_reschedule_require_pending() {
        let now = Utc::now();
        let mut schedule = pending(now);
        schedule
            .reschedule(now + Duration::days(2), &meta_at(now))
            .unwrap();
        assert_eq!(schedule.scheduled_for(), now + Duration::days(2));

        schedule.cancel(&meta_at(now)).unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Cancelled);

        assert!(schedule.cancel(&meta_at(now)).is_err());
        assert!(schedule
            .reschedule(now + Duration::days(3), &meta_at(now))
            .is_err());
        assert!(schedule
            .update_command_data(serde_json::json!({}), &meta_at(now))
            .is_err());
    }

    #[test]
    fn command_data_updates_while_pending() {
        let now = Utc::now();
        let mut schedule = pending(now);
        let new_data = serde_json::json!({"type": "publishProduct", "expected_version": 4});
        schedule
            .update_command_data(new_data.clone(), &meta_at(now))
            .unwrap();
        assert_eq!(schedule.command_data(), &new_data);
        assert_eq!(schedule.version(), 1);
    }

    #[test]
    fn snapshot_load_round_trips() {
        let now = Utc::now();
        let schedule = pending(now);
        let snapshot = schedule.snapshot().unwrap();
        let loaded = Schedule::load(&snapshot).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), snapshot);
        assert_eq!(loaded.status(), ScheduleStatus::Pending);
    }
}
