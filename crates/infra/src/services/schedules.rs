//! Schedule command services, including the driver-issued transitions.

use chrono::Utc;

use merchkit_core::{AggregateRoot, CorrelationId, UserId};
use merchkit_events::EventMeta;
use merchkit_scheduling::{RetryPolicy, Schedule};

use super::commands::{
    BeginScheduleExecution, CancelSchedule, CommandOutcome, CompleteScheduleExecution,
    FailScheduleExecution, RescheduleSchedule,
};
use super::{check_version, load_snapshot, persist, ServiceError};
use crate::uow::TransactionManager;

fn meta_for(user_id: UserId, correlation_id: Option<CorrelationId>) -> EventMeta {
    EventMeta::new(user_id, correlation_id.unwrap_or_default(), Utc::now())
}

pub async fn cancel_schedule(
    manager: &TransactionManager,
    cmd: CancelSchedule,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let schedule_key = cmd.schedule_id.to_string();
            let snapshot = load_snapshot(&uow, &schedule_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut schedule = Schedule::load(&snapshot)?;
            schedule.cancel(&meta)?;
            persist(&uow, schedule.snapshot()?, schedule.take_uncommitted_events());
            Ok(CommandOutcome::new(
                schedule_key,
                schedule.version(),
                meta.correlation_id,
            ))
        })
        .await
}

/// Move `scheduled_for` and/or replace the embedded command while pending.
pub async fn reschedule_schedule(
    manager: &TransactionManager,
    cmd: RescheduleSchedule,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            if cmd.scheduled_for.is_none() && cmd.command_data.is_none() {
                return Err(ServiceError::InvalidCommand(
                    "reschedule requires a new time or new command data".to_string(),
                ));
            }
            let schedule_key = cmd.schedule_id.to_string();
            let snapshot = load_snapshot(&uow, &schedule_key)?;
            check_version(&snapshot, cmd.expected_version)?;
            let mut schedule = Schedule::load(&snapshot)?;
            if let Some(scheduled_for) = cmd.scheduled_for {
                schedule.reschedule(scheduled_for, &meta)?;
            }
            if let Some(command_data) = cmd.command_data {
                schedule.update_command_data(command_data, &meta)?;
            }
            persist(&uow, schedule.snapshot()?, schedule.take_uncommitted_events());
            Ok(CommandOutcome::new(
                schedule_key,
                schedule.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn begin_schedule_execution(
    manager: &TransactionManager,
    cmd: BeginScheduleExecution,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let schedule_key = cmd.schedule_id.to_string();
            let snapshot = load_snapshot(&uow, &schedule_key)?;
            let mut schedule = Schedule::load(&snapshot)?;
            schedule.begin_execution(&meta)?;
            persist(&uow, schedule.snapshot()?, schedule.take_uncommitted_events());
            Ok(CommandOutcome::new(
                schedule_key,
                schedule.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn complete_schedule_execution(
    manager: &TransactionManager,
    cmd: CompleteScheduleExecution,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let schedule_key = cmd.schedule_id.to_string();
            let snapshot = load_snapshot(&uow, &schedule_key)?;
            let mut schedule = Schedule::load(&snapshot)?;
            schedule.complete(&meta)?;
            persist(&uow, schedule.snapshot()?, schedule.take_uncommitted_events());
            Ok(CommandOutcome::new(
                schedule_key,
                schedule.version(),
                meta.correlation_id,
            ))
        })
        .await
}

pub async fn fail_schedule_execution(
    manager: &TransactionManager,
    cmd: FailScheduleExecution,
    policy: RetryPolicy,
) -> Result<CommandOutcome, ServiceError> {
    let meta = meta_for(cmd.user_id, cmd.correlation_id);
    manager
        .with_transaction(|uow| async move {
            let schedule_key = cmd.schedule_id.to_string();
            let snapshot = load_snapshot(&uow, &schedule_key)?;
            let mut schedule = Schedule::load(&snapshot)?;
            schedule.record_failure(cmd.error, cmd.permanent, &policy, &meta)?;
            persist(&uow, schedule.snapshot()?, schedule.take_uncommitted_events());
            Ok(CommandOutcome::new(
                schedule_key,
                schedule.version(),
                meta.correlation_id,
            ))
        })
        .await
}
