//! Scheduler driver: drains due schedules by dispatching their embedded
//! commands through the normal service path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::projection::schedule_view::ScheduleViewRow;
use crate::queries::{due_schedules, QueryError};
use crate::services::bus::CommandBus;
use crate::services::commands::{
    BeginScheduleExecution, Command, CompleteScheduleExecution, FailScheduleExecution,
};
use crate::services::ServiceError;
use crate::store::CoreStore;

#[derive(Debug, Clone)]
pub struct ScheduleDriverConfig {
    pub poll_interval: Duration,
    /// Maximum due schedules dispatched per tick.
    pub batch_size: usize,
}

impl Default for ScheduleDriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 16,
        }
    }
}

pub struct ScheduleDriver {
    store: Arc<dyn CoreStore>,
    bus: Arc<CommandBus>,
    config: ScheduleDriverConfig,
}

impl ScheduleDriver {
    pub fn new(store: Arc<dyn CoreStore>, bus: Arc<CommandBus>, config: ScheduleDriverConfig) -> Self {
        Self { store, bus, config }
    }

    /// Scan for due schedules and run each to completion or failure.
    /// Returns the number of schedules dispatched this tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, QueryError> {
        let due = due_schedules(self.store.as_ref(), now, self.config.batch_size)?;
        let count = due.len();
        for row in due {
            self.run_schedule(row).await;
        }
        Ok(count)
    }

    async fn run_schedule(&self, row: ScheduleViewRow) {
        let schedule_id = row.id;
        debug!(
            schedule = %schedule_id,
            command = %row.command_type,
            "executing due schedule"
        );

        let begin = Command::BeginScheduleExecution(BeginScheduleExecution {
            schedule_id,
            user_id: row.created_by,
            correlation_id: None,
        });
        if let Err(e) = self.bus.execute(begin).await {
            // Lost a race against a cancel or a concurrent driver pass.
            debug!(schedule = %schedule_id, error = %e, "schedule no longer executable, skipping");
            return;
        }

        let outcome = match serde_json::from_value::<Command>(row.command_data.clone()) {
            Err(e) => Err((format!("embedded command is malformed: {e}"), true)),
            Ok(command) => match self.bus.execute(command).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    // Domain rejections are deterministic; retrying cannot
                    // change them. Infrastructure failures may pass later.
                    let permanent = matches!(
                        e,
                        ServiceError::Domain(_) | ServiceError::InvalidCommand(_)
                    );
                    Err((e.to_string(), permanent))
                }
            },
        };

        let follow_up = match outcome {
            Ok(()) => Command::CompleteScheduleExecution(CompleteScheduleExecution {
                schedule_id,
                user_id: row.created_by,
                correlation_id: None,
            }),
            Err((error, permanent)) => {
                warn!(schedule = %schedule_id, error = %error, permanent, "scheduled command failed");
                Command::FailScheduleExecution(FailScheduleExecution {
                    schedule_id,
                    user_id: row.created_by,
                    correlation_id: None,
                    error,
                    permanent,
                })
            }
        };
        if let Err(e) = self.bus.execute(follow_up).await {
            error!(schedule = %schedule_id, error = %e, "failed to record schedule outcome");
        }
    }

    /// Spawn the driver loop as a background task.
    pub fn spawn(self) -> ScheduleDriverHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let poll_interval = self.config.poll_interval;

        let join = tokio::spawn(async move {
            info!("schedule driver started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(poll_interval) => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            error!(error = %e, "schedule driver tick failed");
                        }
                    }
                }
            }
            info!("schedule driver stopped");
        });

        ScheduleDriverHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to stop a running driver.
pub struct ScheduleDriverHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ScheduleDriverHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}
