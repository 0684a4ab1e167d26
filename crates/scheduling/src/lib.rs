//! Schedule aggregate: persisted future commands with retry bookkeeping.

pub mod policy;
pub mod schedule;

pub use policy::RetryPolicy;
pub use schedule::{NewSchedule, Schedule, ScheduleState, ScheduleStatus};
