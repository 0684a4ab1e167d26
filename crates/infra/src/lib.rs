//! Infrastructure layer: storage, transaction batching, unit of work,
//! command services, projections, outbox delivery, and the schedule driver.

pub mod batcher;
pub mod outbox;
pub mod projection;
pub mod queries;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod uow;


pub use batcher::{BatcherConfig, BatcherError, BatcherHandle, TransactionBatcher};
pub use services::bus::CommandBus;
pub use services::commands::{Command, CommandOutcome};
pub use services::ServiceError;
pub use store::memory::InMemoryStore;
pub use store::CoreStore;
pub use uow::{TransactionManager, UnitOfWork};
