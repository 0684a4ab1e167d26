//! Process-wide observability setup.

pub mod tracing;

pub use tracing::init;
