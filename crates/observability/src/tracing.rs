//! Logging setup for binaries and test harnesses.

use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber: JSON lines on stdout, filtered by the
/// usual `RUST_LOG` syntax, defaulting to `info` when no filter is set.
///
/// Later calls are no-ops (the first installed subscriber wins), so test
/// harnesses can call this per test without coordination.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_timer(SystemTime)
        .with_target(false)
        .with_env_filter(filter)
        .try_init();
}
