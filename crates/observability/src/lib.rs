//! Process-wide tracing setup shared by every storefront binary and test harness.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, ObservabilityConfig};

/// Initialize tracing with JSON output and `RUST_LOG` filtering (default `info`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing_setup::init(&ObservabilityConfig::from_env());
}

/// Initialize tracing from an explicit configuration. Also a no-op after the
/// first successful initialization in the process.
pub fn init_with(config: &ObservabilityConfig) {
    tracing_setup::init(config);
}
