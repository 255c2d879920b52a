//! Tracing setup for embedding applications and tests
//!
//! The runtime only emits `tracing` events; installing a subscriber is the
//! host's call. `init_tracing` is the default fmt + `EnvFilter` setup.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_level`
///
/// Returns false when a global subscriber was already installed (safe to call
/// from every test).
pub fn init_tracing(default_level: Level) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Test-friendly variant: output captured per test, warnings only by default
pub fn init_test_tracing() -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
