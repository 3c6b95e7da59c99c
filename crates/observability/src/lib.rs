//! Process-wide tracing/logging setup.

/// Initialize tracing from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration and installation.
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat};
