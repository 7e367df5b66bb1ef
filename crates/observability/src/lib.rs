//! Tracing setup and the operator-facing activity log.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Injected activity sink for operator-visible job events.
pub mod activity;

pub use activity::{ActivityLog, LogBuffer, LogEntry, LogLevel, NoopActivityLog};
