//! Shared helpers for binaries and observability.

use std::time::Duration;

pub mod bootstrap;
#[cfg(feature = "otel")]
pub mod metrics;
pub mod retry;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
