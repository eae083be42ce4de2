//! Retry utilities: backoff builders for startup connections.
//!
//! Uses `backon` for exponential backoff with jitter. The bus core never
//! retries on its own; binaries wrap connection setup with these.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::bus::BusError;

/// Backoff for broker, cache and database connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Whether opening a connection or session may succeed on retry.
///
/// Configuration and subscription mistakes are permanent.
pub fn is_retryable_open_error(err: &BusError) -> bool {
    matches!(err, BusError::Connection(_)) || err.is_transient()
}
