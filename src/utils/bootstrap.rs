//! Bootstrap utilities for qwallet binaries.
//!
//! Shared initialization code: tracing setup and connection retry.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the QWALLET_LOG environment variable.
///
/// Defaults to "info" level if QWALLET_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run `connect` until it succeeds, backing off between attempts.
///
/// `should_retry` decides which errors are worth another attempt; the first
/// error it rejects is returned immediately. The last error is returned once
/// `backoff` is exhausted.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "broker", "cache")
/// * `address` - The address being connected to, for logging
/// * `backoff` - Delay schedule, usually [`super::retry::connection_backoff`]
pub async fn connect_with_retry<T, E, F, Fut, P>(
    service_name: &str,
    address: &str,
    backoff: ExponentialBuilder,
    should_retry: P,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let client = connect
        .retry(backoff)
        .when(should_retry)
        .notify(|err: &E, dur: Duration| {
            warn!(service = %service_name, address = %address, error = %err, delay = ?dur, "Connection failed, retrying");
        })
        .await?;

    info!(service = %service_name, address = %address, "Connected");
    Ok(client)
}
