//! qwallet-tail: bus tail
//!
//! Subscribes to the configured topics, decodes each message with the topic
//! schema registry and logs it. Useful for watching traffic between services.
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - QWALLET_CONFIG: path to a YAML config file (optional)
//! - QWALLET__MESSAGING__*: messaging overrides, e.g.
//!   `QWALLET__MESSAGING__TOPICS=qwallet.user.created,qwallet.account.created`
//! - QWALLET_LOG: log filter (default: info)
//!
//! When no topics are configured every standard qwallet topic is tailed.

use std::sync::Arc;

use tracing::{info, warn};

use qwallet_shared::bus::{
    self, decoding, shutdown_channel, BusError, BusObserver, DecodedRecord, Dispatcher, Handler,
    Topic,
};
use qwallet_shared::config::Config;
use qwallet_shared::utils::bootstrap::{connect_with_retry, init_tracing};
use qwallet_shared::utils::retry::{connection_backoff, is_retryable_open_error};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let mut config = Config::load(path.as_deref())?;
    let messaging = &mut config.messaging;

    if messaging.topics.is_empty() {
        messaging.topics = Topic::ALL.iter().map(|t| t.name.to_string()).collect();
    }
    if messaging.group_id.is_none() {
        messaging.group_id = Some("qwallet-tail".to_string());
    }

    let connector = bus::init_connector(messaging)?;
    let addresses = messaging.brokers.join(",");
    let messaging = &config.messaging;

    let session = connect_with_retry(
        "broker",
        &addresses,
        connection_backoff(),
        is_retryable_open_error,
        || bus::open_configured_session(connector.as_ref(), messaging),
    )
    .await?;

    #[cfg(feature = "otel")]
    let observer: Arc<dyn BusObserver> = Arc::new(bus::observer::MetricsObserver);
    #[cfg(not(feature = "otel"))]
    let observer: Arc<dyn BusObserver> = Arc::new(bus::TracingObserver);

    let registry = Arc::new(messaging.schema_registry());
    let printer: Box<dyn Handler> = Box::new(decoding("tail", registry, |record, envelope| async move {
        let key = envelope.key_lossy();
        match record {
            DecodedRecord::Account(account) => info!(
                topic = %envelope.topic,
                key = ?key,
                offset = ?envelope.offset,
                account_number = %account.account_number,
                user_id = %account.user_id,
                name = %account.name,
                balance = account.balance,
                deleted = account.is_deleted,
                "account"
            ),
            DecodedRecord::User(user) => info!(
                topic = %envelope.topic,
                key = ?key,
                offset = ?envelope.offset,
                id = %user.id,
                email = %user.email,
                name = %user.name,
                deleted = user.is_deleted,
                "user"
            ),
        }
        Ok::<(), BusError>(())
    }));

    let dispatcher = Dispatcher::handlers(vec![printer]).with_observer(observer.clone());
    let (shutdown, cancel) = shutdown_channel();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Shutting down");
        shutdown.cancel();
    });

    info!(topics = ?messaging.topics, "qwallet-tail started");
    let report = session.with_observer(observer).run(dispatcher, cancel).await;
    info!(
        polled = report.polled,
        handler_failures = report.handler_failures,
        "qwallet-tail stopped"
    );

    Ok(())
}
