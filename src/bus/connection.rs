//! Broker connections.
//!
//! A `Connector` knows how to reach one kind of broker. It hands out two
//! kinds of handle:
//! - `ProducerHandle`: cheap to clone, shared by any number of publishing tasks
//! - `ConsumerSession`: owned by the single task that drives its poll loop
//!
//! Handles are created explicitly and passed to whoever needs them. Opening a
//! handle never retries; restart policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::info;

use super::consumer::ConsumerState;
use super::envelope::{DeliveryReport, Envelope, MessagePosition};
use super::observer::{BusObserver, TracingObserver};
use super::{BusError, Result};

// ============================================================================
// Transports
// ============================================================================

/// Broker-specific publishing half.
#[async_trait]
pub trait ProducerTransport: Send + Sync {
    /// Hand a message to the broker client.
    ///
    /// Returns `BusError::Publish` if the message cannot be enqueued. On `Ok`
    /// the transport must eventually send exactly one report on `ack`, or drop
    /// it if it can no longer report.
    async fn send(&self, envelope: Envelope, ack: oneshot::Sender<DeliveryReport>) -> Result<()>;

    /// Stop accepting messages. Later sends fail with `BusError::Publish`.
    async fn close(&self) {}
}

/// Broker-specific consuming half.
///
/// Methods take `&mut self`: a transport is driven by one task at a time.
#[async_trait]
pub trait ConsumerTransport: Send {
    /// Join the group's subscription for `topics`.
    async fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    /// Wait for the next message. `None` waits until one arrives.
    async fn poll(&mut self, timeout: Option<Duration>) -> Result<Envelope>;

    /// Record that the message at `position` has been handled.
    async fn ack(&mut self, position: &MessagePosition) -> Result<()>;
}

// ============================================================================
// Connector
// ============================================================================

/// Opens handles against one broker backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Create a publishing transport. Fails with `BusError::Connection` if
    /// the broker cannot be reached.
    async fn create_producer(&self, addresses: &[String]) -> Result<Arc<dyn ProducerTransport>>;

    /// Create an unsubscribed consuming transport for `group_id`.
    async fn create_consumer(
        &self,
        addresses: &[String],
        group_id: &str,
    ) -> Result<Box<dyn ConsumerTransport>>;

    /// Open a producer handle.
    async fn open_producer(&self, addresses: &[String]) -> Result<ProducerHandle> {
        require_addresses(addresses)?;
        let transport = self.create_producer(addresses).await?;
        info!(addresses = ?addresses, "Producer connected");
        Ok(ProducerHandle::new(addresses.to_vec(), transport))
    }

    /// Open a consumer session subscribed to `topics`.
    ///
    /// The session is returned only once the subscription has been accepted.
    async fn open_consumer_session(
        &self,
        addresses: &[String],
        group_id: &str,
        topics: &[String],
    ) -> Result<ConsumerSession> {
        require_addresses(addresses)?;
        if group_id.is_empty() {
            return Err(BusError::InvalidConfig(
                "consumer group id must not be empty".to_string(),
            ));
        }
        if topics.is_empty() {
            return Err(BusError::Subscription(
                "at least one topic is required".to_string(),
            ));
        }

        let mut transport = self.create_consumer(addresses, group_id).await?;
        transport.subscribe(topics).await?;

        info!(
            addresses = ?addresses,
            group_id = %group_id,
            topics = ?topics,
            "Consumer subscribed"
        );

        Ok(ConsumerSession::new(
            addresses.to_vec(),
            group_id.to_string(),
            topics.to_vec(),
            transport,
        ))
    }
}

fn require_addresses(addresses: &[String]) -> Result<()> {
    if addresses.iter().all(|a| a.trim().is_empty()) {
        return Err(BusError::Connection(
            "no broker addresses configured".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Handles
// ============================================================================

/// Shared publishing handle.
///
/// Clones share one transport. See `producer` for `publish`.
#[derive(Clone)]
pub struct ProducerHandle {
    pub(crate) addresses: Arc<[String]>,
    pub(crate) transport: Arc<dyn ProducerTransport>,
    pub(crate) observer: Arc<dyn BusObserver>,
}

impl ProducerHandle {
    /// Wrap a transport. `Connector::open_producer` is the usual entry point.
    pub fn new(addresses: Vec<String>, transport: Arc<dyn ProducerTransport>) -> Self {
        Self {
            addresses: addresses.into(),
            transport,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Close the underlying transport for every clone of this handle.
    pub async fn close(&self) {
        self.transport.close().await;
        info!(addresses = ?self.addresses, "Producer closed");
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

/// A subscribed consumer, owned by the task that runs it.
///
/// See `consumer` for `run`.
pub struct ConsumerSession {
    pub(crate) addresses: Vec<String>,
    pub(crate) group_id: String,
    pub(crate) topics: Vec<String>,
    pub(crate) transport: Box<dyn ConsumerTransport>,
    pub(crate) poll_timeout: Option<Duration>,
    pub(crate) observer: Arc<dyn BusObserver>,
    pub(crate) state: watch::Sender<ConsumerState>,
}

impl ConsumerSession {
    /// Wrap a subscribed transport. `Connector::open_consumer_session` is the
    /// usual entry point.
    pub fn new(
        addresses: Vec<String>,
        group_id: String,
        topics: Vec<String>,
        transport: Box<dyn ConsumerTransport>,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Starting);
        Self {
            addresses,
            group_id,
            topics,
            transport,
            poll_timeout: None,
            observer: Arc::new(TracingObserver),
            state,
        }
    }

    /// Bound each poll. A poll that times out is reported and retried.
    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout
    }

    /// Follow the session's lifecycle from another task.
    pub fn state_watcher(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }
}

impl std::fmt::Debug for ConsumerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSession")
            .field("addresses", &self.addresses)
            .field("group_id", &self.group_id)
            .field("topics", &self.topics)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::{InMemoryBroker, MEMORY_BROKER_ADDRESS};

    fn addrs() -> Vec<String> {
        vec![MEMORY_BROKER_ADDRESS.to_string()]
    }

    #[tokio::test]
    async fn test_open_producer_empty_addresses() {
        let broker = InMemoryBroker::new();
        let err = broker.open_producer(&[]).await.unwrap_err();
        assert!(matches!(err, BusError::Connection(_)));
    }

    #[tokio::test]
    async fn test_open_consumer_empty_addresses() {
        let broker = InMemoryBroker::new();
        let err = broker
            .open_consumer_session(&[], "g1", &["acct.created".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Connection(_)));
    }

    #[tokio::test]
    async fn test_open_consumer_empty_topics() {
        let broker = InMemoryBroker::new();
        let err = broker
            .open_consumer_session(&addrs(), "g1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Subscription(_)));
    }

    #[tokio::test]
    async fn test_open_consumer_empty_group() {
        let broker = InMemoryBroker::new();
        let err = broker
            .open_consumer_session(&addrs(), "", &["acct.created".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_session_exposes_subscription() {
        let broker = InMemoryBroker::new();
        let topics = vec!["acct.created".to_string(), "acct.updated".to_string()];
        let session = broker
            .open_consumer_session(&addrs(), "g1", &topics)
            .await
            .unwrap();

        assert_eq!(session.addresses(), addrs().as_slice());
        assert_eq!(session.group_id(), "g1");
        assert_eq!(session.topics(), topics.as_slice());
        assert_eq!(session.poll_timeout(), None);
        assert_eq!(*session.state_watcher().borrow(), ConsumerState::Starting);
    }

    #[tokio::test]
    async fn test_producer_handle_clones_share_addresses() {
        let broker = InMemoryBroker::new();
        let producer = broker.open_producer(&addrs()).await.unwrap();
        let clone = producer.clone();
        assert_eq!(clone.addresses(), producer.addresses());
    }
}
