//! In-memory broker for tests and single-process runs.
//!
//! Each topic is one partition (partition `0`) holding an append-only log.
//! Consumer groups resume from their committed offset, or from the start of
//! the log when they have none. Concurrent members of one group each read the
//! full log; there is no partition rebalancing.
//!
//! The broker can be told to misbehave, for exercising error paths:
//! unreachable, failing topics, rejected subscriptions, transient poll errors
//! and a bounded in-flight queue.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::connection::{Connector, ConsumerTransport, ProducerTransport};
use super::envelope::{DeliveryError, DeliveryReceipt, DeliveryReport, Envelope, MessagePosition};
use super::{BusError, Result, DEFAULT_QUEUE_CAPACITY};
use crate::utils::duration_ms;

/// Address the in-memory broker listens on by default.
pub const MEMORY_BROKER_ADDRESS: &str = "memory:9092";

/// How long a poll against an unreachable broker waits before failing.
const UNREACHABLE_POLL_DELAY: Duration = Duration::from_millis(50);

const PARTITION: i32 = 0;

/// In-memory broker settings.
#[derive(Debug, Clone)]
pub struct MemoryBrokerConfig {
    /// Addresses clients may connect with.
    pub addresses: Vec<String>,
    /// Messages a producer may have awaiting delivery.
    pub queue_capacity: usize,
    /// Artificial latency before each delivery report.
    pub delivery_delay: Duration,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            addresses: vec![MEMORY_BROKER_ADDRESS.to_string()],
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery_delay: Duration::ZERO,
        }
    }
}

struct BrokerState {
    config: MemoryBrokerConfig,
    reachable: AtomicBool,
    logs: RwLock<HashMap<String, Vec<Envelope>>>,
    committed: RwLock<HashMap<(String, String), i64>>,
    failing_topics: RwLock<HashSet<String>>,
    rejected_topics: RwLock<HashSet<String>>,
    pending_poll_errors: AtomicUsize,
    appended: Notify,
}

impl BrokerState {
    fn accepts(&self, addresses: &[String]) -> Result<()> {
        if !addresses.iter().any(|a| self.config.addresses.contains(a)) {
            return Err(BusError::Connection(format!(
                "no broker listening on {:?}",
                addresses
            )));
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BusError::Connection(format!(
                "broker at {:?} is unreachable",
                addresses
            )));
        }
        Ok(())
    }

    async fn deliver(&self, mut envelope: Envelope) -> DeliveryReport {
        let topic = envelope.topic.clone();
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(DeliveryError::new(
                topic,
                None,
                "broker transport failure: broker unreachable",
            ));
        }
        if self.failing_topics.read().await.contains(&topic) {
            return Err(DeliveryError::new(
                topic,
                Some(PARTITION),
                "topic unavailable: leader not available",
            ));
        }

        let offset = {
            let mut logs = self.logs.write().await;
            let log = logs.entry(topic.clone()).or_default();
            let offset = log.len() as i64;
            envelope.partition = Some(PARTITION);
            envelope.offset = Some(offset);
            envelope.timestamp_ms = Some(chrono::Utc::now().timestamp_millis());
            log.push(envelope);
            offset
        };
        self.appended.notify_waiters();

        Ok(DeliveryReceipt {
            topic,
            partition: PARTITION,
            offset,
        })
    }

    fn take_injected_poll_error(&self) -> bool {
        self.pending_poll_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-process broker. Clones share the same topics and groups.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker listening on [`MEMORY_BROKER_ADDRESS`].
    pub fn new() -> Self {
        Self::with_config(MemoryBrokerConfig::default())
    }

    pub fn with_config(config: MemoryBrokerConfig) -> Self {
        Self {
            state: Arc::new(BrokerState {
                config,
                reachable: AtomicBool::new(true),
                logs: RwLock::new(HashMap::new()),
                committed: RwLock::new(HashMap::new()),
                failing_topics: RwLock::new(HashSet::new()),
                rejected_topics: RwLock::new(HashSet::new()),
                pending_poll_errors: AtomicUsize::new(0),
                appended: Notify::new(),
            }),
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.state.config.addresses
    }

    /// Take the broker down or bring it back.
    ///
    /// While down, new handles fail to open, deliveries fail and polls error.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail every delivery to `topic` until healed.
    pub async fn fail_topic(&self, topic: impl Into<String>) {
        self.state.failing_topics.write().await.insert(topic.into());
    }

    pub async fn heal_topic(&self, topic: &str) {
        self.state.failing_topics.write().await.remove(topic);
    }

    /// Refuse subscriptions that include `topic`.
    pub async fn reject_subscription(&self, topic: impl Into<String>) {
        self.state.rejected_topics.write().await.insert(topic.into());
    }

    /// Make the next `count` polls, across all consumers, fail.
    pub fn inject_poll_errors(&self, count: usize) {
        self.state
            .pending_poll_errors
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Every message stored on `topic`, oldest first.
    pub async fn messages(&self, topic: &str) -> Vec<Envelope> {
        self.state
            .logs
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset `group_id` will read on `topic`, if it has committed one.
    pub async fn committed_offset(&self, group_id: &str, topic: &str) -> Option<i64> {
        self.state
            .committed
            .read()
            .await
            .get(&(group_id.to_string(), topic.to_string()))
            .copied()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn create_producer(&self, addresses: &[String]) -> Result<Arc<dyn ProducerTransport>> {
        self.state.accepts(addresses)?;
        Ok(Arc::new(MemoryProducer {
            state: self.state.clone(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_consumer(
        &self,
        addresses: &[String],
        group_id: &str,
    ) -> Result<Box<dyn ConsumerTransport>> {
        self.state.accepts(addresses)?;
        Ok(Box::new(MemoryConsumer {
            state: self.state.clone(),
            group_id: group_id.to_string(),
            topics: Vec::new(),
            positions: HashMap::new(),
            next_topic: 0,
        }))
    }
}

// ============================================================================
// Producer
// ============================================================================

struct MemoryProducer {
    state: Arc<BrokerState>,
    in_flight: Arc<AtomicUsize>,
    closed: AtomicBool,
}

#[async_trait]
impl ProducerTransport for MemoryProducer {
    async fn send(&self, envelope: Envelope, ack: oneshot::Sender<DeliveryReport>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Publish("producer is closed".to_string()));
        }

        let capacity = self.state.config.queue_capacity;
        let reserved = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(BusError::Publish(format!(
                "local queue full ({} messages awaiting delivery)",
                capacity
            )));
        }

        let state = self.state.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let delay = state.config.delivery_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let report = state.deliver(envelope).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            // The publisher may have given up waiting.
            let _ = ack.send(report);
        });

        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Consumer
// ============================================================================

struct MemoryConsumer {
    state: Arc<BrokerState>,
    group_id: String,
    topics: Vec<String>,
    positions: HashMap<String, i64>,
    next_topic: usize,
}

impl MemoryConsumer {
    /// Take the next unread message, rotating across topics.
    async fn next_available(&mut self) -> Option<Envelope> {
        let logs = self.state.logs.read().await;
        let count = self.topics.len();

        for step in 0..count {
            let index = (self.next_topic + step) % count;
            let topic = &self.topics[index];
            let position = self.positions.get(topic).copied().unwrap_or(0);

            if let Some(envelope) = logs.get(topic).and_then(|log| log.get(position as usize)) {
                self.positions.insert(topic.clone(), position + 1);
                self.next_topic = (index + 1) % count;
                return Some(envelope.clone());
            }
        }
        None
    }
}

#[async_trait]
impl ConsumerTransport for MemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(BusError::Subscription(
                "broker unreachable".to_string(),
            ));
        }
        {
            let rejected = self.state.rejected_topics.read().await;
            if let Some(topic) = topics.iter().find(|t| rejected.contains(*t)) {
                return Err(BusError::Subscription(format!(
                    "subscription to '{}' rejected by broker",
                    topic
                )));
            }
        }

        let committed = self.state.committed.read().await;
        self.positions = topics
            .iter()
            .map(|topic| {
                let key = (self.group_id.clone(), topic.clone());
                (topic.clone(), committed.get(&key).copied().unwrap_or(0))
            })
            .collect();
        self.topics = topics.to_vec();
        self.next_topic = 0;

        debug!(group_id = %self.group_id, positions = ?self.positions, "Memory consumer subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Option<Duration>) -> Result<Envelope> {
        if self.state.take_injected_poll_error() {
            return Err(BusError::Poll("broker transport failure (injected)".to_string()));
        }

        let state = self.state.clone();
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if !state.reachable.load(Ordering::SeqCst) {
                let wait = timeout.map_or(UNREACHABLE_POLL_DELAY, |t| t.min(UNREACHABLE_POLL_DELAY));
                tokio::time::sleep(wait).await;
                return Err(BusError::Poll(
                    "broker transport failure: broker unreachable".to_string(),
                ));
            }

            // Register interest before looking so an append in between still wakes us.
            let notified = state.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(envelope) = self.next_available().await {
                return Ok(envelope);
            }

            match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(BusError::PollTimeout {
                            waited_ms: duration_ms(timeout),
                        });
                    }
                }
                _ => notified.await,
            }
        }
    }

    async fn ack(&mut self, position: &MessagePosition) -> Result<()> {
        self.state.committed.write().await.insert(
            (self.group_id.clone(), position.topic.clone()),
            position.offset + 1,
        );
        Ok(())
    }
}
