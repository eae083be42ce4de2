//! Message bus for qwallet services.
//!
//! This module contains:
//! - `Connector` trait: opens producer handles and consumer sessions
//! - `ProducerHandle`: publish with per-call delivery confirmation
//! - `ConsumerSession`: cancellable poll loop feeding a `Dispatcher`
//! - Codec and schema registry for the protobuf records on each topic
//! - Bus configuration types and the connector factory
//! - Implementations: in-memory broker, Kafka

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

pub mod codec;
pub mod connection;
pub mod consumer;
pub mod dispatch;
pub mod envelope;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod mock;
pub mod observer;
pub mod producer;
pub mod schema;
pub mod topics;

// Re-exports
pub use codec::{decode, decode_as, encode, Record};
pub use connection::{
    Connector, ConsumerSession, ConsumerTransport, ProducerHandle, ProducerTransport,
};
pub use consumer::{shutdown_channel, CancelSignal, ConsumerReport, ConsumerState, ShutdownHandle};
pub use dispatch::{
    decoding, dispatch_to_handlers, handler_fn, DispatchResult, Dispatcher, Handler,
    OutputChannel,
};
pub use envelope::{
    DeliveryError, DeliveryReceipt, DeliveryReport, DeliveryResult, Envelope, MessagePosition,
};
#[cfg(feature = "kafka")]
pub use kafka::KafkaConnector;
pub use memory::InMemoryBroker;
pub use mock::MockProducerTransport;
pub use observer::{BusObserver, TracingObserver};
pub use schema::{DecodedRecord, SchemaId, SchemaRegistry};
pub use topics::{Domain, Topic};

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscribe failed: {0}")]
    Subscription(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Poll failed: {0}")]
    Poll(String),

    #[error("No message within {waited_ms}ms")]
    PollTimeout { waited_ms: u64 },

    #[error("Ack failed: {0}")]
    Ack(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Decoding {schema} failed: {message}")]
    Decoding { schema: String, message: String },

    #[error("Handler '{name}' failed: {message}")]
    Handler { name: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BusError {
    /// Build a handler failure from any displayable error.
    pub fn handler(name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        BusError::Handler {
            name: name.into(),
            message: error.to_string(),
        }
    }

    /// Poll failures the consumer loop reports and then keeps polling past.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Poll(_) | BusError::PollTimeout { .. })
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broker (tests, local runs).
    #[default]
    Memory,
    /// Apache Kafka.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Broker addresses (`host:port`).
    pub brokers: Vec<String>,
    /// Consumer group ID (required for consuming).
    pub group_id: Option<String>,
    /// Topics to consume.
    pub topics: Vec<String>,
    /// Bounded poll wait in milliseconds. Unset means wait indefinitely.
    pub poll_timeout_ms: Option<u64>,
    /// Maximum messages awaiting delivery per producer before `publish` is rejected.
    pub queue_capacity: usize,
    /// Extra topic to schema mappings, merged over the standard qwallet topics.
    pub schemas: HashMap<String, SchemaId>,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: MessagingType::Memory,
            brokers: vec![memory::MEMORY_BROKER_ADDRESS.to_string()],
            group_id: None,
            topics: Vec::new(),
            poll_timeout_ms: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            schemas: HashMap::new(),
            kafka: KafkaConfig::default(),
        }
    }
}

/// Matches librdkafka's `queue.buffering.max.messages` default.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

impl MessagingConfig {
    /// Poll wait as a duration. `None` waits until a message arrives.
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms.map(Duration::from_millis)
    }

    /// Standard registry with the configured overrides applied.
    pub fn schema_registry(&self) -> SchemaRegistry {
        let mut registry = SchemaRegistry::standard();
        for (topic, schema) in &self.schemas {
            registry.register(topic.clone(), *schema);
        }
        registry
    }
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
    /// Where a new consumer group starts reading.
    pub auto_offset_reset: String,
    /// Time the broker has to confirm a message before delivery fails.
    pub message_timeout_ms: u64,
    /// Time allowed for the reachability check when a handle is opened.
    pub connect_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
            auto_offset_reset: "earliest".to_string(),
            message_timeout_ms: 5000,
            connect_timeout_ms: 5000,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize a broker connector based on configuration.
///
/// Requires the corresponding feature to be enabled:
/// - Memory: always available
/// - Kafka: `--features kafka`
pub fn init_connector(config: &MessagingConfig) -> Result<Arc<dyn Connector>> {
    match config.messaging_type {
        MessagingType::Memory => {
            let broker = InMemoryBroker::with_config(memory::MemoryBrokerConfig {
                addresses: config.brokers.clone(),
                queue_capacity: config.queue_capacity,
                ..Default::default()
            });
            info!(messaging_type = "memory", "Message bus initialized");
            Ok(Arc::new(broker))
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let connector = KafkaConnector::new(config.kafka.clone(), config.queue_capacity);
                info!(messaging_type = "kafka", "Message bus initialized");
                Ok(Arc::new(connector))
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err(BusError::InvalidConfig(
                    "Kafka support requires the 'kafka' feature. Rebuild with --features kafka"
                        .to_string(),
                ))
            }
        }
    }
}

/// Open a consumer session for the configured group and topics.
///
/// The configured poll timeout is applied to the session.
pub async fn open_configured_session(
    connector: &dyn Connector,
    config: &MessagingConfig,
) -> Result<ConsumerSession> {
    let group_id = config.group_id.as_deref().ok_or_else(|| {
        BusError::InvalidConfig("messaging.group_id is required for consuming".to_string())
    })?;

    let session = connector
        .open_consumer_session(&config.brokers, group_id, &config.topics)
        .await?;
    Ok(session.with_poll_timeout(config.poll_timeout()))
}

#[cfg(test)]
mod tests;
