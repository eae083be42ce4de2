//! Kafka broker backend.
//!
//! Producers use `FutureProducer`: the enqueue result is returned from `send`
//! and the delivery future is awaited on a spawned task that reports on the
//! publish's acknowledgment channel. Consumers use `StreamConsumer` with
//! automatic commit of explicitly stored offsets, so a message counts as
//! consumed only after the session acknowledges it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::connection::{Connector, ConsumerTransport, ProducerTransport};
use super::envelope::{DeliveryError, DeliveryReceipt, DeliveryReport, Envelope, MessagePosition};
use super::{BusError, KafkaConfig, Result};
use crate::utils::duration_ms;

/// Opens Kafka producers and consumers.
#[derive(Clone, Debug)]
pub struct KafkaConnector {
    config: KafkaConfig,
    queue_capacity: usize,
}

impl KafkaConnector {
    pub fn new(config: KafkaConfig, queue_capacity: usize) -> Self {
        Self {
            config,
            queue_capacity,
        }
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connect_timeout_ms)
    }

    /// Build a ClientConfig for producers.
    fn build_producer_config(&self, addresses: &[String]) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", addresses.join(","));
        config.set(
            "message.timeout.ms",
            self.config.message_timeout_ms.to_string(),
        );
        config.set("acks", "all");
        config.set("enable.idempotence", "true");
        config.set(
            "queue.buffering.max.messages",
            self.queue_capacity.to_string(),
        );

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    fn build_consumer_config(&self, addresses: &[String], group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", addresses.join(","));
        config.set("group.id", group_id);
        config.set("enable.auto.commit", "true");
        config.set("enable.auto.offset.store", "false");
        config.set("auto.offset.reset", &self.config.auto_offset_reset);

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.config.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.config.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.config.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.config.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.config.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

/// Run a metadata request so an unreachable cluster fails at open time.
async fn check_reachable<F>(addresses: &[String], fetch: F) -> Result<()>
where
    F: FnOnce() -> rdkafka::error::KafkaResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(fetch)
        .await
        .map_err(|e| BusError::Connection(format!("Metadata request aborted: {}", e)))?
        .map_err(|e| {
            BusError::Connection(format!(
                "Kafka brokers {:?} unreachable: {}",
                addresses, e
            ))
        })
}

#[async_trait]
impl Connector for KafkaConnector {
    async fn create_producer(&self, addresses: &[String]) -> Result<Arc<dyn ProducerTransport>> {
        let producer: FutureProducer = self
            .build_producer_config(addresses)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        let client = producer.clone();
        let timeout = self.connect_timeout();
        check_reachable(addresses, move || {
            client.client().fetch_metadata(None, timeout).map(|_| ())
        })
        .await?;

        info!(addresses = ?addresses, "Connected to Kafka");
        Ok(Arc::new(KafkaProducer {
            producer,
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_consumer(
        &self,
        addresses: &[String],
        group_id: &str,
    ) -> Result<Box<dyn ConsumerTransport>> {
        let consumer: StreamConsumer = self
            .build_consumer_config(addresses, group_id)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;
        let consumer = Arc::new(consumer);

        let client = consumer.clone();
        let timeout = self.connect_timeout();
        check_reachable(addresses, move || {
            client.fetch_metadata(None, timeout).map(|_| ())
        })
        .await?;

        Ok(Box::new(KafkaConsumer { consumer }))
    }
}

// ============================================================================
// Producer
// ============================================================================

struct KafkaProducer {
    producer: FutureProducer,
    closed: AtomicBool,
}

#[async_trait]
impl ProducerTransport for KafkaProducer {
    async fn send(&self, envelope: Envelope, ack: oneshot::Sender<DeliveryReport>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Publish("producer is closed".to_string()));
        }

        let mut record = FutureRecord::to(&envelope.topic).payload(&envelope.payload[..]);
        if let Some(ref key) = envelope.key {
            record = record.key(&key[..]);
        }

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| BusError::Publish(format!("Failed to enqueue message: {}", e)))?;

        let topic = envelope.topic.clone();
        tokio::spawn(async move {
            let report = match delivery.await {
                Ok(outcome) => delivery_report(topic, outcome),
                Err(_canceled) => Err(DeliveryError::new(
                    topic,
                    None,
                    "producer dropped before the delivery report arrived",
                )),
            };
            // The publisher may have given up waiting.
            let _ = ack.send(report);
        });

        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            producer.flush(Duration::from_secs(5))
        })
        .await;
        debug!(flushed = ?flushed.map(|r| r.is_ok()), "Kafka producer flushed");
    }
}

/// Map a delivery outcome onto the report sent to the publisher.
///
/// A failed delivery still carries the partition the message was routed to.
fn delivery_report(
    topic: String,
    outcome: std::result::Result<(i32, i64), (KafkaError, OwnedMessage)>,
) -> DeliveryReport {
    match outcome {
        Ok((partition, offset)) => Ok(DeliveryReceipt {
            topic,
            partition,
            offset,
        }),
        Err((e, message)) => Err(DeliveryError::new(
            topic,
            Some(message.partition()),
            e.to_string(),
        )),
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Offsets to store once `position` is consumed: the next one to read.
fn ack_offsets(position: &MessagePosition) -> Result<TopicPartitionList> {
    let mut offsets = TopicPartitionList::new();
    offsets
        .add_partition_offset(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset + 1),
        )
        .map_err(|e| BusError::Ack(format!("Invalid offset: {}", e)))?;
    Ok(offsets)
}

struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl ConsumerTransport for KafkaConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let topic_refs: Vec<&str> = topics.iter().map(|s| s.as_str()).collect();
        self.consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::Subscription(format!("Failed to subscribe to topics: {}", e)))?;

        info!(topics = ?topics, "Subscribed to Kafka topics");
        Ok(())
    }

    async fn poll(&mut self, timeout: Option<Duration>) -> Result<Envelope> {
        let received = match timeout {
            Some(wait) => match tokio::time::timeout(wait, self.consumer.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(BusError::PollTimeout {
                        waited_ms: duration_ms(wait),
                    })
                }
            },
            None => self.consumer.recv().await,
        };

        let message = received.map_err(|e| BusError::Poll(e.to_string()))?;
        Ok(Envelope {
            topic: message.topic().to_string(),
            key: message.key().map(Bytes::copy_from_slice),
            payload: message
                .payload()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            partition: Some(message.partition()),
            offset: Some(message.offset()),
            timestamp_ms: message.timestamp().to_millis(),
        })
    }

    async fn ack(&mut self, position: &MessagePosition) -> Result<()> {
        let offsets = ack_offsets(position)?;
        self.consumer
            .store_offsets(&offsets)
            .map_err(|e| BusError::Ack(format!("Failed to store offset: {}", e)))
    }
}

#[cfg(test)]
mod tests;
