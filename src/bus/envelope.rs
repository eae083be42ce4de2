//! Messages in transit and the outcome of publishing them.

use bytes::Bytes;

use super::BusError;

/// One message as carried by the broker.
///
/// Broker metadata (`partition`, `offset`, `timestamp_ms`) is set by the
/// broker on receipt and is `None` on outgoing envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub timestamp_ms: Option<i64>,
}

impl Envelope {
    /// Outgoing envelope with no key.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
            partition: None,
            offset: None,
            timestamp_ms: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Key as UTF-8, lossily. Intended for logging.
    pub fn key_lossy(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    /// Where this envelope sits in the broker's log, if it came from one.
    pub fn position(&self) -> Option<MessagePosition> {
        match (self.partition, self.offset) {
            (Some(partition), Some(offset)) => Some(MessagePosition {
                topic: self.topic.clone(),
                partition,
                offset,
            }),
            _ => None,
        }
    }
}

/// Topic, partition and offset of a consumed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Broker confirmation that a message was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Broker-side delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Delivery to '{topic}' failed: {reason}")]
pub struct DeliveryError {
    pub topic: String,
    pub partition: Option<i32>,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(topic: impl Into<String>, partition: Option<i32>, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            reason: reason.into(),
        }
    }
}

/// The single event a transport sends on a publish's acknowledgment channel.
pub type DeliveryReport = std::result::Result<DeliveryReceipt, DeliveryError>;

/// Outcome of one `publish` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success: bool,
    pub error: Option<DeliveryError>,
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

impl DeliveryResult {
    pub fn delivered(receipt: DeliveryReceipt) -> Self {
        Self {
            success: true,
            error: None,
            topic: receipt.topic,
            partition: Some(receipt.partition),
            offset: Some(receipt.offset),
        }
    }

    pub fn failed(error: DeliveryError) -> Self {
        Self {
            success: false,
            topic: error.topic.clone(),
            partition: error.partition,
            offset: None,
            error: Some(error),
        }
    }

    pub fn from_report(report: DeliveryReport) -> Self {
        match report {
            Ok(receipt) => Self::delivered(receipt),
            Err(error) => Self::failed(error),
        }
    }

    /// Convert to a `Result` for callers that prefer `?`.
    pub fn into_result(self) -> Result<DeliveryReceipt, BusError> {
        match (self.error, self.partition, self.offset) {
            (Some(error), _, _) => Err(BusError::Delivery(error)),
            (None, Some(partition), Some(offset)) if self.success => Ok(DeliveryReceipt {
                topic: self.topic,
                partition,
                offset,
            }),
            _ => Err(BusError::Delivery(DeliveryError::new(
                self.topic,
                self.partition,
                "no delivery confirmation",
            ))),
        }
    }
}
