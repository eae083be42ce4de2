//! Mock producer transport for testing.

use async_trait::async_trait;
use tokio::sync::{oneshot, RwLock};

use super::connection::ProducerTransport;
use super::envelope::{DeliveryError, DeliveryReceipt, DeliveryReport, Envelope};
use super::{BusError, Result};

/// How `MockProducerTransport` answers a send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MockReply {
    /// Record the envelope and report delivery at the next offset.
    #[default]
    Deliver,
    /// Record the envelope and report a broker-side failure.
    Fail(String),
    /// Record the envelope and drop the acknowledgment channel unused.
    DropAck,
    /// Refuse the envelope before it is recorded.
    RejectSend,
}

/// Producer transport that records envelopes and answers synchronously.
#[derive(Default)]
pub struct MockProducerTransport {
    sent: RwLock<Vec<Envelope>>,
    reply: RwLock<MockReply>,
}

impl MockProducerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_reply(&self, reply: MockReply) {
        *self.reply.write().await = reply;
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    pub async fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.sent.write().await)
    }
}

#[async_trait]
impl ProducerTransport for MockProducerTransport {
    async fn send(&self, envelope: Envelope, ack: oneshot::Sender<DeliveryReport>) -> Result<()> {
        let reply = self.reply.read().await.clone();
        if reply == MockReply::RejectSend {
            return Err(BusError::Publish("Mock send rejected".to_string()));
        }

        let mut sent = self.sent.write().await;
        let offset = sent.len() as i64;
        let topic = envelope.topic.clone();
        sent.push(envelope);

        match reply {
            MockReply::Deliver => {
                let _ = ack.send(Ok(DeliveryReceipt {
                    topic,
                    partition: 0,
                    offset,
                }));
            }
            MockReply::Fail(reason) => {
                let _ = ack.send(Err(DeliveryError::new(topic, Some(0), reason)));
            }
            MockReply::DropAck => drop(ack),
            MockReply::RejectSend => {}
        }
        Ok(())
    }
}
