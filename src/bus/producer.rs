//! Publishing with delivery confirmation.
//!
//! Every `publish` owns a fresh oneshot channel, so concurrent publishes on
//! clones of one handle never observe each other's reports.

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::codec::{self, Record};
use super::connection::ProducerHandle;
use super::envelope::{DeliveryError, DeliveryResult, Envelope};
use super::topics::Topic;
use super::{BusError, Result};

impl ProducerHandle {
    /// Publish one message and wait for the broker's verdict.
    ///
    /// Returns `Err(BusError::Publish)` if the message never reached the
    /// broker client (empty topic, queue full, handle closed). Once accepted,
    /// the outcome is always an `Ok(DeliveryResult)`: a broker-side failure or
    /// a transport that drops its acknowledgment channel yields
    /// `success: false`.
    pub async fn publish(
        &self,
        topic: &str,
        key: Option<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Result<DeliveryResult> {
        if topic.is_empty() {
            let err = BusError::Publish("topic must not be empty".to_string());
            self.observer.publish_rejected(topic, &err);
            return Err(err);
        }

        let envelope = Envelope {
            key,
            ..Envelope::new(topic, payload)
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        let started = Instant::now();

        if let Err(e) = self.transport.send(envelope, ack_tx).await {
            self.observer.publish_rejected(topic, &e);
            return Err(e);
        }

        let result = match ack_rx.await {
            Ok(report) => DeliveryResult::from_report(report),
            Err(_) => DeliveryResult::failed(DeliveryError::new(
                topic,
                None,
                "acknowledgment channel closed without a delivery report",
            )),
        };

        self.observer.published(&result, started.elapsed());
        Ok(result)
    }

    /// Encode a record and publish it on a platform topic.
    pub async fn publish_record<R: Record>(
        &self,
        topic: Topic,
        key: Option<Bytes>,
        record: &R,
    ) -> Result<DeliveryResult> {
        let payload = codec::encode(record)?;
        self.publish(topic.name, key, payload).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::memory::{InMemoryBroker, MEMORY_BROKER_ADDRESS};
    use crate::bus::mock::{MockProducerTransport, MockReply};
    use crate::bus::Connector;
    use crate::proto::UserPayload;

    fn addrs() -> Vec<String> {
        vec![MEMORY_BROKER_ADDRESS.to_string()]
    }

    fn mock_handle(mock: &Arc<MockProducerTransport>) -> ProducerHandle {
        ProducerHandle::new(addrs(), mock.clone())
    }

    #[tokio::test]
    async fn test_publish_delivered() {
        let broker = InMemoryBroker::new();
        let producer = broker.open_producer(&addrs()).await.unwrap();

        let result = producer
            .publish("acct.created", Some(Bytes::from_static(b"u1")), "hello")
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.topic, "acct.created");
        assert_eq!(result.offset, Some(0));
        assert_eq!(broker.messages("acct.created").await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_empty_payload_is_allowed() {
        let broker = InMemoryBroker::new();
        let producer = broker.open_producer(&addrs()).await.unwrap();

        let result = producer
            .publish("acct.created", None, Bytes::new())
            .await
            .unwrap();

        assert!(result.success);
        let stored = broker.messages("acct.created").await;
        assert!(stored[0].payload.is_empty());
        assert_eq!(stored[0].key, None);
    }

    #[tokio::test]
    async fn test_publish_empty_topic_rejected() {
        let broker = InMemoryBroker::new();
        let producer = broker.open_producer(&addrs()).await.unwrap();

        let err = producer.publish("", None, "x").await.unwrap_err();
        assert!(matches!(err, BusError::Publish(_)));
    }

    #[tokio::test]
    async fn test_publish_send_error_returned_immediately() {
        let mock = Arc::new(MockProducerTransport::new());
        mock.set_reply(MockReply::RejectSend).await;

        let err = mock_handle(&mock)
            .publish("acct.created", None, "x")
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Publish(_)));
        assert_eq!(mock.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_broker_failure_is_unsuccessful_result() {
        let mock = Arc::new(MockProducerTransport::new());
        mock.set_reply(MockReply::Fail("topic unavailable".to_string()))
            .await;

        let result = mock_handle(&mock)
            .publish("acct.created", None, "x")
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.unwrap().reason, "topic unavailable");
    }

    #[tokio::test]
    async fn test_publish_dropped_ack_is_unsuccessful_result() {
        let mock = Arc::new(MockProducerTransport::new());
        mock.set_reply(MockReply::DropAck).await;

        let result = mock_handle(&mock)
            .publish("acct.created", None, "x")
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(mock.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_publish_record_encodes() {
        let broker = InMemoryBroker::new();
        let producer = broker.open_producer(&addrs()).await.unwrap();
        let user = UserPayload {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            ..Default::default()
        };

        producer
            .publish_record(Topic::USER_CREATED, Some(Bytes::from_static(b"u1")), &user)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        let stored = broker.messages(Topic::USER_CREATED.name).await;
        let decoded: UserPayload = codec::decode_as(&stored[0].payload).unwrap();
        assert_eq!(decoded, user);
    }

    #[tokio::test]
    async fn test_publish_record_invalid_never_sent() {
        let mock = Arc::new(MockProducerTransport::new());

        let err = mock_handle(&mock)
            .publish_record(Topic::USER_CREATED, None, &UserPayload::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Encoding(_)));
        assert_eq!(mock.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_get_own_results() {
        let broker = InMemoryBroker::new();
        let producer = broker.open_producer(&addrs()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let producer = producer.clone();
            tasks.push(tokio::spawn(async move {
                let topic = format!("topic-{}", i % 4);
                let result = producer.publish(&topic, None, format!("m{}", i)).await;
                (topic, result)
            }));
        }

        for task in tasks {
            let (topic, result) = task.await.unwrap();
            let result = result.unwrap();
            assert!(result.success);
            assert_eq!(result.topic, topic);
        }

        let mut total = 0;
        for i in 0..4 {
            total += broker.messages(&format!("topic-{}", i)).await.len();
        }
        assert_eq!(total, 16);
    }
}
