use super::*;
use crate::bus::envelope::DeliveryResult;

fn addrs() -> Vec<String> {
    vec!["broker-1:9092".to_string(), "broker-2:9092".to_string()]
}

fn get<'a>(config: &'a ClientConfig, key: &str) -> Option<&'a str> {
    config.get(key)
}

#[test]
fn test_producer_config_joins_addresses() {
    let connector = KafkaConnector::new(KafkaConfig::default(), 500);
    let config = connector.build_producer_config(&addrs());

    assert_eq!(
        get(&config, "bootstrap.servers"),
        Some("broker-1:9092,broker-2:9092")
    );
    assert_eq!(get(&config, "acks"), Some("all"));
    assert_eq!(get(&config, "message.timeout.ms"), Some("5000"));
    assert_eq!(get(&config, "queue.buffering.max.messages"), Some("500"));
}

#[test]
fn test_consumer_config_stores_offsets_explicitly() {
    let connector = KafkaConnector::new(KafkaConfig::default(), 500);
    let config = connector.build_consumer_config(&addrs(), "notification-service");

    assert_eq!(get(&config, "group.id"), Some("notification-service"));
    assert_eq!(get(&config, "enable.auto.offset.store"), Some("false"));
    assert_eq!(get(&config, "enable.auto.commit"), Some("true"));
    assert_eq!(get(&config, "auto.offset.reset"), Some("earliest"));
}

#[test]
fn test_sasl_config() {
    let connector = KafkaConnector::new(
        KafkaConfig {
            sasl_username: Some("user".to_string()),
            sasl_password: Some("pass".to_string()),
            sasl_mechanism: Some("SCRAM-SHA-256".to_string()),
            security_protocol: Some("SASL_SSL".to_string()),
            ..Default::default()
        },
        500,
    );
    let config = connector.build_consumer_config(&addrs(), "g1");

    assert_eq!(get(&config, "sasl.username"), Some("user"));
    assert_eq!(get(&config, "sasl.password"), Some("pass"));
    assert_eq!(get(&config, "sasl.mechanism"), Some("SCRAM-SHA-256"));
    assert_eq!(get(&config, "security.protocol"), Some("SASL_SSL"));
}

#[test]
fn test_ssl_config() {
    let connector = KafkaConnector::new(
        KafkaConfig {
            security_protocol: Some("SSL".to_string()),
            ssl_ca_location: Some("/path/to/ca.crt".to_string()),
            ..Default::default()
        },
        500,
    );
    let config = connector.build_producer_config(&addrs());

    assert_eq!(get(&config, "security.protocol"), Some("SSL"));
    assert_eq!(get(&config, "ssl.ca.location"), Some("/path/to/ca.crt"));
    assert_eq!(get(&config, "sasl.username"), None);
}

#[test]
fn test_custom_offset_reset() {
    let connector = KafkaConnector::new(
        KafkaConfig {
            auto_offset_reset: "latest".to_string(),
            ..Default::default()
        },
        500,
    );
    let config = connector.build_consumer_config(&addrs(), "g1");
    assert_eq!(get(&config, "auto.offset.reset"), Some("latest"));
}

#[tokio::test]
async fn test_unreachable_cluster_is_connection_error() {
    let connector = KafkaConnector::new(
        KafkaConfig {
            connect_timeout_ms: 500,
            ..Default::default()
        },
        500,
    );

    // Nothing listens on port 1.
    let err = connector
        .open_producer(&["127.0.0.1:1".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Connection(_)));
}

fn routed_message(partition: i32) -> OwnedMessage {
    OwnedMessage::new(
        Some(b"payload".to_vec()),
        None,
        "qwallet.user.created".to_string(),
        rdkafka::message::Timestamp::NotAvailable,
        partition,
        -1,
        None,
    )
}

#[test]
fn test_delivery_report_success() {
    let report = delivery_report("qwallet.user.created".to_string(), Ok((2, 41)));
    assert_eq!(
        report,
        Ok(DeliveryReceipt {
            topic: "qwallet.user.created".to_string(),
            partition: 2,
            offset: 41,
        })
    );
}

#[test]
fn test_delivery_failure_keeps_partition() {
    let error = KafkaError::MessageProduction(rdkafka::types::RDKafkaErrorCode::MessageTimedOut);
    let report = delivery_report(
        "qwallet.user.created".to_string(),
        Err((error, routed_message(3))),
    );

    let err = report.unwrap_err();
    assert_eq!(err.topic, "qwallet.user.created");
    assert_eq!(err.partition, Some(3));
    assert!(!err.reason.is_empty());
    assert_eq!(DeliveryResult::failed(err).partition, Some(3));
}

#[test]
fn test_ack_offsets_point_past_consumed_message() {
    let position = MessagePosition {
        topic: "qwallet.account.updated".to_string(),
        partition: 1,
        offset: 9,
    };
    let offsets = ack_offsets(&position).unwrap();
    let elem = offsets
        .find_partition("qwallet.account.updated", 1)
        .unwrap();
    assert_eq!(elem.offset(), Offset::Offset(10));
}

#[tokio::test]
async fn test_ack_on_unassigned_partition_is_ack_error() {
    let connector = KafkaConnector::new(KafkaConfig::default(), 500);
    let consumer: StreamConsumer = connector
        .build_consumer_config(&addrs(), "g1")
        .create()
        .unwrap();
    let mut transport = KafkaConsumer {
        consumer: Arc::new(consumer),
    };

    // Never subscribed, so nothing is assigned and the offset cannot be stored.
    let err = transport
        .ack(&MessagePosition {
            topic: "qwallet.account.updated".to_string(),
            partition: 0,
            offset: 4,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Ack(_)));
}
