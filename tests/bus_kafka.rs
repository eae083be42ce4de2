//! Kafka bus integration tests using testcontainers.
//!
//! Run with: cargo test --test bus_kafka --features kafka -- --nocapture
//!
//! Uses Redpanda, a Kafka-compatible broker that starts in a few seconds.

#![cfg(feature = "kafka")]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};
use tokio::sync::mpsc;

use qwallet_shared::bus::{
    self, handler_fn, shutdown_channel, BusError, Connector, Dispatcher, Envelope, Handler,
    KafkaConfig, KafkaConnector, DEFAULT_QUEUE_CAPACITY,
};
use qwallet_shared::proto::UserPayload;

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

/// Generates a unique port in the ephemeral range for testing.
/// Uses a simple hash of the current thread ID and time to get variety.
fn generate_test_port() -> u16 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    unique_suffix().hash(&mut hasher);

    // Use ports in 29000-29999 range (less likely to conflict)
    29000 + (hasher.finish() % 1000) as u16
}

/// Start Redpanda with a fixed port mapping.
///
/// Clients get broker addresses from metadata, not from the bootstrap
/// connection, so the advertised listener must match the host port.
async fn start_kafka() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    let host_port = generate_test_port();
    let container_port = 9092u16;
    let advertised_addr = format!("localhost:{}", host_port);

    // Note: with_wait_for must be called before with_mapped_port due to type constraints
    let image = GenericImage::new("redpandadata/redpanda", "v24.1.1")
        .with_wait_for(WaitFor::message_on_stderr("Successfully started Redpanda"));

    let container = image
        .with_mapped_port(host_port, ContainerPort::Tcp(container_port))
        .with_cmd([
            "redpanda",
            "start",
            "--mode",
            "dev-container",
            "--smp",
            "1",
            "--memory",
            "512M",
            "--overprovisioned",
            "--kafka-addr",
            "0.0.0.0:9092",
            "--advertise-kafka-addr",
            &advertised_addr,
        ])
        .with_startup_timeout(Duration::from_secs(120))
        .start()
        .await
        .expect("Failed to start Redpanda container");

    tokio::time::sleep(Duration::from_secs(3)).await;

    let bootstrap_servers = format!("localhost:{}", host_port);
    println!("Kafka available at: {}", bootstrap_servers);

    (container, bootstrap_servers)
}

fn connector() -> KafkaConnector {
    KafkaConnector::new(KafkaConfig::default(), DEFAULT_QUEUE_CAPACITY)
}

fn forwarding(tx: mpsc::UnboundedSender<Arc<Envelope>>) -> Box<dyn Handler> {
    Box::new(handler_fn("collector", move |envelope: Arc<Envelope>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(envelope);
            Ok(())
        }
    }))
}

#[tokio::test]
async fn test_kafka_publish_confirms_delivery() {
    println!("=== Kafka Delivery Confirmation Test ===");

    let (_container, bootstrap_servers) = start_kafka().await;
    let addresses = vec![bootstrap_servers];
    let topic = format!("qwallet.user.created.{}", unique_suffix());

    let producer = connector()
        .open_producer(&addresses)
        .await
        .expect("Failed to open producer");

    let user = UserPayload {
        id: "u1".to_string(),
        name: "Ada".to_string(),
        ..Default::default()
    };
    let result = producer
        .publish(&topic, Some(Bytes::from_static(b"u1")), bus::encode(&user).unwrap())
        .await
        .expect("Publish should be accepted");

    assert!(result.success, "delivery failed: {:?}", result.error);
    assert_eq!(result.topic, topic);
    assert!(result.partition.is_some());
    assert!(result.offset.is_some());

    producer.close().await;
    println!("=== Kafka Delivery Confirmation Test PASSED ===");
}

#[tokio::test]
async fn test_kafka_consume_in_order_and_resume() {
    println!("=== Kafka Consume Order Test ===");

    let (_container, bootstrap_servers) = start_kafka().await;
    let addresses = vec![bootstrap_servers];
    let topic = format!("qwallet.account.updated.{}", unique_suffix());
    let group_id = format!("test-group-{}", unique_suffix());
    let connector = connector();

    let producer = connector
        .open_producer(&addresses)
        .await
        .expect("Failed to open producer");

    // Same key lands on one partition, which keeps the order.
    for i in 0..5 {
        let result = producer
            .publish(&topic, Some(Bytes::from_static(b"acc-1")), format!("m{}", i))
            .await
            .unwrap();
        assert!(result.success, "delivery failed: {:?}", result.error);
    }

    let session = connector
        .open_consumer_session(&addresses, &group_id, &[topic.clone()])
        .await
        .expect("Failed to open consumer session");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (shutdown, cancel) = shutdown_channel();
    let task = tokio::spawn(session.run(Dispatcher::handlers(vec![forwarding(tx)]), cancel));

    let mut bodies = Vec::new();
    for _ in 0..5 {
        let envelope = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("Timed out")
            .expect("Channel closed");
        bodies.push(String::from_utf8_lossy(&envelope.payload).into_owned());
    }
    assert_eq!(bodies, vec!["m0", "m1", "m2", "m3", "m4"]);

    shutdown.cancel();
    let report = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("Consumer did not stop")
        .unwrap();
    assert_eq!(report.dispatched, 5);

    println!("=== Kafka Consume Order Test PASSED ===");
}

#[tokio::test]
async fn test_kafka_bounded_poll_times_out() {
    println!("=== Kafka Bounded Poll Test ===");

    let (_container, bootstrap_servers) = start_kafka().await;
    let addresses = vec![bootstrap_servers];
    let topic = format!("qwallet.user.deleted.{}", unique_suffix());
    let group_id = format!("test-idle-{}", unique_suffix());

    let session = connector()
        .open_consumer_session(&addresses, &group_id, &[topic])
        .await
        .expect("Failed to open consumer session")
        .with_poll_timeout(Some(Duration::from_millis(200)));

    let (tx, _rx) = mpsc::unbounded_channel();
    let (shutdown, cancel) = shutdown_channel();
    let task = tokio::spawn(session.run(Dispatcher::handlers(vec![forwarding(tx)]), cancel));

    tokio::time::sleep(Duration::from_secs(2)).await;
    shutdown.cancel();

    let report = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("Consumer did not stop")
        .unwrap();
    assert_eq!(report.polled, 0);
    assert!(report.poll_errors > 0);

    println!("=== Kafka Bounded Poll Test PASSED ===");
}

#[tokio::test]
async fn test_kafka_unreachable_broker_is_connection_error() {
    let result = connector()
        .open_producer(&["127.0.0.1:1".to_string()])
        .await;
    assert!(matches!(result, Err(BusError::Connection(_))));
}
