use super::*;

#[test]
fn test_messaging_config_default() {
    let config = MessagingConfig::default();
    assert_eq!(config.messaging_type, MessagingType::Memory);
    assert_eq!(config.brokers, vec![memory::MEMORY_BROKER_ADDRESS.to_string()]);
    assert_eq!(config.poll_timeout(), None);
    assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    assert_eq!(config.kafka.auto_offset_reset, "earliest");
}

#[test]
fn test_poll_timeout_from_millis() {
    let config = MessagingConfig {
        poll_timeout_ms: Some(250),
        ..Default::default()
    };
    assert_eq!(config.poll_timeout(), Some(Duration::from_millis(250)));
}

#[test]
fn test_schema_registry_applies_overrides() {
    let mut config = MessagingConfig::default();
    config
        .schemas
        .insert("acct.created".to_string(), SchemaId::User);

    let registry = config.schema_registry();
    assert_eq!(registry.schema_for("acct.created"), Some(SchemaId::User));
    assert_eq!(
        registry.schema_for(Topic::ACCOUNT_CREATED.name),
        Some(SchemaId::Account)
    );
}

#[test]
fn test_bus_error_transient() {
    assert!(BusError::Poll("x".to_string()).is_transient());
    assert!(BusError::PollTimeout { waited_ms: 5 }.is_transient());
    assert!(!BusError::Connection("x".to_string()).is_transient());
}

#[test]
fn test_ack_error_is_not_a_poll_failure() {
    let err = BusError::Ack("Failed to store offset: state".to_string());
    assert!(!err.is_transient());
    assert_eq!(err.to_string(), "Ack failed: Failed to store offset: state");
}

#[test]
fn test_handler_error_display() {
    let err = BusError::handler("audit", "disk full");
    assert_eq!(err.to_string(), "Handler 'audit' failed: disk full");
}

#[tokio::test]
async fn test_init_connector_memory() {
    let config = MessagingConfig::default();
    let connector = init_connector(&config).unwrap();
    let producer = connector.open_producer(&config.brokers).await.unwrap();
    assert!(producer.publish("t1", None, "x").await.unwrap().success);
}

#[cfg(not(feature = "kafka"))]
#[test]
fn test_init_connector_kafka_requires_feature() {
    let config = MessagingConfig {
        messaging_type: MessagingType::Kafka,
        ..Default::default()
    };
    assert!(matches!(
        init_connector(&config),
        Err(BusError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_open_configured_session_requires_group() {
    let config = MessagingConfig {
        topics: vec!["t1".to_string()],
        ..Default::default()
    };
    let connector = init_connector(&config).unwrap();
    let err = open_configured_session(connector.as_ref(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_open_configured_session_applies_poll_timeout() {
    let config = MessagingConfig {
        group_id: Some("notification-service".to_string()),
        topics: vec![Topic::USER_CREATED.name.to_string()],
        poll_timeout_ms: Some(100),
        ..Default::default()
    };
    let connector = init_connector(&config).unwrap();
    let session = open_configured_session(connector.as_ref(), &config)
        .await
        .unwrap();

    assert_eq!(session.group_id(), "notification-service");
    assert_eq!(session.poll_timeout(), Some(Duration::from_millis(100)));
}
