//! OTel-native metrics instruments.
//!
//! Centralized metric definitions using OpenTelemetry meters.
//! All instruments are lazily initialized and feature-gated behind `otel`.
//!
//! Naming follows OTel semantic conventions (dot-separated).
//! The OTel Collector / Prometheus exporter converts dots to underscores.

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("qwallet"));

// ============================================================================
// Producer
// ============================================================================

/// Duration from `publish` to the delivery report.
pub static BUS_PUBLISH_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("qwallet.bus.publish.duration")
        .with_description("Time from publish to delivery report")
        .with_unit("s")
        .build()
});

/// Total publish calls, by outcome (delivered, failed, rejected).
pub static BUS_PUBLISH_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("qwallet.bus.publish.total")
        .with_description("Total publish calls")
        .build()
});

// ============================================================================
// Consumer
// ============================================================================

/// Total messages received by consumers.
pub static BUS_MESSAGES_RECEIVED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("qwallet.bus.received.total")
        .with_description("Total messages received")
        .build()
});

/// Total poll errors, excluding idle timeouts.
pub static BUS_POLL_ERRORS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("qwallet.bus.poll.errors.total")
        .with_description("Total consumer poll errors")
        .build()
});

// ============================================================================
// Dispatch
// ============================================================================

/// Total handler failures.
pub static BUS_HANDLER_FAILURES_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("qwallet.bus.handler.failures.total")
        .with_description("Total handler failures")
        .build()
});

/// Total messages dropped because their payload could not be decoded.
pub static BUS_DECODE_DROPPED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("qwallet.bus.decode.dropped.total")
        .with_description("Total messages dropped on decode failure")
        .build()
});

// ============================================================================
// Helper
// ============================================================================

/// Create a topic label.
pub fn topic_attr(topic: &str) -> KeyValue {
    KeyValue::new("topic", topic.to_string())
}

/// Create an outcome label.
pub fn outcome_attr(outcome: &str) -> KeyValue {
    KeyValue::new("outcome", outcome.to_string())
}

/// Create a consumer group label.
pub fn group_attr(group_id: &str) -> KeyValue {
    KeyValue::new("group_id", group_id.to_string())
}

/// Create a handler label.
pub fn handler_attr(handler: &str) -> KeyValue {
    KeyValue::new("handler", handler.to_string())
}
