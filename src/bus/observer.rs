//! Observability hooks for bus events.
//!
//! Producers, consumers and dispatchers report what happened to each message
//! through a `BusObserver`. The default `TracingObserver` writes structured
//! logs; with the `otel` feature `MetricsObserver` also records counters.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::consumer::ConsumerState;
use super::envelope::{DeliveryResult, Envelope, MessagePosition};
use super::BusError;
use crate::utils::duration_ms;

/// Receives per-message bus events. Every method defaults to a no-op.
pub trait BusObserver: Send + Sync {
    /// A publish completed, successfully or not.
    fn published(&self, _result: &DeliveryResult, _elapsed: Duration) {}

    /// A publish was refused before reaching the broker.
    fn publish_rejected(&self, _topic: &str, _error: &BusError) {}

    /// A poll returned an error; the consumer keeps polling.
    fn poll_failed(&self, _group_id: &str, _error: &BusError) {}

    /// A message was received and is about to be dispatched.
    fn received(&self, _envelope: &Envelope) {}

    /// A handler returned an error; remaining handlers still run.
    fn handler_failed(&self, _handler: &str, _envelope: &Envelope, _error: &BusError) {}

    /// A payload could not be decoded and the message was dropped.
    fn decode_dropped(&self, _handler: &str, _envelope: &Envelope, _error: &BusError) {}

    /// A forward to the output channel was abandoned on cancellation.
    fn send_abandoned(&self, _envelope: &Envelope) {}

    /// The output channel's receiver is gone; the message is left unacknowledged.
    fn output_closed(&self, _envelope: &Envelope) {}

    /// Storing the consumed offset failed.
    fn ack_failed(&self, _position: &MessagePosition, _error: &BusError) {}

    /// The consumer moved to a new lifecycle state.
    fn state_changed(&self, _group_id: &str, _state: ConsumerState) {}
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BusObserver for NoopObserver {}

/// Observer that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BusObserver for TracingObserver {
    fn published(&self, result: &DeliveryResult, elapsed: Duration) {
        match &result.error {
            None => debug!(
                topic = %result.topic,
                partition = ?result.partition,
                offset = ?result.offset,
                elapsed_ms = duration_ms(elapsed),
                "Message delivered"
            ),
            Some(e) => error!(
                topic = %result.topic,
                error = %e,
                elapsed_ms = duration_ms(elapsed),
                "Message delivery failed"
            ),
        }
    }

    fn publish_rejected(&self, topic: &str, error: &BusError) {
        error!(topic = %topic, error = %error, "Publish rejected");
    }

    fn poll_failed(&self, group_id: &str, error: &BusError) {
        match error {
            BusError::PollTimeout { .. } => debug!(group_id = %group_id, "Poll timed out"),
            _ => warn!(group_id = %group_id, error = %error, "Poll failed"),
        }
    }

    fn received(&self, envelope: &Envelope) {
        debug!(
            topic = %envelope.topic,
            key = ?envelope.key_lossy(),
            partition = ?envelope.partition,
            offset = ?envelope.offset,
            "Received message"
        );
    }

    fn handler_failed(&self, handler: &str, envelope: &Envelope, error: &BusError) {
        error!(
            handler = %handler,
            topic = %envelope.topic,
            offset = ?envelope.offset,
            error = %error,
            "Handler failed"
        );
    }

    fn decode_dropped(&self, handler: &str, envelope: &Envelope, error: &BusError) {
        error!(
            handler = %handler,
            topic = %envelope.topic,
            offset = ?envelope.offset,
            payload_len = envelope.payload.len(),
            error = %error,
            "Failed to decode message, dropping"
        );
    }

    fn send_abandoned(&self, envelope: &Envelope) {
        info!(
            topic = %envelope.topic,
            offset = ?envelope.offset,
            "Output channel send abandoned on shutdown"
        );
    }

    fn output_closed(&self, envelope: &Envelope) {
        warn!(
            topic = %envelope.topic,
            offset = ?envelope.offset,
            "Output channel closed, stopping consumer"
        );
    }

    fn ack_failed(&self, position: &MessagePosition, error: &BusError) {
        error!(
            topic = %position.topic,
            partition = position.partition,
            offset = position.offset,
            error = %error,
            "Failed to store offset"
        );
    }

    fn state_changed(&self, group_id: &str, state: ConsumerState) {
        debug!(group_id = %group_id, state = %state, "Consumer state changed");
    }
}

/// Observer that records OpenTelemetry counters, then logs like
/// `TracingObserver`.
#[cfg(feature = "otel")]
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

#[cfg(feature = "otel")]
mod metrics_observer {
    use super::*;
    use crate::utils::metrics::{
        group_attr, handler_attr, outcome_attr, topic_attr, BUS_DECODE_DROPPED_TOTAL,
        BUS_HANDLER_FAILURES_TOTAL, BUS_MESSAGES_RECEIVED_TOTAL, BUS_POLL_ERRORS_TOTAL,
        BUS_PUBLISH_DURATION, BUS_PUBLISH_TOTAL,
    };

    impl BusObserver for MetricsObserver {
        fn published(&self, result: &DeliveryResult, elapsed: Duration) {
            let outcome = if result.success { "delivered" } else { "failed" };
            let attrs = [topic_attr(&result.topic), outcome_attr(outcome)];
            BUS_PUBLISH_TOTAL.add(1, &attrs);
            BUS_PUBLISH_DURATION.record(elapsed.as_secs_f64(), &attrs);
            TracingObserver.published(result, elapsed);
        }

        fn publish_rejected(&self, topic: &str, error: &BusError) {
            BUS_PUBLISH_TOTAL.add(1, &[topic_attr(topic), outcome_attr("rejected")]);
            TracingObserver.publish_rejected(topic, error);
        }

        fn poll_failed(&self, group_id: &str, error: &BusError) {
            if !matches!(error, BusError::PollTimeout { .. }) {
                BUS_POLL_ERRORS_TOTAL.add(1, &[group_attr(group_id)]);
            }
            TracingObserver.poll_failed(group_id, error);
        }

        fn received(&self, envelope: &Envelope) {
            BUS_MESSAGES_RECEIVED_TOTAL.add(1, &[topic_attr(&envelope.topic)]);
            TracingObserver.received(envelope);
        }

        fn handler_failed(&self, handler: &str, envelope: &Envelope, error: &BusError) {
            BUS_HANDLER_FAILURES_TOTAL.add(1, &[handler_attr(handler), topic_attr(&envelope.topic)]);
            TracingObserver.handler_failed(handler, envelope, error);
        }

        fn decode_dropped(&self, handler: &str, envelope: &Envelope, error: &BusError) {
            BUS_DECODE_DROPPED_TOTAL.add(1, &[topic_attr(&envelope.topic)]);
            TracingObserver.decode_dropped(handler, envelope, error);
        }

        fn send_abandoned(&self, envelope: &Envelope) {
            TracingObserver.send_abandoned(envelope);
        }

        fn output_closed(&self, envelope: &Envelope) {
            TracingObserver.output_closed(envelope);
        }

        fn ack_failed(&self, position: &MessagePosition, error: &BusError) {
            TracingObserver.ack_failed(position, error);
        }

        fn state_changed(&self, group_id: &str, state: ConsumerState) {
            TracingObserver.state_changed(group_id, state);
        }
    }
}
