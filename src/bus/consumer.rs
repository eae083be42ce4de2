//! Consumer poll loop.
//!
//! A `ConsumerSession` is driven by exactly one task through `run`. The loop
//! checks the cancel signal before each poll, dispatches every message it
//! receives, then acknowledges it. Poll errors are reported and the loop keeps
//! going; only cancellation ends it.

use std::fmt;

use tokio::sync::watch;
use tracing::info;

use super::connection::ConsumerSession;
use super::dispatch::{DispatchResult, Dispatcher};
use crate::utils::duration_ms;

// ============================================================================
// Cancellation
// ============================================================================

/// Create a linked shutdown handle and cancel signal.
pub fn shutdown_channel() -> (ShutdownHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { cancel: tx }, CancelSignal { cancel: rx })
}

/// Trigger side of a cancel signal.
///
/// Dropping the handle without calling `cancel` leaves its signals unfired.
#[derive(Debug)]
pub struct ShutdownHandle {
    cancel: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signal every linked `CancelSignal`.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Another signal linked to this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            cancel: self.cancel.subscribe(),
        }
    }
}

/// Observes a `ShutdownHandle`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    cancel: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { cancel: rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Consumer lifecycle: `Starting -> Polling -> (Delivering -> Polling)* -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    Polling,
    Delivering,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Starting => "starting",
            ConsumerState::Polling => "polling",
            ConsumerState::Delivering => "delivering",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What a consumer did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Messages returned by the broker.
    pub polled: u64,
    /// Messages handed to every handler or forwarded to the output channel.
    pub dispatched: u64,
    /// Polls that returned an error, including bounded-wait timeouts.
    pub poll_errors: u64,
    /// Individual handler failures, including decode drops.
    pub handler_failures: u64,
    /// Messages left unacknowledged because the output channel was closed.
    pub dropped: u64,
    /// Output channel sends abandoned on cancellation.
    pub abandoned: u64,
}

// ============================================================================
// Poll loop
// ============================================================================

impl ConsumerSession {
    /// Poll and dispatch until `cancel` fires or the output channel closes.
    ///
    /// A message already returned by a poll is dispatched and acknowledged
    /// before cancellation is checked again. The exceptions are a bounded
    /// output channel send blocked when cancellation fires, and a send to an
    /// output channel whose receiver is gone. Either way the message is left
    /// unacknowledged for redelivery and the session stops.
    pub async fn run(mut self, dispatcher: Dispatcher, cancel: CancelSignal) -> ConsumerReport {
        let mut report = ConsumerReport::default();
        self.transition(ConsumerState::Starting);

        info!(
            group_id = %self.group_id,
            topics = ?self.topics,
            poll_timeout_ms = ?self.poll_timeout.map(duration_ms),
            "Consumer started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.transition(ConsumerState::Polling);

            let polled = match self.poll_timeout {
                Some(wait) => self.transport.poll(Some(wait)).await,
                // An idle infinite wait has not handed out a message yet, so
                // racing it against the signal loses nothing.
                None => tokio::select! {
                    polled = self.transport.poll(None) => polled,
                    _ = cancel.cancelled() => break,
                },
            };

            let envelope = match polled {
                Ok(envelope) => envelope,
                Err(e) => {
                    report.poll_errors += 1;
                    self.observer.poll_failed(&self.group_id, &e);
                    continue;
                }
            };

            report.polled += 1;
            self.transition(ConsumerState::Delivering);
            self.observer.received(&envelope);
            let position = envelope.position();

            let result = dispatcher.dispatch(envelope, &cancel).await;
            match result {
                DispatchResult::Success => report.dispatched += 1,
                DispatchResult::HandlerFailed(failed) => {
                    report.dispatched += 1;
                    report.handler_failures += failed as u64;
                }
                DispatchResult::ChannelClosed => report.dropped += 1,
                DispatchResult::Abandoned => report.abandoned += 1,
            }
            if !result.should_ack() {
                break;
            }

            if let Some(position) = position {
                if let Err(e) = self.transport.ack(&position).await {
                    self.observer.ack_failed(&position, &e);
                }
            }
        }

        self.transition(ConsumerState::Stopped);
        info!(
            group_id = %self.group_id,
            polled = report.polled,
            dispatched = report.dispatched,
            poll_errors = report.poll_errors,
            handler_failures = report.handler_failures,
            "Consumer stopped"
        );
        report
    }

    fn transition(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            self.observer.state_changed(&self.group_id, state);
        }
    }
}
