//! Handler dispatch.
//!
//! A `Dispatcher` either fans each message out to registered handlers, in
//! registration order and best-effort, or forwards it to an output channel.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;

use super::consumer::CancelSignal;
use super::envelope::Envelope;
use super::observer::{BusObserver, TracingObserver};
use super::schema::{DecodedRecord, SchemaRegistry};
use super::{BusError, Result};

/// Handler for processing messages from the bus.
pub trait Handler: Send + Sync {
    /// Name used when reporting failures.
    fn name(&self) -> &str;

    /// Process one message. Every handler sees the same envelope.
    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, Result<()>>;
}

/// Handler backed by a closure. See [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, Result<()>> {
        (self.f)(envelope).boxed()
    }
}

/// Handler that decodes the payload before calling a closure. See [`decoding`].
pub struct DecodingHandler<F> {
    name: String,
    registry: Arc<SchemaRegistry>,
    f: F,
}

/// Wrap a closure that receives the payload decoded by topic schema.
///
/// A payload that cannot be decoded fails the handler with
/// `BusError::Decoding`; the dispatcher reports it and drops the message.
pub fn decoding<F, Fut>(
    name: impl Into<String>,
    registry: Arc<SchemaRegistry>,
    f: F,
) -> DecodingHandler<F>
where
    F: Fn(DecodedRecord, Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    DecodingHandler {
        name: name.into(),
        registry,
        f,
    }
}

impl<F, Fut> Handler for DecodingHandler<F>
where
    F: Fn(DecodedRecord, Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, Result<()>> {
        match self.registry.decode_envelope(&envelope) {
            Ok(record) => (self.f)(record, envelope).boxed(),
            Err(e) => futures::future::ready(Err(e)).boxed(),
        }
    }
}

/// Where a dispatcher delivers messages when it is not running handlers.
#[derive(Debug, Clone)]
pub enum OutputChannel {
    Bounded(mpsc::Sender<Envelope>),
    Unbounded(mpsc::UnboundedSender<Envelope>),
}

/// Result of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// Every handler succeeded, or the message was forwarded.
    Success,
    /// This many handlers failed; the others still ran.
    HandlerFailed(usize),
    /// A blocked forward was given up when cancellation fired.
    Abandoned,
    /// The output channel's receiver is gone; the message was dropped.
    ChannelClosed,
}

impl DispatchResult {
    /// Returns true if the message should be acknowledged.
    ///
    /// Handler failures are acked too: redelivery would run the handlers that
    /// already succeeded a second time. A message that never reached the
    /// output channel is not.
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::Abandoned | Self::ChannelClosed)
    }

    /// Returns true if all handlers succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

enum Target {
    Handlers(Vec<Box<dyn Handler>>),
    Channel(OutputChannel),
}

/// Routes each consumed message to its handlers or output channel.
pub struct Dispatcher {
    target: Target,
    observer: Arc<dyn BusObserver>,
}

impl Dispatcher {
    /// Run `handlers` in order for every message.
    pub fn handlers(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self {
            target: Target::Handlers(handlers),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Forward every message to `output`.
    pub fn channel(output: OutputChannel) -> Self {
        Self {
            target: Target::Channel(output),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Number of registered handlers (zero in channel mode).
    pub fn handler_count(&self) -> usize {
        match &self.target {
            Target::Handlers(handlers) => handlers.len(),
            Target::Channel(_) => 0,
        }
    }

    /// Deliver one message.
    ///
    /// `cancel` only matters for a bounded channel whose send would block.
    pub async fn dispatch(&self, envelope: Envelope, cancel: &CancelSignal) -> DispatchResult {
        match &self.target {
            Target::Handlers(handlers) => {
                dispatch_to_handlers(handlers, &Arc::new(envelope), self.observer.as_ref()).await
            }
            Target::Channel(OutputChannel::Unbounded(tx)) => match tx.send(envelope) {
                Ok(()) => DispatchResult::Success,
                Err(mpsc::error::SendError(envelope)) => {
                    self.observer.output_closed(&envelope);
                    DispatchResult::ChannelClosed
                }
            },
            Target::Channel(OutputChannel::Bounded(tx)) => {
                let permit = tokio::select! {
                    permit = tx.reserve() => permit,
                    _ = cancel.cancelled() => {
                        self.observer.send_abandoned(&envelope);
                        return DispatchResult::Abandoned;
                    }
                };
                match permit {
                    Ok(permit) => {
                        permit.send(envelope);
                        DispatchResult::Success
                    }
                    Err(_) => {
                        self.observer.output_closed(&envelope);
                        DispatchResult::ChannelClosed
                    }
                }
            }
        }
    }
}

/// Dispatch an envelope to all handlers.
///
/// Calls each handler in sequence, reporting errors but continuing to
/// subsequent handlers. Decode failures are reported as drops.
pub async fn dispatch_to_handlers(
    handlers: &[Box<dyn Handler>],
    envelope: &Arc<Envelope>,
    observer: &dyn BusObserver,
) -> DispatchResult {
    let mut failed = 0;

    for handler in handlers {
        match handler.handle(Arc::clone(envelope)).await {
            Ok(()) => {}
            Err(e @ BusError::Decoding { .. }) => {
                observer.decode_dropped(handler.name(), envelope, &e);
                failed += 1;
            }
            Err(e) => {
                observer.handler_failed(handler.name(), envelope, &e);
                failed += 1;
            }
        }
    }

    if failed == 0 {
        DispatchResult::Success
    } else {
        DispatchResult::HandlerFailed(failed)
    }
}
