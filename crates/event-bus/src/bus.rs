use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{Event, EventType};

/// Error type returned by event handlers.
///
/// The bus logs handler errors; it never retries or escalates them, so any
/// boxed error is acceptable here.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A reactive handler invoked for each event of a subscribed type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles a single event.
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError>;
}

/// Publish/subscribe contract of the event bus.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Enqueues an event for asynchronous delivery.
    ///
    /// Blocks while the internal buffer is full. If the bus is stopped
    /// while waiting, fails with [`crate::BusError::Cancelled`] and the
    /// event is dropped. This is the sole backpressure mechanism.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Registers a handler for a given event type.
    ///
    /// Multiple handlers may register for the same type; all receive every
    /// matching event. There is no unsubscribe.
    async fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Result<()>;

    /// Starts the dispatch loop.
    async fn start(&self) -> Result<()>;

    /// Stops the dispatch loop without draining the buffer.
    ///
    /// In-flight handler invocations are abandoned, not awaited.
    async fn stop(&self) -> Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
///
/// Useful for lightweight observers such as terminal-event watchers.
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    /// Wraps the given closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        (self.0)(event).await
    }
}
