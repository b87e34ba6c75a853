use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, watch};

use crate::bus::{EventBus, EventHandler};
use crate::error::{BusError, Result};
use crate::event::{Event, EventType};

/// Default capacity of the publish buffer.
pub const DEFAULT_CAPACITY: usize = 1024;

type HandlerRegistry = Arc<RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>>;

/// Single-process event bus backed by a bounded channel.
///
/// A single dispatch loop dequeues events in publish order and spawns one
/// task per (event, handler) pair without joining them. The handler registry
/// is owned by the bus instance; there is no process-wide state.
pub struct InMemoryEventBus {
    handlers: HandlerRegistry,
    tx: mpsc::Sender<Event>,
    // Taken by the dispatch loop on start; None once started.
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    shutdown: watch::Sender<bool>,
}

impl InMemoryEventBus {
    /// Creates a bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown,
        }
    }

    /// Returns the number of handlers registered for a type.
    pub async fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .await
            .get(&event_type)
            .map_or(0, Vec::len)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(BusError::Cancelled);
        }

        tracing::debug!(
            event_type = %event.event_type,
            saga_id = %event.saga_id,
            source = %event.source,
            "publishing event"
        );

        tokio::select! {
            result = self.tx.send(event) => {
                result.map_err(|_| BusError::Closed)?;
                metrics::counter!("bus_events_published_total").increment(1);
                Ok(())
            }
            _ = shutdown.wait_for(|stopped| *stopped) => Err(BusError::Cancelled),
        }
    }

    async fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
        tracing::debug!(%event_type, "handler subscribed");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or(BusError::AlreadyStarted)?;

        let handlers = Arc::clone(&self.handlers);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(event) => dispatch(&handlers, event).await,
                        None => break,
                    },
                    _ = async {
                        let _ = shutdown.wait_for(|stopped| *stopped).await;
                    } => break,
                }
            }
            tracing::debug!("event bus dispatch loop stopped");
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.send_replace(true);
        Ok(())
    }
}

/// Delivers one event to all handlers registered for its type.
async fn dispatch(handlers: &HandlerRegistry, event: Event) {
    let matching = handlers
        .read()
        .await
        .get(&event.event_type)
        .cloned()
        .unwrap_or_default();

    if matching.is_empty() {
        tracing::debug!(event_type = %event.event_type, "no handlers registered for event");
        return;
    }

    metrics::counter!("bus_events_dispatched_total").increment(1);

    for handler in matching {
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(error) = handler.handle(event.clone()).await {
                metrics::counter!("bus_handler_errors_total").increment(1);
                tracing::warn!(
                    event_type = %event.event_type,
                    saga_id = %event.saga_id,
                    %error,
                    "event handler failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::HandlerError;
    use common::SagaId;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Recorder {
        tx: mpsc::UnboundedSender<Event>,
    }

    impl Recorder {
        fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
            self.tx.send(event).ok();
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: Event) -> std::result::Result<(), HandlerError> {
            Err("handler exploded".into())
        }
    }

    fn sample_event(event_type: EventType) -> Event {
        Event::builder()
            .event_type(event_type)
            .saga_id(SagaId::for_order(&"order-001".into()))
            .source("test")
            .build()
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("recorder channel closed")
    }

    #[tokio::test]
    async fn delivers_events_to_subscribed_handler() {
        let bus = InMemoryEventBus::default();
        let (recorder, mut rx) = Recorder::channel();
        bus.subscribe(EventType::OrderCreateRequested, recorder)
            .await
            .unwrap();
        bus.start().await.unwrap();

        let event = sample_event(EventType::OrderCreateRequested);
        bus.publish(event.clone()).await.unwrap();

        let received = recv(&mut rx).await;
        assert_eq!(received.id, event.id);
        assert_eq!(received.event_type, EventType::OrderCreateRequested);
    }

    #[tokio::test]
    async fn delivers_to_all_handlers_of_the_same_type() {
        let bus = InMemoryEventBus::default();
        let (first, mut rx1) = Recorder::channel();
        let (second, mut rx2) = Recorder::channel();
        bus.subscribe(EventType::SagaCompleted, first).await.unwrap();
        bus.subscribe(EventType::SagaCompleted, second).await.unwrap();
        assert_eq!(bus.handler_count(EventType::SagaCompleted).await, 2);
        bus.start().await.unwrap();

        bus.publish(sample_event(EventType::SagaCompleted))
            .await
            .unwrap();

        recv(&mut rx1).await;
        recv(&mut rx2).await;
    }

    #[tokio::test]
    async fn does_not_deliver_events_of_other_types() {
        let bus = InMemoryEventBus::default();
        let (recorder, mut rx) = Recorder::channel();
        bus.subscribe(EventType::PaymentProcessCompleted, recorder)
            .await
            .unwrap();
        bus.start().await.unwrap();

        bus.publish(sample_event(EventType::OrderCreateRequested))
            .await
            .unwrap();
        bus.publish(sample_event(EventType::PaymentProcessCompleted))
            .await
            .unwrap();

        let received = recv(&mut rx).await;
        assert_eq!(received.event_type, EventType::PaymentProcessCompleted);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handler_failure_does_not_block_other_handlers() {
        let bus = InMemoryEventBus::default();
        let (recorder, mut rx) = Recorder::channel();
        bus.subscribe(EventType::OrderCreateFailed, Arc::new(Failing))
            .await
            .unwrap();
        bus.subscribe(EventType::OrderCreateFailed, recorder)
            .await
            .unwrap();
        bus.start().await.unwrap();

        bus.publish(sample_event(EventType::OrderCreateFailed))
            .await
            .unwrap();

        recv(&mut rx).await;
    }

    #[tokio::test]
    async fn events_published_before_start_are_buffered() {
        let bus = InMemoryEventBus::default();
        let (recorder, mut rx) = Recorder::channel();
        bus.subscribe(EventType::SagaFailed, recorder).await.unwrap();

        bus.publish(sample_event(EventType::SagaFailed)).await.unwrap();
        bus.start().await.unwrap();

        recv(&mut rx).await;
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let bus = InMemoryEventBus::default();
        bus.start().await.unwrap();
        assert!(matches!(bus.start().await, Err(BusError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn publish_after_stop_is_cancelled() {
        let bus = InMemoryEventBus::default();
        bus.start().await.unwrap();
        bus.stop().await.unwrap();

        let result = bus.publish(sample_event(EventType::SagaCompleted)).await;
        assert!(matches!(result, Err(BusError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_unblocks_a_publish_waiting_on_a_full_buffer() {
        let bus = Arc::new(InMemoryEventBus::new(1));
        // Dispatch loop not started, so this fills the buffer.
        bus.publish(sample_event(EventType::SagaCompleted))
            .await
            .unwrap();

        let blocked = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.publish(sample_event(EventType::SagaFailed)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        bus.stop().await.unwrap();
        let result = timeout(Duration::from_secs(1), blocked)
            .await
            .expect("publish did not unblock")
            .unwrap();
        assert!(matches!(result, Err(BusError::Cancelled)));
    }
}
