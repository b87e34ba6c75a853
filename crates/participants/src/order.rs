//! Order service: commits and cancels orders.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use common::{Order, OrderId, SagaId};
use event_bus::{Event, EventBus, EventHandler, EventType, HandlerError};

/// Source tag carried by events this service publishes.
pub const SOURCE: &str = "order-service";

/// Lifecycle status of a committed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// The order was created and committed.
    Confirmed,
    /// The order was cancelled by a compensation request.
    Cancelled,
}

#[derive(Debug)]
struct OrderRecord {
    order: Order,
    status: OrderStatus,
}

/// Handles `order.create.requested` and `order.cancel.requested`.
///
/// Order creation has no domain policy that can reject it; the only failure
/// it reports is a malformed request payload.
pub struct OrderService<B: EventBus> {
    bus: Arc<B>,
    orders: RwLock<HashMap<OrderId, OrderRecord>>,
    latency: Duration,
}

impl<B: EventBus> OrderService<B> {
    /// Creates an order service with no simulated latency.
    pub fn new(bus: Arc<B>) -> Arc<Self> {
        Self::with_latency(bus, Duration::ZERO)
    }

    /// Creates an order service that sleeps for `latency` per request,
    /// simulating external I/O.
    pub fn with_latency(bus: Arc<B>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            bus,
            orders: RwLock::new(HashMap::new()),
            latency,
        })
    }

    /// Subscribes this service to its request event types.
    pub async fn register(self: &Arc<Self>) -> event_bus::Result<()> {
        for event_type in [EventType::OrderCreateRequested, EventType::OrderCancelRequested] {
            self.bus
                .subscribe(event_type, Arc::clone(self) as Arc<dyn EventHandler>)
                .await?;
        }
        Ok(())
    }

    /// Number of orders this service has seen, cancelled ones included.
    pub fn order_count(&self) -> usize {
        self.orders.read().unwrap().len()
    }

    /// Status of an order, if this service has a record of it.
    pub fn status_of(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.orders
            .read()
            .unwrap()
            .get(order_id)
            .map(|record| record.status)
    }

    async fn create(&self, event: &Event) -> event_bus::Result<()> {
        let order: Order = match event.payload_as() {
            Ok(order) => order,
            Err(error) => return self.fail(event, EventType::OrderCreateFailed, error).await,
        };

        self.orders.write().unwrap().insert(
            order.order_id.clone(),
            OrderRecord {
                order: order.clone(),
                status: OrderStatus::Confirmed,
            },
        );
        tracing::info!(saga_id = %event.saga_id, order_id = %order.order_id, "order created");

        self.outcome(&event.saga_id, EventType::OrderCreateCompleted, &order)
            .await
    }

    async fn cancel(&self, event: &Event) -> event_bus::Result<()> {
        let order: Order = match event.payload_as() {
            Ok(order) => order,
            Err(error) => return self.fail(event, EventType::OrderCancelFailed, error).await,
        };

        {
            let mut orders = self.orders.write().unwrap();
            match orders.get_mut(&order.order_id) {
                Some(record) => {
                    record.status = OrderStatus::Cancelled;
                    tracing::info!(saga_id = %event.saga_id, order_id = %order.order_id, "order cancelled");
                }
                None => {
                    // Undo of a step that never committed here: nothing to
                    // do, and the undo is still acknowledged.
                    tracing::warn!(
                        saga_id = %event.saga_id,
                        order_id = %order.order_id,
                        "cancel requested for unknown order"
                    );
                }
            }
        }

        self.outcome(&event.saga_id, EventType::OrderCancelCompleted, &order)
            .await
    }

    async fn outcome(
        &self,
        saga_id: &SagaId,
        event_type: EventType,
        order: &Order,
    ) -> event_bus::Result<()> {
        let event = Event::builder()
            .event_type(event_type)
            .saga_id(saga_id.clone())
            .payload(order)?
            .source(SOURCE)
            .build();
        self.bus.publish(event).await
    }

    async fn fail(
        &self,
        request: &Event,
        event_type: EventType,
        error: impl std::fmt::Display,
    ) -> event_bus::Result<()> {
        let reason = format!("malformed order payload: {error}");
        tracing::warn!(saga_id = %request.saga_id, %reason, "rejecting request");
        let event = Event::builder()
            .event_type(event_type)
            .saga_id(request.saga_id.clone())
            .payload_raw(serde_json::json!({ "reason": reason }))
            .source(SOURCE)
            .build();
        self.bus.publish(event).await
    }
}

#[async_trait]
impl<B: EventBus> EventHandler for OrderService<B> {
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match event.event_type {
            EventType::OrderCreateRequested => self.create(&event).await?,
            EventType::OrderCancelRequested => self.cancel(&event).await?,
            other => {
                tracing::debug!(event_type = %other, "order service ignoring event type");
            }
        }
        Ok(())
    }
}
