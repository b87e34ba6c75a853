//! Inventory service: reserves and releases product stock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use common::{Order, ProductId, SagaId};
use event_bus::{Event, EventBus, EventHandler, EventType, HandlerError};

/// Source tag carried by events this service publishes.
pub const SOURCE: &str = "inventory-service";

#[derive(Debug)]
struct Reservation {
    product_id: ProductId,
    quantity: u32,
}

#[derive(Debug, Default)]
struct InventoryState {
    stock: HashMap<ProductId, u32>,
    reservations: HashMap<String, Reservation>,
    next_id: u32,
}

/// Handles `inventory.reserve.requested` and `inventory.release.requested`.
///
/// Policy: a reservation fails when the requested quantity exceeds the
/// available stock. A release restores the reserved quantity; releasing an
/// unknown reservation is acknowledged without effect, so replayed undo
/// requests cannot inflate stock.
pub struct InventoryService<B: EventBus> {
    bus: Arc<B>,
    state: RwLock<InventoryState>,
    latency: Duration,
}

impl<B: EventBus> InventoryService<B> {
    /// Creates an inventory service with no simulated latency.
    pub fn new(bus: Arc<B>) -> Arc<Self> {
        Self::with_latency(bus, Duration::ZERO)
    }

    /// Creates an inventory service that sleeps for `latency` per request.
    pub fn with_latency(bus: Arc<B>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            bus,
            state: RwLock::new(InventoryState::default()),
            latency,
        })
    }

    /// Subscribes this service to its request event types.
    pub async fn register(self: &Arc<Self>) -> event_bus::Result<()> {
        for event_type in [
            EventType::InventoryReserveRequested,
            EventType::InventoryReleaseRequested,
        ] {
            self.bus
                .subscribe(event_type, Arc::clone(self) as Arc<dyn EventHandler>)
                .await?;
        }
        Ok(())
    }

    /// Seeds (or replaces) the stock level of a product.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.state
            .write()
            .unwrap()
            .stock
            .insert(product_id.into(), quantity);
    }

    /// Stock currently available for a product.
    pub fn available(&self, product_id: &ProductId) -> u32 {
        self.state
            .read()
            .unwrap()
            .stock
            .get(product_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of active (not yet released) reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    async fn reserve(&self, event: &Event) -> event_bus::Result<()> {
        let mut order: Order = match event.payload_as() {
            Ok(order) => order,
            Err(error) => {
                return self
                    .fail(event, format!("malformed order payload: {error}"))
                    .await;
            }
        };

        let reserved = {
            let mut state = self.state.write().unwrap();
            let available = state.stock.get(&order.product_id).copied().unwrap_or(0);
            if order.quantity > available {
                Err(format!(
                    "insufficient stock for {}: requested {}, available {}",
                    order.product_id, order.quantity, available
                ))
            } else {
                state.next_id += 1;
                let reservation_id = format!("res-{:04}", state.next_id);
                *state.stock.entry(order.product_id.clone()).or_insert(0) -= order.quantity;
                state.reservations.insert(
                    reservation_id.clone(),
                    Reservation {
                        product_id: order.product_id.clone(),
                        quantity: order.quantity,
                    },
                );
                Ok(reservation_id)
            }
        };

        match reserved {
            Ok(reservation_id) => {
                tracing::info!(
                    saga_id = %event.saga_id,
                    product_id = %order.product_id,
                    quantity = order.quantity,
                    %reservation_id,
                    "inventory reserved"
                );
                order.reservation_id = Some(reservation_id);
                self.outcome(&event.saga_id, EventType::InventoryReserveCompleted, &order)
                    .await
            }
            Err(reason) => self.fail(event, reason).await,
        }
    }

    async fn release(&self, event: &Event) -> event_bus::Result<()> {
        let order: Order = match event.payload_as() {
            Ok(order) => order,
            Err(error) => {
                // An undo with a bad payload cannot be acted on; acknowledge
                // it so compensation can make progress.
                tracing::warn!(saga_id = %event.saga_id, %error, "release request without usable payload");
                return self
                    .outcome_raw(&event.saga_id, EventType::InventoryReleaseCompleted)
                    .await;
            }
        };

        {
            let mut state = self.state.write().unwrap();
            match order
                .reservation_id
                .as_ref()
                .and_then(|id| state.reservations.remove(id))
            {
                Some(reservation) => {
                    *state.stock.entry(reservation.product_id.clone()).or_insert(0) +=
                        reservation.quantity;
                    tracing::info!(
                        saga_id = %event.saga_id,
                        product_id = %reservation.product_id,
                        quantity = reservation.quantity,
                        "reservation released"
                    );
                }
                None => {
                    tracing::warn!(
                        saga_id = %event.saga_id,
                        reservation_id = order.reservation_id.as_deref().unwrap_or("<none>"),
                        "release requested for unknown reservation"
                    );
                }
            }
        }

        self.outcome(&event.saga_id, EventType::InventoryReleaseCompleted, &order)
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

    async fn outcome_raw(&self, saga_id: &SagaId, event_type: EventType) -> event_bus::Result<()> {
        let event = Event::builder()
            .event_type(event_type)
            .saga_id(saga_id.clone())
            .source(SOURCE)
            .build();
        self.bus.publish(event).await
    }

    async fn fail(&self, request: &Event, reason: String) -> event_bus::Result<()> {
        tracing::warn!(saga_id = %request.saga_id, %reason, "inventory reservation rejected");
        let event = Event::builder()
            .event_type(EventType::InventoryReserveFailed)
            .saga_id(request.saga_id.clone())
            .payload_raw(serde_json::json!({ "reason": reason }))
            .source(SOURCE)
            .build();
        self.bus.publish(event).await
    }
}

#[async_trait]
impl<B: EventBus> EventHandler for InventoryService<B> {
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match event.event_type {
            EventType::InventoryReserveRequested => self.reserve(&event).await?,
            EventType::InventoryReleaseRequested => self.release(&event).await?,
            other => {
                tracing::debug!(event_type = %other, "inventory service ignoring event type");
            }
        }
        Ok(())
    }
}
