//! Payment service: charges and refunds.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use common::{Money, Order, OrderId, SagaId};
use event_bus::{Event, EventBus, EventHandler, EventType, HandlerError};

/// Source tag carried by events this service publishes.
pub const SOURCE: &str = "payment-service";

/// Default decline threshold: amounts above $1000.00 are rejected.
pub const DEFAULT_DECLINE_OVER: Money = Money::from_cents(100_000);

/// Lifecycle status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    /// The charge went through.
    Processed,
    /// The charge was refunded by a compensation request.
    Refunded,
}

#[derive(Debug)]
struct PaymentRecord {
    order_id: OrderId,
    amount: Money,
    status: PaymentStatus,
}

#[derive(Debug, Default)]
struct PaymentState {
    payments: HashMap<String, PaymentRecord>,
    next_id: u32,
}

/// Handles `payment.process.requested` and `payment.refund.requested`.
///
/// Policy: charges above the decline threshold are rejected before any
/// record is written. Refunds keep the record, flipped to `Refunded`, so a
/// replayed refund request finds nothing left to do.
pub struct PaymentService<B: EventBus> {
    bus: Arc<B>,
    state: RwLock<PaymentState>,
    decline_over: Money,
    latency: Duration,
}

impl<B: EventBus> PaymentService<B> {
    /// Creates a payment service with the default decline threshold and no
    /// simulated latency.
    pub fn new(bus: Arc<B>) -> Arc<Self> {
        Self::with_policy(bus, DEFAULT_DECLINE_OVER, Duration::ZERO)
    }

    /// Creates a payment service with an explicit decline threshold and
    /// per-request latency.
    pub fn with_policy(bus: Arc<B>, decline_over: Money, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            bus,
            state: RwLock::new(PaymentState::default()),
            decline_over,
            latency,
        })
    }

    /// Subscribes this service to its request event types.
    pub async fn register(self: &Arc<Self>) -> event_bus::Result<()> {
        for event_type in [
            EventType::PaymentProcessRequested,
            EventType::PaymentRefundRequested,
        ] {
            self.bus
                .subscribe(event_type, Arc::clone(self) as Arc<dyn EventHandler>)
                .await?;
        }
        Ok(())
    }

    /// Number of payments currently in `Processed` status.
    pub fn processed_count(&self) -> usize {
        self.count_with_status(PaymentStatus::Processed)
    }

    /// Number of payments that have been refunded.
    pub fn refunded_count(&self) -> usize {
        self.count_with_status(PaymentStatus::Refunded)
    }

    /// Status of a payment, if this service has a record of it.
    pub fn status_of(&self, payment_id: &str) -> Option<PaymentStatus> {
        self.state
            .read()
            .unwrap()
            .payments
            .get(payment_id)
            .map(|record| record.status)
    }

    fn count_with_status(&self, status: PaymentStatus) -> usize {
        self.state
            .read()
            .unwrap()
            .payments
            .values()
            .filter(|record| record.status == status)
            .count()
    }

    async fn process(&self, event: &Event) -> event_bus::Result<()> {
        let mut order: Order = match event.payload_as() {
            Ok(order) => order,
            Err(error) => {
                return self
                    .fail(event, format!("malformed order payload: {error}"))
                    .await;
            }
        };

        if order.amount > self.decline_over {
            return self
                .fail(
                    event,
                    format!(
                        "payment declined: amount {} exceeds limit {}",
                        order.amount, self.decline_over
                    ),
                )
                .await;
        }

        let payment_id = {
            let mut state = self.state.write().unwrap();
            state.next_id += 1;
            let payment_id = format!("pay-{:04}", state.next_id);
            state.payments.insert(
                payment_id.clone(),
                PaymentRecord {
                    order_id: order.order_id.clone(),
                    amount: order.amount,
                    status: PaymentStatus::Processed,
                },
            );
            payment_id
        };

        tracing::info!(
            saga_id = %event.saga_id,
            order_id = %order.order_id,
            amount = %order.amount,
            %payment_id,
            "payment processed"
        );
        order.payment_id = Some(payment_id);

        self.outcome(&event.saga_id, EventType::PaymentProcessCompleted, &order)
            .await
    }

    async fn refund(&self, event: &Event) -> event_bus::Result<()> {
        let order: Order = match event.payload_as() {
            Ok(order) => order,
            Err(error) => {
                tracing::warn!(saga_id = %event.saga_id, %error, "refund request without usable payload");
                return self
                    .outcome_raw(&event.saga_id, EventType::PaymentRefundCompleted)
                    .await;
            }
        };

        {
            let mut state = self.state.write().unwrap();
            match order
                .payment_id
                .as_ref()
                .and_then(|id| state.payments.get_mut(id))
            {
                Some(record) if record.status == PaymentStatus::Processed => {
                    record.status = PaymentStatus::Refunded;
                    tracing::info!(
                        saga_id = %event.saga_id,
                        order_id = %record.order_id,
                        amount = %record.amount,
                        "payment refunded"
                    );
                }
                Some(_) => {
                    tracing::warn!(saga_id = %event.saga_id, "payment already refunded");
                }
                None => {
                    tracing::warn!(
                        saga_id = %event.saga_id,
                        payment_id = order.payment_id.as_deref().unwrap_or("<none>"),
                        "refund requested for unknown payment"
                    );
                }
            }
        }

        self.outcome(&event.saga_id, EventType::PaymentRefundCompleted, &order)
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
        tracing::warn!(saga_id = %request.saga_id, %reason, "payment rejected");
        let event = Event::builder()
            .event_type(EventType::PaymentProcessFailed)
            .saga_id(request.saga_id.clone())
            .payload_raw(serde_json::json!({ "reason": reason }))
            .source(SOURCE)
            .build();
        self.bus.publish(event).await
    }
}

#[async_trait]
impl<B: EventBus> EventHandler for PaymentService<B> {
    async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match event.event_type {
            EventType::PaymentProcessRequested => self.process(&event).await?,
            EventType::PaymentRefundRequested => self.refund(&event).await?,
            other => {
                tracing::debug!(event_type = %other, "payment service ignoring event type");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryEventBus;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Recorder {
        tx: mpsc::UnboundedSender<Event>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) -> std::result::Result<(), HandlerError> {
            self.tx.send(event).ok();
            Ok(())
        }
    }

    async fn setup(
        outcome_types: &[EventType],
    ) -> (
        Arc<InMemoryEventBus>,
        Arc<PaymentService<InMemoryEventBus>>,
        mpsc::UnboundedReceiver<Event>,
    ) {
        let bus = Arc::new(InMemoryEventBus::default());
        let service = PaymentService::new(Arc::clone(&bus));
        service.register().await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        for event_type in outcome_types {
            bus.subscribe(*event_type, Arc::new(Recorder { tx: tx.clone() }))
                .await
                .unwrap();
        }
        bus.start().await.unwrap();
        (bus, service, rx)
    }

    fn order_with_amount(amount: Money) -> Order {
        Order::new("order-001", "cust-123", "prod-123", 2, amount)
    }

    fn request(event_type: EventType, order: &Order) -> Event {
        Event::builder()
            .event_type(event_type)
            .saga_id(SagaId::for_order(&order.order_id))
            .payload(order)
            .unwrap()
            .source("saga-orchestrator")
            .build()
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("recorder channel closed")
    }

    #[tokio::test]
    async fn charge_below_limit_is_processed() {
        let (bus, service, mut rx) = setup(&[EventType::PaymentProcessCompleted]).await;
        let order = order_with_amount(Money::from_cents(29999));

        bus.publish(request(EventType::PaymentProcessRequested, &order))
            .await
            .unwrap();

        let outcome = recv(&mut rx).await;
        assert_eq!(outcome.event_type, EventType::PaymentProcessCompleted);
        let payload: Order = outcome.payload_as().unwrap();
        assert_eq!(payload.payment_id.as_deref(), Some("pay-0001"));

        assert_eq!(service.processed_count(), 1);
        assert_eq!(service.status_of("pay-0001"), Some(PaymentStatus::Processed));
    }

    #[tokio::test]
    async fn charge_above_limit_is_declined() {
        let (bus, service, mut rx) = setup(&[EventType::PaymentProcessFailed]).await;
        let order = order_with_amount(Money::from_cents(150_000));

        bus.publish(request(EventType::PaymentProcessRequested, &order))
            .await
            .unwrap();

        let outcome = recv(&mut rx).await;
        assert_eq!(outcome.event_type, EventType::PaymentProcessFailed);
        let reason = outcome.data.unwrap()["reason"].as_str().unwrap().to_string();
        assert!(reason.contains("payment declined"));
        assert!(reason.contains("$1500.00"));
        assert_eq!(service.processed_count(), 0);
    }

    #[tokio::test]
    async fn refund_flips_the_record_and_is_idempotent() {
        let (bus, service, mut rx) = setup(&[
            EventType::PaymentProcessCompleted,
            EventType::PaymentRefundCompleted,
        ])
        .await;
        let order = order_with_amount(Money::from_cents(29999));

        bus.publish(request(EventType::PaymentProcessRequested, &order))
            .await
            .unwrap();
        let paid: Order = recv(&mut rx).await.payload_as().unwrap();

        bus.publish(request(EventType::PaymentRefundRequested, &paid))
            .await
            .unwrap();
        recv(&mut rx).await;
        assert_eq!(service.refunded_count(), 1);
        assert_eq!(service.processed_count(), 0);

        // A second refund finds nothing to do but is still acknowledged.
        bus.publish(request(EventType::PaymentRefundRequested, &paid))
            .await
            .unwrap();
        let outcome = recv(&mut rx).await;
        assert_eq!(outcome.event_type, EventType::PaymentRefundCompleted);
        assert_eq!(service.refunded_count(), 1);
    }

    #[tokio::test]
    async fn refund_of_unknown_payment_is_acknowledged() {
        let (bus, service, mut rx) = setup(&[EventType::PaymentRefundCompleted]).await;
        let mut order = order_with_amount(Money::from_cents(29999));
        order.payment_id = Some("pay-9999".to_string());

        bus.publish(request(EventType::PaymentRefundRequested, &order))
            .await
            .unwrap();

        let outcome = recv(&mut rx).await;
        assert_eq!(outcome.event_type, EventType::PaymentRefundCompleted);
        assert_eq!(service.refunded_count(), 0);
    }
}
