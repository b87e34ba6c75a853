use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::SagaId;

use crate::error::{BusError, Result};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of event types exchanged over the bus.
///
/// Forward requests flow from the orchestrator to a participant; outcome
/// events flow back. Compensation requests reuse the same channel with
/// their own types, so an undo is itself an observed round trip. The two
/// terminal types notify external observers of the saga outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Request the order service to create the order.
    #[serde(rename = "order.create.requested")]
    OrderCreateRequested,
    /// The order was created.
    #[serde(rename = "order.create.completed")]
    OrderCreateCompleted,
    /// Order creation failed.
    #[serde(rename = "order.create.failed")]
    OrderCreateFailed,

    /// Request the inventory service to reserve stock.
    #[serde(rename = "inventory.reserve.requested")]
    InventoryReserveRequested,
    /// Inventory was reserved.
    #[serde(rename = "inventory.reserve.completed")]
    InventoryReserveCompleted,
    /// Inventory reservation failed.
    #[serde(rename = "inventory.reserve.failed")]
    InventoryReserveFailed,

    /// Request the payment service to charge the customer.
    #[serde(rename = "payment.process.requested")]
    PaymentProcessRequested,
    /// Payment was processed.
    #[serde(rename = "payment.process.completed")]
    PaymentProcessCompleted,
    /// Payment processing failed.
    #[serde(rename = "payment.process.failed")]
    PaymentProcessFailed,

    /// Undo request: cancel a created order.
    #[serde(rename = "order.cancel.requested")]
    OrderCancelRequested,
    /// The order was cancelled.
    #[serde(rename = "order.cancel.completed")]
    OrderCancelCompleted,
    /// Order cancellation failed.
    #[serde(rename = "order.cancel.failed")]
    OrderCancelFailed,

    /// Undo request: release a stock reservation.
    #[serde(rename = "inventory.release.requested")]
    InventoryReleaseRequested,
    /// The reservation was released.
    #[serde(rename = "inventory.release.completed")]
    InventoryReleaseCompleted,
    /// Reservation release failed.
    #[serde(rename = "inventory.release.failed")]
    InventoryReleaseFailed,

    /// Undo request: refund a processed payment.
    #[serde(rename = "payment.refund.requested")]
    PaymentRefundRequested,
    /// The payment was refunded.
    #[serde(rename = "payment.refund.completed")]
    PaymentRefundCompleted,
    /// Payment refund failed.
    #[serde(rename = "payment.refund.failed")]
    PaymentRefundFailed,

    /// Terminal notification: the saga completed successfully.
    #[serde(rename = "saga.completed")]
    SagaCompleted,
    /// Terminal notification: the saga failed and was compensated.
    #[serde(rename = "saga.failed")]
    SagaFailed,
}

impl EventType {
    /// Returns the wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreateRequested => "order.create.requested",
            EventType::OrderCreateCompleted => "order.create.completed",
            EventType::OrderCreateFailed => "order.create.failed",
            EventType::InventoryReserveRequested => "inventory.reserve.requested",
            EventType::InventoryReserveCompleted => "inventory.reserve.completed",
            EventType::InventoryReserveFailed => "inventory.reserve.failed",
            EventType::PaymentProcessRequested => "payment.process.requested",
            EventType::PaymentProcessCompleted => "payment.process.completed",
            EventType::PaymentProcessFailed => "payment.process.failed",
            EventType::OrderCancelRequested => "order.cancel.requested",
            EventType::OrderCancelCompleted => "order.cancel.completed",
            EventType::OrderCancelFailed => "order.cancel.failed",
            EventType::InventoryReleaseRequested => "inventory.release.requested",
            EventType::InventoryReleaseCompleted => "inventory.release.completed",
            EventType::InventoryReleaseFailed => "inventory.release.failed",
            EventType::PaymentRefundRequested => "payment.refund.requested",
            EventType::PaymentRefundCompleted => "payment.refund.completed",
            EventType::PaymentRefundFailed => "payment.refund.failed",
            EventType::SagaCompleted => "saga.completed",
            EventType::SagaFailed => "saga.failed",
        }
    }

    /// Returns true for the two terminal notification types.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::SagaCompleted | EventType::SagaFailed)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable message exchanged over the event bus.
///
/// Every event is correlated to one saga via its saga ID and tagged with
/// the component that published it. Events are never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,
    /// The type of the event.
    pub event_type: EventType,
    /// The saga this event belongs to.
    pub saga_id: SagaId,
    /// Optional structured business payload.
    pub data: Option<serde_json::Value>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// The component that published the event.
    pub source: String,
}

impl Event {
    /// Creates a new event builder.
    pub fn builder() -> EventBuilder {
        EventBuilder::default()
    }

    /// Deserializes the payload into the given type.
    ///
    /// Fails with [`BusError::MissingPayload`] when the event carries no
    /// payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.data.as_ref().ok_or(BusError::MissingPayload)?;
        Ok(serde_json::from_value(data.clone())?)
    }
}

/// Builder for constructing events.
#[derive(Debug, Default)]
pub struct EventBuilder {
    id: Option<EventId>,
    event_type: Option<EventType>,
    saga_id: Option<SagaId>,
    data: Option<serde_json::Value>,
    timestamp: Option<DateTime<Utc>>,
    source: Option<String>,
}

impl EventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Sets the saga ID the event is correlated to.
    pub fn saga_id(mut self, saga_id: SagaId) -> Self {
        self.saga_id = Some(saga_id);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.data = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.data = Some(payload);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the source tag identifying the publisher.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Builds the event.
    ///
    /// # Panics
    ///
    /// Panics if `event_type`, `saga_id`, or `source` are not set.
    pub fn build(self) -> Event {
        Event {
            id: self.id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            saga_id: self.saga_id.expect("saga_id is required"),
            data: self.data,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source: self.source.expect("source is required"),
        }
    }
}
