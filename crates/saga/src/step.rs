use event_bus::EventType;

/// The forward steps of the order processing saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    /// The order service committed the order.
    OrderCreated,
    /// The inventory service reserved stock.
    InventoryReserved,
    /// The payment service charged the customer.
    PaymentProcessed,
}

impl SagaStep {
    /// Returns the step name as recorded in a saga's completed-steps list.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::OrderCreated => "order_created",
            SagaStep::InventoryReserved => "inventory_reserved",
            SagaStep::PaymentProcessed => "payment_processed",
        }
    }

    /// Parses a recorded step name; `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "order_created" => Some(SagaStep::OrderCreated),
            "inventory_reserved" => Some(SagaStep::InventoryReserved),
            "payment_processed" => Some(SagaStep::PaymentProcessed),
            _ => None,
        }
    }

    /// The request event type that undoes this step.
    pub fn undo_request(&self) -> EventType {
        match self {
            SagaStep::OrderCreated => EventType::OrderCancelRequested,
            SagaStep::InventoryReserved => EventType::InventoryReleaseRequested,
            SagaStep::PaymentProcessed => EventType::PaymentRefundRequested,
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
