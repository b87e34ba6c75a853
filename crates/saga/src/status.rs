use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// Forward transitions:
/// ```text
/// Started ──► OrderCreated ──► InventoryReserved ──► Completed
/// ```
/// A failure at any step instead routes through compensation:
/// ```text
/// {Started, OrderCreated, InventoryReserved} ──► Compensating ──► Compensated
/// ```
/// `Completed` and `Compensated` are terminal; a terminal instance is never
/// mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga created, order creation requested.
    #[default]
    Started,

    /// Order created, inventory reservation requested.
    OrderCreated,

    /// Inventory reserved, payment processing requested.
    InventoryReserved,

    /// All steps completed successfully (terminal).
    Completed,

    /// A step failed; undo requests are in flight.
    Compensating,

    /// All undo outcomes observed after a failure (terminal, reported
    /// externally as saga failed).
    Compensated,
}

impl SagaStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }

    /// Returns true if the saga can still enter compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            SagaStatus::Started | SagaStatus::OrderCreated | SagaStatus::InventoryReserved
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "Started",
            SagaStatus::OrderCreated => "OrderCreated",
            SagaStatus::InventoryReserved => "InventoryReserved",
            SagaStatus::Completed => "Completed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
