use serde::{Deserialize, Serialize};

use crate::{CustomerId, Money, OrderId, ProductId};

/// The business payload of an order processing saga.
///
/// Travels as the event payload between the orchestrator and the participant
/// services. The `payment_id` and `reservation_id` fields start empty and are
/// filled in by the payment and inventory services as their steps complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// The order being processed.
    pub order_id: OrderId,
    /// The customer who placed the order.
    pub customer_id: CustomerId,
    /// The product being ordered.
    pub product_id: ProductId,
    /// Number of units ordered.
    pub quantity: u32,
    /// Total order amount.
    pub amount: Money,
    /// Payment identifier, set once payment has been processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Reservation identifier, set once inventory has been reserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
}

impl Order {
    /// Creates a new order with no payment or reservation attached.
    pub fn new(
        order_id: impl Into<OrderId>,
        customer_id: impl Into<CustomerId>,
        product_id: impl Into<ProductId>,
        quantity: u32,
        amount: Money,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            product_id: product_id.into(),
            quantity,
            amount,
            payment_id: None,
            reservation_id: None,
        }
    }
}
