//! Shared types for the order processing saga.
//!
//! Typed identifiers, the [`Money`] value type, and the [`Order`] business
//! payload that travels between the orchestrator and participant services.

mod money;
mod order;
mod types;

pub use money::Money;
pub use order::Order;
pub use types::{CustomerId, OrderId, ProductId, SagaId};
