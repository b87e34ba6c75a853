//! Participant services of the order processing saga.
//!
//! Each service subscribes to its request event types, performs a simulated
//! unit of work against private in-memory state, enforces its policy, and
//! publishes exactly one outcome event per request, preserving the saga
//! identifier. Participants never see the saga's overall status; the
//! orchestrator never sees their state.

pub mod inventory;
pub mod order;
pub mod payment;

pub use inventory::InventoryService;
pub use order::{OrderService, OrderStatus};
pub use payment::{PaymentService, PaymentStatus};
