//! In-process publish/subscribe event bus.
//!
//! Events are the sole means of communication between the saga orchestrator
//! and the participant services. The bus buffers published events and a
//! single dispatch loop delivers each one to every handler registered for
//! its type, spawning one task per (event, handler) pair.
//!
//! Delivery guarantees:
//! - Events are dequeued in publish order.
//! - Handlers for the same event run concurrently and independently.
//! - A handler error is logged and never blocks delivery to other handlers.
//! - `publish` blocks while the buffer is full; stopping the bus fails
//!   blocked publishes with [`BusError::Cancelled`].

pub mod bus;
pub mod error;
pub mod event;
pub mod memory;

pub use bus::{EventBus, EventHandler, FnHandler, HandlerError};
pub use error::{BusError, Result};
pub use event::{Event, EventBuilder, EventId, EventType};
pub use memory::InMemoryEventBus;
