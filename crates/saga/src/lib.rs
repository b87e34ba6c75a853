//! Event-driven saga orchestrator for order processing.
//!
//! The orchestrator drives a 3-step saga (create order → reserve inventory
//! → process payment) across independent participant services, communicating
//! only through events on the in-process bus. If any step fails, previously
//! completed steps are compensated in reverse order, each undo being its own
//! observed request/outcome round trip. The saga reaches `Compensated` only
//! after every undo outcome has been observed.

pub mod error;
pub mod instance;
pub mod orchestrator;
pub mod status;
pub mod step;

pub use error::{OrchestratorError, Result};
pub use instance::SagaInstance;
pub use orchestrator::{SagaOrchestrator, SagaOutcome};
pub use status::SagaStatus;
pub use step::SagaStep;
