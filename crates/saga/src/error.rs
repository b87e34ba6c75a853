use common::SagaId;
use event_bus::BusError;
use thiserror::Error;

/// Errors that can occur during saga orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An outcome event referenced a saga that does not exist.
    /// Lookup failures never mutate existing saga state.
    #[error("saga instance not found: {0}")]
    SagaNotFound(SagaId),

    /// A saga for this order already exists. Starting a saga twice for the
    /// same order is an error, never a silent overwrite.
    #[error("saga already exists: {0}")]
    SagaAlreadyExists(SagaId),

    /// A completed-steps entry could not be mapped to a compensation.
    #[error("unknown step for compensation: {0}")]
    UnknownStep(String),

    /// Event bus error.
    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    /// Payload serialization error.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
