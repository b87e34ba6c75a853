use thiserror::Error;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The publish was cancelled because the bus is stopping.
    /// The event was dropped: not delivered and not requeued.
    #[error("publish cancelled: event bus is stopping")]
    Cancelled,

    /// The bus channel is closed and can no longer accept events.
    #[error("event bus channel is closed")]
    Closed,

    /// The dispatch loop has already been started.
    #[error("event bus dispatch loop already started")]
    AlreadyStarted,

    /// The event carries no payload but one was expected.
    #[error("event has no payload")]
    MissingPayload,

    /// A payload serialization/deserialization error occurred.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
