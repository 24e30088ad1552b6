//! Errors surfaced by saga registration, coordination and command/reply exchange.

use thiserror::Error;

/// Errors from the distributed saga layer.
#[derive(Error, Debug)]
pub enum SagaError {
    /// `start_saga`/`register_step_handler` referenced a `saga_type` never registered.
    #[error("unknown saga type: {0}")]
    UnknownSagaType(String),

    /// The underlying event bus rejected a publish or subscribe.
    #[error("event bus error: {0}")]
    EventBus(#[from] platform_core::EventBusError),

    /// The underlying workflow engine rejected an operation.
    #[error("workflow error: {0}")]
    Workflow(#[from] platform_workflow::WorkflowError),

    /// No correlated reply arrived before the step's timeout.
    #[error("saga {0} timed out waiting for a step reply")]
    ReplyTimeout(String),

    /// The reply channel was dropped before a reply arrived (the bus was stopped
    /// mid-wait, or the subscription's handler panicked).
    #[error("saga {0} reply channel closed before a reply arrived")]
    ReplyChannelClosed(String),
}
