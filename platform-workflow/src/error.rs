//! Errors surfaced by workflow definition registration, execution and persistence.

use thiserror::Error;

/// Errors from the workflow engine and its persistence layer.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// `start_workflow` was called with a `workflow_type` that was never registered.
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// The underlying database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A persisted `context_data`/`result_data` blob could not be decoded.
    #[error("context codec error: {0}")]
    Codec(String),

    /// `get_workflow_status`/`cancel_workflow` referenced an instance that doesn't exist.
    #[error("workflow instance {0} not found")]
    NotFound(String),

    /// An instance was not in the expected status for the requested operation (e.g.
    /// `retry_failed_workflow` on a non-`FAILED` instance).
    #[error("workflow {workflow_id} is in status {actual:?}, expected {expected:?}")]
    UnexpectedStatus {
        /// The instance in question.
        workflow_id: String,
        /// The status the caller required.
        expected: crate::model::WorkflowStatus,
        /// The status the instance actually had.
        actual: crate::model::WorkflowStatus,
    },
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}
