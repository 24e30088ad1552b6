//! Errors surfaced by the outbox store, DLQ store and processor.

use thiserror::Error;

/// Errors from outbox/DLQ persistence and the processor pump.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The underlying database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The event could not be encoded/decoded for storage.
    #[error("codec error: {0}")]
    Codec(#[from] platform_core::error::CodecError),

    /// Attempted to complete or retry a row that no longer exists or was already
    /// claimed by another processor (the conditional `WHERE status = 'pending'`
    /// update affected zero rows).
    #[error("outbox row {0} was not in the expected state")]
    NotClaimed(String),

    /// `retry_dead_letter` was called for an id that doesn't exist or was already
    /// retried (`can_retry = false`).
    #[error("dead letter event {0} not found or already retried")]
    DeadLetterNotFound(i64),
}

impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}
