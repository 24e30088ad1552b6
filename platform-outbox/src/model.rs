//! Persisted row types: `OutboxEvent` and `DeadLetterEvent` (spec §3).

use chrono::{DateTime, Utc};
use platform_core::Priority;

/// Lifecycle status of an [`OutboxEvent`] row.
///
/// `PENDING -> (picked by processor) PROCESSING -> {COMPLETED | PENDING (retryable) |
/// DEAD_LETTER (attempts exhausted)}`. `COMPLETED` rows are never re-published; `DEAD_LETTER`
/// rows are resubmitted only via explicit operator action (`retry_dead_letter`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Waiting to be picked up by the processor.
    Pending,
    /// Claimed by a processor; publish in flight.
    Processing,
    /// Published successfully.
    Completed,
    /// A retryable publish failed; reverted to `Pending` with `attempts` incremented,
    /// kept as a distinct variant from `Pending` only in this enum's name — the
    /// database column uses the same `'pending'` string for both, since a failed
    /// retryable row simply becomes a pending row again.
    Failed,
    /// `attempts >= max_attempts`; terminal, requires operator action to resurrect.
    DeadLetter,
}

impl OutboxStatus {
    /// The database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending | Self::Failed => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Parse the database string representation.
    ///
    /// # Errors
    ///
    /// Returns an error string if `s` does not match a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(format!("invalid outbox status: {other}")),
        }
    }
}

/// A durable record of an event to publish (spec §3, `OutboxEvent`).
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    /// Row id.
    pub id: i64,
    /// Unique event id (unique index).
    pub event_id: String,
    /// Logical event type (index).
    pub event_type: String,
    /// Serialized event (JSON).
    pub event_data: serde_json::Value,
    /// Current lifecycle status.
    pub status: OutboxStatus,
    /// Delivery priority; drives processor pickup order (`priority DESC, created_at ASC`).
    pub priority: Priority,
    /// When the row was inserted (index).
    pub created_at: DateTime<Utc>,
    /// If set, the processor only picks this row once `scheduled_at <= now`.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the row transitioned to `Completed`.
    pub processed_at: Option<DateTime<Utc>>,
    /// If set and exceeded at pickup time, the row is marked `Failed` with reason
    /// `"expired"` instead of being published.
    pub expires_at: Option<DateTime<Utc>>,
    /// Number of publish attempts made so far.
    pub attempts: i32,
    /// Hard ceiling on `attempts` before the row moves to `DeadLetter`.
    pub max_attempts: i32,
    /// The most recent failure's message, if any.
    pub error_message: Option<String>,
    /// Correlation id copied from the event's metadata (index).
    pub correlation_id: Option<String>,
    /// Source service copied from the event's metadata.
    pub source_service: Option<String>,
    /// Tenant id copied from the event's metadata.
    pub tenant_id: Option<String>,
    /// Denormalized flag kept in sync with `status == DeadLetter`.
    pub is_dead_letter: bool,
}

/// A terminal record of an event that exhausted its retries (spec §3, `DeadLetterEvent`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeadLetterEvent {
    /// Row id.
    pub id: i64,
    /// The `event_id` of the outbox row this was promoted from.
    pub original_event_id: String,
    /// Logical event type.
    pub event_type: String,
    /// The full serialized event, preserved for operator inspection/retry.
    pub event_data: serde_json::Value,
    /// Why the event was moved to the DLQ.
    pub failure_reason: String,
    /// When it was moved to the DLQ.
    pub failed_at: DateTime<Utc>,
    /// How many publish attempts were made before giving up.
    pub attempts_made: i32,
    /// `false` once `retry_dead_letter` has been called for this row.
    pub can_retry: bool,
}
