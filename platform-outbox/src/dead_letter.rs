//! `sqlx`-backed dead-letter queue, directly grounded on the teacher's
//! `DeadLetterQueue` (same CRUD shape, `tracing::warn!` + `metrics::counter!` on insert).

use crate::error::OutboxError;
use crate::model::DeadLetterEvent;
use sqlx::{PgPool, Row};

/// Terminal storage for events that exhausted `max_attempts`.
pub struct DeadLetterStore {
    pool: PgPool,
}

impl DeadLetterStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a dead-lettered event.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the insert fails.
    pub async fn add_entry(
        &self,
        original_event_id: &str,
        event_type: &str,
        event_data: serde_json::Value,
        failure_reason: &str,
        attempts_made: i32,
    ) -> Result<i64, OutboxError> {
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_letter_events (
                original_event_id, event_type, event_data, failure_reason, attempts_made
            ) VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(original_event_id)
        .bind(event_type)
        .bind(event_data)
        .bind(failure_reason)
        .bind(attempts_made)
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            dlq_id = id.0,
            event_id = original_event_id,
            event_type,
            failure_reason,
            attempts_made,
            "event moved to dead letter queue"
        );
        metrics::counter!("outbox.dlq.added", "event_type" => event_type.to_string()).increment(1);

        Ok(id.0)
    }

    /// Read-only snapshot of the DLQ for operator inspection (spec §4.1
    /// `get_dead_letters`), oldest first, optionally filtered by `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn list(
        &self,
        limit: i64,
        event_type: Option<&str>,
    ) -> Result<Vec<DeadLetterEvent>, OutboxError> {
        let rows = match event_type {
            Some(ty) => {
                sqlx::query(
                    r"
                    SELECT id, original_event_id, event_type, event_data, failure_reason,
                           failed_at, attempts_made, can_retry
                    FROM dead_letter_events
                    WHERE event_type = $1
                    ORDER BY failed_at ASC
                    LIMIT $2
                    ",
                )
                .bind(ty)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r"
                    SELECT id, original_event_id, event_type, event_data, failure_reason,
                           failed_at, attempts_made, can_retry
                    FROM dead_letter_events
                    ORDER BY failed_at ASC
                    LIMIT $1
                    ",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_dead_letter_event).collect()
    }

    /// Fetch a single DLQ row by id.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DeadLetterNotFound`] if no such row exists.
    pub async fn get(&self, id: i64) -> Result<DeadLetterEvent, OutboxError> {
        let row = sqlx::query(
            r"
            SELECT id, original_event_id, event_type, event_data, failure_reason,
                   failed_at, attempts_made, can_retry
            FROM dead_letter_events WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(OutboxError::DeadLetterNotFound(id))?;

        row_to_dead_letter_event(&row)
    }

    /// Mark a DLQ row as having been retried (`can_retry = false`), so a second
    /// `retry_dead_letter` call on the same id is rejected (spec §4.1).
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DeadLetterNotFound`] if the row doesn't exist or
    /// `can_retry` was already `false`.
    pub async fn mark_retried(&self, id: i64) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r"UPDATE dead_letter_events SET can_retry = FALSE WHERE id = $1 AND can_retry = TRUE",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::DeadLetterNotFound(id));
        }
        Ok(())
    }
}

fn row_to_dead_letter_event(row: &sqlx::postgres::PgRow) -> Result<DeadLetterEvent, OutboxError> {
    Ok(DeadLetterEvent {
        id: row.try_get("id")?,
        original_event_id: row.try_get("original_event_id")?,
        event_type: row.try_get("event_type")?,
        event_data: row.try_get("event_data")?,
        failure_reason: row.try_get("failure_reason")?,
        failed_at: row.try_get("failed_at")?,
        attempts_made: row.try_get("attempts_made")?,
        can_retry: row.try_get("can_retry")?,
    })
}
