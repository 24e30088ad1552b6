//! `sqlx`-backed store for `outbox_events`.
//!
//! Mirrors the access idiom of the teacher's `DeadLetterQueue`: a thin wrapper around a
//! `PgPool`, one `sqlx::query`/`query_as` per operation, `tracing` + `metrics::counter!`
//! on every state transition.

use crate::error::OutboxError;
use crate::model::{OutboxEvent, OutboxStatus};
use chrono::{DateTime, Duration, Utc};
use platform_core::Priority;
use sqlx::{PgPool, Row};

/// Durable table of pending/processing/completed/dead-letter outbox rows.
///
/// Only the [`crate::processor::OutboxProcessor`] mutates rows beyond the initial
/// insert; other readers (CLI inspection, tests) are advisory only. Every status
/// transition out of `pending` goes through a conditional `UPDATE ... WHERE status =
/// 'pending'`, so at most one processor instance can claim a given row (spec §3
/// invariant).
pub struct OutboxStore {
    pool: PgPool,
}

impl OutboxStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new pending row. Intended to be called inside the caller's own
    /// transaction alongside the business write it accompanies (`publish_transactional`
    /// in spec §4.1) — callers that want the atomic guarantee pass an `Executor` from
    /// their own `Transaction`, not this pool, by using [`Self::insert_with`].
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the insert fails (e.g. duplicate `event_id`).
    pub async fn insert(&self, row: NewOutboxRow<'_>) -> Result<i64, OutboxError> {
        self.insert_with(&self.pool, row).await
    }

    /// Insert using an arbitrary executor (a `&PgPool` or an open `Transaction`), so the
    /// caller can commit the outbox insert atomically with their own business write.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the insert fails.
    pub async fn insert_with<'e, E>(
        &self,
        executor: E,
        row: NewOutboxRow<'_>,
    ) -> Result<i64, OutboxError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO outbox_events (
                event_id, event_type, event_data, status, priority,
                scheduled_at, expires_at, max_attempts,
                correlation_id, source_service, tenant_id
            ) VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            ",
        )
        .bind(row.event_id)
        .bind(row.event_type)
        .bind(row.event_data)
        .bind(row.priority.as_i32())
        .bind(row.scheduled_at)
        .bind(row.expires_at)
        .bind(row.max_attempts)
        .bind(row.correlation_id)
        .bind(row.source_service)
        .bind(row.tenant_id)
        .fetch_one(executor)
        .await?;

        tracing::debug!(outbox_id = id.0, event_id = row.event_id, "outbox row inserted");
        metrics::counter!("outbox.inserted").increment(1);

        Ok(id.0)
    }

    /// Atomically claim up to `batch_size` pending, due, attempt-eligible rows and
    /// transition them to `processing`, incrementing `attempts`. Ordered
    /// `priority DESC, created_at ASC` per spec §4.2 step 1.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn claim_batch(&self, batch_size: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r"
            WITH claimed AS (
                SELECT id FROM outbox_events
                WHERE status = 'pending'
                  AND attempts < max_attempts
                  AND (scheduled_at IS NULL OR scheduled_at <= NOW())
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events
            SET status = 'processing', attempts = attempts + 1
            WHERE id IN (SELECT id FROM claimed)
            RETURNING
                id, event_id, event_type, event_data, status, priority, created_at,
                scheduled_at, processed_at, expires_at, attempts, max_attempts,
                error_message, correlation_id, source_service, tenant_id, is_dead_letter
            ",
        )
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.iter().map(row_to_outbox_event).collect()
    }

    /// Mark a claimed row `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::NotClaimed`] if the row was not in `processing` (should
    /// not happen under the single-processor-per-row invariant, but is checked anyway).
    pub async fn mark_completed(&self, id: i64) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'completed', processed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotClaimed(id.to_string()));
        }

        metrics::counter!("outbox.completed").increment(1);
        Ok(())
    }

    /// Revert a claimed row to `pending` after a retryable publish failure, recording
    /// `error_message`. `attempts` was already incremented at claim time.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the update fails.
    pub async fn mark_retryable_failure(
        &self,
        id: i64,
        error_message: &str,
    ) -> Result<(), OutboxError> {
        sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'pending', error_message = $2
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        metrics::counter!("outbox.retried").increment(1);
        Ok(())
    }

    /// Mark a claimed row as permanently `failed` (non-retryable failure such as an
    /// expired event).
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the update fails.
    pub async fn mark_failed(&self, id: i64, error_message: &str) -> Result<(), OutboxError> {
        sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'dead_letter', is_dead_letter = TRUE, error_message = $2
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        metrics::counter!("outbox.failed").increment(1);
        Ok(())
    }

    /// Mark a claimed row `dead_letter` because `attempts >= max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the update fails.
    pub async fn mark_dead_letter(&self, id: i64, error_message: &str) -> Result<(), OutboxError> {
        self.mark_failed(id, error_message).await?;
        metrics::counter!("outbox.dead_lettered").increment(1);
        Ok(())
    }

    /// Recovery sweep: rows stuck in `processing` older than `threshold` are reverted
    /// to `pending` (spec §4.2 invariant (b) — a crash between publish and the
    /// `COMPLETED` update leaves the row `PROCESSING`; consumers must be idempotent
    /// since this may cause a re-publish). Returns the number of rows reverted.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the update fails.
    pub async fn recover_stuck_processing(
        &self,
        threshold: Duration,
    ) -> Result<u64, OutboxError> {
        let cutoff: DateTime<Utc> = Utc::now() - threshold;

        let result = sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'pending'
            WHERE status = 'processing' AND created_at < $1
            ",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let reverted = result.rows_affected();
        if reverted > 0 {
            tracing::warn!(reverted, "recovered stuck processing outbox rows");
            metrics::counter!("outbox.recovered").increment(reverted);
        }
        Ok(reverted)
    }

    /// Fetch a single row by id (used by tests and CLI inspection).
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails or the row doesn't exist.
    pub async fn get(&self, id: i64) -> Result<OutboxEvent, OutboxError> {
        let row = sqlx::query(
            r"
            SELECT
                id, event_id, event_type, event_data, status, priority, created_at,
                scheduled_at, processed_at, expires_at, attempts, max_attempts,
                error_message, correlation_id, source_service, tenant_id, is_dead_letter
            FROM outbox_events WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        row_to_outbox_event(&row)
    }
}

/// Fields required to insert a new pending outbox row.
pub struct NewOutboxRow<'a> {
    /// Unique event id.
    pub event_id: &'a str,
    /// Logical event type.
    pub event_type: &'a str,
    /// Serialized event (the wire-format JSON, see `platform_core::Event::to_bytes`).
    pub event_data: serde_json::Value,
    /// Delivery priority.
    pub priority: Priority,
    /// Optional scheduled publish time (`publish_scheduled`, spec §4.1).
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Optional expiry; rows past this at pickup time are marked failed, not published.
    pub expires_at: Option<DateTime<Utc>>,
    /// Hard ceiling on attempts before dead-lettering.
    pub max_attempts: i32,
    /// Correlation id copied from event metadata.
    pub correlation_id: Option<&'a str>,
    /// Source service copied from event metadata.
    pub source_service: Option<&'a str>,
    /// Tenant id copied from event metadata.
    pub tenant_id: Option<&'a str>,
}

fn row_to_outbox_event(row: &sqlx::postgres::PgRow) -> Result<OutboxEvent, OutboxError> {
    let status_str: String = row.try_get("status")?;
    let status = OutboxStatus::parse(&status_str).map_err(OutboxError::Database)?;
    let priority_i32: i32 = row.try_get("priority")?;

    Ok(OutboxEvent {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        event_data: row.try_get("event_data")?,
        status,
        priority: Priority::from_i32(priority_i32),
        created_at: row.try_get("created_at")?,
        scheduled_at: row.try_get("scheduled_at")?,
        processed_at: row.try_get("processed_at")?,
        expires_at: row.try_get("expires_at")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        error_message: row.try_get("error_message")?,
        correlation_id: row.try_get("correlation_id")?,
        source_service: row.try_get("source_service")?,
        tenant_id: row.try_get("tenant_id")?,
        is_dead_letter: row.try_get("is_dead_letter")?,
    })
}
