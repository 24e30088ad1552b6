//! `dlq list`/`dlq retry`: operator inspection and resurrection of dead-lettered events
//! (spec §6 "DLQ inspection is exposed via a query API").

use platform_core::Priority;
use platform_outbox::{DeadLetterEvent, DeadLetterStore, NewOutboxRow, OutboxStore};
use sqlx::PgPool;

use crate::error::CliError;

/// List up to `limit` dead-lettered events, oldest first, optionally filtered by
/// `event_type`.
///
/// # Errors
///
/// Returns [`CliError::Outbox`] if the query fails.
pub async fn list(pool: &PgPool, limit: i64, event_type: Option<&str>) -> Result<Vec<DeadLetterEvent>, CliError> {
    let store = DeadLetterStore::new(pool.clone());
    Ok(store.list(limit, event_type).await?)
}

/// Re-enqueue dead-lettered event `id` as a fresh pending outbox row, then mark the DLQ
/// entry as retried so it can't be resurrected twice.
///
/// # Errors
///
/// Returns [`CliError::Outbox`] if `id` doesn't exist, was already retried, or either
/// write fails.
pub async fn retry(pool: &PgPool, id: i64) -> Result<(), CliError> {
    let dead_letters = DeadLetterStore::new(pool.clone());
    let outbox = OutboxStore::new(pool.clone());

    let entry = dead_letters.get(id).await?;
    let max_attempts = entry.attempts_made.max(1);

    outbox
        .insert(NewOutboxRow {
            event_id: &entry.original_event_id,
            event_type: &entry.event_type,
            event_data: entry.event_data,
            priority: Priority::Normal,
            scheduled_at: None,
            expires_at: None,
            max_attempts,
            correlation_id: None,
            source_service: None,
            tenant_id: None,
        })
        .await?;

    dead_letters.mark_retried(id).await?;

    tracing::info!(dlq_id = id, event_id = %entry.original_event_id, "dead letter event requeued");
    Ok(())
}
