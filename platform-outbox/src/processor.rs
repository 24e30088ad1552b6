//! The outbox processor pump (spec §4.2).
//!
//! A background loop: claim a batch of due pending rows, attempt to publish each, and
//! either complete, revert to pending, or dead-letter it. Polling cadence and the
//! `Pin<Box<dyn Future<...>>>` publisher abstraction follow the same dyn-compatible
//! shape the teacher's `EventBus` trait uses, so a Kafka-backed publisher (built in
//! `platform-kafka`) can be injected without this crate depending on `rdkafka`.

use crate::dead_letter::DeadLetterStore;
use crate::error::OutboxError;
use crate::store::OutboxStore;
use chrono::{Duration as ChronoDuration, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Publishes a single already-encoded event to its transport topic.
///
/// Implemented by `platform-kafka`'s producer wrapper. Kept dyn-compatible (manual
/// `Pin<Box<dyn Future>>` return rather than `async fn`) so the processor can hold an
/// `Arc<dyn OutboxPublisher>` without boxing the trait itself into an enum.
pub trait OutboxPublisher: Send + Sync {
    /// Publish `payload` to `topic` keyed by `key`. Errors are treated as transient
    /// transport failures by the processor (spec §7): retried up to `max_attempts`.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;
}

/// Configuration for [`OutboxProcessor`].
#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    /// Rows claimed per poll iteration.
    pub batch_size: i64,
    /// Sleep between successful poll iterations.
    pub poll_interval: Duration,
    /// Sleep after a poll iteration that itself errored (DB unreachable, etc).
    pub retry_delay: Duration,
    /// Processing rows older than this are reverted to pending on recovery sweep.
    /// Spec §9 Open Question: no precise value is given; this crate defaults to
    /// `2 * poll_interval`, the conservative default the spec itself suggests.
    pub recovery_threshold: Duration,
}

impl OutboxProcessorConfig {
    /// Construct a config with `recovery_threshold = 2 * poll_interval`, the spec's
    /// suggested conservative default.
    #[must_use]
    pub fn new(batch_size: i64, poll_interval: Duration, retry_delay: Duration) -> Self {
        Self {
            batch_size,
            poll_interval,
            retry_delay,
            recovery_threshold: poll_interval * 2,
        }
    }
}

/// The background pump described in spec §4.2.
pub struct OutboxProcessor {
    store: Arc<OutboxStore>,
    dead_letters: Arc<DeadLetterStore>,
    publisher: Arc<dyn OutboxPublisher>,
    config: OutboxProcessorConfig,
    shutdown: Arc<Notify>,
}

impl OutboxProcessor {
    /// Build a new processor over the given store, DLQ and publisher.
    #[must_use]
    pub fn new(
        store: Arc<OutboxStore>,
        dead_letters: Arc<DeadLetterStore>,
        publisher: Arc<dyn OutboxPublisher>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            store,
            dead_letters,
            publisher,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the run loop to stop after the current iteration.
    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Run the recovery sweep once, then loop: claim a batch, process each row, sleep.
    /// Returns only once `request_shutdown` has been called.
    pub async fn run(&self) {
        if let Err(err) = self
            .store
            .recover_stuck_processing(ChronoDuration::from_std(self.config.recovery_threshold)
                .unwrap_or(ChronoDuration::minutes(10)))
            .await
        {
            tracing::error!(error = %err, "outbox recovery sweep failed");
        }

        loop {
            let iteration = self.run_once().await;

            let sleep_for = match iteration {
                Ok(()) => self.config.poll_interval,
                Err(err) => {
                    tracing::error!(error = %err, "outbox poll iteration failed");
                    self.config.retry_delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                () = self.shutdown.notified() => {
                    tracing::info!("outbox processor shutting down");
                    return;
                }
            }
        }
    }

    /// Claim and process a single batch. Exposed separately from `run` so tests can
    /// drive one iteration deterministically without a sleep loop.
    ///
    /// # Errors
    ///
    /// Returns an error only if claiming the batch itself failed (a DB outage); errors
    /// publishing individual rows are handled per-row and do not abort the batch.
    pub async fn run_once(&self) -> Result<(), OutboxError> {
        let batch = self.store.claim_batch(self.config.batch_size).await?;
        for row in batch {
            self.process_row(row).await;
        }
        Ok(())
    }

    async fn process_row(&self, row: crate::model::OutboxEvent) {
        let now = Utc::now();
        if row.expires_at.is_some_and(|expires_at| expires_at < now) {
            if let Err(err) = self.store.mark_failed(row.id, "expired").await {
                tracing::error!(outbox_id = row.id, error = %err, "failed to mark expired row");
            }
            metrics::counter!("outbox.expired").increment(1);
            return;
        }

        let topic = row.event_type.replace('.', "_").to_lowercase();
        let payload = match serde_json::to_vec(&row.event_data) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(outbox_id = row.id, error = %err, "failed to encode outbox row");
                let _ = self.store.mark_failed(row.id, &err.to_string()).await;
                return;
            }
        };

        match self.publisher.publish(&topic, &row.event_id, &payload).await {
            Ok(()) => {
                if let Err(err) = self.store.mark_completed(row.id).await {
                    tracing::error!(outbox_id = row.id, error = %err, "failed to mark completed");
                }
            }
            Err(reason) => self.handle_publish_failure(row, &reason).await,
        }
    }

    async fn handle_publish_failure(&self, row: crate::model::OutboxEvent, reason: &str) {
        if row.attempts >= row.max_attempts {
            if let Err(err) = self
                .dead_letters
                .add_entry(
                    &row.event_id,
                    &row.event_type,
                    row.event_data.clone(),
                    reason,
                    row.attempts,
                )
                .await
            {
                tracing::error!(outbox_id = row.id, error = %err, "failed to record dead letter");
            }
            if let Err(err) = self.store.mark_dead_letter(row.id, reason).await {
                tracing::error!(outbox_id = row.id, error = %err, "failed to mark dead letter");
            }
        } else if let Err(err) = self.store.mark_retryable_failure(row.id, reason).await {
            tracing::error!(outbox_id = row.id, error = %err, "failed to revert to pending");
        }
    }
}
