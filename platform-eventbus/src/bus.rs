//! The event bus facade (spec §4.1): publish/subscribe over the Kafka transport, backed
//! by the transactional outbox for at-least-once delivery guarantees.
//!
//! Grounded on `core::event_bus::EventBus`'s public operation set and its `Arc<dyn
//! EventBus>`-friendly method shapes, composed here over concrete `platform-kafka` and
//! `platform-outbox` types rather than a further trait indirection — this crate has only
//! one real transport, so the dyn-compatible boundary the teacher needed (to swap Redis
//! pub/sub for Redpanda) is preserved one level down, in `OutboxPublisher` and in
//! `Handler`, not duplicated here.

use crate::dispatch::{dispatch, DispatchConfig, DispatchOutcome};
use crate::filter::EventFilter;
use crate::handler::Handler;
use crate::subscription::SubscriptionRegistry;
use chrono::{DateTime, Utc};
use platform_core::{Event, EventBusError, Priority};
use platform_kafka::{ConsumerConfig, KafkaProducer};
use platform_outbox::{DeadLetterEvent, DeadLetterStore, NewOutboxRow, OutboxStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Configuration fixed at bus construction.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Bootstrap brokers used when spinning up a consumer for a newly subscribed topic.
    pub brokers: String,
    /// Dispatch concurrency/timeout applied to every handler invocation.
    pub dispatch: DispatchConfig,
}

/// The platform's publish/subscribe facade.
///
/// Cheaply cloneable: internally `Arc`-backed state, so callers hold an `EventBus`
/// directly rather than wrapping it in their own `Arc` (mirroring the teacher's
/// `Arc<dyn EventBus>` usage, minus the trait object since there is one transport).
#[derive(Clone)]
pub struct EventBus {
    producer: Arc<KafkaProducer>,
    outbox: Arc<OutboxStore>,
    dead_letters: Arc<DeadLetterStore>,
    registry: Arc<SubscriptionRegistry>,
    config: Arc<EventBusConfig>,
    consuming_topics: Arc<RwLock<HashSet<String>>>,
    consumer_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    stopped: Arc<AtomicBool>,
}

impl EventBus {
    /// Wire together a bus over an already-built producer, outbox store and DLQ store.
    #[must_use]
    pub fn new(
        producer: Arc<KafkaProducer>,
        outbox: Arc<OutboxStore>,
        dead_letters: Arc<DeadLetterStore>,
        config: EventBusConfig,
    ) -> Self {
        Self {
            producer,
            outbox,
            dead_letters,
            registry: Arc::new(SubscriptionRegistry::new()),
            config: Arc::new(config),
            consuming_topics: Arc::new(RwLock::new(HashSet::new())),
            consumer_tasks: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish `event` directly to its Kafka topic, bypassing the outbox. Use this only
    /// for events whose loss on a mid-publish crash is acceptable; otherwise prefer
    /// [`Self::publish_transactional`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Stopped`] if [`Self::stop`] was called, [`EventBusError`]
    /// variants wrapping a codec failure, or [`EventBusError::Expired`] if the event's
    /// metadata expiry has already passed.
    pub async fn publish(&self, event: &Event) -> Result<(), EventBusError> {
        self.ensure_running()?;
        self.check_not_expired(event)?;

        let bytes = event.to_bytes()?;
        let topic = event.topic();
        self.producer
            .publish(&topic, event.partition_key(), &bytes)
            .await
            .map_err(EventBusError::from)?;

        tracing::debug!(event_id = %event.event_id, topic = %topic, "event published directly");
        metrics::counter!("eventbus.published", "topic" => topic).increment(1);
        Ok(())
    }

    /// Publish every event in `events`, independently. Returns one result per input
    /// event, in order; a failure for one event does not prevent the others from being
    /// attempted.
    pub async fn publish_batch(&self, events: &[Event]) -> Vec<Result<(), EventBusError>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.publish(event).await);
        }
        results
    }

    /// Durably record `event` in the outbox as `pending`, to be published by the
    /// separately-running [`platform_outbox::OutboxProcessor`]. Insert using `executor`
    /// so the caller can commit this write in the same transaction as the business
    /// change the event describes (spec §4.1's "publish_transactional": the database
    /// write and the outbox insert succeed or fail together).
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Stopped`] if stopped, [`EventBusError::Expired`] if the
    /// event has already expired, or a codec/database failure otherwise.
    pub async fn publish_transactional<'e, E>(
        &self,
        event: &Event,
        executor: E,
    ) -> Result<i64, EventBusError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        self.ensure_running()?;
        self.check_not_expired(event)?;

        let id = self
            .outbox
            .insert_with(executor, new_outbox_row(event, None))
            .await
            .map_err(|e| EventBusError::PublishFailed {
                topic: event.topic(),
                reason: e.to_string(),
            })?;

        tracing::debug!(event_id = %event.event_id, outbox_id = id, "event recorded in outbox");
        Ok(id)
    }

    /// Durably record `event` to be published no earlier than `at` (spec §4.1
    /// "publish_scheduled"). Uses the bus's own pool via the outbox store directly,
    /// since a scheduled publish has no accompanying business transaction to join.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Stopped`], [`EventBusError::Expired`], or a database
    /// failure.
    pub async fn publish_scheduled(
        &self,
        event: &Event,
        at: DateTime<Utc>,
    ) -> Result<i64, EventBusError> {
        self.ensure_running()?;
        self.check_not_expired(event)?;

        self.outbox
            .insert(new_outbox_row(event, Some(at)))
            .await
            .map_err(|e| EventBusError::PublishFailed {
                topic: event.topic(),
                reason: e.to_string(),
            })
    }

    /// Register `handler` against `topic` (or `"*"` for every topic), gated by `filter`,
    /// dispatched in `priority` order relative to other subscriptions on the same topic.
    /// Spins up a background Kafka consumer for `topic` the first time it is subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Stopped`] if the bus has been stopped, or a subscription
    /// failure if the background consumer could not be started.
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        filter: EventFilter,
        handler: Arc<dyn Handler>,
        priority: i32,
    ) -> Result<String, EventBusError> {
        self.subscribe_inner(topic, filter, handler, priority, None).await
    }

    /// As [`Self::subscribe`], but tags the subscription with `plugin_id` so it can later
    /// be bulk-removed via [`Self::unsubscribe_plugin`] (spec §4.1 plugin subscriptions).
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub async fn subscribe_plugin(
        &self,
        plugin_id: impl Into<String>,
        topic: impl Into<String>,
        filter: EventFilter,
        handler: Arc<dyn Handler>,
        priority: i32,
    ) -> Result<String, EventBusError> {
        self.subscribe_inner(topic, filter, handler, priority, Some(plugin_id.into()))
            .await
    }

    async fn subscribe_inner(
        &self,
        topic: impl Into<String>,
        filter: EventFilter,
        handler: Arc<dyn Handler>,
        priority: i32,
        plugin_id: Option<String>,
    ) -> Result<String, EventBusError> {
        self.ensure_running()?;
        let topic = topic.into();
        // "*" has no concrete Kafka topic to subscribe a consumer to; a wildcard
        // subscription only ever matches events dispatched off a consumer already
        // running for some other, concrete topic (`SubscriptionRegistry::candidates_for`).
        if topic != "*" {
            self.ensure_consuming(&topic).await?;
        }
        Ok(self
            .registry
            .subscribe(topic, filter, handler, priority, plugin_id))
    }

    /// Remove a single subscription by id.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::UnknownSubscription`] if `subscription_id` is not live.
    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), EventBusError> {
        if self.registry.unsubscribe(subscription_id) {
            Ok(())
        } else {
            Err(EventBusError::UnknownSubscription(subscription_id.to_string()))
        }
    }

    /// Remove every subscription registered by `plugin_id`. Returns the count removed.
    pub fn unsubscribe_plugin(&self, plugin_id: &str) -> usize {
        self.registry.unsubscribe_plugin(plugin_id)
    }

    /// Resubmit a dead-lettered event as a fresh pending outbox row (spec §4.1
    /// "retry_dead_letter"). The DLQ entry is marked non-retryable so a second call fails.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::DeadLetterNotFound`] if the entry doesn't exist or was
    /// already retried, or wraps a database failure otherwise.
    pub async fn retry_dead_letter(&self, dead_letter_id: i64) -> Result<i64, EventBusError> {
        let entry = self
            .dead_letters
            .get(dead_letter_id)
            .await
            .map_err(|_| EventBusError::DeadLetterNotFound(dead_letter_id.to_string()))?;

        self.dead_letters
            .mark_retried(dead_letter_id)
            .await
            .map_err(|_| EventBusError::DeadLetterNotFound(dead_letter_id.to_string()))?;

        let new_id = self
            .outbox
            .insert(NewOutboxRow {
                event_id: &format!("{}-retry-{dead_letter_id}", entry.original_event_id),
                event_type: &entry.event_type,
                event_data: entry.event_data.clone(),
                priority: Priority::Normal,
                scheduled_at: None,
                expires_at: None,
                max_attempts: 5,
                correlation_id: None,
                source_service: None,
                tenant_id: None,
            })
            .await
            .map_err(|e| EventBusError::PublishFailed {
                topic: entry.event_type.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(dead_letter_id, new_outbox_id = new_id, "dead letter requeued");
        metrics::counter!("eventbus.dlq.retried").increment(1);
        Ok(new_id)
    }

    /// Read-only DLQ listing (spec §4.1 "get_dead_letters").
    ///
    /// # Errors
    ///
    /// Returns an [`EventBusError`] wrapping a database failure.
    pub async fn get_dead_letters(
        &self,
        limit: i64,
        event_type: Option<&str>,
    ) -> Result<Vec<DeadLetterEvent>, EventBusError> {
        self.dead_letters
            .list(limit, event_type)
            .await
            .map_err(|e| EventBusError::PublishFailed {
                topic: event_type.unwrap_or("*").to_string(),
                reason: e.to_string(),
            })
    }

    /// Stop accepting new operations and abort background consumer tasks. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let tasks = self.consumer_tasks.lock().expect("consumer task list poisoned");
        for task in tasks.iter() {
            task.abort();
        }
        tracing::info!("event bus stopped");
    }

    fn ensure_running(&self) -> Result<(), EventBusError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(EventBusError::Stopped)
        } else {
            Ok(())
        }
    }

    fn check_not_expired(&self, event: &Event) -> Result<(), EventBusError> {
        if event.metadata.is_expired(Utc::now()) {
            let expiry = event.metadata.expiry.unwrap_or_else(Utc::now);
            return Err(EventBusError::Expired {
                event_id: event.event_id.clone(),
                expiry,
            });
        }
        Ok(())
    }

    async fn ensure_consuming(&self, topic: &str) -> Result<(), EventBusError> {
        {
            // Mutex poison is unrecoverable.
            #[allow(clippy::expect_used)]
            let guard = self.consuming_topics.read().expect("consuming topics poisoned");
            if guard.contains(topic) {
                return Ok(());
            }
        }

        let mut stream = platform_kafka::subscribe(
            &[topic],
            ConsumerConfig::new(self.config.brokers.clone()),
        )
        .await
        .map_err(EventBusError::from)?;

        {
            // Mutex poison is unrecoverable.
            #[allow(clippy::expect_used)]
            let mut guard = self.consuming_topics.write().expect("consuming topics poisoned");
            guard.insert(topic.to_string());
        }

        let registry = self.registry.clone();
        let dispatch_config = self.config.dispatch.clone();
        let task_topic = topic.to_string();
        let handle = tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(result) = stream.next().await {
                match result {
                    Ok(event) => {
                        let outcomes: Vec<DispatchOutcome> =
                            dispatch(&registry, &event, &dispatch_config).await;
                        for outcome in &outcomes {
                            if let Err(reason) = &outcome.result {
                                tracing::warn!(
                                    topic = %task_topic,
                                    subscription_id = %outcome.subscription_id,
                                    reason,
                                    "subscriber failed to handle event"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(topic = %task_topic, error = %err, "consumer stream error");
                    }
                }
            }
            tracing::debug!(topic = %task_topic, "consumer stream ended");
        });

        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.consumer_tasks
            .lock()
            .expect("consumer task list poisoned")
            .push(handle);
        Ok(())
    }
}

fn new_outbox_row<'a>(event: &'a Event, scheduled_at: Option<DateTime<Utc>>) -> NewOutboxRow<'a> {
    NewOutboxRow {
        event_id: &event.event_id,
        event_type: &event.event_type,
        event_data: event.payload.clone(),
        priority: event.metadata.priority,
        scheduled_at,
        expires_at: event.metadata.expiry,
        max_attempts: 5,
        correlation_id: event.metadata.correlation_id.as_deref(),
        source_service: event.metadata.source_service.as_deref(),
        tenant_id: event.metadata.tenant_id.as_deref(),
    }
}
