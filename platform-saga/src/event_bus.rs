//! `SagaEventBus`: a thin facade over [`platform_eventbus::EventBus`] for command/reply
//! exchange between a saga step and the service that owns it (spec §4.9).
//!
//! Grounded on `original_source/.../saga_integration.py`'s `SagaEventBus` (publishes
//! lifecycle events, sends commands, correlates replies by `saga_id`) and on
//! `platform_eventbus::handler::WorkflowStepHandler`'s existing
//! `(workflow_instance_id, step_id)`-scoped resume shape, which this reuses the
//! underlying `Handler`/`EventFilter` primitives of rather than duplicating.
//!
//! Replies land on one fixed, shared topic (`SAGA_REPLY_EVENT_TYPE`) rather than the
//! saga-specific `"*"` wildcard this crate originally subscribed: `EventBus::subscribe`
//! only starts a real Kafka consumer for a concrete topic, and `"*"` maps to no topic at
//! all (`platform_kafka::subscribe` has no wildcard/regex convention). Since a saga's
//! reply "topic" is otherwise a dynamic, per-instance name
//! (`saga.<saga_id>.<event_type>`) that nothing is ever pre-subscribed to, awaiting on
//! it would time out against a live Kafka backend every time. Replying services call
//! [`Self::publish_reply`], which publishes to the same fixed topic `await_reply`
//! subscribes to once (cached by `EventBus::ensure_consuming`); both sides are narrowed
//! back down to the right saga instance by `metadata.correlation_id == saga_id`.

use crate::error::SagaError;
use platform_core::{Event, EventMetadata};
use platform_eventbus::{EventBus, EventFilter, Handler, HandlerResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// The fixed event type every saga reply is published under, regardless of which saga
/// or step it answers — `metadata.correlation_id` (the `saga_id`) is what narrows
/// `await_reply` back down to one instance, not the topic.
const SAGA_REPLY_EVENT_TYPE: &str = "saga.reply";

/// Command/reply/event-publication facade scoped to one saga instance's lifetime.
///
/// Cheaply cloneable (wraps an already-`Clone` [`EventBus`]), so each saga step's
/// action closure can hold its own copy.
#[derive(Clone)]
pub struct SagaEventBus {
    bus: EventBus,
}

impl SagaEventBus {
    /// Wrap an existing event bus.
    #[must_use]
    pub const fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Publish a saga lifecycle event under `saga.<saga_id>.<event_type>` (spec §4.9
    /// "publishes saga events with routing key `saga.<saga_id>.*`"), correlated by
    /// `saga_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::EventBus`] if the underlying publish fails.
    pub async fn publish_saga_event(
        &self,
        saga_id: &str,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<(), SagaError> {
        let metadata = EventMetadata::new().with_correlation_id(saga_id);
        let event = Event::new(format!("saga.{saga_id}.{event_type}"), data).with_metadata(metadata);
        self.bus.publish(&event).await?;
        Ok(())
    }

    /// Send a command to `target_service`, tagged with `saga_id` as the correlation id
    /// and `step_id` as a header (spec §4.9 "sends commands with
    /// `metadata.correlation_id = saga_id` and a `step_id` header").
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::EventBus`] if the underlying publish fails.
    pub async fn send_command(
        &self,
        saga_id: &str,
        step_id: &str,
        target_service: &str,
        command_type: &str,
        data: serde_json::Value,
    ) -> Result<(), SagaError> {
        let mut metadata = EventMetadata::new().with_correlation_id(saga_id);
        metadata.headers.insert("step_id".to_string(), step_id.to_string());
        metadata.headers.insert("target_service".to_string(), target_service.to_string());

        let event = Event::new(format!("command.{target_service}.{command_type}"), data).with_metadata(metadata);
        self.bus.publish(&event).await?;
        Ok(())
    }

    /// Reply to a command previously received via [`Self::send_command`], publishing on
    /// the fixed `SAGA_REPLY_EVENT_TYPE` topic that [`Self::await_reply`] subscribes to.
    ///
    /// `data` is the step's output on success and is ignored on failure; `error`
    /// describes the failure when `success` is `false`. The payload shape
    /// (`success`/`data`/`error`) matches what `DistributedSagaManager` expects back
    /// from a step command's reply.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::EventBus`] if the underlying publish fails.
    pub async fn publish_reply(
        &self,
        saga_id: &str,
        success: bool,
        data: serde_json::Value,
        error: Option<&str>,
    ) -> Result<(), SagaError> {
        let metadata = EventMetadata::new().with_correlation_id(saga_id);
        let payload = serde_json::json!({
            "success": success,
            "data": data,
            "error": error,
        });
        let event = Event::new(SAGA_REPLY_EVENT_TYPE.to_string(), payload).with_metadata(metadata);
        self.bus.publish(&event).await?;
        Ok(())
    }

    /// Wait for the next reply correlated to `saga_id` on the shared reply topic, up to
    /// `timeout` (spec §4.9 "subscribes a saga-specific handler that filters by
    /// `metadata.correlation_id == saga_id`"). Used by a saga step to wait for the
    /// target service's reply, published via [`Self::publish_reply`], to
    /// [`Self::send_command`].
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::ReplyTimeout`] if nothing correlated arrives in time, or
    /// [`SagaError::EventBus`] if the subscription itself could not be established.
    pub async fn await_reply(&self, saga_id: &str, timeout: Duration) -> Result<Event, SagaError> {
        let (tx, rx) = oneshot::channel();
        let handler: Arc<dyn Handler> = Arc::new(ReplyHandler { tx: Mutex::new(Some(tx)) });
        let filter = EventFilter {
            correlation_ids: vec![saga_id.to_string()],
            ..EventFilter::any()
        };

        let subscription_id = self
            .bus
            .subscribe(SAGA_REPLY_EVENT_TYPE, filter, handler, 0)
            .await?;
        let outcome = tokio::time::timeout(timeout, rx).await;
        let _ = self.bus.unsubscribe(&subscription_id);

        match outcome {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(SagaError::ReplyChannelClosed(saga_id.to_string())),
            Err(_) => Err(SagaError::ReplyTimeout(saga_id.to_string())),
        }
    }
}

struct ReplyHandler {
    tx: Mutex<Option<oneshot::Sender<Event>>>,
}

impl Handler for ReplyHandler {
    fn handle<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>> {
        Box::pin(async move {
            // Panic on mutex poison is acceptable - it's unrecoverable.
            #[allow(clippy::expect_used)]
            let mut guard = self.tx.lock().expect("saga reply handler mutex poisoned");
            if let Some(tx) = guard.take() {
                let _ = tx.send(event.clone());
            }
            Ok(())
        })
    }
}
