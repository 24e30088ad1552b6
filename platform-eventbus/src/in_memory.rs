//! An in-memory [`EventBus`](crate::bus::EventBus) stand-in for tests that don't want a
//! live Kafka/Postgres, implementing the same publish/subscribe/dispatch semantics over a
//! `Vec` instead of a transport.
//!
//! Grounded on the teacher's `testing` crate convention of shipping an in-memory double
//! next to the real implementation for fast unit tests.

use crate::dispatch::{dispatch, DispatchConfig, DispatchOutcome};
use crate::filter::EventFilter;
use crate::handler::Handler;
use crate::subscription::SubscriptionRegistry;
use platform_core::{Event, EventBusError};
use std::sync::{Arc, Mutex};

/// An in-process event bus: `publish` dispatches synchronously to every matching
/// subscription instead of round-tripping through Kafka. No outbox, no DLQ, no
/// durability — intended for unit-testing handlers and dispatch ordering.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    registry: Arc<SubscriptionRegistry>,
    dispatch_config: Arc<DispatchConfig>,
    published: Arc<Mutex<Vec<Event>>>,
}

impl InMemoryEventBus {
    /// A fresh bus with no subscriptions and the default dispatch configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            dispatch_config: Arc::new(DispatchConfig::default()),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publish `event`, dispatching to every matching subscription and recording it in
    /// [`Self::published`] for test assertions.
    pub async fn publish(&self, event: Event) -> Vec<DispatchOutcome> {
        let outcomes = dispatch(&self.registry, &event, &self.dispatch_config).await;
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.published.lock().expect("published log poisoned").push(event);
        outcomes
    }

    /// Register `handler` against `topic`, as [`crate::bus::EventBus::subscribe`].
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        filter: EventFilter,
        handler: Arc<dyn Handler>,
        priority: i32,
    ) -> String {
        self.registry.subscribe(topic, filter, handler, priority, None)
    }

    /// Remove a subscription by id.
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

    /// Every event published so far, in publish order.
    #[must_use]
    pub fn published_events(&self) -> Vec<Event> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.published.lock().expect("published log poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DirectHandler;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn publish_dispatches_to_matching_subscription_and_records_event() {
        let bus = InMemoryEventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        bus.subscribe("order.placed", EventFilter::any(), handler, 0);

        let event = Event::new("order.placed", json!({}));
        let outcomes = bus.publish(event).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.published_events().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_errors() {
        let bus = InMemoryEventBus::new();
        let err = bus.unsubscribe("nonexistent").unwrap_err();
        assert!(matches!(err, EventBusError::UnknownSubscription(_)));
    }
}
