//! Subscription registry: tracks which handlers are interested in which topics.
//!
//! Grounded on `core::event_bus::EventBus::subscribe`'s subscription-id issuance and
//! unsubscribe-by-id contract, extended with the spec §4.1 requirement that plugin
//! subscriptions can be detached in bulk when a plugin unloads.

use crate::filter::EventFilter;
use crate::handler::Handler;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// One registered interest: a handler plus the filter gating it, along with the plugin
/// that registered it, if any.
pub struct Subscription {
    /// Opaque id returned to the caller of `subscribe`, used later to `unsubscribe`.
    pub id: String,
    /// Topic this subscription was registered against (spec §4.1: subscriptions are
    /// keyed by topic, with `"*"` matching every topic).
    pub topic: String,
    /// Filtering criteria narrowing which events on `topic` actually dispatch.
    pub filter: EventFilter,
    /// The handler invoked on a match.
    pub handler: Arc<dyn Handler>,
    /// Dispatch priority: higher runs first among handlers matching the same event.
    pub priority: i32,
    /// Plugin id this subscription belongs to, if it was registered via
    /// `subscribe_plugin` rather than a direct `subscribe` call.
    pub plugin_id: Option<String>,
}

/// Thread-safe registry of active subscriptions, keyed by topic.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_topic: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
}

impl SubscriptionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` against `topic`, returning the new subscription id.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        filter: EventFilter,
        handler: Arc<dyn Handler>,
        priority: i32,
        plugin_id: Option<String>,
    ) -> String {
        let topic = topic.into();
        let id = Uuid::new_v4().to_string();
        let subscription = Arc::new(Subscription {
            id: id.clone(),
            topic: topic.clone(),
            filter,
            handler,
            priority,
            plugin_id,
        });

        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut guard = self.by_topic.write().expect("subscription registry poisoned");
        guard.entry(topic).or_default().push(subscription);
        id
    }

    /// Remove the subscription with `subscription_id`, returning `true` if one existed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut guard = self.by_topic.write().expect("subscription registry poisoned");
        let mut removed = false;
        for subs in guard.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.id != subscription_id);
            removed |= subs.len() != before;
        }
        guard.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Remove every subscription registered by `plugin_id`, returning how many were removed.
    pub fn unsubscribe_plugin(&self, plugin_id: &str) -> usize {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let mut guard = self.by_topic.write().expect("subscription registry poisoned");
        let mut removed = 0;
        for subs in guard.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.plugin_id.as_deref() != Some(plugin_id));
            removed += before - subs.len();
        }
        guard.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// All subscriptions that could possibly apply to `topic`: those registered exactly
    /// against `topic`, plus wildcard (`"*"`) subscriptions.
    #[must_use]
    pub fn candidates_for(&self, topic: &str) -> Vec<Arc<Subscription>> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let guard = self.by_topic.read().expect("subscription registry poisoned");
        let mut result = Vec::new();
        if let Some(exact) = guard.get(topic) {
            result.extend(exact.iter().cloned());
        }
        if topic != "*" {
            if let Some(wildcard) = guard.get("*") {
                result.extend(wildcard.iter().cloned());
            }
        }
        result
    }

    /// Total number of live subscriptions, across all topics.
    #[must_use]
    pub fn len(&self) -> usize {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let guard = self.by_topic.read().expect("subscription registry poisoned");
        guard.values().map(Vec::len).sum()
    }

    /// Whether the registry currently holds no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DirectHandler;
    use platform_core::Event;

    fn noop_handler() -> Arc<dyn Handler> {
        Arc::new(DirectHandler::new(|_: &Event| async { Ok(()) }))
    }

    #[test]
    fn subscribe_and_unsubscribe_roundtrip() {
        let registry = SubscriptionRegistry::new();
        let id = registry.subscribe("order.placed", EventFilter::any(), noop_handler(), 0, None);
        assert_eq!(registry.len(), 1);
        assert!(registry.unsubscribe(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn wildcard_subscription_is_candidate_for_any_topic() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("*", EventFilter::any(), noop_handler(), 0, None);
        assert_eq!(registry.candidates_for("order.placed").len(), 1);
        assert_eq!(registry.candidates_for("anything").len(), 1);
    }

    #[test]
    fn unsubscribe_plugin_removes_only_that_plugins_subscriptions() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(
            "order.placed",
            EventFilter::any(),
            noop_handler(),
            0,
            Some("plugin-a".to_string()),
        );
        registry.subscribe(
            "order.placed",
            EventFilter::any(),
            noop_handler(),
            0,
            Some("plugin-b".to_string()),
        );
        let removed = registry.unsubscribe_plugin("plugin-a");
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);
    }
}
