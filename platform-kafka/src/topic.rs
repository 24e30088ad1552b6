//! Topic naming and partition-key derivation (spec §6: "Kafka topic naming").

use platform_core::Event;
use std::collections::HashMap;

/// The Kafka topic an event publishes to: `event_type.replace('.', '_').lower()`.
///
/// The spec commits to per-event-type topics (§9 Open Question, resolved in
/// `DESIGN.md`) rather than per-pool topics.
#[must_use]
pub fn topic_for_event_type(event_type: &str) -> String {
    event_type.replace('.', "_").to_lowercase()
}

/// A function computing a custom partition key for a given event.
pub type PartitionKeyFn = Box<dyn Fn(&Event) -> String + Send + Sync>;

/// Registry of per-event-type partition key overrides.
///
/// By default the partition key is `event.event_id` (spec §4.1 "Ordering"); an
/// `event_type` may register a different function, e.g. to partition domain events by
/// aggregate id so all events for one aggregate land on the same partition.
#[derive(Default)]
pub struct PartitionKeyRegistry {
    overrides: HashMap<String, PartitionKeyFn>,
}

impl PartitionKeyRegistry {
    /// An empty registry; every event_type uses the default (`event_id`) key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom partition key function for `event_type`.
    pub fn register(&mut self, event_type: impl Into<String>, key_fn: PartitionKeyFn) {
        self.overrides.insert(event_type.into(), key_fn);
    }

    /// Compute the partition key for `event`, honoring any registered override.
    #[must_use]
    pub fn key_for(&self, event: &Event) -> String {
        match self.overrides.get(&event.event_type) {
            Some(key_fn) => key_fn(event),
            None => event.partition_key().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dots_become_underscores_and_lowercased() {
        assert_eq!(topic_for_event_type("User.Created.V1"), "user_created_v1");
    }

    #[test]
    fn default_partition_key_is_event_id() {
        let registry = PartitionKeyRegistry::new();
        let event = Event::new("order.placed", json!({}));
        assert_eq!(registry.key_for(&event), event.event_id);
    }

    #[test]
    fn registered_override_takes_priority() {
        let mut registry = PartitionKeyRegistry::new();
        registry.register(
            "order.placed",
            Box::new(|e| e.payload.get("order_id").and_then(|v| v.as_str()).unwrap_or("").to_string()),
        );
        let event = Event::new("order.placed", json!({"order_id": "o-42"}));
        assert_eq!(registry.key_for(&event), "o-42");
    }
}
