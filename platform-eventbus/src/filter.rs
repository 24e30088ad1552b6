//! Event filtering (spec §4.1): a subscription matches an event iff every present
//! criterion holds; an absent criterion is ignored.

use chrono::{DateTime, Utc};
use platform_core::{Event, Priority};
use std::collections::HashMap;

/// An optional time range, inclusive on both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    /// Range start.
    pub from: DateTime<Utc>,
    /// Range end.
    pub until: DateTime<Utc>,
}

impl TimeRange {
    fn covers(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && instant <= self.until
    }
}

/// A subscription filter. Every field is optional; an absent field places no
/// constraint on matching.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Event types this filter accepts. Empty means "no constraint", not "accept none".
    pub event_types: Vec<String>,
    /// Source services this filter accepts.
    pub source_services: Vec<String>,
    /// Tenant ids this filter accepts.
    pub tenant_ids: Vec<String>,
    /// Correlation ids this filter accepts.
    pub correlation_ids: Vec<String>,
    /// Tags; an event matches if any one of its tags is in this set.
    pub tags: Vec<String>,
    /// Minimum priority (inclusive).
    pub priority_min: Option<Priority>,
    /// Restrict to events whose `timestamp` falls in this range.
    pub timestamp_range: Option<TimeRange>,
    /// `(key, value)` pairs that must all match `event.payload[key] == value`.
    pub custom_filters: HashMap<String, serde_json::Value>,
}

impl EventFilter {
    /// An unconstrained filter: matches every event.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to a single event type (the common case).
    #[must_use]
    pub fn for_event_type(event_type: impl Into<String>) -> Self {
        Self {
            event_types: vec![event_type.into()],
            ..Self::default()
        }
    }

    /// Whether `event` matches every present criterion (spec §4.1 filtering rule).
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.iter().any(|t| t == &event.event_type)
        {
            return false;
        }
        if !self.source_services.is_empty() {
            let Some(source) = &event.metadata.source_service else {
                return false;
            };
            if !self.source_services.iter().any(|s| s == source) {
                return false;
            }
        }
        if !self.tenant_ids.is_empty() {
            let Some(tenant) = &event.metadata.tenant_id else {
                return false;
            };
            if !self.tenant_ids.iter().any(|t| t == tenant) {
                return false;
            }
        }
        if !self.correlation_ids.is_empty() {
            let Some(correlation) = &event.metadata.correlation_id else {
                return false;
            };
            if !self.correlation_ids.iter().any(|c| c == correlation) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| event.metadata.tags.contains(t)) {
            return false;
        }
        if let Some(min) = self.priority_min {
            if event.metadata.priority < min {
                return false;
            }
        }
        if let Some(range) = &self.timestamp_range {
            if !range.covers(event.timestamp) {
                return false;
            }
        }
        for (key, expected) in &self.custom_filters {
            match event.payload.get(key) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> Event {
        Event::new("order.placed", json!({"region": "eu"}))
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(EventFilter::any().matches(&event()));
    }

    #[test]
    fn event_type_mismatch_rejects() {
        let filter = EventFilter::for_event_type("order.shipped");
        assert!(!filter.matches(&event()));
    }

    #[test]
    fn custom_filter_checks_payload_value() {
        let mut filter = EventFilter::any();
        filter.custom_filters.insert("region".to_string(), json!("eu"));
        assert!(filter.matches(&event()));

        filter.custom_filters.insert("region".to_string(), json!("us"));
        assert!(!filter.matches(&event()));
    }

    #[test]
    fn priority_min_rejects_lower_priority() {
        let mut filter = EventFilter::any();
        filter.priority_min = Some(Priority::High);
        assert!(!filter.matches(&event())); // default priority is Normal
    }

    #[test]
    fn tags_require_any_intersection() {
        let mut evt = event();
        evt.metadata.tags.insert("billing".to_string());
        let mut filter = EventFilter::any();
        filter.tags = vec!["shipping".to_string()];
        assert!(!filter.matches(&evt));
        filter.tags = vec!["billing".to_string(), "shipping".to_string()];
        assert!(filter.matches(&evt));
    }
}
