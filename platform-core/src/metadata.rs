//! `EventMetadata` — the cross-cutting fields carried alongside every event's payload.

use crate::priority::Priority;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Cross-cutting metadata carried by every event.
///
/// Corresponds to the `metadata` object in the wire format (§6): everything here except
/// `event_id`/`event_type`/`timestamp` (which live on [`crate::event::Event`] itself and
/// are mirrored into the serialized `metadata` object by the codec) is optional and has
/// a documented default applied on deserialization when absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventMetadata {
    /// Links this event to others produced in service of the same logical operation.
    pub correlation_id: Option<String>,
    /// Links this event to the event or command that caused it.
    pub causation_id: Option<String>,
    /// The user on whose behalf this event was produced, if any.
    pub user_id: Option<String>,
    /// The tenant this event belongs to, in a multi-tenant deployment.
    pub tenant_id: Option<String>,
    /// The service that produced this event.
    pub source_service: Option<String>,
    /// Distributed-tracing trace id.
    pub trace_id: Option<String>,
    /// Distributed-tracing span id.
    pub span_id: Option<String>,
    /// Schema version of the payload. Defaults to `1` when absent on the wire.
    pub version: i32,
    /// Delivery priority; defaults to [`Priority::Normal`].
    pub priority: Priority,
    /// Free-form string headers, propagated opaquely by transports.
    pub headers: HashMap<String, String>,
    /// Tags used for filtered subscriptions.
    pub tags: HashSet<String>,
    /// If set, the event must not be delivered once `now > expiry`.
    pub expiry: Option<DateTime<Utc>>,
}

impl EventMetadata {
    /// An empty metadata block with all defaults (`version = 1`, `priority = Normal`).
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: 1,
            priority: Priority::Normal,
            ..Default::default()
        }
    }

    /// Builder-style setter for `correlation_id`.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Builder-style setter for `causation_id`.
    #[must_use]
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Builder-style setter for `tenant_id`.
    #[must_use]
    pub fn with_tenant_id(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    /// Builder-style setter for `priority`.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style setter for `expiry`.
    #[must_use]
    pub const fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// True once `now` has passed `expiry`. Expired events must not be delivered
    /// (spec §3, Event invariants) and must be marked failed by the caller.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_version_and_priority() {
        let meta = EventMetadata::new();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.priority, Priority::Normal);
    }

    #[test]
    fn expiry_in_the_past_is_expired() {
        let now = Utc::now();
        let meta = EventMetadata::new().with_expiry(now - chrono::Duration::seconds(1));
        assert!(meta.is_expired(now));
    }

    #[test]
    fn no_expiry_never_expires() {
        let meta = EventMetadata::new();
        assert!(!meta.is_expired(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn future_expiry_not_yet_expired() {
        let now = Utc::now();
        let meta = EventMetadata::new().with_expiry(now + chrono::Duration::seconds(1));
        assert!(!meta.is_expired(now));
    }
}
