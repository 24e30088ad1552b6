//! The `Event` type and its JSON wire codec.
//!
//! Unlike the event-sourcing `Event` trait this crate's ancestor defined (one `impl` per
//! domain event enum, serialized with `bincode`), the platform's event bus moves a single
//! concrete `Event` struct across process boundaries — Kafka, the outbox, workflow
//! lifecycle notifications — so callers attach a `payload` (opaque JSON) and metadata
//! rather than implementing a trait. The wire format is mandated by the gateway/outbox
//! contract (see the external interfaces section of the design docs): two top-level keys
//! `event_type`/`data` plus a nested `metadata` object.

use crate::error::CodecError;
use crate::metadata::EventMetadata;
use crate::priority::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A platform event: a logical fact, an opaque JSON payload, and cross-cutting metadata.
///
/// Invariants (enforced at construction and by the codec, not by the type system alone):
/// `event_id` is stable across serialize/deserialize round-trips; `timestamp` must not
/// be in the future; an event whose `metadata.expiry` has passed must not be delivered
/// (callers should check [`EventMetadata::is_expired`] before handing the event to a
/// transport and mark it failed instead).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Unique identifier, assigned at construction and never changed.
    pub event_id: String,
    /// Logical event name. Maps to a Kafka topic via `event_type.replace('.', '_').lower()`.
    pub event_type: String,
    /// UTC instant the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// Opaque structured payload.
    pub payload: serde_json::Value,
    /// Cross-cutting metadata.
    pub metadata: EventMetadata,
}

impl Event {
    /// Construct a new event with a fresh `event_id` and `timestamp = now`.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
            metadata: EventMetadata::new(),
        }
    }

    /// Attach metadata, replacing the default.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The Kafka topic this event publishes to: dots replaced with underscores, lowercased.
    #[must_use]
    pub fn topic(&self) -> String {
        self.event_type.replace('.', "_").to_lowercase()
    }

    /// The partition key used unless the caller overrides partitioning for this
    /// `event_type` (e.g. routing domain events by aggregate id instead).
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.event_id
    }

    /// Serialize to the wire-format JSON bytes described in the external interfaces
    /// section (`event_type`/`data`/`metadata` top-level keys).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialize`] if the payload or metadata cannot be
    /// represented as JSON (practically unreachable for `serde_json::Value` payloads,
    /// but headers/tags could theoretically contain non-UTF8 data smuggled in by an
    /// unsafe caller).
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let wire = WireEvent::from(self);
        serde_json::to_vec(&wire).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    /// Deserialize from wire-format JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Deserialize`] if the bytes are not valid JSON or do not
    /// match the wire schema, or [`CodecError::MissingField`] if `metadata.event_id` or
    /// `metadata.timestamp` is absent (these have no documented default).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let wire: WireEvent =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))?;
        Self::try_from(wire)
    }
}

/// Wire-format metadata object nested under `metadata` (§6). Field names and optionality
/// match the spec exactly; unknown fields are preserved in `extra` so a round-trip through
/// a newer producer doesn't silently drop data a newer consumer would understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMetadata {
    event_id: String,
    event_type: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    causation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(default = "default_version")]
    version: i32,
    #[serde(default = "default_priority_value")]
    priority: i32,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    tags: HashSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

const fn default_version() -> i32 {
    1
}

const fn default_priority_value() -> i32 {
    Priority::Normal as i32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    event_type: String,
    data: serde_json::Value,
    metadata: WireMetadata,
}

impl From<&Event> for WireEvent {
    fn from(event: &Event) -> Self {
        let meta = &event.metadata;
        Self {
            event_type: event.event_type.clone(),
            data: event.payload.clone(),
            metadata: WireMetadata {
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                timestamp: event.timestamp,
                correlation_id: meta.correlation_id.clone(),
                causation_id: meta.causation_id.clone(),
                user_id: meta.user_id.clone(),
                tenant_id: meta.tenant_id.clone(),
                source_service: meta.source_service.clone(),
                trace_id: meta.trace_id.clone(),
                span_id: meta.span_id.clone(),
                version: meta.version,
                priority: meta.priority.as_i32(),
                headers: meta.headers.clone(),
                tags: meta.tags.clone(),
                expiry: meta.expiry,
                extra: HashMap::new(),
            },
        }
    }
}

impl TryFrom<WireEvent> for Event {
    type Error = CodecError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        if wire.metadata.event_id.is_empty() {
            return Err(CodecError::MissingField("metadata.event_id"));
        }
        let metadata = EventMetadata {
            correlation_id: wire.metadata.correlation_id,
            causation_id: wire.metadata.causation_id,
            user_id: wire.metadata.user_id,
            tenant_id: wire.metadata.tenant_id,
            source_service: wire.metadata.source_service,
            trace_id: wire.metadata.trace_id,
            span_id: wire.metadata.span_id,
            version: wire.metadata.version,
            priority: Priority::from_i32(wire.metadata.priority),
            headers: wire.metadata.headers,
            tags: wire.metadata.tags,
            expiry: wire.metadata.expiry,
        };
        Ok(Self {
            event_id: wire.metadata.event_id,
            event_type: wire.event_type,
            timestamp: wire.metadata.timestamp,
            payload: wire.data,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_replaces_dots_and_lowercases() {
        let event = Event::new("User.Created.V1", json!({}));
        assert_eq!(event.topic(), "user_created_v1");
    }

    #[test]
    fn roundtrip_preserves_event_id_and_payload() {
        let event = Event::new("order.placed", json!({"order_id": "o-1", "total": 9.99}))
            .with_metadata(
                EventMetadata::new()
                    .with_correlation_id("corr-1")
                    .with_tenant_id("tenant-a"),
            );

        let bytes = event.to_bytes().expect("serialize");
        let decoded = Event::from_bytes(&bytes).expect("deserialize");

        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.event_type, event.event_type);
        assert_eq!(decoded.payload, event.payload);
        assert_eq!(decoded.metadata.correlation_id, Some("corr-1".to_string()));
        assert_eq!(decoded.metadata.tenant_id, Some("tenant-a".to_string()));
    }

    #[test]
    fn wire_format_has_expected_top_level_keys() {
        let event = Event::new("user.created", json!({"id": "u-1"}));
        let bytes = event.to_bytes().expect("serialize");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");
        assert!(value.get("event_type").is_some());
        assert!(value.get("data").is_some());
        assert!(value.get("metadata").is_some());
        assert_eq!(value["metadata"]["version"], json!(1));
    }

    #[test]
    fn missing_metadata_defaults_version_to_one_and_priority_to_normal() {
        let raw = json!({
            "event_type": "user.created",
            "data": {},
            "metadata": {
                "event_id": "abc-123",
                "event_type": "user.created",
                "timestamp": Utc::now().to_rfc3339(),
            }
        });
        let decoded = Event::from_bytes(raw.to_string().as_bytes()).expect("deserialize");
        assert_eq!(decoded.metadata.version, 1);
        assert_eq!(decoded.metadata.priority, Priority::Normal);
    }

    #[test]
    fn missing_event_id_is_a_codec_error() {
        let raw = json!({
            "event_type": "user.created",
            "data": {},
            "metadata": {
                "event_id": "",
                "event_type": "user.created",
                "timestamp": Utc::now().to_rfc3339(),
            }
        });
        let err = Event::from_bytes(raw.to_string().as_bytes()).expect_err("should fail");
        assert!(matches!(err, CodecError::MissingField("metadata.event_id")));
    }
}
