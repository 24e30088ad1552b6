//! Shared error taxonomy.
//!
//! Each downstream crate (`platform-kafka`, `platform-eventbus`, `platform-outbox`, ...)
//! defines its own `thiserror` enum for concerns specific to that crate, but every one of
//! them wraps or converts into `EventBusError` at the point where it crosses into
//! publish/subscribe territory, so callers have one error type to match on regardless of
//! which transport is behind the bus.

use thiserror::Error;

/// Errors surfaced by codec (serialize/deserialize) operations.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The event could not be serialized to the wire format.
    #[error("failed to serialize event: {0}")]
    Serialize(String),

    /// The bytes did not decode to a valid wire-format event.
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    /// A required wire-format field was absent and has no documented default.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Errors surfaced by the event bus, regardless of transport.
#[derive(Error, Debug)]
pub enum EventBusError {
    /// Failed to connect to the underlying transport.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to one or more topics.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Codec error while encoding or decoding an event.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The event's `expiry` is in the past; it must not be delivered.
    #[error("event {event_id} expired at {expiry}")]
    Expired {
        /// The expired event's id.
        event_id: String,
        /// The expiry instant that was exceeded.
        expiry: chrono::DateTime<chrono::Utc>,
    },

    /// Subscription id not found (double-unsubscribe, or never registered).
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    /// The bus has been stopped and no longer accepts operations.
    #[error("event bus is stopped")]
    Stopped,

    /// The requested dead-letter event does not exist or was already retried.
    #[error("dead letter event not found or already retried: {0}")]
    DeadLetterNotFound(String),
}
