//! Kafka transport errors, convertible into `platform_core::EventBusError`.

use thiserror::Error;

/// Errors from the Kafka producer/consumer transport.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to build a producer or consumer from configuration.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The underlying rdkafka error.
        reason: String,
    },

    /// Failed to subscribe to one or more topics.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The underlying rdkafka error.
        reason: String,
    },
}

impl From<KafkaError> for platform_core::EventBusError {
    fn from(err: KafkaError) -> Self {
        match err {
            KafkaError::ConnectionFailed(reason) => Self::ConnectionFailed(reason),
            KafkaError::PublishFailed { topic, reason } => Self::PublishFailed { topic, reason },
            KafkaError::SubscriptionFailed { topics, reason } => {
                Self::SubscriptionFailed { topics, reason }
            }
        }
    }
}
