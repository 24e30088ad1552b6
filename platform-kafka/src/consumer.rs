//! Kafka consumer wrapper: manual-commit consumer loop feeding an mpsc channel.
//!
//! Grounded directly on `redpanda::RedpandaEventBus::subscribe`: commit happens only
//! after the decoded event has been successfully sent to the downstream channel, which
//! is the at-least-once contract spec §4.2 invariant (b) documents — a crash between
//! channel-send and commit can redeliver, so subscribers must be idempotent.

use crate::error::KafkaError;
use platform_core::Event;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::pin::Pin;

/// A stream of decoded events (or per-message errors) from one or more subscribed topics.
pub type KafkaEventStream = Pin<Box<dyn futures::Stream<Item = Result<Event, KafkaError>> + Send>>;

/// Configuration for subscribing to a set of topics.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Bootstrap broker list.
    pub brokers: String,
    /// Explicit consumer group id. If `None`, one is derived from the sorted topic list.
    pub consumer_group: Option<String>,
    /// Channel buffer size between the Kafka consumer task and the returned stream.
    pub buffer_size: usize,
    /// `auto.offset.reset` policy for new consumer groups. Default `"latest"`.
    pub auto_offset_reset: String,
    /// `session.timeout.ms`.
    pub session_timeout_ms: u32,
    /// `heartbeat.interval.ms`.
    pub heartbeat_interval_ms: u32,
}

impl ConsumerConfig {
    /// Construct a config with the teacher's defaults (buffer 1000, offset reset
    /// `"latest"`, 6s session timeout).
    #[must_use]
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            consumer_group: None,
            buffer_size: 1000,
            auto_offset_reset: "latest".to_string(),
            session_timeout_ms: 6000,
            heartbeat_interval_ms: 2000,
        }
    }
}

/// Subscribe to `topics`, returning a stream of decoded events.
///
/// Spawns a background task owning the `StreamConsumer`; the task exits when the
/// returned stream (and its channel receiver) is dropped.
///
/// # Errors
///
/// Returns [`KafkaError::SubscriptionFailed`] if the consumer cannot be created or the
/// topic subscription is rejected.
pub async fn subscribe(
    topics: &[&str],
    config: ConsumerConfig,
) -> Result<KafkaEventStream, KafkaError> {
    let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

    let consumer_group_id = config.consumer_group.clone().unwrap_or_else(|| {
        let mut sorted = topics.clone();
        sorted.sort();
        format!("platform-{}", sorted.join("-"))
    });

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &consumer_group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set("heartbeat.interval.ms", config.heartbeat_interval_ms.to_string())
        .set("enable.partition.eof", "false")
        .create()
        .map_err(|e| KafkaError::SubscriptionFailed {
            topics: topics.clone(),
            reason: format!("failed to create consumer: {e}"),
        })?;

    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
    consumer
        .subscribe(&topic_refs)
        .map_err(|e| KafkaError::SubscriptionFailed {
            topics: topics.clone(),
            reason: format!("failed to subscribe: {e}"),
        })?;

    tracing::info!(
        ?topics,
        consumer_group = %consumer_group_id,
        "subscribed to topics"
    );

    let (tx, rx) = tokio::sync::mpsc::channel(config.buffer_size);

    tokio::spawn(async move {
        use futures::StreamExt;
        use rdkafka::consumer::CommitMode;

        let mut stream = consumer.stream();

        while let Some(msg_result) = stream.next().await {
            match msg_result {
                Ok(message) => {
                    let decoded = match message.payload() {
                        Some(payload) => Event::from_bytes(payload)
                            .map_err(|e| KafkaError::PublishFailed {
                                topic: message.topic().to_string(),
                                reason: e.to_string(),
                            }),
                        None => Err(KafkaError::PublishFailed {
                            topic: message.topic().to_string(),
                            reason: "message has no payload".to_string(),
                        }),
                    };

                    if tx.send(decoded).await.is_err() {
                        tracing::debug!("receiver dropped, exiting consumer task");
                        break;
                    }

                    // Commit only after the event reached the channel: at-least-once,
                    // never at-most-once.
                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!(
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            error = %e,
                            "failed to commit offset; message may be redelivered"
                        );
                    }
                }
                Err(e) => {
                    let err = KafkaError::SubscriptionFailed {
                        topics: topics.clone(),
                        reason: e.to_string(),
                    };
                    if tx.send(Err(err)).await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("consumer task exiting");
    });

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(result) = rx.recv().await {
            yield result;
        }
    };

    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_consumer_group_derivation_sorts_topics() {
        let topics = ["b.events", "a.events"];
        let mut sorted: Vec<&str> = topics.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ["a.events", "b.events"]);
    }

    #[test]
    fn consumer_config_defaults() {
        let cfg = ConsumerConfig::new("localhost:9092");
        assert_eq!(cfg.buffer_size, 1000);
        assert_eq!(cfg.auto_offset_reset, "latest");
    }
}
