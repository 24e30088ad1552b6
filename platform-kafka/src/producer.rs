//! Kafka producer wrapper. Grounded directly on `redpanda::RedpandaEventBus`'s builder
//! and `publish` implementation, generalized from `bincode` payloads to the caller
//! supplying already-encoded bytes (the JSON wire format lives in `platform-core`).

use crate::error::KafkaError;
use platform_outbox::processor::OutboxPublisher;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A Kafka producer, shareable across tasks (`FutureProducer` is internally `Arc`-backed
/// by rdkafka and safe to clone).
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    /// Start building a producer.
    #[must_use]
    pub fn builder() -> KafkaProducerBuilder {
        KafkaProducerBuilder::default()
    }

    /// Publish `payload` to `topic` keyed by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KafkaError::PublishFailed`] if the broker rejects the send or the
    /// send times out.
    pub async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), KafkaError> {
        let record = FutureRecord::to(topic).payload(payload).key(key);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(topic, partition, offset, "event published");
                Ok(())
            }
            Err((err, _)) => {
                tracing::error!(topic, error = %err, "failed to publish event");
                Err(KafkaError::PublishFailed {
                    topic: topic.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

impl OutboxPublisher for KafkaProducer {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>> {
        Box::pin(async move { self.publish(topic, key, payload).await.map_err(|e| e.to_string()) })
    }
}

/// Builder for [`KafkaProducer`], mirroring the teacher's `RedpandaEventBusBuilder`.
#[derive(Default)]
pub struct KafkaProducerBuilder {
    brokers: Option<String>,
    acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    idempotent: bool,
}

impl KafkaProducerBuilder {
    /// Comma-separated bootstrap broker list. Required.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"`, or `"all"`. Default `"1"`.
    #[must_use]
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Compression codec. Default `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable the idempotent producer (exactly-once within the Kafka cluster per spec
    /// §1's "effectively-exactly-once" goal, combined with the transactional outbox).
    #[must_use]
    pub const fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Build the producer.
    ///
    /// # Errors
    ///
    /// Returns [`KafkaError::ConnectionFailed`] if `brokers` was never set or rdkafka
    /// rejects the client configuration.
    pub fn build(self) -> Result<KafkaProducer, KafkaError> {
        let brokers = self
            .brokers
            .ok_or_else(|| KafkaError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.acks.as_deref().unwrap_or("1"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"));

        if self.idempotent {
            config.set("enable.idempotence", "true");
        }

        let producer: FutureProducer = config
            .create()
            .map_err(|e| KafkaError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, idempotent = self.idempotent, "kafka producer created");

        Ok(KafkaProducer {
            producer,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}
