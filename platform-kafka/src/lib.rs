//! Kafka-compatible transport: producer, consumer and topic/partition naming.
//!
//! Grounded on `redpanda::RedpandaEventBus` (builder pattern, manual-commit consumer
//! loop), generalized to the platform's JSON wire format instead of `bincode`.

pub mod consumer;
pub mod error;
pub mod producer;
pub mod topic;

pub use consumer::{subscribe, ConsumerConfig, KafkaEventStream};
pub use error::KafkaError;
pub use producer::{KafkaProducer, KafkaProducerBuilder};
pub use topic::{topic_for_event_type, PartitionKeyRegistry};
