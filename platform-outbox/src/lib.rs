//! Transactional outbox: durable event store, dead-letter queue and background pump.
//!
//! Grounded on the teacher's `postgres::dead_letter_queue` module — the closest real
//! analogue it ships to an outbox/DLQ pair — generalized from a single fixed
//! `failed_events` table to the full PENDING/PROCESSING/COMPLETED/DEAD_LETTER lifecycle
//! spec §3/§4.2 require.

pub mod dead_letter;
pub mod error;
pub mod model;
pub mod processor;
pub mod store;

pub use dead_letter::DeadLetterStore;
pub use error::OutboxError;
pub use model::{DeadLetterEvent, OutboxEvent, OutboxStatus};
pub use processor::{OutboxProcessor, OutboxProcessorConfig, OutboxPublisher};
pub use store::{NewOutboxRow, OutboxStore};
