//! Core event model shared by every platform crate.
//!
//! This crate defines the wire-level `Event` type, its metadata, the JSON codec used to
//! move it across process boundaries (Kafka, the outbox, the workflow engine's event
//! integration), and the handful of small traits (`Clock`) that let the rest of the
//! workspace swap real time for deterministic test time.
//!
//! Nothing in here talks to Kafka or Postgres directly — see `platform-kafka` and
//! `platform-outbox` for that. This crate is the shared vocabulary.

pub mod clock;
pub mod error;
pub mod event;
pub mod metadata;
pub mod priority;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CodecError, EventBusError};
pub use event::Event;
pub use metadata::EventMetadata;
pub use priority::Priority;
