//! Distributed saga coordination (spec §4.9): sagas are workflows whose steps send a
//! command over the event bus and wait for a correlated reply, with compensation
//! sending a configured compensation command fire-and-forget.

pub mod definition;
pub mod error;
pub mod event_bus;
pub mod manager;

pub use definition::{SagaDefinition, SagaStepSpec};
pub use error::SagaError;
pub use event_bus::SagaEventBus;
pub use manager::{DistributedSagaManager, SagaMetadata};
