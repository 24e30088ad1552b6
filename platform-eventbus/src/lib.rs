//! Publish/subscribe event bus: filtering, scheduled publish, DLQ retry, and the dispatch
//! algorithm that fans an incoming event out to every matching subscription.
//!
//! Composes [`platform_kafka`] (transport) and [`platform_outbox`] (durability) behind
//! one facade, [`bus::EventBus`], grounded on the shape of the teacher's
//! `core::event_bus::EventBus` trait.

pub mod bus;
pub mod dispatch;
pub mod filter;
pub mod handler;
pub mod in_memory;
pub mod subscription;

pub use bus::{EventBus, EventBusConfig};
pub use dispatch::{DispatchConfig, DispatchOutcome};
pub use filter::{EventFilter, TimeRange};
pub use handler::{DirectHandler, Handler, HandlerError, HandlerResult, PluginHandler, WorkflowStepHandler};
pub use in_memory::InMemoryEventBus;
pub use subscription::{Subscription, SubscriptionRegistry};
