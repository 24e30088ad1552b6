//! Workflow lifecycle event construction (spec §4.8 "Event integration").
//!
//! Every status transition publishes one of these `WorkflowEvent`s through the bus,
//! `correlation_id` set to the workflow_id. Grounded on the original source's
//! `create_workflow_event` helper, generalized to the platform's single `Event` struct
//! instead of a `BaseEvent` subclass hierarchy.

use platform_core::{Event, EventMetadata};
use serde_json::json;

/// Build a lifecycle event for publication on the bus.
///
/// `event_type` becomes the Kafka topic (via `Event::topic`); by convention these are
/// namespaced `workflow.<name>` so a single consumer can subscribe to `"workflow.*"`.
pub fn lifecycle_event(
    event_type: &str,
    workflow_id: &str,
    workflow_type: &str,
    status: &str,
    step_id: Option<&str>,
    data: serde_json::Value,
    correlation_id: Option<&str>,
) -> Event {
    let payload = json!({
        "workflow_id": workflow_id,
        "workflow_type": workflow_type,
        "workflow_status": status,
        "workflow_step": step_id,
        "workflow_data": data,
    });

    let metadata = EventMetadata::new().with_correlation_id(correlation_id.unwrap_or(workflow_id));

    Event::new(format!("workflow.{event_type}"), payload).with_metadata(metadata)
}
