//! `SagaDefinition`/`SagaStepSpec`: the declarative shape a saga is registered from
//! (spec §4.9), translated into a [`platform_workflow::WorkflowDefinition`] by
//! [`crate::manager::DistributedSagaManager::register_saga`].
//!
//! Grounded on `original_source/.../saga_integration.py`'s per-saga `steps` list (each
//! entry naming a target service, a command, an optional compensation command, and a
//! timeout) rather than the generic [`platform_workflow::Step`] builder, since a saga
//! step's body is always "send a command, await the correlated reply" and never an
//! arbitrary closure.

use std::time::Duration;

/// One step of a [`SagaDefinition`]: send `command_type` to `target_service` and wait
/// for its correlated reply.
pub struct SagaStepSpec {
    /// Stable identifier, unique within the saga.
    pub step_id: String,
    /// Human-readable name, used in logs and lifecycle events.
    pub name: String,
    /// The service this step's command is addressed to.
    pub target_service: String,
    /// The command sent to `target_service` (becomes the `command.<target_service>.<command_type>`
    /// event name).
    pub command_type: String,
    /// Payload merged into the command event, in addition to the running context's
    /// accumulated `data`.
    pub command_data: serde_json::Map<String, serde_json::Value>,
    /// If set, sent (fire-and-forget, no awaited reply) to `target_service` during
    /// compensation, mirroring `_compensate_step`'s behavior in the source this is
    /// grounded on.
    pub compensation_command: Option<String>,
    /// Bounds both the single command/reply round trip and the per-attempt engine
    /// timeout.
    pub timeout: Duration,
    /// Additional attempts beyond the first if the step's reply reports failure or the
    /// reply times out.
    pub retry_count: u32,
}

impl SagaStepSpec {
    /// A step with no compensation command, zero retries, and a 30s timeout.
    #[must_use]
    pub fn new(step_id: impl Into<String>, name: impl Into<String>, target_service: impl Into<String>, command_type: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            target_service: target_service.into(),
            command_type: command_type.into(),
            command_data: serde_json::Map::new(),
            compensation_command: None,
            timeout: Duration::from_secs(30),
            retry_count: 0,
        }
    }

    /// Attach a compensation command, sent fire-and-forget during compensation.
    #[must_use]
    pub fn with_compensation(mut self, command_type: impl Into<String>) -> Self {
        self.compensation_command = Some(command_type.into());
        self
    }

    /// Attach static payload data merged into the command event.
    #[must_use]
    pub fn with_command_data(mut self, data: serde_json::Map<String, serde_json::Value>) -> Self {
        self.command_data = data;
        self
    }

    /// Override the default timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the default retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// A named, ordered list of [`SagaStepSpec`]s, registered with a
/// [`crate::manager::DistributedSagaManager`] under `saga_type`.
pub struct SagaDefinition {
    /// Registry key.
    pub saga_type: String,
    /// Free-form description.
    pub description: String,
    /// Steps executed in order; compensation runs the reverse of whichever prefix
    /// completed (spec §3, §8 scenario S5).
    pub steps: Vec<SagaStepSpec>,
}

impl SagaDefinition {
    /// A new definition with no steps.
    #[must_use]
    pub fn new(saga_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step, returning `self` for chaining.
    #[must_use]
    pub fn add_step(mut self, step: SagaStepSpec) -> Self {
        self.steps.push(step);
        self
    }
}
