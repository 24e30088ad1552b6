//! `WorkflowDefinition`: a named, versioned, ordered list of steps (spec §4.8).

use crate::step::Step;
use std::collections::HashMap;
use std::time::Duration;

/// A registered workflow type's shape. Immutable once registered with
/// [`crate::engine::WorkflowEngine::register_workflow`]; every [`crate::model::WorkflowInstance`]
/// of this `workflow_type` executes the same ordered step list.
pub struct WorkflowDefinition {
    /// Registry key; matches `WorkflowInstance::workflow_type`.
    pub workflow_type: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Definition version, carried for operator visibility across deploys; the engine
    /// does not itself multiplex behavior on it.
    pub version: String,
    /// Ceiling on the whole instance's wall-clock execution (spec §4.8 default 24h).
    pub timeout: Duration,
    /// Ordered steps executed in sequence (except within an explicit `PARALLEL` step).
    pub steps: Vec<Step>,
    /// Static variables available to every step's context alongside its own `data`.
    pub variables: HashMap<String, serde_json::Value>,
}

impl WorkflowDefinition {
    /// A new definition with no steps, default 24h timeout, version `"1.0"`.
    #[must_use]
    pub fn new(workflow_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            name: name.into(),
            description: String::new(),
            version: "1.0".to_string(),
            timeout: Duration::from_secs(24 * 60 * 60),
            steps: Vec::new(),
            variables: HashMap::new(),
        }
    }

    /// Builder-style description setter.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder-style version setter.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Builder-style overall timeout setter.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append a step, returning `self` for chaining.
    #[must_use]
    pub fn add_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Set a static variable visible to every instance's context.
    #[must_use]
    pub fn set_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}
