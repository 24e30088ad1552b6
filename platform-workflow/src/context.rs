//! `WorkflowContext`: the mutable state threaded through a single instance's execution.

use crate::step::StepResult;
use std::collections::HashMap;

/// Per-instance execution state (spec §4.8).
///
/// Carried by value into every step/decision/compensator invocation; steps mutate it
/// only through the `data` merge performed after a successful [`StepResult`], never
/// directly, so retries and resumed-from-persistence runs see the same shape a step
/// would have produced the first time.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    /// The owning instance's id.
    pub workflow_id: String,
    /// Accumulated step output, merged key-by-key after each successful step.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Every step's most recent result, keyed by `step_id`. Used by the compensation
    /// phase to find which steps actually completed (spec §3 invariant: only
    /// `COMPLETED` steps are compensated).
    pub step_results: HashMap<String, StepResult>,
    /// Correlation id propagated onto every lifecycle event this instance publishes.
    pub correlation_id: Option<String>,
    /// The user on whose behalf the workflow was started, if any.
    pub user_id: Option<String>,
    /// The tenant this instance belongs to, in a multi-tenant deployment.
    pub tenant_id: Option<String>,
}

impl WorkflowContext {
    /// A fresh context for a new instance.
    #[must_use]
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ..Default::default()
        }
    }

    /// Merge `data` into the context, overwriting any existing keys of the same name.
    pub fn merge(&mut self, data: serde_json::Map<String, serde_json::Value>) {
        self.data.extend(data);
    }
}
