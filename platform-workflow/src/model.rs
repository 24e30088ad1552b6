//! Persisted row types: `WorkflowInstance` and `WorkflowStepExecution` (spec §3).

use chrono::{DateTime, Utc};

/// Lifecycle status of a [`WorkflowInstance`] (spec §3, §4.8 execution algorithm).
///
/// `CREATED -> RUNNING -> {COMPLETED | FAILED | CANCELLED | COMPENSATING}`.
/// `COMPENSATING -> {COMPENSATED | FAILED}`. `RUNNING` may also transition to `PAUSED`
/// (held for future WAIT-on-external-event support; the engine itself never produces it
/// today).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// Instance row created, not yet scheduled onto a running task.
    Created,
    /// Actively executing steps.
    Running,
    /// Held pending an external event (reserved; not produced by this engine).
    Paused,
    /// Every step completed or was skipped.
    Completed,
    /// A step exhausted retries and compensation was not required, or compensation
    /// itself failed.
    Failed,
    /// `cancel_workflow` was called while running.
    Cancelled,
    /// Reversing previously-completed steps after a downstream failure.
    Compensating,
    /// Every completed step was successfully compensated.
    Compensated,
}

impl WorkflowStatus {
    /// The database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
        }
    }

    /// Parse the database string representation.
    ///
    /// # Errors
    ///
    /// Returns an error string if `s` does not match a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "compensating" => Ok(Self::Compensating),
            "compensated" => Ok(Self::Compensated),
            other => Err(format!("invalid workflow status: {other}")),
        }
    }
}

/// Lifecycle status of a single [`WorkflowStepExecution`] attempt (spec §3).
///
/// Monotonic per attempt: `PENDING -> RUNNING -> terminal` (`COMPLETED`, `FAILED`,
/// `SKIPPED`, `COMPENSATED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Not yet attempted.
    Pending,
    /// Currently executing.
    Running,
    /// Succeeded.
    Completed,
    /// Exhausted retries or timed out.
    Failed,
    /// Its `should_execute` predicate returned false.
    Skipped,
    /// Reversed during a workflow's compensation phase.
    Compensated,
}

impl StepStatus {
    /// The database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Compensated => "compensated",
        }
    }

    /// Parse the database string representation.
    ///
    /// # Errors
    ///
    /// Returns an error string if `s` does not match a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "compensated" => Ok(Self::Compensated),
            other => Err(format!("invalid step status: {other}")),
        }
    }
}

/// A durable record of one workflow instance (spec §3, `WorkflowInstance`).
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    /// Stable identifier, assigned at `start_workflow` time.
    pub workflow_id: String,
    /// The registered [`crate::definition::WorkflowDefinition::workflow_type`] this
    /// instance was started from.
    pub workflow_type: String,
    /// Current lifecycle status.
    pub status: WorkflowStatus,
    /// JSON-serialized [`crate::context::WorkflowContext::data`].
    pub context_data: serde_json::Value,
    /// `step_id` of the step currently (or most recently) executing.
    pub current_step: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last mutated; the recovery sweep's staleness check compares
    /// against this.
    pub updated_at: DateTime<Utc>,
    /// When the instance transitioned `CREATED -> RUNNING`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Correlation id shared by every lifecycle event this instance publishes.
    pub correlation_id: Option<String>,
    /// The user on whose behalf the workflow was started, if any.
    pub user_id: Option<String>,
    /// The tenant this instance belongs to, in a multi-tenant deployment.
    pub tenant_id: Option<String>,
    /// The failure reason surfaced on `FAILED`.
    pub error_message: Option<String>,
    /// Number of times this instance has been resumed by the recovery sweep.
    pub retry_count: i32,
    /// Reserved for a future per-instance retry ceiling; unused by the engine today.
    pub max_retries: i32,
}

/// One row per step attempt (spec §3, `WorkflowStepExecution`).
#[derive(Debug, Clone)]
pub struct WorkflowStepExecution {
    /// Row id.
    pub id: i64,
    /// The owning instance.
    pub workflow_id: String,
    /// The step definition this attempt belongs to.
    pub step_id: String,
    /// This attempt's terminal (or in-flight) status.
    pub status: StepStatus,
    /// When this attempt began.
    pub started_at: DateTime<Utc>,
    /// When this attempt reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// JSON-serialized `StepResult::data` on success.
    pub result_data: Option<serde_json::Value>,
    /// `StepResult::error` on failure.
    pub error_message: Option<String>,
    /// 1-based attempt counter within this step's retry loop.
    pub attempt_number: i32,
}
