//! The step model (spec §4.8): `ACTION`/`DECISION`/`PARALLEL`/`WAIT`/`COMPENSATION`.
//!
//! Action and compensator bodies are dyn-compatible trait objects rather than bare
//! `async fn` (which can't appear in a trait object) — the same manual
//! `Pin<Box<dyn Future<...> + Send>>` shape `platform_core::effect::Effect::Future` and
//! `platform_outbox::OutboxPublisher` already use elsewhere in the workspace.

use crate::context::WorkflowContext;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// The outcome of one step (or compensator) invocation (spec §4.8).
///
/// Exceptions-for-control-flow in the source this is grounded on are replaced here by
/// this explicit struct: only a genuine panic or transport error propagates as a Rust
/// `Result::Err`, which the engine converts into a failed `StepResult` itself.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    /// Whether the step succeeded.
    pub success: bool,
    /// On success, merged into [`WorkflowContext::data`].
    pub data: serde_json::Map<String, serde_json::Value>,
    /// On failure, the reason surfaced in `StepFailed`/`error_message`.
    pub error: Option<String>,
    /// Whether the engine should retry this step after a failure (ignored on success).
    pub should_retry: bool,
    /// Overrides the step definition's own `retry_delay` for this retry, when set
    /// (spec §9 Open Question — decided in favor of this field taking precedence; see
    /// `DESIGN.md`).
    pub retry_delay: Option<Duration>,
}

impl StepResult {
    /// A successful result with no output data.
    #[must_use]
    pub fn ok() -> Self {
        Self { success: true, ..Default::default() }
    }

    /// A successful result carrying `data`, merged into the context on completion.
    #[must_use]
    pub fn ok_with(data: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { success: true, data, ..Default::default() }
    }

    /// A terminal (non-retried) failure.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Default::default() }
    }

    /// A failure the engine should retry, per the step's own `retry_count`/`retry_delay`.
    #[must_use]
    pub fn retryable(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), should_retry: true, ..Default::default() }
    }
}

/// An `ACTION` step body or a step's paired compensator.
pub trait ActionFn: Send + Sync {
    /// Execute against `context`, returning the step's result.
    fn call<'a>(
        &'a self,
        context: &'a WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = StepResult> + Send + 'a>>;
}

impl<F, Fut> ActionFn for F
where
    F: Fn(&WorkflowContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        context: &'a WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = StepResult> + Send + 'a>> {
        Box::pin(self(context))
    }
}

/// A `DECISION` step's branch-selection logic. Synchronous, matching the original
/// source's `decision_logic` callback shape — a decision inspects context, it does not
/// perform I/O (an `ACTION` step does that).
pub trait DecisionFn: Send + Sync {
    /// The name of the branch to execute next.
    fn call(&self, context: &WorkflowContext) -> String;
}

impl<F> DecisionFn for F
where
    F: Fn(&WorkflowContext) -> String + Send + Sync,
{
    fn call(&self, context: &WorkflowContext) -> String {
        self(context)
    }
}

/// A `WAIT` step's condition: sleep for a fixed duration, or poll a predicate.
pub enum WaitSpec {
    /// Sleep unconditionally.
    Duration(Duration),
    /// Poll `check` every `interval` until it returns `true` or the step's own
    /// `timeout` elapses.
    Predicate {
        /// The condition being polled.
        check: Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>,
        /// Time between polls.
        interval: Duration,
    },
}

/// Which of the five step kinds a [`Step`] is (spec §4.8 step model).
pub enum StepKind {
    /// Invoke `action`, merging its result into the context.
    Action(Arc<dyn ActionFn>),
    /// Evaluate `decide`, then execute the matching branch's steps in order.
    Decision {
        /// Branch-selection logic.
        decide: Arc<dyn DecisionFn>,
        /// Steps to run for each possible branch name.
        branches: std::collections::HashMap<String, Vec<Step>>,
    },
    /// Run `children` concurrently.
    Parallel {
        /// The steps to run concurrently.
        children: Vec<Step>,
        /// `true` waits for every child; `false` returns once the first completes and
        /// cancels the rest.
        wait_for_all: bool,
    },
    /// Sleep or poll, per `spec`.
    Wait(WaitSpec),
    /// A standalone compensating action, for workflows that model compensation as an
    /// explicit forward step rather than (or in addition to) a paired `compensator`.
    Compensation(Arc<dyn ActionFn>),
}

/// A single workflow step (spec §4.8).
pub struct Step {
    /// Stable identifier, unique within a [`crate::definition::WorkflowDefinition`].
    pub step_id: String,
    /// Human-readable name, used in logs and lifecycle events.
    pub name: String,
    /// The step's behavior.
    pub kind: StepKind,
    /// Bounds a single attempt (spec §4.8 default 30 minutes).
    pub timeout: Duration,
    /// Additional attempts beyond the first on a retryable failure.
    pub retry_count: u32,
    /// Sleep between retry attempts unless the failed `StepResult` overrides it.
    pub retry_delay: Duration,
    /// Paired inverse action invoked during the compensation phase, if this step
    /// completed (spec §3 invariant: only `COMPLETED` steps are compensated).
    pub compensator: Option<Arc<dyn ActionFn>>,
    /// Gate predicate; `should_execute`. `None` always executes.
    pub predicate: Option<Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>>,
}

impl Step {
    /// An `ACTION` step with default timeout/retry/compensator/predicate.
    #[must_use]
    pub fn action(step_id: impl Into<String>, name: impl Into<String>, action: Arc<dyn ActionFn>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            kind: StepKind::Action(action),
            timeout: Duration::from_secs(30 * 60),
            retry_count: 0,
            retry_delay: Duration::from_secs(30),
            compensator: None,
            predicate: None,
        }
    }

    /// A `DECISION` step.
    #[must_use]
    pub fn decision(
        step_id: impl Into<String>,
        name: impl Into<String>,
        decide: Arc<dyn DecisionFn>,
        branches: std::collections::HashMap<String, Vec<Step>>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            kind: StepKind::Decision { decide, branches },
            timeout: Duration::from_secs(30 * 60),
            retry_count: 0,
            retry_delay: Duration::from_secs(30),
            compensator: None,
            predicate: None,
        }
    }

    /// A `PARALLEL` step.
    #[must_use]
    pub fn parallel(step_id: impl Into<String>, name: impl Into<String>, children: Vec<Step>, wait_for_all: bool) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            kind: StepKind::Parallel { children, wait_for_all },
            timeout: Duration::from_secs(30 * 60),
            retry_count: 0,
            retry_delay: Duration::from_secs(30),
            compensator: None,
            predicate: None,
        }
    }

    /// A `WAIT` step.
    #[must_use]
    pub fn wait(step_id: impl Into<String>, name: impl Into<String>, spec: WaitSpec) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            kind: StepKind::Wait(spec),
            timeout: Duration::from_secs(30 * 60),
            retry_count: 0,
            retry_delay: Duration::from_secs(30),
            compensator: None,
            predicate: None,
        }
    }

    /// A standalone `COMPENSATION` step.
    #[must_use]
    pub fn compensation(step_id: impl Into<String>, name: impl Into<String>, action: Arc<dyn ActionFn>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            kind: StepKind::Compensation(action),
            timeout: Duration::from_secs(30 * 60),
            retry_count: 0,
            retry_delay: Duration::from_secs(30),
            compensator: None,
            predicate: None,
        }
    }

    /// Attach a compensator, returning `self` for chaining off a constructor.
    #[must_use]
    pub fn with_compensator(mut self, compensator: Arc<dyn ActionFn>) -> Self {
        self.compensator = Some(compensator);
        self
    }

    /// Attach a gate predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Override the default timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the default retry count/delay.
    #[must_use]
    pub const fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    /// Whether this step should run, given the current context.
    #[must_use]
    pub fn should_execute(&self, context: &WorkflowContext) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate(context))
    }
}
