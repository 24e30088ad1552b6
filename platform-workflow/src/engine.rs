//! The workflow engine: registration, execution, compensation and recovery (spec §4.8).
//!
//! Grounded on `original_source/.../enhanced_workflow_engine.py`'s `WorkflowEngine`
//! (`_execute_workflow`/`_execute_step`/`_compensate_workflow`/`_recover_interrupted_workflows`)
//! for the algorithm, and on `platform_eventbus::EventBus`'s Arc-backed, cheaply-`Clone`
//! shape so a background task can hold its own copy instead of needing `Arc<Self>`.

use crate::context::WorkflowContext;
use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;
use crate::events;
use crate::model::{StepStatus, WorkflowInstance, WorkflowStatus};
use crate::step::{Step, StepKind, StepResult, WaitSpec};
use crate::store::WorkflowStore;
use platform_eventbus::EventBus;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Tunables fixed at engine construction.
#[derive(Debug, Clone)]
pub struct WorkflowEngineConfig {
    /// Caps simultaneously-executing instances (spec §4.8 "Concurrency").
    pub max_concurrent_workflows: usize,
    /// How often the recovery sweep runs.
    pub recovery_interval: Duration,
    /// `RUNNING` instances whose `updated_at` is older than this are resumed (spec §9
    /// Open Question — decided as 5 minutes; see `DESIGN.md`).
    pub recovery_staleness_threshold: Duration,
    /// `WorkflowInstance::max_retries` stamped on new instances. Not consulted by the
    /// engine's own retry loop (that's per-step `retry_count`); reserved for operator
    /// tooling that wants to cap recovery-sweep resumes per instance.
    pub default_max_retries: i32,
}

impl WorkflowEngineConfig {
    /// A config with a 5-second recovery interval and the spec's 5-minute staleness
    /// threshold.
    #[must_use]
    pub fn new(max_concurrent_workflows: usize) -> Self {
        Self {
            max_concurrent_workflows,
            recovery_interval: Duration::from_secs(5),
            recovery_staleness_threshold: Duration::from_secs(5 * 60),
            default_max_retries: 3,
        }
    }
}

/// The step-based workflow engine (spec §4.8).
///
/// Cheaply cloneable: every field is `Arc`-backed (mirroring `platform_eventbus::EventBus`),
/// so a per-instance background task holds its own `WorkflowEngine` value instead of the
/// engine needing a self-referential `Arc<Self>`.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<WorkflowStore>,
    event_bus: EventBus,
    definitions: Arc<RwLock<HashMap<String, Arc<WorkflowDefinition>>>>,
    semaphore: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    config: Arc<WorkflowEngineConfig>,
}

impl WorkflowEngine {
    /// Wire together an engine over an already-built store and event bus.
    #[must_use]
    pub fn new(store: Arc<WorkflowStore>, event_bus: EventBus, config: WorkflowEngineConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_workflows)),
            store,
            event_bus,
            definitions: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Register a workflow type. Every [`Self::start_workflow`] call for this
    /// `workflow_type` executes the same step list.
    pub fn register_workflow(&self, definition: WorkflowDefinition) {
        tracing::info!(workflow_type = %definition.workflow_type, "registered workflow definition");
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.definitions
            .write()
            .expect("workflow definitions registry poisoned")
            .insert(definition.workflow_type.clone(), Arc::new(definition));
    }

    /// Create and schedule a new instance of `workflow_type` (spec §4.8 step 1).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::UnknownWorkflowType`] if no definition is registered
    /// under that name, or a database error from the initial persist.
    pub async fn start_workflow(
        &self,
        workflow_type: &str,
        workflow_id: Option<String>,
        initial_data: serde_json::Map<String, serde_json::Value>,
        correlation_id: Option<String>,
        user_id: Option<String>,
        tenant_id: Option<String>,
    ) -> Result<String, WorkflowError> {
        let definition = self.lookup_definition(workflow_type)?;
        let workflow_id = workflow_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut context = WorkflowContext::new(workflow_id.clone());
        context.data = initial_data;
        context.correlation_id = correlation_id.clone();
        context.user_id = user_id;
        context.tenant_id = tenant_id;

        self.store
            .insert_instance(&workflow_id, workflow_type, &context, self.config.default_max_retries)
            .await?;

        self.publish(events::lifecycle_event(
            "WorkflowStarted",
            &workflow_id,
            workflow_type,
            WorkflowStatus::Created.as_str(),
            None,
            serde_json::Value::Null,
            correlation_id.as_deref(),
        ))
        .await;

        metrics::counter!("workflow.instances.started").increment(1);
        self.spawn_execution(definition, context);

        Ok(workflow_id)
    }

    /// Request cancellation of a running instance (spec §5 "cooperative" cancellation):
    /// the instance transitions to `CANCELLED` immediately and a flag is set that the
    /// running task observes between steps, at which point it compensates whatever
    /// already completed without re-driving the status machine (`CANCELLED` stays
    /// final).
    ///
    /// # Errors
    ///
    /// Returns a database error if the status update fails. Returns `Ok(false)` (not
    /// an error) if `workflow_id` has no running task.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<bool, WorkflowError> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        let flag = self
            .running
            .lock()
            .expect("running workflows registry poisoned")
            .get(workflow_id)
            .cloned();
        let Some(flag) = flag else { return Ok(false) };
        flag.store(true, Ordering::SeqCst);

        let instance = self.store.get_instance(workflow_id).await?;
        self.store.update_status(workflow_id, WorkflowStatus::Cancelled).await?;
        self.publish(events::lifecycle_event(
            "WorkflowCancelled",
            workflow_id,
            &instance.workflow_type,
            WorkflowStatus::Cancelled.as_str(),
            None,
            serde_json::Value::Null,
            instance.correlation_id.as_deref(),
        ))
        .await;
        metrics::counter!("workflow.instances.cancelled").increment(1);
        Ok(true)
    }

    /// Current persisted status and progress of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotFound`] if `workflow_id` doesn't exist.
    pub async fn get_status(&self, workflow_id: &str) -> Result<WorkflowInstance, WorkflowError> {
        self.store.get_instance(workflow_id).await
    }

    /// Run one recovery pass: find instances stuck `RUNNING` with no live task and
    /// resume them from their persisted `current_step`/context (spec §4.8 "Recovery").
    /// Returns the number of instances resumed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the staleness query itself fails; per-instance
    /// resume failures are logged and skipped rather than aborting the sweep.
    pub async fn run_recovery_sweep(&self) -> Result<usize, WorkflowError> {
        let stale = self.store.find_stale_running(self.config.recovery_staleness_threshold).await?;
        let mut resumed = 0;

        for instance in stale {
            // Mutex poison is unrecoverable.
            #[allow(clippy::expect_used)]
            let already_running = self
                .running
                .lock()
                .expect("running workflows registry poisoned")
                .contains_key(&instance.workflow_id);
            if already_running {
                continue;
            }

            match self.resume_instance(instance).await {
                Ok(()) => resumed += 1,
                Err(err) => tracing::error!(error = %err, "failed to resume interrupted workflow"),
            }
        }

        Ok(resumed)
    }

    /// Spawn a background task that calls [`Self::run_recovery_sweep`] on
    /// `config.recovery_interval`. The caller owns the returned handle's lifetime.
    pub fn spawn_recovery_loop(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match engine.run_recovery_sweep().await {
                    Ok(0) => {}
                    Ok(resumed) => tracing::info!(resumed, "recovery sweep resumed interrupted workflows"),
                    Err(err) => tracing::error!(error = %err, "recovery sweep query failed"),
                }
                tokio::time::sleep(engine.config.recovery_interval).await;
            }
        })
    }

    async fn resume_instance(&self, instance: WorkflowInstance) -> Result<(), WorkflowError> {
        let definition = self.lookup_definition(&instance.workflow_type)?;
        let context = self.store.load_context(&instance.workflow_id).await?;
        self.store.increment_retry_count(&instance.workflow_id).await?;
        tracing::info!(workflow_id = %instance.workflow_id, "recovered interrupted workflow");
        self.spawn_execution(definition, context);
        Ok(())
    }

    fn lookup_definition(&self, workflow_type: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.definitions
            .read()
            .expect("workflow definitions registry poisoned")
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownWorkflowType(workflow_type.to_string()))
    }

    fn spawn_execution(&self, definition: Arc<WorkflowDefinition>, context: WorkflowContext) {
        let workflow_id = context.workflow_id.clone();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.running
            .lock()
            .expect("running workflows registry poisoned")
            .insert(workflow_id.clone(), cancel_flag.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute_workflow(definition, context, cancel_flag).await;
            // Mutex poison is unrecoverable.
            #[allow(clippy::expect_used)]
            engine
                .running
                .lock()
                .expect("running workflows registry poisoned")
                .remove(&workflow_id);
        });
    }

    async fn execute_workflow(&self, definition: Arc<WorkflowDefinition>, mut context: WorkflowContext, cancel_flag: Arc<AtomicBool>) {
        // The semaphore is never closed; it's owned by this call and never drops early.
        #[allow(clippy::expect_used)]
        let _permit = self.semaphore.acquire().await.expect("workflow semaphore closed");
        let workflow_id = context.workflow_id.clone();
        let workflow_type = definition.workflow_type.clone();

        let completed_ids = self.store.completed_step_ids(&workflow_id).await.unwrap_or_else(|err| {
            tracing::error!(workflow_id = %workflow_id, error = %err, "failed to load completed step ids");
            HashSet::new()
        });

        if let Err(err) = self.store.update_status(&workflow_id, WorkflowStatus::Running).await {
            tracing::error!(workflow_id = %workflow_id, error = %err, "failed to mark workflow running");
        }
        self.publish(events::lifecycle_event(
            "WorkflowRunning",
            &workflow_id,
            &workflow_type,
            WorkflowStatus::Running.as_str(),
            None,
            serde_json::Value::Null,
            context.correlation_id.as_deref(),
        ))
        .await;

        let mut failed = false;
        for step in &definition.steps {
            if cancel_flag.load(Ordering::SeqCst) {
                self.compensate(&definition, &mut context, &workflow_type, false).await;
                return;
            }

            let (success, next_context) = self.execute_step(step, context, &workflow_type, &completed_ids).await;
            context = next_context;
            if !success {
                failed = true;
                break;
            }
        }

        if cancel_flag.load(Ordering::SeqCst) {
            self.compensate(&definition, &mut context, &workflow_type, false).await;
            return;
        }

        if failed {
            self.compensate(&definition, &mut context, &workflow_type, true).await;
            return;
        }

        if let Err(err) = self.store.complete(&workflow_id, WorkflowStatus::Completed, None).await {
            tracing::error!(workflow_id = %workflow_id, error = %err, "failed to mark workflow completed");
        }
        self.publish(events::lifecycle_event(
            "WorkflowCompleted",
            &workflow_id,
            &workflow_type,
            WorkflowStatus::Completed.as_str(),
            None,
            serde_json::Value::Null,
            context.correlation_id.as_deref(),
        ))
        .await;
        metrics::counter!("workflow.instances.completed").increment(1);
    }

    /// Reverse-order compensation over every step whose last result was a success
    /// (spec §3 invariant: only `COMPLETED` steps are compensated). When
    /// `update_instance_status` is `false` (the cooperative-cancellation path),
    /// `CANCELLED` is left as the final status and this only persists step-level
    /// compensation bookkeeping.
    async fn compensate(
        &self,
        definition: &WorkflowDefinition,
        context: &mut WorkflowContext,
        workflow_type: &str,
        update_instance_status: bool,
    ) {
        let workflow_id = context.workflow_id.clone();

        if update_instance_status {
            if let Err(err) = self.store.update_status(&workflow_id, WorkflowStatus::Compensating).await {
                tracing::error!(workflow_id = %workflow_id, error = %err, "failed to mark workflow compensating");
            }
            self.publish(events::lifecycle_event(
                "WorkflowCompensating",
                &workflow_id,
                workflow_type,
                WorkflowStatus::Compensating.as_str(),
                None,
                serde_json::Value::Null,
                context.correlation_id.as_deref(),
            ))
            .await;
        }

        let mut success = true;
        for step in steps_to_compensate(definition, &context.step_results) {
            let Some(compensator) = &step.compensator else { continue };

            let outcome = compensator.call(context).await;
            if outcome.success {
                if let Err(err) = self
                    .store
                    .persist_step_execution(&workflow_id, &step.step_id, StepStatus::Compensated, 1, &outcome)
                    .await
                {
                    tracing::error!(workflow_id = %workflow_id, step_id = %step.step_id, error = %err, "failed to persist compensated step");
                }
                self.publish(events::lifecycle_event(
                    "StepCompensated",
                    &workflow_id,
                    workflow_type,
                    WorkflowStatus::Compensating.as_str(),
                    Some(&step.step_id),
                    serde_json::Value::Object(outcome.data.clone()),
                    context.correlation_id.as_deref(),
                ))
                .await;
                metrics::counter!("workflow.steps.compensated").increment(1);
            } else {
                tracing::error!(workflow_id = %workflow_id, step_id = %step.step_id, error = ?outcome.error, "compensation failed, aborting compensation phase");
                success = false;
                break;
            }
        }

        if !update_instance_status {
            return;
        }

        let final_status = if success { WorkflowStatus::Compensated } else { WorkflowStatus::Failed };
        if let Err(err) = self.store.complete(&workflow_id, final_status, None).await {
            tracing::error!(workflow_id = %workflow_id, error = %err, "failed to mark workflow compensation outcome");
        }

        let event_type = if success { "WorkflowCompensated" } else { "WorkflowFailed" };
        self.publish(events::lifecycle_event(
            event_type,
            &workflow_id,
            workflow_type,
            final_status.as_str(),
            None,
            serde_json::Value::Null,
            context.correlation_id.as_deref(),
        ))
        .await;

        if success {
            metrics::counter!("workflow.instances.compensated").increment(1);
        } else {
            metrics::counter!("workflow.instances.failed").increment(1);
        }
    }

    /// Execute one top-level (or nested-branch) step, including its retry loop and
    /// per-attempt timeout, and persist/publish the outcome. Returns the step's success
    /// and the (possibly mutated) context to thread into the next step.
    fn execute_step<'a>(
        &'a self,
        step: &'a Step,
        context: WorkflowContext,
        workflow_type: &'a str,
        completed_ids: &'a HashSet<String>,
    ) -> Pin<Box<dyn Future<Output = (bool, WorkflowContext)> + Send + 'a>> {
        Box::pin(async move {
            if completed_ids.contains(&step.step_id) {
                let mut context = context;
                context.step_results.insert(step.step_id.clone(), StepResult::ok());
                return (true, context);
            }

            if !step.should_execute(&context) {
                if let Err(err) = self
                    .store
                    .persist_step_execution(&context.workflow_id, &step.step_id, StepStatus::Skipped, 1, &StepResult::ok())
                    .await
                {
                    tracing::error!(workflow_id = %context.workflow_id, step_id = %step.step_id, error = %err, "failed to persist skipped step");
                }
                return (true, context);
            }

            if let Err(err) = self.store.update_current_step(&context.workflow_id, &step.step_id, &context).await {
                tracing::error!(workflow_id = %context.workflow_id, step_id = %step.step_id, error = %err, "failed to record current step");
            }

            let max_attempts = step.retry_count + 1;
            let mut attempt = 0u32;
            let mut ctx = context;

            loop {
                attempt += 1;
                let pre_attempt = ctx.clone();
                let (outcome, next_ctx) = match tokio::time::timeout(
                    step.timeout,
                    self.attempt_step(step, ctx, workflow_type, completed_ids),
                )
                .await
                {
                    Ok((outcome, next_ctx)) => (outcome, next_ctx),
                    Err(_) => {
                        tracing::error!(workflow_id = %pre_attempt.workflow_id, step_id = %step.step_id, "step timed out");
                        (StepResult::retryable(format!("step {} timed out", step.step_id)), pre_attempt)
                    }
                };
                ctx = next_ctx;

                if outcome.success {
                    ctx.merge(outcome.data.clone());
                    ctx.step_results.insert(step.step_id.clone(), outcome.clone());

                    if let Err(err) = self
                        .store
                        .persist_step_execution(&ctx.workflow_id, &step.step_id, StepStatus::Completed, attempt as i32, &outcome)
                        .await
                    {
                        tracing::error!(workflow_id = %ctx.workflow_id, step_id = %step.step_id, error = %err, "failed to persist completed step");
                    }

                    self.publish(events::lifecycle_event(
                        "StepCompleted",
                        &ctx.workflow_id,
                        workflow_type,
                        WorkflowStatus::Running.as_str(),
                        Some(&step.step_id),
                        serde_json::Value::Object(outcome.data.clone()),
                        ctx.correlation_id.as_deref(),
                    ))
                    .await;
                    metrics::counter!("workflow.steps.completed").increment(1);
                    return (true, ctx);
                }

                if outcome.should_retry && attempt < max_attempts {
                    let delay = outcome.retry_delay.unwrap_or(step.retry_delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }

                ctx.step_results.insert(step.step_id.clone(), outcome.clone());
                if let Err(err) = self
                    .store
                    .persist_step_execution(&ctx.workflow_id, &step.step_id, StepStatus::Failed, attempt as i32, &outcome)
                    .await
                {
                    tracing::error!(workflow_id = %ctx.workflow_id, step_id = %step.step_id, error = %err, "failed to persist failed step");
                }

                self.publish(events::lifecycle_event(
                    "StepFailed",
                    &ctx.workflow_id,
                    workflow_type,
                    WorkflowStatus::Running.as_str(),
                    Some(&step.step_id),
                    serde_json::json!({ "error": outcome.error }),
                    ctx.correlation_id.as_deref(),
                ))
                .await;
                metrics::counter!("workflow.steps.failed").increment(1);
                return (false, ctx);
            }
        })
    }

    /// Execute a single attempt of `step`'s own behavior (no retry/timeout/persistence
    /// — that's [`Self::execute_step`]'s job). `DECISION`/`PARALLEL` recurse back into
    /// `execute_step` for their nested steps.
    fn attempt_step<'a>(
        &'a self,
        step: &'a Step,
        context: WorkflowContext,
        workflow_type: &'a str,
        completed_ids: &'a HashSet<String>,
    ) -> Pin<Box<dyn Future<Output = (StepResult, WorkflowContext)> + Send + 'a>> {
        Box::pin(async move {
            match &step.kind {
                StepKind::Action(action) | StepKind::Compensation(action) => {
                    let result = action.call(&context).await;
                    (result, context)
                }
                StepKind::Wait(spec) => {
                    let result = self.execute_wait(spec, &context).await;
                    (result, context)
                }
                StepKind::Decision { decide, branches } => {
                    let branch = decide.call(&context);
                    let Some(branch_steps) = branches.get(&branch) else {
                        return (StepResult::failed(format!("no branch named {branch}")), context);
                    };

                    let mut ctx = context;
                    for nested in branch_steps {
                        let (success, next_ctx) = self.execute_step(nested, ctx, workflow_type, completed_ids).await;
                        ctx = next_ctx;
                        if !success {
                            return (StepResult::failed(format!("branch {branch} step {} failed", nested.step_id)), ctx);
                        }
                    }

                    let mut data = serde_json::Map::new();
                    data.insert("branch".to_string(), serde_json::Value::String(branch));
                    (StepResult::ok_with(data), ctx)
                }
                StepKind::Parallel { children, wait_for_all } => {
                    self.execute_parallel(children, context, workflow_type, completed_ids, *wait_for_all).await
                }
            }
        })
    }

    /// Run `children` concurrently, `wait_for_all` waiting for every child or only the
    /// first to complete (canceling the rest by dropping their futures), then merge
    /// each child's resulting `data`/`step_results` back in list order (spec §4.8
    /// `PARALLEL`; "children have no defined relative order", spec §5).
    async fn execute_parallel<'a>(
        &'a self,
        children: &'a [Step],
        context: WorkflowContext,
        workflow_type: &'a str,
        completed_ids: &'a HashSet<String>,
        wait_for_all: bool,
    ) -> (StepResult, WorkflowContext) {
        if children.is_empty() {
            return (StepResult::ok(), context);
        }

        let futures: Vec<_> = children
            .iter()
            .map(|child| self.execute_step(child, context.clone(), workflow_type, completed_ids))
            .collect();

        let results: Vec<(bool, WorkflowContext)> = if wait_for_all {
            futures::future::join_all(futures).await
        } else {
            let (first, _index, _remaining) = futures::future::select_all(futures).await;
            vec![first]
        };

        let mut merged = context;
        for (_, child_context) in &results {
            merged.data.extend(child_context.data.clone());
            for (key, value) in &child_context.step_results {
                merged.step_results.insert(key.clone(), value.clone());
            }
        }

        let all_success = results.iter().all(|(success, _)| *success);
        let result = if all_success {
            StepResult::ok()
        } else {
            StepResult::failed("one or more parallel steps failed")
        };
        (result, merged)
    }

    async fn execute_wait(&self, spec: &WaitSpec, context: &WorkflowContext) -> StepResult {
        match spec {
            WaitSpec::Duration(duration) => {
                tokio::time::sleep(*duration).await;
                StepResult::ok()
            }
            WaitSpec::Predicate { check, interval } => loop {
                if check(context) {
                    return StepResult::ok();
                }
                tokio::time::sleep(*interval).await;
            },
        }
    }

    async fn publish(&self, event: platform_core::Event) {
        if let Err(err) = self.event_bus.publish(&event).await {
            tracing::warn!(event_type = %event.event_type, error = %err, "failed to publish workflow lifecycle event");
        }
    }
}

/// The steps a compensation phase should run, in order: every step whose most recent
/// result succeeded, reverse of forward execution order (spec §3 invariant — only
/// `COMPLETED` steps are compensated; spec §8 scenario S5). Pulled out of
/// [`WorkflowEngine::compensate`] as plain data-in data-out logic so it can be tested
/// without a database or event bus.
fn steps_to_compensate<'d>(definition: &'d WorkflowDefinition, step_results: &HashMap<String, StepResult>) -> Vec<&'d Step> {
    definition
        .steps
        .iter()
        .rev()
        .filter(|step| step_results.get(&step.step_id).is_some_and(|result| result.success))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    fn noop_action() -> Arc<dyn crate::step::ActionFn> {
        Arc::new(|_: &WorkflowContext| async { StepResult::ok() })
    }

    /// Saga `order_processing`, steps `[reserve_inventory, process_payment,
    /// create_order]`; `create_order` fails. Compensation must run in order
    /// `process_payment`, `reserve_inventory` — `create_order` itself is excluded (it
    /// never completed) and step order is otherwise exactly reversed.
    #[test]
    fn s5_saga_compensation_runs_only_completed_steps_in_reverse_order() {
        let definition = WorkflowDefinition::new("order_processing", "Order Processing")
            .add_step(Step::action("reserve_inventory", "Reserve Inventory", noop_action()).with_compensator(noop_action()))
            .add_step(Step::action("process_payment", "Process Payment", noop_action()).with_compensator(noop_action()))
            .add_step(Step::action("create_order", "Create Order", noop_action()));

        let mut step_results = HashMap::new();
        step_results.insert("reserve_inventory".to_string(), StepResult::ok());
        step_results.insert("process_payment".to_string(), StepResult::ok());
        step_results.insert("create_order".to_string(), StepResult::failed("downstream rejected order"));

        let order: Vec<&str> = steps_to_compensate(&definition, &step_results)
            .into_iter()
            .map(|step| step.step_id.as_str())
            .collect();

        assert_eq!(order, vec!["process_payment", "reserve_inventory"]);
    }

    #[test]
    fn steps_with_no_result_or_a_failed_result_are_excluded() {
        let definition = WorkflowDefinition::new("t", "t")
            .add_step(Step::action("a", "a", noop_action()).with_compensator(noop_action()))
            .add_step(Step::action("b", "b", noop_action()).with_compensator(noop_action()));

        let mut step_results = HashMap::new();
        step_results.insert("a".to_string(), StepResult::failed("boom"));

        assert!(steps_to_compensate(&definition, &step_results).is_empty());
    }
}
