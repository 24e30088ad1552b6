//! `DistributedSagaManager`: registers [`SagaDefinition`]s as workflows and drives them
//! through a [`WorkflowEngine`] (spec §4.9).
//!
//! Grounded on `original_source/.../saga_integration.py`'s `DistributedSagaManager`,
//! which wraps an `EnhancedSagaOrchestrator` and keeps a `_saga_registry` of
//! `saga_name -> metadata` purely for operator visibility (`get_registered_sagas`) —
//! the actual start/cancel/status calls always delegate to the orchestrator. Here the
//! orchestrator is the workspace's own [`WorkflowEngine`]: each [`SagaStepSpec`]
//! compiles to one [`platform_workflow::Step::action`] whose body sends a command and
//! awaits the correlated reply, with a compensator that sends the configured
//! compensation command fire-and-forget, exactly mirroring `_execute_step_via_command`
//! and `_compensate_step`.

use crate::definition::{SagaDefinition, SagaStepSpec};
use crate::error::SagaError;
use crate::event_bus::SagaEventBus;
use platform_workflow::{Step, StepResult, WorkflowContext, WorkflowDefinition, WorkflowEngine, WorkflowInstance};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Operator-facing metadata about a registered saga type, mirroring the source's
/// `_saga_registry` entries.
#[derive(Debug, Clone)]
pub struct SagaMetadata {
    /// Free-form description, copied from the [`SagaDefinition`].
    pub description: String,
    /// Step ids, in execution order.
    pub step_ids: Vec<String>,
}

/// Coordinates registration and lifecycle of distributed sagas atop a
/// [`WorkflowEngine`].
#[derive(Clone)]
pub struct DistributedSagaManager {
    engine: WorkflowEngine,
    saga_bus: SagaEventBus,
    registry: Arc<RwLock<HashMap<String, SagaMetadata>>>,
}

impl DistributedSagaManager {
    /// Wrap an engine and the event bus sagas will use to send commands and await
    /// replies.
    #[must_use]
    pub fn new(engine: WorkflowEngine, saga_bus: SagaEventBus) -> Self {
        Self {
            engine,
            saga_bus,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Compile `definition` into a [`WorkflowDefinition`] and register it with the
    /// underlying engine.
    pub fn register_saga(&self, definition: SagaDefinition) {
        let step_ids: Vec<String> = definition.steps.iter().map(|step| step.step_id.clone()).collect();

        let mut workflow = WorkflowDefinition::new(definition.saga_type.clone(), definition.saga_type.clone())
            .with_description(definition.description.clone());

        for step_spec in definition.steps {
            workflow = workflow.add_step(build_step(&self.saga_bus, step_spec));
        }

        self.engine.register_workflow(workflow);
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.registry.write().expect("saga registry poisoned").insert(
            definition.saga_type,
            SagaMetadata { description: definition.description, step_ids },
        );
    }

    /// Start a new instance of `saga_type`, returning its `saga_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::UnknownSagaType`] if `saga_type` was never registered with
    /// [`Self::register_saga`], or [`SagaError::Workflow`] if the initial persist
    /// fails.
    pub async fn start_saga(
        &self,
        saga_type: &str,
        initial_data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, SagaError> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        if !self.registry.read().expect("saga registry poisoned").contains_key(saga_type) {
            return Err(SagaError::UnknownSagaType(saga_type.to_string()));
        }

        let saga_id = self
            .engine
            .start_workflow(saga_type, None, initial_data, None, None, None)
            .await?;

        Ok(saga_id)
    }

    /// Request cancellation of a running saga instance; compensation of its completed
    /// steps runs cooperatively, same as a plain workflow cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Workflow`] on a database error.
    pub async fn cancel_saga(&self, saga_id: &str) -> Result<bool, SagaError> {
        Ok(self.engine.cancel_workflow(saga_id).await?)
    }

    /// Fetch the current status row for a saga instance.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Workflow`] if `saga_id` is unknown or on a database error.
    pub async fn get_saga_status(&self, saga_id: &str) -> Result<WorkflowInstance, SagaError> {
        Ok(self.engine.get_status(saga_id).await?)
    }

    /// The `saga_type`s currently registered, for operator visibility.
    #[must_use]
    pub fn registered_sagas(&self) -> Vec<String> {
        // Mutex poison is unrecoverable.
        #[allow(clippy::expect_used)]
        self.registry.read().expect("saga registry poisoned").keys().cloned().collect()
    }
}

fn build_step(saga_bus: &SagaEventBus, step_spec: SagaStepSpec) -> Step {
    let action = saga_action(saga_bus.clone(), &step_spec);
    let mut step = Step::action(step_spec.step_id.clone(), step_spec.name.clone(), action)
        .with_timeout(step_spec.timeout)
        .with_retry(step_spec.retry_count, step_spec.timeout);

    if let Some(compensation_command) = step_spec.compensation_command.clone() {
        step = step.with_compensator(saga_compensator(saga_bus.clone(), step_spec, compensation_command));
    }

    step
}

/// Build a step body that sends `step_spec`'s command and awaits the correlated reply,
/// translating the reply's `success`/`data`/`error` fields into a [`StepResult`] —
/// the Rust equivalent of `_execute_step_via_command`'s `result.get("success")` check.
fn saga_action(saga_bus: SagaEventBus, step_spec: &SagaStepSpec) -> Arc<dyn platform_workflow::ActionFn> {
    let step_id = step_spec.step_id.clone();
    let target_service = step_spec.target_service.clone();
    let command_type = step_spec.command_type.clone();
    let command_data = step_spec.command_data.clone();
    let timeout = step_spec.timeout;

    Arc::new(move |context: &WorkflowContext| {
        let saga_bus = saga_bus.clone();
        let saga_id = context.workflow_id.clone();
        let step_id = step_id.clone();
        let target_service = target_service.clone();
        let command_type = command_type.clone();
        let mut payload = serde_json::Map::new();
        payload.extend(context.data.clone());
        payload.extend(command_data.clone());

        async move {
            let send_outcome = saga_bus
                .send_command(&saga_id, &step_id, &target_service, &command_type, payload.into())
                .await;

            if let Err(err) = send_outcome {
                return StepResult::retryable(err.to_string());
            }

            match saga_bus.await_reply(&saga_id, timeout).await {
                Ok(reply) => reply_to_step_result(&reply),
                Err(err) => StepResult::retryable(err.to_string()),
            }
        }
    })
}

/// Build a compensator that sends the step's compensation command, fire-and-forget —
/// `_compensate_step` in the source this is grounded on never awaits a reply either.
fn saga_compensator(saga_bus: SagaEventBus, step_spec: SagaStepSpec, compensation_command: String) -> Arc<dyn platform_workflow::ActionFn> {
    let step_id = step_spec.step_id.clone();
    let target_service = step_spec.target_service.clone();

    Arc::new(move |context: &WorkflowContext| {
        let saga_bus = saga_bus.clone();
        let saga_id = context.workflow_id.clone();
        let step_id = step_id.clone();
        let target_service = target_service.clone();
        let compensation_command = compensation_command.clone();
        let payload: serde_json::Value = context.data.clone().into();

        async move {
            match saga_bus.send_command(&saga_id, &step_id, &target_service, &compensation_command, payload).await {
                Ok(()) => StepResult::ok(),
                Err(err) => StepResult::failed(err.to_string()),
            }
        }
    })
}

fn reply_to_step_result(reply: &platform_core::Event) -> StepResult {
    let success = reply.payload.get("success").and_then(serde_json::Value::as_bool).unwrap_or(false);

    if !success {
        let error = reply
            .payload
            .get("error")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("saga step command reported failure")
            .to_string();
        return StepResult::failed(error);
    }

    let data = reply
        .payload
        .get("data")
        .and_then(serde_json::Value::as_object)
        .cloned()
        .unwrap_or_default();

    StepResult::ok_with(data)
}
