//! `sqlx`-backed store for `workflow_instances` and `workflow_step_executions`.
//!
//! Mirrors `platform_outbox::OutboxStore`'s access idiom: a thin wrapper around a
//! `PgPool`, one `sqlx::query`/`query_as` per operation, `tracing` + `metrics::counter!`
//! on every status transition.

use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::model::{StepStatus, WorkflowInstance, WorkflowStatus};
use crate::step::StepResult;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashSet;

/// Durable storage for workflow instances and their step execution history.
///
/// Only the [`crate::engine::WorkflowEngine`] mutates rows beyond the initial insert
/// (spec §5 shared-resource policy); CLI inspection and tests read through the same
/// methods without a separate read-only view.
pub struct WorkflowStore {
    pool: PgPool,
}

impl WorkflowStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new `CREATED` instance row.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the insert fails (e.g. duplicate
    /// `workflow_id`).
    pub async fn insert_instance(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        context: &WorkflowContext,
        max_retries: i32,
    ) -> Result<(), WorkflowError> {
        sqlx::query(
            r"
            INSERT INTO workflow_instances (
                workflow_id, workflow_type, status, context_data,
                correlation_id, user_id, tenant_id, max_retries
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(workflow_id)
        .bind(workflow_type)
        .bind(WorkflowStatus::Created.as_str())
        .bind(serde_json::Value::Object(context.data.clone()))
        .bind(&context.correlation_id)
        .bind(&context.user_id)
        .bind(&context.tenant_id)
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        tracing::debug!(workflow_id, workflow_type, "workflow instance created");
        metrics::counter!("workflow.instances.created").increment(1);
        Ok(())
    }

    /// Transition an instance's status (used for `RUNNING`/`COMPENSATING`/`CANCELLED`).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the update fails.
    pub async fn update_status(&self, workflow_id: &str, status: WorkflowStatus) -> Result<(), WorkflowError> {
        let started_at_clause = matches!(status, WorkflowStatus::Running)
            .then_some(", started_at = COALESCE(started_at, NOW())")
            .unwrap_or_default();

        let query = format!(
            "UPDATE workflow_instances SET status = $2, updated_at = NOW(){started_at_clause} WHERE workflow_id = $1"
        );
        sqlx::query(&query)
            .bind(workflow_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        metrics::counter!("workflow.status_transitions").increment(1);
        Ok(())
    }

    /// Mark an instance's terminal status (`COMPLETED`/`FAILED`/`COMPENSATED`), setting
    /// `completed_at` and optionally `error_message`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the update fails.
    pub async fn complete(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error_message: Option<&str>,
    ) -> Result<(), WorkflowError> {
        sqlx::query(
            r"
            UPDATE workflow_instances
            SET status = $2, updated_at = NOW(), completed_at = NOW(), error_message = $3
            WHERE workflow_id = $1
            ",
        )
        .bind(workflow_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        metrics::counter!("workflow.instances.completed").increment(1);
        Ok(())
    }

    /// Record which step is currently executing, and merge `context.data` into the
    /// persisted snapshot so a recovery sweep resumes with up-to-date state.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the update fails.
    pub async fn update_current_step(
        &self,
        workflow_id: &str,
        step_id: &str,
        context: &WorkflowContext,
    ) -> Result<(), WorkflowError> {
        sqlx::query(
            r"
            UPDATE workflow_instances
            SET current_step = $2, context_data = $3, updated_at = NOW()
            WHERE workflow_id = $1
            ",
        )
        .bind(workflow_id)
        .bind(step_id)
        .bind(serde_json::Value::Object(context.data.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a step execution row for one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the insert fails.
    pub async fn persist_step_execution(
        &self,
        workflow_id: &str,
        step_id: &str,
        status: StepStatus,
        attempt_number: i32,
        result: &StepResult,
    ) -> Result<(), WorkflowError> {
        sqlx::query(
            r"
            INSERT INTO workflow_step_executions (
                workflow_id, step_id, status, completed_at, result_data,
                error_message, attempt_number
            ) VALUES ($1, $2, $3, NOW(), $4, $5, $6)
            ",
        )
        .bind(workflow_id)
        .bind(step_id)
        .bind(status.as_str())
        .bind(serde_json::Value::Object(result.data.clone()))
        .bind(&result.error)
        .bind(attempt_number)
        .execute(&self.pool)
        .await?;

        metrics::counter!("workflow.steps.executed").increment(1);
        Ok(())
    }

    /// Look up a single instance by id.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotFound`] if no such instance exists, or
    /// [`WorkflowError::Database`] on a query failure.
    pub async fn get_instance(&self, workflow_id: &str) -> Result<WorkflowInstance, WorkflowError> {
        let row = sqlx::query(
            r"
            SELECT
                workflow_id, workflow_type, status, context_data, current_step,
                created_at, updated_at, started_at, completed_at, correlation_id,
                user_id, tenant_id, error_message, retry_count, max_retries
            FROM workflow_instances WHERE workflow_id = $1
            ",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;

        row_to_instance(&row)
    }

    /// Reconstruct the [`WorkflowContext`] a resumed instance should continue with,
    /// from its persisted `context_data` and identity fields.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotFound`]/[`WorkflowError::Database`], as
    /// [`Self::get_instance`].
    pub async fn load_context(&self, workflow_id: &str) -> Result<WorkflowContext, WorkflowError> {
        let instance = self.get_instance(workflow_id).await?;
        let data = match instance.context_data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(WorkflowContext {
            workflow_id: instance.workflow_id,
            data,
            step_results: std::collections::HashMap::new(),
            correlation_id: instance.correlation_id,
            user_id: instance.user_id,
            tenant_id: instance.tenant_id,
        })
    }

    /// The set of `step_id`s whose most recent attempt for this instance is
    /// `COMPLETED` — used by the engine to skip already-finished steps when resuming
    /// (spec §4.8 recovery idempotency requirement).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the query fails.
    pub async fn completed_step_ids(&self, workflow_id: &str) -> Result<HashSet<String>, WorkflowError> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT step_id FROM workflow_step_executions
            WHERE workflow_id = $1 AND status = 'completed'
            ",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("step_id").map_err(WorkflowError::from))
            .collect()
    }

    /// Recovery sweep: instances stuck `RUNNING` whose `updated_at` is older than
    /// `threshold` (spec §4.8 recovery, §9 Open Question — 5 minutes, decided; see
    /// `DESIGN.md`), up to 10 at a time per the source's own batching.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the query fails.
    pub async fn find_stale_running(&self, threshold: Duration) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        let cutoff: DateTime<Utc> = Utc::now() - threshold;

        let rows = sqlx::query(
            r"
            SELECT
                workflow_id, workflow_type, status, context_data, current_step,
                created_at, updated_at, started_at, completed_at, correlation_id,
                user_id, tenant_id, error_message, retry_count, max_retries
            FROM workflow_instances
            WHERE status = 'running' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT 10
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_instance).collect()
    }

    /// Increment the recovery-resume counter (exposed as `WorkflowInstance::retry_count`).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Database`] if the update fails.
    pub async fn increment_retry_count(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        sqlx::query("UPDATE workflow_instances SET retry_count = retry_count + 1 WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_instance(row: &sqlx::postgres::PgRow) -> Result<WorkflowInstance, WorkflowError> {
    let status_str: String = row.try_get("status")?;
    let status = WorkflowStatus::parse(&status_str).map_err(WorkflowError::Database)?;

    Ok(WorkflowInstance {
        workflow_id: row.try_get("workflow_id")?,
        workflow_type: row.try_get("workflow_type")?,
        status,
        context_data: row.try_get("context_data")?,
        current_step: row.try_get("current_step")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        correlation_id: row.try_get("correlation_id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
    })
}

/// Conversion helper used by tests constructing a [`WorkflowStepExecution`] from a raw
/// row without going through a live pool.
#[cfg(test)]
pub(crate) fn step_execution_status(status: &str) -> Result<StepStatus, String> {
    StepStatus::parse(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips() {
        for status in [
            WorkflowStatus::Created,
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
            WorkflowStatus::Compensating,
            WorkflowStatus::Compensated,
        ] {
            assert_eq!(WorkflowStatus::parse(status.as_str()).unwrap().as_str(), status.as_str());
        }
    }

    #[test]
    fn step_status_roundtrips() {
        for status in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::Compensated,
        ] {
            assert_eq!(step_execution_status(status.as_str()).unwrap().as_str(), status.as_str());
        }
    }
}
