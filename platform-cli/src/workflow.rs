//! `workflow status`: read a single instance's persisted state (spec §6 "workflow
//! status is queryable with the error message surfaced on FAILED").

use platform_workflow::{WorkflowInstance, WorkflowStore};
use sqlx::PgPool;

use crate::error::CliError;

/// Fetch the current status row for `workflow_id`.
///
/// # Errors
///
/// Returns [`CliError::Workflow`] if `workflow_id` is unknown or the query fails.
pub async fn status(pool: &PgPool, workflow_id: &str) -> Result<WorkflowInstance, CliError> {
    let store = WorkflowStore::new(pool.clone());
    Ok(store.get_instance(workflow_id).await?)
}
