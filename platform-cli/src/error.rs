//! The CLI's single error type; every subcommand handler returns `Result<_, CliError>`.

use thiserror::Error;

/// Errors surfaced by any `platform-cli` subcommand.
#[derive(Error, Debug)]
pub enum CliError {
    /// A contracts/samples directory could not be read, or a file in it was not valid
    /// JSON.
    #[error("io error reading {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A contract or sample file's contents did not parse as the expected shape.
    #[error("invalid JSON in {path}: {source}")]
    InvalidJson {
        /// The path whose contents failed to parse.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Could not establish a database connection pool.
    #[error("database connection failed: {0}")]
    DatabaseConnect(sqlx::Error),

    /// The outbox/DLQ layer rejected an operation.
    #[error("outbox error: {0}")]
    Outbox(#[from] platform_outbox::OutboxError),

    /// The workflow layer rejected an operation.
    #[error("workflow error: {0}")]
    Workflow(#[from] platform_workflow::WorkflowError),
}
