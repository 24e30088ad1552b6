//! `platform-cli`: operator tooling for contract verification, dead-letter inspection
//! and workflow status (spec §6 "CLI surface").
//!
//! Exit codes follow spec §6: `0` on success, nonzero on any validation/verification
//! failure or operational error. `--json` switches every subcommand's output to
//! structured JSON on stdout instead of a plain-text table.

mod contract;
mod dlq;
mod error;
mod workflow;

use clap::{Parser, Subcommand};
use error::CliError;
use std::path::PathBuf;
use std::process::ExitCode;

/// Operator CLI for the platform's event bus, outbox and workflow engine.
#[derive(Parser)]
#[command(name = "platform-cli", version, about)]
struct Cli {
    /// Emit structured JSON instead of a plain-text table.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consumer-driven event contract verification.
    #[command(subcommand)]
    Contract(ContractCommand),
    /// Dead-letter queue inspection and retry.
    #[command(subcommand)]
    Dlq(DlqCommand),
    /// Workflow instance inspection.
    #[command(subcommand)]
    Workflow(WorkflowCommand),
}

#[derive(Subcommand)]
enum ContractCommand {
    /// List every contract in `--contracts-dir`.
    List {
        /// Directory of `*.json` contract files.
        #[arg(long, default_value = "./contracts")]
        contracts_dir: PathBuf,
    },
    /// Verify every contract's `required_fields` against a sample payload at
    /// `<samples-dir>/<event_type>.json`.
    Test {
        /// Directory of `*.json` contract files.
        #[arg(long, default_value = "./contracts")]
        contracts_dir: PathBuf,
        /// Directory of `<event_type>.json` sample payloads.
        #[arg(long, default_value = "./samples")]
        samples_dir: PathBuf,
        /// Verify only contracts published by this provider.
        #[arg(long)]
        provider: Option<String>,
    },
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List dead-lettered events, oldest first.
    List {
        /// Postgres connection string.
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// Maximum rows to return.
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// Restrict to a single event type.
        #[arg(long)]
        event_type: Option<String>,
    },
    /// Re-enqueue a dead-lettered event as a fresh pending outbox row.
    Retry {
        /// Postgres connection string.
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// Dead-letter row id.
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum WorkflowCommand {
    /// Show a single workflow instance's persisted status.
    Status {
        /// Postgres connection string.
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// The instance id to look up.
        #[arg(long)]
        workflow_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "platform_cli=info".into()))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatch to the chosen subcommand. Returns `Ok(false)` (distinct from `Err`) for a
/// successfully-executed but failed verification, matching spec §6's exit-code
/// contract: nonzero on validation/verification failure, not only on operational
/// error.
async fn run(cli: Cli) -> Result<bool, CliError> {
    match cli.command {
        Command::Contract(ContractCommand::List { contracts_dir }) => {
            let contracts = contract::load_contracts(&contracts_dir)?;
            if cli.json {
                // A Vec<ContractDefinition> of plain serde-derived structs always serializes.
                #[allow(clippy::expect_used)]
                let rendered = serde_json::to_string_pretty(&contracts).expect("contract list is always serializable");
                println!("{rendered}");
            } else {
                for c in &contracts {
                    println!("{:<24} {:<24} {:<32} {}", c.consumer, c.provider, c.event_type, c.version);
                }
            }
            Ok(true)
        }
        Command::Contract(ContractCommand::Test { contracts_dir, samples_dir, provider }) => {
            let contracts = contract::load_contracts(&contracts_dir)?;
            let mut all_passed = true;
            let mut verifications = Vec::new();

            for c in contracts {
                if let Some(provider) = &provider {
                    if &c.provider != provider {
                        continue;
                    }
                }

                let sample = contract::load_sample(&samples_dir, &c.event_type)?;
                let verification = contract::verify(c, &sample);
                all_passed &= verification.passed;
                verifications.push(verification);
            }

            if cli.json {
                // A Vec<ContractVerification> of plain serde-derived structs always serializes.
                #[allow(clippy::expect_used)]
                let rendered =
                    serde_json::to_string_pretty(&verifications).expect("verification list is always serializable");
                println!("{rendered}");
            } else {
                for v in &verifications {
                    let status = if v.passed { "PASS" } else { "FAIL" };
                    println!("{status} {} -> {} ({})", v.contract.consumer, v.contract.provider, v.contract.event_type);
                    for field in &v.missing_fields {
                        println!("    missing field: {field}");
                    }
                }
            }
            Ok(all_passed)
        }
        Command::Dlq(DlqCommand::List { database_url, limit, event_type }) => {
            let pool = connect(&database_url).await?;
            let entries = dlq::list(&pool, limit, event_type.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries).map_err(|source| CliError::InvalidJson { path: "<dlq list output>".to_string(), source })?);
            } else {
                for e in &entries {
                    println!("{:<6} {:<36} {:<24} attempts={} retry={} {}", e.id, e.original_event_id, e.event_type, e.attempts_made, e.can_retry, e.failure_reason);
                }
            }
            Ok(true)
        }
        Command::Dlq(DlqCommand::Retry { database_url, id }) => {
            let pool = connect(&database_url).await?;
            dlq::retry(&pool, id).await?;
            if cli.json {
                println!("{}", serde_json::json!({"id": id, "requeued": true}));
            } else {
                println!("requeued dead letter event {id}");
            }
            Ok(true)
        }
        Command::Workflow(WorkflowCommand::Status { database_url, workflow_id }) => {
            let pool = connect(&database_url).await?;
            let instance = workflow::status(&pool, &workflow_id).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "workflow_id": instance.workflow_id,
                        "workflow_type": instance.workflow_type,
                        "status": instance.status.as_str(),
                        "current_step": instance.current_step,
                        "error_message": instance.error_message,
                    })
                );
            } else {
                println!("{} [{}] status={} current_step={}", instance.workflow_id, instance.workflow_type, instance.status.as_str(), instance.current_step.as_deref().unwrap_or("-"));
                if let Some(error) = &instance.error_message {
                    println!("  error: {error}");
                }
            }
            Ok(true)
        }
    }
}

async fn connect(database_url: &str) -> Result<sqlx::PgPool, CliError> {
    sqlx::PgPool::connect(database_url).await.map_err(CliError::DatabaseConnect)
}
