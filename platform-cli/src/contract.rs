//! Event contracts: consumer-declared payload expectations for one `event_type`, and
//! verification against a sample payload (spec §6 "CLI surface": contract-test
//! execution, contract listing).
//!
//! Grounded on `original_source/.../cli/api_commands.py`'s `create-contract`/
//! `test-contracts`/`list-contracts` commands, scoped down from that framework's
//! REST/gRPC provider verification (which dials a live service) to this system's
//! actual wire unit: a Kafka event's JSON payload, checked against a sample file rather
//! than a running provider — there is no HTTP/gRPC surface in this crate to verify
//! against.

use crate::error::CliError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A consumer-driven contract: the payload fields `consumer` depends on for events of
/// `event_type`, as published by `provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    /// The service that depends on `event_type`'s shape.
    pub consumer: String,
    /// The service that publishes `event_type`.
    pub provider: String,
    /// The event type this contract governs.
    pub event_type: String,
    /// Contract version, for operator visibility across deploys.
    pub version: String,
    /// Top-level payload keys `consumer` requires to be present.
    pub required_fields: Vec<String>,
}

/// Load every `*.json` file in `dir` as a [`Contract`].
///
/// # Errors
///
/// Returns [`CliError::Io`] if `dir` can't be read, or [`CliError::InvalidJson`] if any
/// file's contents don't parse as a [`Contract`].
pub fn load_contracts(dir: &Path) -> Result<Vec<Contract>, CliError> {
    let entries = fs::read_dir(dir).map_err(|source| CliError::Io { path: dir.display().to_string(), source })?;

    let mut contracts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CliError::Io { path: dir.display().to_string(), source })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let raw = fs::read_to_string(&path).map_err(|source| CliError::Io { path: path.display().to_string(), source })?;
        let contract: Contract =
            serde_json::from_str(&raw).map_err(|source| CliError::InvalidJson { path: path.display().to_string(), source })?;
        contracts.push(contract);
    }

    contracts.sort_by(|a, b| (&a.provider, &a.consumer, &a.event_type).cmp(&(&b.provider, &b.consumer, &b.event_type)));
    Ok(contracts)
}

/// Load a sample payload for `event_type` from `<samples_dir>/<event_type>.json`.
///
/// # Errors
///
/// Returns [`CliError::Io`] if the sample file is missing, or [`CliError::InvalidJson`]
/// if it isn't valid JSON.
pub fn load_sample(samples_dir: &Path, event_type: &str) -> Result<serde_json::Value, CliError> {
    let path = samples_dir.join(format!("{event_type}.json"));
    let raw = fs::read_to_string(&path).map_err(|source| CliError::Io { path: path.display().to_string(), source })?;
    serde_json::from_str(&raw).map_err(|source| CliError::InvalidJson { path: path.display().to_string(), source })
}

/// The outcome of checking one contract's `required_fields` against a sample payload.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// The contract that was checked.
    pub contract: Contract,
    /// `true` iff every required field was present in the sample payload.
    pub passed: bool,
    /// Required fields absent from the sample payload.
    pub missing_fields: Vec<String>,
}

/// Check `contract.required_fields` against `sample`'s top-level keys.
#[must_use]
pub fn verify(contract: Contract, sample: &serde_json::Value) -> Verification {
    let missing_fields: Vec<String> = contract
        .required_fields
        .iter()
        .filter(|field| sample.get(field.as_str()).is_none())
        .cloned()
        .collect();

    let passed = missing_fields.is_empty();
    Verification { contract, passed, missing_fields }
}
