//! Source verification on Etherscan-compatible explorers.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{artifacts::Artifact, instantiator::ContractHandle};

/// Delay between `checkverifystatus` polls.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Number of status polls before giving up.
const MAX_STATUS_POLLS: usize = 24;

/// Where and how to reach the explorer API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExplorerConfig {
    pub api_url: Url,
    pub api_key: String,
}

/// Final state of a verification request.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum VerificationStatus {
    Verified,
    AlreadyVerified,
}

/// The parts of a hardhat build-info file needed for verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    solc_long_version: String,
    input: Value,
}

/// Standard explorer API envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

impl ApiResponse {
    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum StatusError {
    #[error("verification pending: {0}")]
    Pending(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn is_already_verified(text: &str) -> bool {
    text.to_lowercase().contains("already verified")
}

/// Verify the source of a deployed contract.
///
/// The standard-json compiler input comes from the artifact's hardhat build-info file.
/// A contract the explorer already knows counts as verified.
pub async fn verify_contract(
    client: &reqwest::Client,
    explorer: &ExplorerConfig,
    handle: &ContractHandle,
    artifact: &Artifact,
) -> Result<VerificationStatus> {
    let build_info_path = artifact.build_info.as_deref().with_context(|| {
        format!(
            "Artifact {} has no build-info; compile with hardhat to verify",
            artifact.name
        )
    })?;
    let build_info = read_build_info(build_info_path)?;
    let source_name = artifact
        .source_name
        .as_deref()
        .with_context(|| format!("Artifact {} does not record its source file", artifact.name))?;

    let source_code = serde_json::to_string(&build_info.input)
        .context("Failed to serialize compiler input")?;
    let contract_name = format!("{}:{}", source_name, artifact.name);
    let compiler_version = format!("v{}", build_info.solc_long_version);
    let address = handle.address.to_string();
    let constructor_args = hex::encode(&handle.constructor_args);

    let form = [
        ("apikey", explorer.api_key.as_str()),
        ("module", "contract"),
        ("action", "verifysourcecode"),
        ("codeformat", "solidity-standard-json-input"),
        ("contractaddress", address.as_str()),
        ("sourceCode", source_code.as_str()),
        ("contractname", contract_name.as_str()),
        ("compilerversion", compiler_version.as_str()),
        ("constructorArguements", constructor_args.as_str()),
    ];

    let response: ApiResponse = client
        .post(explorer.api_url.clone())
        .form(&form)
        .send()
        .await
        .context("Failed to submit verification request")?
        .json()
        .await
        .context("Failed to parse verification response")?;

    let submitted = response.result_text();
    if response.status != "1" {
        if is_already_verified(&submitted) {
            tracing::info!(contract = %handle.name, address = %handle.address, "Already verified");
            return Ok(VerificationStatus::AlreadyVerified);
        }
        anyhow::bail!(
            "Verification of {} rejected: {} ({})",
            handle.name,
            submitted,
            response.message
        );
    }

    tracing::info!(contract = %handle.name, guid = %submitted, "Verification submitted");
    let status = poll_status(client, explorer, &submitted).await?;
    tracing::info!(contract = %handle.name, address = %handle.address, "Contract verified");
    Ok(status)
}

fn read_build_info(path: &Path) -> Result<BuildInfo> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read build-info {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse build-info {}", path.display()))
}

async fn poll_status(
    client: &reqwest::Client,
    explorer: &ExplorerConfig,
    guid: &str,
) -> Result<VerificationStatus> {
    let check = || check_status(client, explorer, guid);

    check
        .retry(
            ConstantBuilder::default()
                .with_delay(STATUS_POLL_INTERVAL)
                .with_max_times(MAX_STATUS_POLLS),
        )
        .when(|e| matches!(e, StatusError::Pending(_)))
        .await
        .map_err(|e| match e {
            StatusError::Pending(text) => {
                anyhow::anyhow!("Verification {} still pending: {}", guid, text)
            }
            StatusError::Other(e) => e,
        })
}

async fn check_status(
    client: &reqwest::Client,
    explorer: &ExplorerConfig,
    guid: &str,
) -> Result<VerificationStatus, StatusError> {
    let response: ApiResponse = client
        .get(explorer.api_url.clone())
        .query(&[
            ("apikey", explorer.api_key.as_str()),
            ("module", "contract"),
            ("action", "checkverifystatus"),
            ("guid", guid),
        ])
        .send()
        .await
        .context("Failed to query verification status")?
        .json()
        .await
        .context("Failed to parse verification status")?;

    let text = response.result_text();
    if response.status == "1" {
        return Ok(VerificationStatus::Verified);
    }
    if is_already_verified(&text) {
        return Ok(VerificationStatus::AlreadyVerified);
    }
    if text.to_lowercase().contains("pending") {
        return Err(StatusError::Pending(text));
    }
    Err(StatusError::Other(anyhow::anyhow!("Verification failed: {}", text)))
}
