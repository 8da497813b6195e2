use std::path::Path;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{config::DeploymentConfig, registry::ContractRegistry};

/// Default file name of the deployment record.
pub const RECORD_FILENAME: &str = "deployments.json";

/// Compute a SHA-256 hash of a deployment configuration.
///
/// The config is serialized to JSON with a fixed field order, so the same configuration
/// always produces the same hash.
pub fn config_hash(config: &DeploymentConfig) -> Result<String> {
    let json = serde_json::to_string(config).context("Failed to serialize deployment config")?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Machine-readable record of a finished deployment, written next to the address table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// SHA-256 hash of the deployment configuration
    pub config_hash: String,
    pub config: DeploymentConfig,
    pub chain_id: u64,
    pub deployer: Address,
    /// RFC 3339 timestamp of the deployment
    pub deployed_at: String,
    /// Version of the tool that created this deployment
    pub tool_version: String,
    pub contracts: ContractRegistry,
}

impl DeploymentRecord {
    /// Create a record stamped with the current time and this crate's version.
    pub fn new(
        config: DeploymentConfig,
        chain_id: u64,
        deployer: Address,
        contracts: ContractRegistry,
    ) -> Result<Self> {
        Ok(Self {
            config_hash: config_hash(&config)?,
            config,
            chain_id,
            deployer,
            deployed_at: chrono::Utc::now().to_rfc3339(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            contracts,
        })
    }

    /// Whether `config` is the configuration this deployment was made with.
    pub fn matches(&self, config: &DeploymentConfig) -> Result<bool> {
        Ok(config_hash(config)? == self.config_hash)
    }

    /// Save this record as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment record")?;

        std::fs::write(path, json).context(format!(
            "Failed to write deployment record to {}",
            path.display()
        ))?;

        tracing::info!(path = %path.display(), "Deployment record saved");
        Ok(())
    }

    /// Load a record from a file, or from `deployments.json` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let path = if path.is_dir() {
            path.join(RECORD_FILENAME)
        } else {
            path.to_path_buf()
        };
        if !path.exists() {
            anyhow::bail!("Deployment record file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(&path).context(format!(
            "Failed to read deployment record from {}",
            path.display()
        ))?;

        let record: Self =
            serde_json::from_str(&content).context("Failed to parse deployment record JSON")?;

        Ok(record)
    }
}
