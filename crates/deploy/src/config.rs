//! Deployment configuration.

use std::{collections::HashMap, path::Path};

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigField};

/// Default file name of a deployment config.
pub const CONFIG_FILENAME: &str = "shadow.toml";

/// Parameters of a protocol deployment.
///
/// The struct is immutable once validated; the orchestrator never reads anything that is
/// not in here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Initial emissions supply minted at kickoff, 18-decimal fixed point.
    pub initial_supply: U256,
    /// Governance multisig receiving admin roles and factory ownership.
    #[serde(default)]
    pub multisig: Address,
    /// Wrapped native token.
    #[serde(default)]
    pub weth: Address,
    /// Incentive growth parameter passed to the minter.
    #[serde(default)]
    pub incentive_growth: U256,
    /// Account allowed to set AMM fees.
    #[serde(default)]
    pub fee_setter: Address,
    /// One salt per salted contract, in plan order.
    #[serde(default)]
    pub salts: Vec<u64>,
    /// Tokens registered on the voter's whitelist during initialization.
    #[serde(default)]
    pub whitelist_tokens: Vec<Address>,
    /// Salt of the emissions token.
    #[serde(default)]
    pub emissions_token_salt: u64,
}

impl DeploymentConfig {
    /// Check the config against a plan needing `required_salts` salted contracts.
    ///
    /// Checks run in field order and the first violation is returned.
    pub fn validate(&self, required_salts: usize) -> Result<(), ConfigError> {
        if self.initial_supply.is_zero() {
            return Err(ConfigError::ZeroInitialSupply);
        }

        for (field, address) in [
            (ConfigField::Multisig, self.multisig),
            (ConfigField::Weth, self.weth),
            (ConfigField::FeeSetter, self.fee_setter),
        ] {
            if address.is_zero() {
                return Err(ConfigError::MissingAddress { field });
            }
        }

        let mut seen_salts = HashMap::with_capacity(self.salts.len());
        for (position, salt) in self.salts.iter().enumerate() {
            if let Some(first) = seen_salts.insert(*salt, position) {
                return Err(ConfigError::DuplicateSalt {
                    salt: *salt,
                    first,
                    second: position,
                });
            }
        }
        if self.salts.len() < required_salts {
            return Err(ConfigError::NotEnoughSalts {
                required: required_salts,
                provided: self.salts.len(),
            });
        }

        let mut seen_tokens = HashMap::with_capacity(self.whitelist_tokens.len());
        for (index, token) in self.whitelist_tokens.iter().enumerate() {
            if token.is_zero() {
                return Err(ConfigError::ZeroWhitelistToken { index });
            }
            if let Some(first) = seen_tokens.insert(*token, index) {
                return Err(ConfigError::DuplicateWhitelistToken {
                    token: *token,
                    first,
                    second: index,
                });
            }
        }

        Ok(())
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployment config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `shadow.toml` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }
}
