//! Error types for the deployment tooling.

use alloy_core::primitives::Address;
use thiserror::Error;

/// A field of the [`crate::DeploymentConfig`] that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigField {
    InitialSupply,
    Multisig,
    Weth,
    FeeSetter,
    Salts,
    Whitelist,
    /// The file itself could not be parsed.
    File,
}

/// Errors raised while validating a deployment configuration.
///
/// These are always detected before any ledger interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("salt {salt} is used twice (positions {first} and {second})")]
    DuplicateSalt { salt: u64, first: usize, second: usize },

    #[error("not enough salts: the plan needs {required}, the config provides {provided}")]
    NotEnoughSalts { required: usize, provided: usize },

    #[error("required address `{field}` is missing or zero")]
    MissingAddress { field: ConfigField },

    #[error("whitelist contains {token} twice (positions {first} and {second})")]
    DuplicateWhitelistToken { token: Address, first: usize, second: usize },

    #[error("whitelist entry {index} is the zero address")]
    ZeroWhitelistToken { index: usize },

    #[error("initial supply must be greater than zero")]
    ZeroInitialSupply,

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    /// The configuration field this error refers to.
    pub fn field(&self) -> ConfigField {
        match self {
            Self::DuplicateSalt { .. } | Self::NotEnoughSalts { .. } => ConfigField::Salts,
            Self::MissingAddress { field } => *field,
            Self::DuplicateWhitelistToken { .. } | Self::ZeroWhitelistToken { .. } => {
                ConfigField::Whitelist
            }
            Self::ZeroInitialSupply => ConfigField::InitialSupply,
            Self::Parse(_) => ConfigField::File,
        }
    }
}

/// Errors raised by a [`crate::Ledger`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The node could not be reached or the request timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The transaction or call reverted.
    #[error("execution reverted: {reason}")]
    Reverted { reason: String },

    /// The node answered with something we could not decode.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The receipt did not show up in time.
    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(String),

    /// The operation needs a capability the ledger does not have.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl LedgerError {
    /// Whether this error is a transient connectivity problem rather than a rejection.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ReceiptTimeout(_))
    }
}

/// Errors surfaced by the orchestrator, the instantiator and the fixture builder.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid deployment config ({}): {0}", .0.field())]
    Config(#[from] ConfigError),

    #[error("step `{step}`: deployed at {actual} but {expected} was pre-computed")]
    AddressMismatch {
        step: String,
        expected: Address,
        actual: Address,
    },

    #[error("step `{step}`: transaction failed: {reason}")]
    Transaction { step: String, reason: String },

    #[error("step `{step}`: {contract} is already initialized")]
    AlreadyInitialized { step: String, contract: Address },

    #[error("step `{step}`: network error")]
    Network {
        step: String,
        #[source]
        source: LedgerError,
    },

    #[error("artifact `{name}`: {reason}")]
    Artifact { name: String, reason: String },

    #[error("invalid deployment plan: {0}")]
    Plan(String),
}

impl DeployError {
    /// Classify a ledger error raised while running `step`.
    pub fn from_ledger(step: impl Into<String>, err: LedgerError) -> Self {
        let step = step.into();
        match err {
            LedgerError::Reverted { reason } => Self::Transaction { step, reason },
            LedgerError::Rpc { code, message } => Self::Transaction {
                step,
                reason: format!("rpc error {code}: {message}"),
            },
            other => Self::Network { step, source: other },
        }
    }

    /// The name of the step that failed, if the error is tied to one.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::AddressMismatch { step, .. }
            | Self::Transaction { step, .. }
            | Self::AlreadyInitialized { step, .. }
            | Self::Network { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_fields() {
        assert_eq!(
            ConfigError::DuplicateSalt { salt: 3, first: 0, second: 4 }.field(),
            ConfigField::Salts
        );
        assert_eq!(
            ConfigError::ZeroWhitelistToken { index: 2 }.field(),
            ConfigField::Whitelist
        );
        assert_eq!(
            ConfigError::MissingAddress { field: ConfigField::Weth }.field(),
            ConfigField::Weth
        );
        assert_eq!(ConfigField::FeeSetter.to_string(), "fee_setter");
    }

    #[test]
    fn test_ledger_error_classification() {
        let reverted = DeployError::from_ledger(
            "voter",
            LedgerError::Reverted { reason: "nope".to_string() },
        );
        assert!(matches!(reverted, DeployError::Transaction { ref step, .. } if step == "voter"));

        let transport =
            DeployError::from_ledger("voter", LedgerError::Transport("refused".to_string()));
        assert!(matches!(transport, DeployError::Network { .. }));
        assert_eq!(transport.step(), Some("voter"));
    }
}
