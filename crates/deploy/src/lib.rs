//! shadow-deploy - Deployment library for the Shadow DEX protocol.
//!
//! This crate deploys and wires the protocol's contracts (AMM pairs, concentrated
//! liquidity pools, vote-escrow governance and gauges) against any [`Ledger`], using
//! deterministic CREATE2 addresses so that cross-references can be resolved before
//! anything is deployed.

mod artifacts;
pub use artifacts::{Artifact, Artifacts};

mod config;
pub use config::{CONFIG_FILENAME, DeploymentConfig};

mod error;
pub use error::{ConfigError, ConfigField, DeployError, LedgerError};

pub mod cheats;
pub mod contracts;
pub mod events;
pub mod ledger;
pub use ledger::{DevLedger, DevNamespace, Ledger, LocalKey, RpcLedger, TxSigner};

mod fixture;
pub use fixture::{FIXTURE_TOKENS, Fixture, FixtureBuilder, TOKEN_ARTIFACT, WETH_ARTIFACT};

mod instantiator;
pub use instantiator::{ContractHandle, DeploymentKind, Instantiator, read_call};

mod orchestrator;
pub use orchestrator::{InitOutcome, InitReport, Orchestrator, is_already_initialized, run_init_call};

pub mod plan;
pub use plan::DeploymentPlan;

mod record;
pub use record::{DeploymentRecord, RECORD_FILENAME, config_hash};

mod registry;
pub use registry::{ADDRESSES_FILENAME, ContractRegistry, parse_markdown};

pub mod resolver;
pub use resolver::{AddressBook, ResolvedAddress};

pub mod validate;
pub use validate::{ValidationReport, validate_deployment};

pub mod verify;
pub use verify::{ExplorerConfig, VerificationStatus, verify_contract};
