use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use shadow_deploy::{DevNamespace, events::DEFAULT_WINDOW};
use tracing::level_filters::LevelFilter;
use url::Url;

/// The default RPC endpoint (a local dev node).
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// The default directory of compiled contract artifacts.
const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

#[derive(Parser)]
#[command(name = "shadowctl")]
#[command(author, version, about = "Deploy and inspect the Shadow DEX protocol")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "SHADOW_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The URL of the JSON-RPC endpoint.
    #[arg(long, alias = "rpc", global = true, env = "SHADOW_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: Url,

    /// Hex private key signing transactions.
    ///
    /// If not provided, transactions are sent from the node's first unlocked account.
    #[arg(long, global = true, env = "SHADOW_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// RPC namespace of the dev-node extensions (anvil or hardhat).
    #[arg(long, global = true, env = "SHADOW_DEV_NAMESPACE", default_value_t = DevNamespace::Anvil)]
    pub dev_namespace: DevNamespace,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy and initialize the protocol.
    Deploy {
        /// Path to a deployment config (TOML), or a directory holding `shadow.toml`.
        ///
        /// Fields can be overridden with `SHADOW_`-prefixed environment variables.
        #[arg(short, long, alias = "conf", env = "SHADOW_CONFIG")]
        config: PathBuf,

        /// Directory receiving the address table and the deployment record.
        #[arg(long, alias = "outdata", env = "SHADOW_OUT_DIR", default_value = ".")]
        out_dir: PathBuf,

        /// Directory of compiled contract artifacts.
        #[arg(long, env = "SHADOW_ARTIFACTS", default_value = DEFAULT_ARTIFACTS_DIR)]
        artifacts: PathBuf,

        /// Deploy even if the output directory records a deployment of the same config.
        #[arg(long, env = "SHADOW_REDEPLOY", default_value_t = false)]
        redeploy: bool,

        /// Check every cross-reference getter once the deployment is done.
        #[arg(long, default_value_t = false)]
        validate: bool,
    },

    /// Deploy WETH, mock tokens and the protocol on a dev node.
    Fixture {
        /// Directory of compiled contract artifacts.
        #[arg(long, env = "SHADOW_ARTIFACTS", default_value = DEFAULT_ARTIFACTS_DIR)]
        artifacts: PathBuf,

        /// Write the address table to this directory.
        #[arg(long, env = "SHADOW_OUT_DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Check the cross-references of a recorded deployment.
    Validate {
        /// Path to `deployments.json`, or the directory holding it.
        #[arg(long, env = "SHADOW_RECORD", default_value = ".")]
        record: PathBuf,
    },

    /// Report the first swap, mint and burn of every CL pool with a gauge.
    MintBurns {
        /// Address of the voter listing the gauges.
        #[arg(long)]
        voter: Address,

        /// First block of the scan.
        #[arg(long)]
        start_block: u64,

        /// Number of blocks searched for the first swap.
        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        window: u64,
    },

    /// Verify the sources of a recorded deployment on a block explorer.
    Verify {
        /// Path to `deployments.json`, or the directory holding it.
        #[arg(long, env = "SHADOW_RECORD", default_value = ".")]
        record: PathBuf,

        /// Directory of compiled contract artifacts, with their build-info.
        #[arg(long, env = "SHADOW_ARTIFACTS", default_value = DEFAULT_ARTIFACTS_DIR)]
        artifacts: PathBuf,

        /// Etherscan-compatible API endpoint.
        #[arg(long, env = "SHADOW_EXPLORER_API_URL")]
        explorer_api_url: Url,

        /// Explorer API key.
        #[arg(long, env = "SHADOW_EXPLORER_API_KEY", hide_env_values = true)]
        explorer_api_key: String,
    },
}
