//! shadowctl deploys, validates and inspects the Shadow DEX protocol from the command line.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};

use cli::{Cli, Command};
use shadow_deploy::{
    ADDRESSES_FILENAME, Artifacts, CONFIG_FILENAME, DeploymentConfig, DeploymentRecord,
    ExplorerConfig, FixtureBuilder, Ledger, LocalKey, Orchestrator, RECORD_FILENAME, RpcLedger,
    TxSigner, events::gather_mint_burns, validate_deployment, verify_contract,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let ledger = connect(&cli)?;

    match cli.command {
        Command::Deploy {
            config,
            out_dir,
            artifacts,
            redeploy,
            validate,
        } => {
            let config = load_config(&config)?;
            let artifacts = Artifacts::load_dir(&artifacts)?;
            let chain_id = ledger.chain_id().await?;
            let deployer = ledger.sender().await?;

            let record_path = out_dir.join(RECORD_FILENAME);
            if !redeploy && record_path.exists() {
                let previous = DeploymentRecord::load_from_file(&record_path)?;
                if previous.chain_id == chain_id && previous.matches(&config)? {
                    tracing::info!(
                        record = %record_path.display(),
                        deployed_at = %previous.deployed_at,
                        "Configuration already deployed, pass --redeploy to deploy again"
                    );
                    println!("{}", previous.contracts.table());
                    return Ok(());
                }
            }

            tracing::info!(
                rpc_url = %cli.rpc_url,
                chain_id,
                deployer = %deployer,
                "Deploying protocol..."
            );
            let contracts = Orchestrator::new(&ledger, deployer, &artifacts)
                .orchestrate(&config)
                .await?;
            println!("{}", contracts.table());

            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            contracts.write_markdown(&out_dir.join(ADDRESSES_FILENAME))?;
            let record = DeploymentRecord::new(config, chain_id, deployer, contracts)?;
            record.save_to_file(&record_path)?;

            if validate {
                validate_record(&ledger, &record).await?;
            }
        }
        Command::Fixture { artifacts, out_dir } => {
            let artifacts = Artifacts::load_dir(&artifacts)?;
            let deployer = ledger.sender().await?;

            let fixture = FixtureBuilder::new()
                .build(&ledger, deployer, &artifacts)
                .await?;
            let merged = fixture.merged();
            println!("{}", merged.table());

            if let Some(out_dir) = out_dir {
                std::fs::create_dir_all(&out_dir)
                    .with_context(|| format!("Failed to create {}", out_dir.display()))?;
                merged.write_markdown(&out_dir.join(ADDRESSES_FILENAME))?;
            }
        }
        Command::Validate { record } => {
            let record = DeploymentRecord::load_from_file(&record)?;
            validate_record(&ledger, &record).await?;
        }
        Command::MintBurns {
            voter,
            start_block,
            window,
        } => {
            let report = gather_mint_burns(&ledger, voter, start_block, window).await?;
            print!("{report}");
        }
        Command::Verify {
            record,
            artifacts,
            explorer_api_url,
            explorer_api_key,
        } => {
            let record = DeploymentRecord::load_from_file(&record)?;
            let artifacts = Artifacts::load_dir(&artifacts)?;
            let explorer = ExplorerConfig {
                api_url: explorer_api_url,
                api_key: explorer_api_key,
            };
            verify_record(&explorer, &record, &artifacts).await?;
        }
    }

    Ok(())
}

/// Build the ledger from the network flags.
fn connect(cli: &Cli) -> Result<RpcLedger> {
    let signer = match &cli.private_key {
        Some(key) => TxSigner::Local(LocalKey::from_hex(key)?),
        None => TxSigner::NodeManaged,
    };
    Ok(RpcLedger::new(cli.rpc_url.clone(), signer)?.with_dev_namespace(cli.dev_namespace))
}

/// Load a deployment config from TOML, overridden by `SHADOW_`-prefixed variables.
fn load_config(path: &Path) -> Result<DeploymentConfig> {
    let path = if path.is_dir() {
        path.join(CONFIG_FILENAME)
    } else {
        path.to_path_buf()
    };
    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }

    let config: DeploymentConfig = Figment::new()
        .merge(Toml::file(&path))
        .merge(Env::prefixed("SHADOW_").only(&[
            "initial_supply",
            "multisig",
            "weth",
            "incentive_growth",
            "fee_setter",
            "salts",
            "whitelist_tokens",
            "emissions_token_salt",
        ]))
        .extract()
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

async fn validate_record(ledger: &RpcLedger, record: &DeploymentRecord) -> Result<()> {
    let report = validate_deployment(ledger, &record.contracts, record.config.multisig).await?;
    for check in report.code.iter().filter(|check| !check.has_code) {
        tracing::warn!(contract = %check.name, address = %check.address, "No code deployed");
    }
    println!("{}", report.table());

    if !report.passed() {
        anyhow::bail!(
            "Deployment validation failed: {} mismatched getters, {} contracts without code",
            report.failures().count(),
            report.code.iter().filter(|check| !check.has_code).count()
        );
    }
    tracing::info!(checks = report.rows.len(), "Deployment validation passed");
    Ok(())
}

async fn verify_record(
    explorer: &ExplorerConfig,
    record: &DeploymentRecord,
    artifacts: &Artifacts,
) -> Result<()> {
    let client = reqwest_client()?;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Contract", "Address", "Status"]);

    let mut failed = 0;
    // Explorers rate-limit submissions.
    for handle in record.contracts.iter() {
        let outcome = match artifacts.get(&handle.artifact) {
            Ok(artifact) => verify_contract(&client, explorer, handle, &artifact).await,
            Err(e) => Err(e.into()),
        };
        let status = match outcome {
            Ok(status) => status.to_string(),
            Err(e) => {
                tracing::error!(contract = %handle.name, error = ?e, "Verification failed");
                failed += 1;
                format!("failed: {e}")
            }
        };
        table.add_row(vec![handle.name.clone(), handle.address.to_string(), status]);
    }
    println!("{table}");

    if failed > 0 {
        anyhow::bail!("{failed} contracts could not be verified");
    }
    Ok(())
}

fn reqwest_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .context("Failed to create HTTP client")
}
