//! Builder for a fully deployed protocol on a development chain.
//!
//! A fixture funds the deployer, deploys WETH9 and a handful of mock ERC-20 tokens, and
//! runs the full [`Orchestrator`] against a configuration whose governance roles all
//! point at the deployer.
//!
//! # Example
//!
//! ```no_run
//! use shadow_deploy::{Artifacts, FixtureBuilder, LocalKey, RpcLedger, TxSigner};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let key = LocalKey::dev_account(0)?;
//! let deployer = key.address();
//! let ledger = RpcLedger::new("http://127.0.0.1:8545".parse()?, TxSigner::Local(key))?;
//! let artifacts = Artifacts::load_dir(std::path::Path::new("artifacts"))?;
//!
//! let fixture = FixtureBuilder::new().build(&ledger, deployer, &artifacts).await?;
//! println!("{}", fixture.merged().table());
//! # Ok(())
//! # }
//! ```

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
    sol_types::SolCall,
};
use derive_more::Deref;
use futures::future::try_join_all;

use crate::{
    artifacts::Artifacts,
    cheats::ether,
    config::DeploymentConfig,
    contracts::IWETH9,
    error::DeployError,
    ledger::DevLedger,
    orchestrator::Orchestrator,
    registry::ContractRegistry,
};

/// Artifact name of the wrapped native token.
pub const WETH_ARTIFACT: &str = "WETH9";

/// Artifact name of the mock ERC-20 token.
pub const TOKEN_ARTIFACT: &str = "Token";

/// Mock tokens deployed next to WETH, in deployment order.
pub const FIXTURE_TOKENS: [&str; 5] = ["usdc", "usdt", "dei", "deus", "wbtc"];

/// A deployed protocol plus the tokens it was configured with.
///
/// Dereferences to the core contract registry.
#[derive(Debug, Clone, Deref)]
pub struct Fixture {
    pub deployer: Address,
    /// `weth` and the mock tokens.
    pub tokens: ContractRegistry,
    #[deref]
    pub contracts: ContractRegistry,
    pub config: DeploymentConfig,
}

impl Fixture {
    /// Tokens and core contracts in a single registry.
    pub fn merged(&self) -> ContractRegistry {
        self.contracts.merged(&self.tokens)
    }

    pub fn weth(&self) -> Result<Address, DeployError> {
        self.tokens.address("weth")
    }
}

/// Builder for a [`Fixture`].
#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    /// Native balance given to the deployer for gas.
    funding: U256,
    /// Native currency wrapped into WETH right after its deployment.
    weth_deposit: U256,
    /// Constructor supply of each mock token.
    token_supply: U256,
    /// Emissions token supply minted at kickoff.
    initial_supply: U256,
    incentive_growth: U256,
    salts: Vec<u64>,
    emissions_token_salt: u64,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            funding: ether(10_000),
            weth_deposit: ether(100_000_000),
            token_supply: ether(100),
            initial_supply: ether(100_000_000),
            incentive_growth: ether(250),
            salts: (1..=24).collect(),
            emissions_token_salt: 1,
        }
    }

    /// Set the deployer's native balance used for gas.
    pub fn funding(mut self, funding: U256) -> Self {
        self.funding = funding;
        self
    }

    /// Set how much native currency is wrapped into WETH.
    pub fn weth_deposit(mut self, amount: U256) -> Self {
        self.weth_deposit = amount;
        self
    }

    /// Set the constructor supply of every mock token.
    pub fn token_supply(mut self, supply: U256) -> Self {
        self.token_supply = supply;
        self
    }

    /// Set the emissions token supply minted at kickoff.
    pub fn initial_supply(mut self, supply: U256) -> Self {
        self.initial_supply = supply;
        self
    }

    pub fn incentive_growth(mut self, growth: U256) -> Self {
        self.incentive_growth = growth;
        self
    }

    /// Set the CREATE2 salts of the core contracts.
    pub fn salts(mut self, salts: impl IntoIterator<Item = u64>) -> Self {
        self.salts = salts.into_iter().collect();
        self
    }

    pub fn emissions_token_salt(mut self, salt: u64) -> Self {
        self.emissions_token_salt = salt;
        self
    }

    /// Deploy a fresh fixture.
    ///
    /// Every call deploys new contracts; nothing is shared between fixtures.
    pub async fn build<L: DevLedger>(
        self,
        ledger: &L,
        deployer: Address,
        artifacts: &Artifacts,
    ) -> Result<Fixture, DeployError> {
        let weth_artifact = artifacts.get(WETH_ARTIFACT)?;
        let token_artifact = artifacts.get(TOKEN_ARTIFACT)?;

        // The deposit is paid out of the same balance as gas.
        ledger
            .set_balance(deployer, self.funding.saturating_add(self.weth_deposit))
            .await
            .map_err(|e| DeployError::from_ledger("fund deployer", e))?;
        tracing::info!(deployer = %deployer, funding = %self.funding, "Deployer funded");

        let orchestrator = Orchestrator::new(ledger, deployer, artifacts);
        let instantiator = orchestrator.instantiator();
        let mut tokens = ContractRegistry::new();

        let weth = instantiator.deploy("weth", &weth_artifact, &[]).await?;
        if !self.weth_deposit.is_zero() {
            instantiator
                .execute(
                    "weth deposit",
                    weth.address,
                    IWETH9::depositCall {}.abi_encode().into(),
                    self.weth_deposit,
                )
                .await?;
        }
        tokens.insert(weth)?;

        let supply_arg = DynSolValue::Tuple(vec![DynSolValue::Uint(self.token_supply, 256)])
            .abi_encode_params();
        let deployed = try_join_all(
            FIXTURE_TOKENS
                .iter()
                .map(|name| instantiator.deploy(name, &token_artifact, &supply_arg)),
        )
        .await?;
        for handle in deployed {
            tokens.insert(handle)?;
        }

        let config = DeploymentConfig {
            initial_supply: self.initial_supply,
            multisig: deployer,
            weth: tokens.address("weth")?,
            incentive_growth: self.incentive_growth,
            fee_setter: deployer,
            salts: self.salts,
            whitelist_tokens: tokens.iter().map(|handle| handle.address).collect(),
            emissions_token_salt: self.emissions_token_salt,
        };

        let contracts = orchestrator.orchestrate(&config).await?;

        tracing::info!(
            deployer = %deployer,
            tokens = tokens.len(),
            contracts = contracts.len(),
            "Fixture ready"
        );

        Ok(Fixture {
            deployer,
            tokens,
            contracts,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = FixtureBuilder::new();
        assert_eq!(builder.funding, ether(10_000));
        assert_eq!(builder.token_supply, ether(100));
        assert_eq!(builder.initial_supply, ether(100_000_000));
        assert_eq!(builder.incentive_growth, ether(250));
        assert_eq!(builder.salts, (1..=24).collect::<Vec<_>>());
        assert_eq!(builder.emissions_token_salt, 1);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = FixtureBuilder::new()
            .funding(ether(1))
            .token_supply(ether(5))
            .salts([7, 8, 9]);
        assert_eq!(builder.funding, ether(1));
        assert_eq!(builder.token_supply, ether(5));
        assert_eq!(builder.salts, vec![7, 8, 9]);
    }
}
