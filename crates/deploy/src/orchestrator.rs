//! Deployment orchestration: validate, pre-resolve, deploy, initialize.

use std::collections::HashMap;

use alloy_core::primitives::{Address, U256, keccak256};

use crate::{
    artifacts::Artifacts,
    config::DeploymentConfig,
    error::{ConfigError, DeployError},
    instantiator::Instantiator,
    ledger::Ledger,
    plan::{ArgSource, Deployment, DeploymentPlan, InitCall, SaltSlot, encode_args},
    registry::ContractRegistry,
    resolver::{AddressBook, ResolvedAddress, salt_word},
};

/// Custom errors raised by initializers that already ran.
const ALREADY_INITIALIZED_ERRORS: &[&str] =
    &["InvalidInitialization()", "AlreadyInitialized()", "STARTED()"];

/// Revert strings raised by initializers that already ran, matched exactly.
const ALREADY_INITIALIZED_REVERTS: &[&str] = &["STARTED"];

/// What happened to an initialization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Executed,
    /// The probe showed the call was already in effect; nothing was sent.
    Skipped,
}

/// Summary of a Phase C run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
}

/// Deploys a [`DeploymentPlan`] for one deployer on one ledger.
///
/// Every phase sends through the same [`Instantiator`], which callers can borrow to send
/// their own transactions from the deployer in the same nonce lane.
pub struct Orchestrator<'a, L> {
    instantiator: Instantiator<'a, L>,
    artifacts: &'a Artifacts,
    plan: DeploymentPlan,
}

impl<'a, L: Ledger> Orchestrator<'a, L> {
    /// An orchestrator for the full protocol plan.
    pub fn new(ledger: &'a L, deployer: Address, artifacts: &'a Artifacts) -> Self {
        Self {
            instantiator: Instantiator::new(ledger, deployer),
            artifacts,
            plan: DeploymentPlan::protocol(),
        }
    }

    pub fn with_plan(mut self, plan: DeploymentPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    pub fn instantiator(&self) -> &Instantiator<'a, L> {
        &self.instantiator
    }

    fn deployer(&self) -> Address {
        self.instantiator.deployer()
    }

    /// Deploy and wire every contract of the plan.
    ///
    /// Nothing touches the ledger before the config and the artifacts are known to be
    /// usable. Any failure aborts the run; the partial registry is dropped.
    pub async fn orchestrate(
        &self,
        config: &DeploymentConfig,
    ) -> Result<ContractRegistry, DeployError> {
        config.validate(self.plan.required_salts())?;
        for step in self.plan.steps() {
            self.artifacts.get(&step.artifact)?;
        }

        let start_nonce = self
            .instantiator
            .ledger()
            .transaction_count(self.deployer())
            .await
            .map_err(|e| DeployError::from_ledger("resolve", e))?;
        let mut book = self.resolve(config, start_nonce)?;
        tracing::info!(
            deployer = %self.deployer(),
            start_nonce,
            contracts = self.plan.steps().len(),
            "Addresses resolved"
        );

        let registry = self.deploy(config, &mut book).await?;
        tracing::info!(contracts = registry.len(), "Contracts deployed");

        let report = self.initialize(&registry, config).await?;
        tracing::info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "Contracts initialized"
        );

        Ok(registry)
    }

    /// Phase A: compute every address of the plan, assuming the deployer's next nonce is
    /// `start_nonce` and steps are sent in execution order.
    pub fn resolve(
        &self,
        config: &DeploymentConfig,
        start_nonce: u64,
    ) -> Result<AddressBook, DeployError> {
        let steps = self.plan.steps();
        let nonces: HashMap<usize, u64> = self
            .plan
            .execution_order()?
            .into_iter()
            .enumerate()
            .map(|(position, step)| (step, start_nonce + position as u64))
            .collect();

        let mut book = AddressBook::new();
        for index in self.plan.resolution_order()? {
            let step = &steps[index];
            let resolved = match step.deployment {
                Deployment::Create => ResolvedAddress::create(self.deployer(), nonces[&index]),
                Deployment::Create2(slot) => {
                    let factory = book.address_of(self.plan.factory()).ok_or_else(|| {
                        DeployError::Plan(format!(
                            "factory is not resolved before `{}`",
                            step.name
                        ))
                    })?;
                    let args = encode_args(step, config, self.deployer(), &Resolved(&book))?;
                    let artifact = self.artifacts.get(&step.artifact)?;
                    ResolvedAddress::create2(
                        factory,
                        salt_word(salt_for(config, slot)?),
                        &artifact.init_code(&args),
                    )
                }
            };

            if let Some(other) = book.holder_of(resolved.address) {
                return Err(DeployError::Plan(format!(
                    "`{other}` and `{}` resolve to the same address {}",
                    step.name, resolved.address
                )));
            }
            tracing::debug!(step = %step.name, address = %resolved.address, "Address resolved");
            book.insert(step.name.clone(), resolved);
        }
        Ok(book)
    }

    /// Phase B: deploy in execution order, consuming the pre-resolved addresses.
    async fn deploy(
        &self,
        config: &DeploymentConfig,
        book: &mut AddressBook,
    ) -> Result<ContractRegistry, DeployError> {
        let mut registry = ContractRegistry::new();
        for index in self.plan.execution_order()? {
            let step = &self.plan.steps()[index];
            let args = encode_args(
                step,
                config,
                self.deployer(),
                &Live {
                    registry: &registry,
                    book: &*book,
                },
            )?;
            let artifact = self.artifacts.get(&step.artifact)?;
            let target = book.consume(&step.name).ok_or_else(|| {
                DeployError::Plan(format!("no resolved address for `{}`", step.name))
            })?;

            let handle = self
                .instantiator
                .instantiate(&step.name, &artifact, &args, target)
                .await?;
            registry.insert(handle)?;
        }
        Ok(registry)
    }

    /// Phase C on an already deployed registry.
    ///
    /// Running it twice surfaces [`DeployError::AlreadyInitialized`] from the first
    /// initializer instead of changing anything.
    pub async fn initialize(
        &self,
        registry: &ContractRegistry,
        config: &DeploymentConfig,
    ) -> Result<InitReport, DeployError> {
        let mut report = InitReport::default();
        for call in self.plan.init_calls(registry, config)? {
            match run_init_call(&self.instantiator, &call).await? {
                InitOutcome::Executed => report.executed.push(call.step),
                InitOutcome::Skipped => report.skipped.push(call.step),
            }
        }
        Ok(report)
    }
}

/// Run one initialization call, skipping it when its probe shows it is already in effect.
pub async fn run_init_call<L: Ledger>(
    instantiator: &Instantiator<'_, L>,
    call: &InitCall,
) -> Result<InitOutcome, DeployError> {
    if let Some(probe) = &call.probe {
        let output = instantiator
            .ledger()
            .call(call.target, probe.calldata.clone())
            .await
            .map_err(|e| DeployError::from_ledger(call.step.as_str(), e))?;
        if output == probe.expected {
            tracing::info!(step = %call.step, "Already in effect, skipping");
            return Ok(InitOutcome::Skipped);
        }
    }

    match instantiator
        .execute(&call.step, call.target, call.calldata.clone(), U256::ZERO)
        .await
    {
        Ok(_) => {
            tracing::info!(step = %call.step, target = %call.target, "Initialization call executed");
            Ok(InitOutcome::Executed)
        }
        Err(DeployError::Transaction { step, reason }) if is_already_initialized(&reason) => {
            Err(DeployError::AlreadyInitialized {
                step,
                contract: call.target,
            })
        }
        Err(e) => Err(e),
    }
}

/// Whether a revert reason says the contract was initialized before.
pub fn is_already_initialized(reason: &str) -> bool {
    let message = ["revert: ", "execution reverted: "]
        .iter()
        .find_map(|prefix| reason.strip_prefix(prefix))
        .unwrap_or(reason)
        .trim();
    if ALREADY_INITIALIZED_REVERTS.contains(&message) {
        return true;
    }
    let reason = reason.to_lowercase();
    if reason.contains("already initialized") {
        return true;
    }
    ALREADY_INITIALIZED_ERRORS.iter().any(|signature| {
        let selector = hex::encode(&keccak256(signature.as_bytes())[..4]);
        reason.contains(&format!("0x{selector}"))
    })
}

fn salt_for(config: &DeploymentConfig, slot: SaltSlot) -> Result<u64, ConfigError> {
    match slot {
        SaltSlot::Indexed(i) => {
            config
                .salts
                .get(i)
                .copied()
                .ok_or(ConfigError::NotEnoughSalts {
                    required: i + 1,
                    provided: config.salts.len(),
                })
        }
        SaltSlot::Emissions => Ok(config.emissions_token_salt),
    }
}

/// Every reference comes from the address book.
struct Resolved<'b>(&'b AddressBook);

impl ArgSource for Resolved<'_> {
    fn live_address(&self, name: &str) -> Option<Address> {
        self.0.address_of(name)
    }

    fn forward_address(&self, name: &str) -> Option<Address> {
        self.0.address_of(name)
    }
}

/// Live references come from the registry, forward ones from the address book.
struct Live<'b> {
    registry: &'b ContractRegistry,
    book: &'b AddressBook,
}

impl ArgSource for Live<'_> {
    fn live_address(&self, name: &str) -> Option<Address> {
        self.registry.get(name).map(|handle| handle.address)
    }

    fn forward_address(&self, name: &str) -> Option<Address> {
        self.book.address_of(name)
    }
}
