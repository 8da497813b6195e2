//! The protocol's deployment graph and its initialization calls.

use std::collections::{BTreeSet, HashMap};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, U256},
    sol_types::{SolCall, SolValue},
};

use crate::{
    config::DeploymentConfig,
    contracts::{
        IAccessHub, IClFactory, IContractDeployer, IMinter, IPairFactory, IVoteModule, IVoter,
    },
    error::DeployError,
    registry::ContractRegistry,
};

/// Which salt a CREATE2 step uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltSlot {
    /// `config.salts[i]`.
    Indexed(usize),
    /// `config.emissions_token_salt`.
    Emissions,
}

/// How a step is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Plain CREATE from the deployer.
    Create,
    /// CREATE2 through the plan's factory.
    Create2(SaltSlot),
}

/// A constructor argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Address of a contract deployed earlier in the run.
    Contract(String),
    /// Pre-resolved address of a contract that may not exist yet.
    Forward(String),
    Multisig,
    Weth,
    Deployer,
    /// A literal number.
    Uint(U256),
}

impl Arg {
    pub fn contract(name: &str) -> Self {
        Self::Contract(name.to_string())
    }

    pub fn forward(name: &str) -> Self {
        Self::Forward(name.to_string())
    }

    /// The step this argument refers to, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Contract(name) | Self::Forward(name) => Some(name),
            _ => None,
        }
    }
}

/// "Deploy artifact X under name N, with these constructor arguments."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStep {
    pub name: String,
    pub artifact: String,
    pub deployment: Deployment,
    pub args: Vec<Arg>,
}

impl DeploymentStep {
    pub fn create(name: &str, artifact: &str, args: Vec<Arg>) -> Self {
        Self {
            name: name.to_string(),
            artifact: artifact.to_string(),
            deployment: Deployment::Create,
            args,
        }
    }

    pub fn salted(name: &str, artifact: &str, slot: SaltSlot, args: Vec<Arg>) -> Self {
        Self {
            name: name.to_string(),
            artifact: artifact.to_string(),
            deployment: Deployment::Create2(slot),
            args,
        }
    }
}

/// Where argument values come from while encoding constructor arguments.
pub trait ArgSource {
    /// Address for a `Contract` argument.
    fn live_address(&self, name: &str) -> Option<Address>;
    /// Address for a `Forward` argument.
    fn forward_address(&self, name: &str) -> Option<Address>;
}

/// Builds the initialization calls of a plan once every contract is deployed.
pub type InitCallsFn =
    fn(&ContractRegistry, &DeploymentConfig) -> Result<Vec<InitCall>, DeployError>;

/// A DAG of deployment steps, plus the calls that wire the deployed contracts together.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    steps: Vec<DeploymentStep>,
    factory: String,
    init_calls: InitCallsFn,
}

impl DeploymentPlan {
    /// Build a plan, checking names, references, salt slots and the factory.
    pub fn new(steps: Vec<DeploymentStep>, factory: &str) -> Result<Self, DeployError> {
        let plan = Self {
            steps,
            factory: factory.to_string(),
            init_calls: |_, _| Ok(Vec::new()),
        };
        plan.check()?;
        Ok(plan)
    }

    pub fn with_init_calls(mut self, init_calls: InitCallsFn) -> Self {
        self.init_calls = init_calls;
        self
    }

    /// The full protocol: governance token, voting, AMM and concentrated-liquidity stacks.
    pub fn protocol() -> Self {
        use Arg::*;
        use SaltSlot::*;

        let c = Arg::contract;
        let steps = vec![
            DeploymentStep::create("contractDeployer", "ContractDeployer", vec![Deployer]),
            DeploymentStep::salted("shadow", "Shadow", Emissions, vec![Arg::forward("minter")]),
            DeploymentStep::salted("accessHub", "AccessHub", Indexed(0), vec![]),
            DeploymentStep::salted("voter", "Voter", Indexed(1), vec![c("accessHub")]),
            DeploymentStep::salted(
                "minter",
                "Minter",
                Indexed(2),
                vec![c("accessHub"), Multisig],
            ),
            DeploymentStep::salted("voteModule", "VoteModule", Indexed(3), vec![]),
            DeploymentStep::salted(
                "xShadow",
                "XShadow",
                Indexed(4),
                vec![
                    c("shadow"),
                    c("voter"),
                    Multisig,
                    c("accessHub"),
                    c("voteModule"),
                    c("minter"),
                ],
            ),
            DeploymentStep::salted(
                "feeRecipientFactory",
                "FeeRecipientFactory",
                Indexed(5),
                vec![Multisig, c("voter"), c("accessHub")],
            ),
            DeploymentStep::salted(
                "pairFactory",
                "PairFactory",
                Indexed(6),
                vec![c("voter"), Multisig, c("accessHub"), c("feeRecipientFactory")],
            ),
            DeploymentStep::salted("router", "Router", Indexed(7), vec![c("pairFactory"), Weth]),
            DeploymentStep::salted("gaugeFactory", "GaugeFactory", Indexed(8), vec![]),
            DeploymentStep::salted(
                "feeDistributorFactory",
                "FeeDistributorFactory",
                Indexed(9),
                vec![],
            ),
            DeploymentStep::salted(
                "launcherPlugin",
                "LauncherPlugin",
                Indexed(10),
                vec![c("voter"), c("accessHub"), Multisig],
            ),
            DeploymentStep::salted(
                "clPoolDeployer",
                "ShadowV3PoolDeployer",
                Indexed(11),
                vec![Arg::forward("clFactory")],
            ),
            DeploymentStep::salted(
                "clFactory",
                "ShadowV3Factory",
                Indexed(12),
                vec![c("accessHub")],
            ),
            DeploymentStep::salted(
                "feeCollector",
                "FeeCollector",
                Indexed(13),
                vec![Multisig, c("voter")],
            ),
            DeploymentStep::salted(
                "nfpDescriptor",
                "NonfungibleTokenPositionDescriptor",
                Indexed(14),
                vec![Weth],
            ),
            DeploymentStep::salted(
                "nfpManager",
                "NonfungiblePositionManager",
                Indexed(15),
                vec![c("clPoolDeployer"), Weth, c("nfpDescriptor"), c("accessHub")],
            ),
            DeploymentStep::salted(
                "clGaugeFactory",
                "ClGaugeFactory",
                Indexed(16),
                vec![c("nfpManager"), c("voter"), c("feeCollector")],
            ),
            DeploymentStep::salted("veArtProxy", "VeArtProxy", Indexed(17), vec![]),
            DeploymentStep::salted(
                "votingEscrow",
                "VotingEscrow",
                Indexed(18),
                vec![c("shadow"), c("veArtProxy"), c("voter"), c("accessHub")],
            ),
            DeploymentStep::salted(
                "rewardsDistributor",
                "RewardsDistributor",
                Indexed(19),
                vec![c("votingEscrow")],
            ),
        ];

        Self {
            steps,
            factory: "contractDeployer".to_string(),
            init_calls: protocol_init_calls,
        }
    }

    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Name of the step whose contract serves as CREATE2 factory.
    pub fn factory(&self) -> &str {
        &self.factory
    }

    /// Step names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name.as_str())
    }

    /// Initialization calls for a fully deployed `registry`.
    pub fn init_calls(
        &self,
        registry: &ContractRegistry,
        config: &DeploymentConfig,
    ) -> Result<Vec<InitCall>, DeployError> {
        (self.init_calls)(registry, config)
    }

    /// Number of salts `config.salts` must provide.
    pub fn required_salts(&self) -> usize {
        self.steps
            .iter()
            .filter_map(|step| match step.deployment {
                Deployment::Create2(SaltSlot::Indexed(i)) => Some(i + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Order in which the steps are executed: only live `Contract` references and the
    /// factory create edges. Declaration order breaks ties.
    pub fn execution_order(&self) -> Result<Vec<usize>, DeployError> {
        self.topological_order(false)
    }

    /// Order in which addresses are pre-computed: every reference creates an edge, since a
    /// CREATE2 address depends on the constructor arguments.
    pub fn resolution_order(&self) -> Result<Vec<usize>, DeployError> {
        self.topological_order(true)
    }

    fn check(&self) -> Result<(), DeployError> {
        let mut names = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if names.insert(step.name.as_str(), i).is_some() {
                return Err(DeployError::Plan(format!("step `{}` is declared twice", step.name)));
            }
        }

        match self.step(&self.factory) {
            Some(step) if step.deployment == Deployment::Create => {}
            Some(_) => {
                return Err(DeployError::Plan(format!(
                    "factory `{}` must be deployed with CREATE",
                    self.factory
                )));
            }
            None => {
                return Err(DeployError::Plan(format!(
                    "factory `{}` is not part of the plan",
                    self.factory
                )));
            }
        }

        let mut slots = HashMap::new();
        for step in &self.steps {
            for reference in step.args.iter().filter_map(Arg::reference) {
                if !names.contains_key(reference) {
                    return Err(DeployError::Plan(format!(
                        "step `{}` references unknown step `{reference}`",
                        step.name
                    )));
                }
                if reference == step.name {
                    return Err(DeployError::Plan(format!(
                        "step `{}` references itself",
                        step.name
                    )));
                }
            }
            if let Deployment::Create2(SaltSlot::Indexed(slot)) = step.deployment {
                if let Some(other) = slots.insert(slot, step.name.as_str()) {
                    return Err(DeployError::Plan(format!(
                        "steps `{other}` and `{}` share salt slot {slot}",
                        step.name
                    )));
                }
            }
        }

        self.resolution_order()?;
        Ok(())
    }

    /// Kahn's algorithm, always picking the lowest ready declaration index.
    fn topological_order(&self, include_forward: bool) -> Result<Vec<usize>, DeployError> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.name.as_str(), i))
            .collect();
        let factory = index.get(self.factory.as_str()).copied();

        let mut dependents = vec![Vec::new(); self.steps.len()];
        let mut in_degree = vec![0usize; self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            let mut deps = BTreeSet::new();
            for arg in &step.args {
                match arg {
                    Arg::Contract(name) => deps.extend(index.get(name.as_str())),
                    Arg::Forward(name) if include_forward => deps.extend(index.get(name.as_str())),
                    _ => {}
                }
            }
            if let (Deployment::Create2(_), Some(factory)) = (step.deployment, factory) {
                deps.insert(factory);
            }
            for dep in deps {
                dependents[dep].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready: BTreeSet<usize> =
            (0..self.steps.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.steps.len() {
            let stuck: Vec<&str> = (0..self.steps.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.steps[i].name.as_str())
                .collect();
            return Err(DeployError::Plan(format!(
                "constructor references form a cycle among: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}

/// ABI-encode the constructor arguments of `step`.
pub fn encode_args(
    step: &DeploymentStep,
    config: &DeploymentConfig,
    deployer: Address,
    source: &impl ArgSource,
) -> Result<Vec<u8>, DeployError> {
    let values = step
        .args
        .iter()
        .map(|arg| {
            let value = match arg {
                Arg::Contract(name) => {
                    let address = source.live_address(name).ok_or_else(|| {
                        DeployError::Plan(format!(
                            "`{}` needs `{name}`, which is not deployed",
                            step.name
                        ))
                    })?;
                    DynSolValue::Address(address)
                }
                Arg::Forward(name) => {
                    let address = source.forward_address(name).ok_or_else(|| {
                        DeployError::Plan(format!(
                            "`{}` needs `{name}`, which is not resolved",
                            step.name
                        ))
                    })?;
                    DynSolValue::Address(address)
                }
                Arg::Multisig => DynSolValue::Address(config.multisig),
                Arg::Weth => DynSolValue::Address(config.weth),
                Arg::Deployer => DynSolValue::Address(deployer),
                Arg::Uint(value) => DynSolValue::Uint(*value, 256),
            };
            Ok(value)
        })
        .collect::<Result<Vec<_>, DeployError>>()?;

    if values.is_empty() {
        return Ok(Vec::new());
    }
    Ok(DynSolValue::Tuple(values).abi_encode_params())
}

/// A read that proves an initialization call is already in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub calldata: Bytes,
    /// ABI-encoded return value meaning "done".
    pub expected: Bytes,
}

/// "Call method M on contract X with these arguments."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCall {
    pub step: String,
    pub target: Address,
    pub calldata: Bytes,
    /// When present and satisfied, the call is skipped.
    pub probe: Option<Probe>,
}

impl InitCall {
    fn new<C: SolCall>(step: impl Into<String>, target: Address, call: C) -> Self {
        Self {
            step: step.into(),
            target,
            calldata: call.abi_encode().into(),
            probe: None,
        }
    }

    fn probed<C: SolCall, P: SolCall, V: SolValue>(
        step: impl Into<String>,
        target: Address,
        call: C,
        probe: P,
        expected: V,
    ) -> Self {
        Self {
            probe: Some(Probe {
                calldata: probe.abi_encode().into(),
                expected: expected.abi_encode().into(),
            }),
            ..Self::new(step, target, call)
        }
    }
}

/// Post-deployment wiring of the protocol, in execution order.
pub fn protocol_init_calls(
    registry: &ContractRegistry,
    config: &DeploymentConfig,
) -> Result<Vec<InitCall>, DeployError> {
    let a = |name: &str| registry.address(name);

    let access_hub = a("accessHub")?;
    let voter = a("voter")?;
    let minter = a("minter")?;
    let shadow = a("shadow")?;
    let x_shadow = a("xShadow")?;
    let vote_module = a("voteModule")?;
    let cl_factory = a("clFactory")?;
    let pair_factory = a("pairFactory")?;

    let mut calls = vec![
        InitCall::new(
            "accessHub.initialize",
            access_hub,
            IAccessHub::initializeCall {
                timelock: config.multisig,
                treasury: config.multisig,
                clGaugeFactory: a("clGaugeFactory")?,
                gaugeFactory: a("gaugeFactory")?,
                feeDistributorFactory: a("feeDistributorFactory")?,
                voter,
                minter,
                launcherPlugin: a("launcherPlugin")?,
                xShadow: x_shadow,
                shadowV3PoolFactory: cl_factory,
                poolFactory: pair_factory,
                feeRecipientFactory: a("feeRecipientFactory")?,
                feeCollector: a("feeCollector")?,
                voteModule: vote_module,
            },
        ),
        InitCall::new(
            "voter.initialize",
            voter,
            IVoter::initializeCall {
                shadow,
                legacyFactory: pair_factory,
                gaugeFactory: a("gaugeFactory")?,
                feeDistributorFactory: a("feeDistributorFactory")?,
                minter,
                governor: config.multisig,
                xShadow: x_shadow,
                clFactory: cl_factory,
                clGaugeFactory: a("clGaugeFactory")?,
                nfpManager: a("nfpManager")?,
                feeRecipientFactory: a("feeRecipientFactory")?,
                voteModule: vote_module,
                launcherPlugin: a("launcherPlugin")?,
            },
        ),
        InitCall::new(
            "voteModule.initialize",
            vote_module,
            IVoteModule::initializeCall {
                xShadow: x_shadow,
                voter,
                accessHub: access_hub,
            },
        ),
        InitCall::new(
            "clFactory.initialize",
            cl_factory,
            IClFactory::initializeCall {
                poolDeployer: a("clPoolDeployer")?,
            },
        ),
        InitCall::probed(
            "minter.kickoff",
            minter,
            IMinter::kickoffCall {
                shadow,
                voter,
                initialSupply: config.initial_supply,
                multisig: config.multisig,
                xShadow: x_shadow,
            },
            IMinter::emissionsTokenCall {},
            shadow,
        ),
        InitCall::probed(
            "minter.setIncentiveGrowth",
            minter,
            IMinter::setIncentiveGrowthCall {
                growth: config.incentive_growth,
            },
            IMinter::incentiveGrowthCall {},
            config.incentive_growth,
        ),
        InitCall::probed(
            "pairFactory.setFeeSetter",
            pair_factory,
            IPairFactory::setFeeSetterCall {
                setter: config.fee_setter,
            },
            IPairFactory::feeSetterCall {},
            config.fee_setter,
        ),
    ];

    for token in &config.whitelist_tokens {
        calls.push(InitCall::probed(
            format!("voter.whitelist({token})"),
            voter,
            IVoter::whitelistCall { token: *token },
            IVoter::isWhitelistedCall { token: *token },
            true,
        ));
    }

    // Last, since the factory cannot be used by the deployer afterwards.
    calls.push(InitCall::probed(
        "contractDeployer.transferOwnership",
        a("contractDeployer")?,
        IContractDeployer::transferOwnershipCall {
            newOwner: config.multisig,
        },
        IContractDeployer::ownerCall {},
        config.multisig,
    ));

    Ok(calls)
}
