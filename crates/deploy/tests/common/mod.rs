//! In-memory ledger for the integration tests.
//!
//! The ledger applies the CREATE and CREATE2 address rules, counts requests and mined
//! transactions, and scripts the handful of contract behaviours the deployment tooling
//! observes: the CREATE2 factory, initializers, the minter, setters and getters, the
//! voter's whitelist and gauges, and ERC-20 balances stored in a real mapping slot.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    sol_types::{Revert, SolCall, SolError, SolEvent, SolValue},
};
use shadow_deploy::{
    Artifacts, DeploymentPlan, DevLedger, Ledger, LedgerError, TOKEN_ARTIFACT, WETH_ARTIFACT,
    cheats::mapping_slot,
    contracts::{
        IAccessHub, IClFactory, IContractDeployer, IERC20, IMinter, IPairFactory, IVoteModule,
        IVoter, IWETH9,
    },
    ledger::{BlockInfo, Log, LogFilter, Receipt, TxRequest, revert_reason},
};

pub const CHAIN_ID: u64 = 31337;

/// Declaration slot of the balances mapping of every scripted token.
pub const BALANCES_SLOT: u64 = 2;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Every artifact the protocol plan and the fixture need.
pub fn artifact_names() -> Vec<String> {
    let mut names: Vec<String> = DeploymentPlan::protocol()
        .steps()
        .iter()
        .map(|step| step.artifact.clone())
        .collect();
    names.push(WETH_ARTIFACT.to_string());
    names.push(TOKEN_ARTIFACT.to_string());
    names
}

/// Stand-in creation bytecode: 32 bytes unique to the artifact name.
pub fn bytecode(name: &str) -> Bytes {
    Bytes::from(keccak256(name.as_bytes()).to_vec())
}

pub fn artifacts() -> Artifacts {
    artifacts_without(&[])
}

pub fn artifacts_without(missing: &[&str]) -> Artifacts {
    Artifacts::from_bytecodes(
        artifact_names()
            .into_iter()
            .filter(|name| !missing.contains(&name.as_str()))
            .map(|name| {
                let code = bytecode(&name);
                (name, code)
            }),
    )
}

#[derive(Debug, Clone, Default)]
struct Contract {
    artifact: String,
    code: Bytes,
    owner: Address,
    initialized: bool,
    /// Address-returning no-argument getters.
    getters: HashMap<String, Address>,
    emissions_token: Address,
    incentive_growth: U256,
    fee_setter: Address,
    whitelisted: HashSet<Address>,
    /// `(gauge, pool, is_cl)`.
    gauges: Vec<(Address, Address, bool)>,
    symbol: String,
    total_supply: U256,
    balance_slot: B256,
}

#[derive(Debug, Clone, Default)]
struct State {
    nonces: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    storage: HashMap<(Address, B256), B256>,
    contracts: HashMap<Address, Contract>,
    receipts: HashMap<B256, Receipt>,
    logs: Vec<Log>,
    block: u64,
    transactions: usize,
    /// `(account, after)`: once `after` transactions are mined, `account` sends one
    /// transaction this ledger does not see.
    outside_transaction: Option<(Address, usize)>,
    /// Leave `contract_address` out of creation receipts.
    omit_contract_address: bool,
}

impl State {
    fn contract(&self, address: Address) -> Result<&Contract, LedgerError> {
        self.contracts
            .get(&address)
            .ok_or_else(|| revert("call to non-contract"))
    }

    fn contract_mut(&mut self, address: Address) -> Result<&mut Contract, LedgerError> {
        self.contracts
            .get_mut(&address)
            .ok_or_else(|| revert("call to non-contract"))
    }

    fn token_balance(&self, token: Address, account: Address) -> U256 {
        let Some(contract) = self.contracts.get(&token) else {
            return U256::ZERO;
        };
        let value = self
            .storage
            .get(&(token, mapping_slot(account, contract.balance_slot)))
            .copied()
            .unwrap_or_default();
        U256::from_be_bytes(value.0)
    }

    /// Apply the pending outside transaction if its turn has come.
    fn interleave(&mut self) {
        if let Some((account, after)) = self.outside_transaction {
            if self.transactions >= after {
                *self.nonces.entry(account).or_default() += 1;
                self.outside_transaction = None;
            }
        }
    }

    fn mint(&mut self, token: Address, account: Address, amount: U256) -> Result<(), LedgerError> {
        let balance = self.token_balance(token, account) + amount;
        let contract = self.contract_mut(token)?;
        contract.total_supply += amount;
        let slot = mapping_slot(account, contract.balance_slot);
        self.storage.insert((token, slot), B256::from(balance));
        Ok(())
    }
}

fn revert(message: &str) -> LedgerError {
    let data = Revert {
        reason: message.to_string(),
    }
    .abi_encode();
    LedgerError::Reverted {
        reason: revert_reason(&data),
    }
}

fn decode<C: SolCall>(data: &[u8]) -> Option<C> {
    if data.len() < 4 || data[..4] != C::SELECTOR {
        return None;
    }
    C::abi_decode(data, true).ok()
}

fn word_address(args: &[u8], index: usize) -> Address {
    args.get(index * 32 + 12..index * 32 + 32)
        .map(Address::from_slice)
        .unwrap_or_default()
}

fn word_uint(args: &[u8], index: usize) -> U256 {
    args.get(index * 32..index * 32 + 32)
        .map(U256::from_be_slice)
        .unwrap_or_default()
}

/// Scripted chain shared by the integration tests.
pub struct FakeLedger {
    state: Mutex<State>,
    /// Creation bytecode to artifact name.
    known_code: HashMap<Bytes, String>,
    requests: AtomicUsize,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            known_code: artifact_names()
                .into_iter()
                .map(|name| (bytecode(&name), name))
                .collect(),
            requests: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn hit(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of ledger requests served so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of mined transactions.
    pub fn transactions(&self) -> usize {
        self.lock().transactions
    }

    pub fn artifact_at(&self, address: Address) -> Option<String> {
        self.lock()
            .contracts
            .get(&address)
            .map(|contract| contract.artifact.clone())
    }

    /// Place a bare contract of `artifact` at `address`.
    pub fn install(&self, address: Address, artifact: &str) {
        self.lock().contracts.insert(
            address,
            Contract {
                artifact: artifact.to_string(),
                code: bytecode(artifact),
                balance_slot: B256::from(U256::from(BALANCES_SLOT)),
                ..Default::default()
            },
        );
    }

    /// Make `contract.name()` return `value`.
    pub fn set_getter(&self, contract: Address, name: &str, value: Address) {
        if let Some(contract) = self.lock().contracts.get_mut(&contract) {
            contract.getters.insert(name.to_string(), value);
        }
    }

    /// Once `after` transactions are mined here, advance `account`'s nonce as if it sent a
    /// transaction elsewhere. With `after == 0` this happens on the next nonce read.
    pub fn send_outside_transaction(&self, account: Address, after: usize) {
        self.lock().outside_transaction = Some((account, after));
    }

    /// Mine creation transactions without reporting the created address.
    pub fn omit_contract_addresses(&self) {
        self.lock().omit_contract_address = true;
    }

    /// Number of contracts with code.
    pub fn contract_count(&self) -> usize {
        self.lock().contracts.len()
    }

    /// Whether the contract at `address` ran an initializer.
    pub fn is_initialized(&self, address: Address) -> bool {
        self.lock()
            .contracts
            .get(&address)
            .is_some_and(|contract| contract.initialized)
    }

    /// Move the balances mapping of `token` to another declaration slot.
    pub fn set_balance_slot(&self, token: Address, slot: u64) {
        if let Some(contract) = self.lock().contracts.get_mut(&token) {
            contract.balance_slot = B256::from(U256::from(slot));
        }
    }

    pub fn add_gauge(&self, voter: Address, gauge: Address, pool: Address, is_cl: bool) {
        if let Some(contract) = self.lock().contracts.get_mut(&voter) {
            contract.gauges.push((gauge, pool, is_cl));
        }
    }

    /// Record a log emitted by `address` at `block`, as its own transaction.
    pub fn push_log(&self, address: Address, event: B256, block: u64) -> B256 {
        let mut state = self.lock();
        let mut preimage = address.to_vec();
        preimage.extend_from_slice(&block.to_be_bytes());
        preimage.extend_from_slice(&state.logs.len().to_be_bytes());
        let tx_hash = keccak256(preimage);
        state.logs.push(Log {
            address,
            topics: vec![event],
            data: Bytes::new(),
            block_number: Some(block),
            transaction_hash: Some(tx_hash),
            log_index: Some(0),
        });
        state.block = state.block.max(block);
        tx_hash
    }

    /// Execute `tx` against `state`. On error `state` may be partially modified; callers
    /// work on a copy.
    fn apply(&self, state: &mut State, tx: &TxRequest) -> Result<Receipt, LedgerError> {
        let nonce = state.nonces.get(&tx.from).copied().unwrap_or_default();
        if !tx.value.is_zero() {
            let balance = state.balances.get(&tx.from).copied().unwrap_or_default();
            if balance < tx.value {
                return Err(revert("insufficient funds"));
            }
            state.balances.insert(tx.from, balance - tx.value);
        }

        let mut logs = Vec::new();
        let contract_address = match tx.to {
            None => {
                let address = tx.from.create(nonce);
                self.create(state, tx.from, address, &tx.data)?;
                Some(address)
            }
            Some(to) => {
                self.transact(state, tx, to, &mut logs)?;
                None
            }
        };

        state.nonces.insert(tx.from, nonce + 1);
        state.block += 1;
        state.transactions += 1;
        let block = state.block;
        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&state.transactions.to_be_bytes());
        let tx_hash = keccak256(preimage);
        for (index, log) in logs.iter_mut().enumerate() {
            log.block_number = Some(block);
            log.transaction_hash = Some(tx_hash);
            log.log_index = Some(index as u64);
        }
        state.logs.extend(logs.iter().cloned());

        let receipt = Receipt {
            transaction_hash: tx_hash,
            status: true,
            contract_address: contract_address.filter(|_| !state.omit_contract_address),
            block_number: block,
            gas_used: 21_000,
            logs,
        };
        state.receipts.insert(tx_hash, receipt.clone());
        Ok(receipt)
    }

    fn create(
        &self,
        state: &mut State,
        sender: Address,
        address: Address,
        init_code: &[u8],
    ) -> Result<(), LedgerError> {
        if state.contracts.contains_key(&address) {
            return Err(revert("address already in use"));
        }
        let code = Bytes::copy_from_slice(init_code.get(..32).ok_or_else(|| revert("unknown bytecode"))?);
        let artifact = self
            .known_code
            .get(&code)
            .cloned()
            .ok_or_else(|| revert("unknown bytecode"))?;
        let args = &init_code[32..];

        let mut contract = Contract {
            artifact: artifact.clone(),
            code,
            balance_slot: B256::from(U256::from(BALANCES_SLOT)),
            ..Default::default()
        };
        let constructor_getters: &[&str] = match artifact.as_str() {
            "Shadow" => &["minter"],
            "Voter" | "ShadowV3Factory" => &["accessHub"],
            "ClGaugeFactory" => &["nfpManager", "voter", "feeCollector"],
            _ => &[],
        };
        for (index, getter) in constructor_getters.iter().enumerate() {
            contract
                .getters
                .insert(getter.to_string(), word_address(args, index));
        }
        match artifact.as_str() {
            "ContractDeployer" => contract.owner = word_address(args, 0),
            "Shadow" => contract.symbol = "SHADOW".to_string(),
            "WETH9" => contract.symbol = "WETH".to_string(),
            "Token" => contract.symbol = "TKN".to_string(),
            _ => {}
        }
        state.contracts.insert(address, contract);

        if artifact == TOKEN_ARTIFACT {
            state.mint(address, sender, word_uint(args, 0))?;
        }
        Ok(())
    }

    fn transact(
        &self,
        state: &mut State,
        tx: &TxRequest,
        to: Address,
        logs: &mut Vec<Log>,
    ) -> Result<(), LedgerError> {
        let data = &tx.data[..];
        let from = tx.from;
        state.contract(to)?;

        if let Some(call) = decode::<IContractDeployer::deployCall>(data) {
            if state.contract(to)?.owner != from {
                return Err(revert("NOT_AUTHORIZED"));
            }
            let salt = B256::from(call.salt);
            let address = to.create2_from_code(salt, &call.bytecode);
            self.create(state, to, address, &call.bytecode)?;
            logs.push(Log {
                address: to,
                topics: vec![IContractDeployer::Deployed::SIGNATURE_HASH, address.into_word()],
                data: call.salt.abi_encode().into(),
                block_number: None,
                transaction_hash: None,
                log_index: None,
            });
        } else if let Some(call) = decode::<IContractDeployer::transferOwnershipCall>(data) {
            let contract = state.contract_mut(to)?;
            if contract.owner != from {
                return Err(revert("NOT_AUTHORIZED"));
            }
            contract.owner = call.newOwner;
        } else if let Some(call) = decode::<IAccessHub::initializeCall>(data) {
            initialize(
                state,
                to,
                &[
                    ("timelock", call.timelock),
                    ("treasury", call.treasury),
                    ("clGaugeFactory", call.clGaugeFactory),
                    ("gaugeFactory", call.gaugeFactory),
                    ("feeDistributorFactory", call.feeDistributorFactory),
                    ("voter", call.voter),
                    ("minter", call.minter),
                    ("launcherPlugin", call.launcherPlugin),
                    ("xShadow", call.xShadow),
                    ("shadowV3PoolFactory", call.shadowV3PoolFactory),
                    ("poolFactory", call.poolFactory),
                    ("feeRecipientFactory", call.feeRecipientFactory),
                    ("feeCollector", call.feeCollector),
                    ("voteModule", call.voteModule),
                ],
            )?;
        } else if let Some(call) = decode::<IVoter::initializeCall>(data) {
            initialize(
                state,
                to,
                &[
                    ("shadow", call.shadow),
                    ("legacyFactory", call.legacyFactory),
                    ("gaugeFactory", call.gaugeFactory),
                    ("feeDistributorFactory", call.feeDistributorFactory),
                    ("minter", call.minter),
                    ("governor", call.governor),
                    ("xShadow", call.xShadow),
                    ("clFactory", call.clFactory),
                    ("clGaugeFactory", call.clGaugeFactory),
                    ("nfpManager", call.nfpManager),
                    ("feeRecipientFactory", call.feeRecipientFactory),
                    ("voteModule", call.voteModule),
                    ("launcherPlugin", call.launcherPlugin),
                ],
            )?;
        } else if let Some(call) = decode::<IVoteModule::initializeCall>(data) {
            initialize(
                state,
                to,
                &[
                    ("xShadow", call.xShadow),
                    ("voter", call.voter),
                    ("accessHub", call.accessHub),
                ],
            )?;
        } else if let Some(call) = decode::<IClFactory::initializeCall>(data) {
            initialize(state, to, &[("shadowV3PoolDeployer", call.poolDeployer)])?;
        } else if let Some(call) = decode::<IMinter::kickoffCall>(data) {
            let minter = state.contract_mut(to)?;
            if !minter.emissions_token.is_zero() {
                return Err(revert("STARTED"));
            }
            minter.emissions_token = call.shadow;
            state.mint(call.shadow, call.multisig, call.initialSupply)?;
        } else if let Some(call) = decode::<IMinter::setIncentiveGrowthCall>(data) {
            state.contract_mut(to)?.incentive_growth = call.growth;
        } else if let Some(call) = decode::<IPairFactory::setFeeSetterCall>(data) {
            state.contract_mut(to)?.fee_setter = call.setter;
        } else if let Some(call) = decode::<IVoter::whitelistCall>(data) {
            if !state.contract_mut(to)?.whitelisted.insert(call.token) {
                return Err(revert("ALREADY_WHITELISTED"));
            }
        } else if decode::<IWETH9::depositCall>(data).is_some() {
            state.mint(to, from, tx.value)?;
        } else {
            return Err(revert("unknown selector"));
        }
        Ok(())
    }

    fn read(&self, state: &State, to: Address, data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let contract = state.contract(to)?;

        let output = if decode::<IContractDeployer::ownerCall>(data).is_some() {
            (contract.owner,).abi_encode_params()
        } else if decode::<IMinter::emissionsTokenCall>(data).is_some() {
            (contract.emissions_token,).abi_encode_params()
        } else if decode::<IMinter::incentiveGrowthCall>(data).is_some() {
            (contract.incentive_growth,).abi_encode_params()
        } else if decode::<IPairFactory::feeSetterCall>(data).is_some() {
            (contract.fee_setter,).abi_encode_params()
        } else if let Some(call) = decode::<IVoter::isWhitelistedCall>(data) {
            (contract.whitelisted.contains(&call.token),).abi_encode_params()
        } else if decode::<IVoter::getAllGaugesCall>(data).is_some() {
            let gauges: Vec<Address> = contract.gauges.iter().map(|(gauge, _, _)| *gauge).collect();
            (gauges,).abi_encode_params()
        } else if let Some(call) = decode::<IVoter::isClGaugeCall>(data) {
            let is_cl = contract
                .gauges
                .iter()
                .any(|(gauge, _, is_cl)| *gauge == call.gauge && *is_cl);
            (is_cl,).abi_encode_params()
        } else if let Some(call) = decode::<IVoter::poolForGaugeCall>(data) {
            let pool = contract
                .gauges
                .iter()
                .find(|(gauge, _, _)| *gauge == call.gauge)
                .map(|(_, pool, _)| *pool)
                .unwrap_or_default();
            (pool,).abi_encode_params()
        } else if let Some(call) = decode::<IVoter::gaugeForPoolCall>(data) {
            let gauge = contract
                .gauges
                .iter()
                .find(|(_, pool, _)| *pool == call.pool)
                .map(|(gauge, _, _)| *gauge)
                .unwrap_or_default();
            (gauge,).abi_encode_params()
        } else if decode::<IERC20::totalSupplyCall>(data).is_some() {
            (contract.total_supply,).abi_encode_params()
        } else if let Some(call) = decode::<IERC20::balanceOfCall>(data) {
            (state.token_balance(to, call.account),).abi_encode_params()
        } else if decode::<IERC20::symbolCall>(data).is_some() {
            (contract.symbol.clone(),).abi_encode_params()
        } else if decode::<IERC20::decimalsCall>(data).is_some() {
            (U256::from(18u8),).abi_encode_params()
        } else if let Some(value) = data.get(..4).and_then(|selector| {
            contract
                .getters
                .iter()
                .find(|(name, _)| keccak256(format!("{name}()").as_bytes())[..4] == *selector)
                .map(|(_, value)| *value)
        }) {
            (value,).abi_encode_params()
        } else {
            return Err(revert("unknown selector"));
        };
        Ok(output)
    }
}

fn initialize(state: &mut State, to: Address, getters: &[(&str, Address)]) -> Result<(), LedgerError> {
    let contract = state.contract_mut(to)?;
    if contract.initialized {
        return Err(revert("Initializable: contract is already initialized"));
    }
    contract.initialized = true;
    contract
        .getters
        .extend(getters.iter().map(|(name, value)| (name.to_string(), *value)));
    Ok(())
}

impl Ledger for FakeLedger {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.hit();
        Ok(CHAIN_ID)
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, LedgerError> {
        self.hit();
        let nonce = {
            let mut state = self.lock();
            let nonce = state.nonces.get(&account).copied().unwrap_or_default();
            state.interleave();
            nonce
        };
        // Let concurrent callers run between reading a nonce and using it.
        tokio::task::yield_now().await;
        Ok(nonce)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<B256, LedgerError> {
        self.hit();
        tokio::task::yield_now().await;
        let mut state = self.lock();
        let mut next = state.clone();
        let receipt = self.apply(&mut next, &tx)?;
        next.interleave();
        *state = next;
        Ok(receipt.transaction_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Receipt, LedgerError> {
        self.hit();
        self.lock()
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| LedgerError::ReceiptTimeout(tx_hash.to_string()))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        self.hit();
        let state = self.lock();
        self.read(&state, to, &data).map(Bytes::from)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, LedgerError> {
        self.hit();
        Ok(self
            .lock()
            .contracts
            .get(&address)
            .map(|contract| contract.code.clone())
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.hit();
        Ok(self.lock().balances.get(&address).copied().unwrap_or_default())
    }

    async fn latest_block(&self) -> Result<BlockInfo, LedgerError> {
        self.hit();
        let number = self.lock().block;
        Ok(BlockInfo {
            number,
            timestamp: 1_700_000_000 + number,
        })
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, LedgerError> {
        self.hit();
        if filter.from_block > filter.to_block {
            return Err(LedgerError::Rpc {
                code: -32602,
                message: "invalid block range".to_string(),
            });
        }
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                block >= filter.from_block && block <= filter.to_block && filter.matches(log)
            })
            .cloned()
            .collect())
    }
}

impl DevLedger for FakeLedger {
    async fn set_balance(&self, account: Address, amount: U256) -> Result<(), LedgerError> {
        self.hit();
        self.lock().balances.insert(account, amount);
        Ok(())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, LedgerError> {
        self.hit();
        Ok(self
            .lock()
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn set_storage_at(&self, address: Address, slot: B256, value: B256) -> Result<(), LedgerError> {
        self.hit();
        self.lock().storage.insert((address, slot), value);
        Ok(())
    }
}
