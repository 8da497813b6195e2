//! Contract instantiation and serialized state-changing calls.

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    sol_types::{SolCall, SolEvent},
};
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, PoisonError},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    artifacts::Artifact,
    contracts::IContractDeployer,
    error::{DeployError, LedgerError},
    ledger::{Ledger, Receipt, TxRequest},
    resolver::{Derivation, ResolvedAddress},
};

/// How a contract was deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentKind {
    Create {
        nonce: u64,
    },
    Create2 {
        factory: Address,
        salt: B256,
        init_code_hash: B256,
    },
}

/// A deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHandle {
    /// Logical name in the registry.
    pub name: String,
    pub address: Address,
    /// Name of the artifact the bytecode came from.
    pub artifact: String,
    pub kind: DeploymentKind,
    /// ABI-encoded constructor arguments.
    pub constructor_args: Bytes,
    /// Deployment transaction. `None` for contracts that were not deployed by this tool.
    pub tx_hash: Option<B256>,
}

/// Nonce lanes by deployer, shared by every [`Instantiator`] in the process.
static NONCE_LANES: LazyLock<std::sync::Mutex<HashMap<Address, Arc<Mutex<()>>>>> =
    LazyLock::new(Default::default);

/// The lane serializing every state-changing operation sent from `deployer`.
fn nonce_lane(deployer: Address) -> Arc<Mutex<()>> {
    NONCE_LANES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(deployer)
        .or_default()
        .clone()
}

/// Deploys contracts and sends transactions on behalf of one deployer.
///
/// Every state-changing operation holds the deployer's nonce lane from submission until
/// its receipt is known. The lane belongs to the deployer, not to the instance, so
/// concurrent callers are totally ordered even through separate instantiators. Reads
/// never take it.
pub struct Instantiator<'a, L> {
    ledger: &'a L,
    deployer: Address,
    nonce_lane: Arc<Mutex<()>>,
}

impl<'a, L: Ledger> Instantiator<'a, L> {
    pub fn new(ledger: &'a L, deployer: Address) -> Self {
        Self {
            ledger,
            deployer,
            nonce_lane: nonce_lane(deployer),
        }
    }

    pub fn ledger(&self) -> &'a L {
        self.ledger
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    /// Deploy `artifact` to the pre-resolved address and check that it landed there.
    ///
    /// CREATE targets are sent from the deployer; CREATE2 targets go through the factory's
    /// `deploy(bytes,uint256)`.
    pub async fn instantiate(
        &self,
        name: &str,
        artifact: &Artifact,
        constructor_args: &[u8],
        target: ResolvedAddress,
    ) -> Result<ContractHandle, DeployError> {
        let init_code = artifact.init_code(constructor_args);

        let (receipt, actual, kind) = match target.derivation {
            Derivation::Create { nonce, .. } => {
                let receipt = self
                    .submit(name, TxRequest::create(self.deployer, init_code))
                    .await?;
                let actual = receipt.contract_address.ok_or_else(|| DeployError::Transaction {
                    step: name.to_string(),
                    reason: "receipt has no contract address".to_string(),
                })?;
                (receipt, actual, DeploymentKind::Create { nonce })
            }
            Derivation::Create2 { factory, salt, .. } => {
                let init_code_hash = keccak256(&init_code);
                let call = IContractDeployer::deployCall {
                    bytecode: init_code.into(),
                    salt: U256::from_be_bytes(salt.0),
                };
                let receipt = self
                    .submit(name, TxRequest::call(self.deployer, factory, call.abi_encode()))
                    .await?;
                let actual = deployed_address(&receipt, factory).ok_or_else(|| {
                    DeployError::Transaction {
                        step: name.to_string(),
                        reason: format!("factory {factory} emitted no Deployed event"),
                    }
                })?;
                let kind = DeploymentKind::Create2 {
                    factory,
                    salt,
                    init_code_hash,
                };
                (receipt, actual, kind)
            }
        };

        if actual != target.address {
            return Err(DeployError::AddressMismatch {
                step: name.to_string(),
                expected: target.address,
                actual,
            });
        }

        tracing::info!(
            step = %name,
            artifact = %artifact.name,
            address = %actual,
            tx = %receipt.transaction_hash,
            "Contract deployed"
        );

        Ok(ContractHandle {
            name: name.to_string(),
            address: actual,
            artifact: artifact.name.clone(),
            kind,
            constructor_args: Bytes::copy_from_slice(constructor_args),
            tx_hash: Some(receipt.transaction_hash),
        })
    }

    /// Deploy `artifact` with plain CREATE at whatever the deployer's next nonce is.
    ///
    /// The nonce is read under the lane, so concurrent calls get consecutive nonces.
    pub async fn deploy(
        &self,
        name: &str,
        artifact: &Artifact,
        constructor_args: &[u8],
    ) -> Result<ContractHandle, DeployError> {
        let _lane = self.nonce_lane.lock().await;

        let nonce = self
            .ledger
            .transaction_count(self.deployer)
            .await
            .map_err(|e| DeployError::from_ledger(name, e))?;
        let expected = self.deployer.create(nonce);

        let tx = TxRequest::create(self.deployer, artifact.init_code(constructor_args));
        let receipt = self.submit_locked(name, tx).await?;
        let actual = receipt.contract_address.ok_or_else(|| DeployError::Transaction {
            step: name.to_string(),
            reason: "receipt has no contract address".to_string(),
        })?;
        if actual != expected {
            return Err(DeployError::AddressMismatch {
                step: name.to_string(),
                expected,
                actual,
            });
        }

        tracing::info!(step = %name, address = %actual, nonce, "Contract deployed");

        Ok(ContractHandle {
            name: name.to_string(),
            address: actual,
            artifact: artifact.name.clone(),
            kind: DeploymentKind::Create { nonce },
            constructor_args: Bytes::copy_from_slice(constructor_args),
            tx_hash: Some(receipt.transaction_hash),
        })
    }

    /// Send a state-changing call to `to` and wait for it to be mined.
    pub async fn execute(
        &self,
        step: &str,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<Receipt, DeployError> {
        self.submit(step, TxRequest::call(self.deployer, to, data).with_value(value))
            .await
    }

    /// Encode `call` and send it to `to`.
    pub async fn send<C: SolCall>(
        &self,
        step: &str,
        to: Address,
        call: &C,
    ) -> Result<Receipt, DeployError> {
        self.execute(step, to, call.abi_encode().into(), U256::ZERO)
            .await
    }

    /// Read-only call, not serialized with transactions.
    pub async fn read<C: SolCall>(&self, to: Address, call: &C) -> Result<C::Return, DeployError> {
        read_call(self.ledger, to, call)
            .await
            .map_err(|e| DeployError::from_ledger(format!("read {}", C::SIGNATURE), e))
    }

    async fn submit(&self, step: &str, tx: TxRequest) -> Result<Receipt, DeployError> {
        let _lane = self.nonce_lane.lock().await;
        self.submit_locked(step, tx).await
    }

    /// Must be called with the nonce lane held.
    async fn submit_locked(&self, step: &str, tx: TxRequest) -> Result<Receipt, DeployError> {
        let receipt = self
            .ledger
            .submit(tx)
            .await
            .map_err(|e| DeployError::from_ledger(step, e))?;

        if !receipt.status {
            return Err(DeployError::Transaction {
                step: step.to_string(),
                reason: format!("transaction {} reverted", receipt.transaction_hash),
            });
        }

        tracing::debug!(
            step = %step,
            tx = %receipt.transaction_hash,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );
        Ok(receipt)
    }
}

/// Perform a read-only call against any ledger and decode its return value.
pub async fn read_call<L: Ledger, C: SolCall>(
    ledger: &L,
    to: Address,
    call: &C,
) -> Result<C::Return, LedgerError> {
    let output = ledger.call(to, call.abi_encode().into()).await?;
    C::abi_decode_returns(&output, true)
        .map_err(|e| LedgerError::Decode(format!("{} on {to}: {e}", C::SIGNATURE)))
}

/// Address reported by the factory's `Deployed` event in `receipt`.
fn deployed_address(receipt: &Receipt, factory: Address) -> Option<Address> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == factory)
        .find(|log| log.topics.first() == Some(&IContractDeployer::Deployed::SIGNATURE_HASH))
        .and_then(|log| log.topics.get(1))
        .map(|topic| Address::from_word(*topic))
}
