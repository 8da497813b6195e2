//! The ledger boundary.
//!
//! Everything the deployment tooling needs from a chain goes through [`Ledger`]: submit a
//! transaction, await its receipt, read contract state. Dev nodes additionally expose
//! [`DevLedger`] for balance and storage manipulation.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};

use crate::error::LedgerError;

mod rpc;
mod signer;

pub use rpc::{DevNamespace, RpcLedger, json_rpc_call, revert_reason};
pub use signer::{DEV_MNEMONIC, LegacyTx, LocalKey, TxSigner};

/// A transaction to submit. `to == None` creates a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

impl TxRequest {
    /// A call to an existing contract.
    pub fn call(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from,
            to: Some(to),
            data: data.into(),
            value: U256::ZERO,
        }
    }

    /// A plain CREATE deployment.
    pub fn create(from: Address, init_code: impl Into<Bytes>) -> Self {
        Self {
            from,
            to: None,
            data: init_code.into(),
            value: U256::ZERO,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// An event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// The outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    /// `true` if the transaction succeeded.
    pub status: bool,
    pub contract_address: Option<Address>,
    pub block_number: u64,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Block header fields the tooling cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

/// Filter for [`Ledger::logs`]. An empty address list matches every emitter; a `None`
/// topic matches anything in that position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topics: Vec<Option<B256>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..Default::default()
        }
    }

    pub fn address(mut self, address: Address) -> Self {
        self.addresses.push(address);
        self
    }

    pub fn event(mut self, signature_hash: B256) -> Self {
        if self.topics.is_empty() {
            self.topics.push(Some(signature_hash));
        } else {
            self.topics[0] = Some(signature_hash);
        }
        self
    }

    /// Whether `log` satisfies this filter, ignoring the block range.
    pub fn matches(&self, log: &Log) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, topic)| match topic {
            Some(expected) => log.topics.get(i) == Some(expected),
            None => true,
        })
    }
}

/// Narrow capability over a chain.
pub trait Ledger: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Pending transaction count of `account`.
    fn transaction_count(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Submit a transaction and return its hash without waiting for it to be mined.
    fn send_transaction(
        &self,
        tx: TxRequest,
    ) -> impl Future<Output = Result<B256, LedgerError>> + Send;

    fn wait_for_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;

    /// Execute a read-only call against the latest block.
    fn call(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<Bytes, LedgerError>> + Send;

    fn code_at(&self, address: Address)
    -> impl Future<Output = Result<Bytes, LedgerError>> + Send;

    fn balance(&self, address: Address)
    -> impl Future<Output = Result<U256, LedgerError>> + Send;

    fn latest_block(&self) -> impl Future<Output = Result<BlockInfo, LedgerError>> + Send;

    fn logs(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<Vec<Log>, LedgerError>> + Send;

    /// Submit a transaction and wait for its receipt.
    fn submit(&self, tx: TxRequest) -> impl Future<Output = Result<Receipt, LedgerError>> + Send {
        async move {
            let tx_hash = self.send_transaction(tx).await?;
            self.wait_for_receipt(tx_hash).await
        }
    }
}

/// Extra capabilities of development nodes (anvil, hardhat).
pub trait DevLedger: Ledger {
    fn set_balance(
        &self,
        account: Address,
        amount: U256,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> impl Future<Output = Result<B256, LedgerError>> + Send;

    fn set_storage_at(
        &self,
        address: Address,
        slot: B256,
        value: B256,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}
