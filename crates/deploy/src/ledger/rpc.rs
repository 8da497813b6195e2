//! JSON-RPC implementation of the ledger boundary.

use std::time::Duration;

use alloy_core::{
    primitives::{Address, B256, Bytes, U64, U256},
    sol_types::decode_revert_reason,
};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use super::{
    BlockInfo, DevLedger, Ledger, Log, LogFilter, Receipt, TxRequest,
    signer::{LegacyTx, TxSigner},
};
use crate::error::LedgerError;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of receipt polls before giving up (two minutes).
const DEFAULT_MAX_POLLS: usize = 240;

/// Gas estimates are padded by this percentage.
const GAS_ESTIMATE_MARGIN_PERCENT: u64 = 20;

/// RPC method prefix of the dev-node extensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DevNamespace {
    #[default]
    Anvil,
    Hardhat,
}

/// A [`Ledger`] backed by a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: Url,
    signer: TxSigner,
    dev_namespace: DevNamespace,
    poll_interval: Duration,
    max_polls: usize,
}

impl RpcLedger {
    pub fn new(url: Url, signer: TxSigner) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url,
            signer,
            dev_namespace: DevNamespace::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    pub fn with_dev_namespace(mut self, namespace: DevNamespace) -> Self {
        self.dev_namespace = namespace;
        self
    }

    pub fn with_receipt_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Accounts unlocked on the node.
    pub async fn accounts(&self) -> Result<Vec<Address>, LedgerError> {
        self.rpc("eth_accounts", vec![]).await
    }

    /// The account transactions are sent from: the local key's address, or the node's
    /// first unlocked account.
    pub async fn sender(&self) -> Result<Address, LedgerError> {
        match &self.signer {
            TxSigner::Local(key) => Ok(key.address()),
            TxSigner::NodeManaged => self.accounts().await?.first().copied().ok_or_else(|| {
                LedgerError::Unsupported("node exposes no unlocked account".to_string())
            }),
        }
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, LedgerError> {
        json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, LedgerError> {
        let estimate: U64 = self.rpc("eth_estimateGas", vec![tx_object(tx)]).await?;
        let estimate = estimate.to::<u64>();
        Ok(estimate + estimate * GAS_ESTIMATE_MARGIN_PERCENT / 100)
    }
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Error responses carrying revert data are reported as [`LedgerError::Reverted`] with the
/// decoded reason.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, LedgerError> {
    let response = client
        .post(url)
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| LedgerError::Transport(format!("failed to send {method} request: {e}")))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| LedgerError::Transport(format!("failed to parse {method} response: {e}")))?;

    if let Some(error) = result.get("error") {
        return Err(rpc_error(error));
    }

    let result_value = result
        .get("result")
        .cloned()
        .ok_or_else(|| LedgerError::Decode(format!("no result in {method} response")))?;

    serde_json::from_value(result_value)
        .map_err(|e| LedgerError::Decode(format!("failed to deserialize {method} result: {e}")))
}

/// Classify a JSON-RPC error object.
fn rpc_error(error: &Value) -> LedgerError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    // anvil puts the revert payload in `data`, hardhat in `data.data`.
    let revert_data = error
        .get("data")
        .and_then(|data| data.as_str().or_else(|| data.get("data").and_then(Value::as_str)))
        .and_then(|data| hex::decode(data.trim_start_matches("0x")).ok())
        .filter(|data| !data.is_empty());

    match revert_data {
        Some(data) => LedgerError::Reverted {
            reason: revert_reason(&data),
        },
        None if message.contains("revert") => LedgerError::Reverted { reason: message },
        None => LedgerError::Rpc { code, message },
    }
}

/// Human-readable reason of a revert payload. Custom errors keep their raw selector.
pub fn revert_reason(data: &[u8]) -> String {
    decode_revert_reason(data).unwrap_or_else(|| format!("custom error 0x{}", hex::encode(data)))
}

fn tx_object(tx: &TxRequest) -> Value {
    let mut object = json!({
        "from": tx.from,
        "data": tx.data,
        "value": format!("{:#x}", tx.value),
    });
    if let Some(to) = tx.to {
        object["to"] = json!(to);
    }
    object
}

fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    transaction_hash: Option<B256>,
    log_index: Option<U64>,
}

impl From<RawLog> for Log {
    fn from(raw: RawLog) -> Self {
        Self {
            address: raw.address,
            topics: raw.topics,
            data: raw.data,
            block_number: raw.block_number.map(|n| n.to()),
            transaction_hash: raw.transaction_hash,
            log_index: raw.log_index.map(|n| n.to()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    status: Option<U64>,
    contract_address: Option<Address>,
    block_number: U64,
    gas_used: U64,
    #[serde(default)]
    logs: Vec<RawLog>,
}

impl From<RawReceipt> for Receipt {
    fn from(raw: RawReceipt) -> Self {
        Self {
            transaction_hash: raw.transaction_hash,
            // Pre-byzantium receipts have no status; treat them as successful.
            status: raw.status.is_none_or(|status| status == U64::from(1)),
            contract_address: raw.contract_address,
            block_number: raw.block_number.to(),
            gas_used: raw.gas_used.to(),
            logs: raw.logs.into_iter().map(Log::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    number: U64,
    timestamp: U64,
}

impl Ledger for RpcLedger {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        let chain_id: U64 = self.rpc("eth_chainId", vec![]).await?;
        Ok(chain_id.to())
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, LedgerError> {
        let count: U64 = self
            .rpc("eth_getTransactionCount", vec![json!(account), json!("pending")])
            .await?;
        Ok(count.to())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<B256, LedgerError> {
        // Estimating first surfaces reverts with their reason before anything is sent.
        let gas_limit = self.estimate_gas(&tx).await?;

        match &self.signer {
            TxSigner::NodeManaged => {
                let mut object = tx_object(&tx);
                object["gas"] = json!(quantity(gas_limit));
                self.rpc("eth_sendTransaction", vec![object]).await
            }
            TxSigner::Local(key) => {
                let chain_id = self.chain_id().await?;
                let nonce = self.transaction_count(key.address()).await?;
                let gas_price: U256 = self.rpc("eth_gasPrice", vec![]).await?;
                let raw = key.sign_legacy(&LegacyTx {
                    chain_id,
                    nonce,
                    gas_price,
                    gas_limit,
                    to: tx.to,
                    value: tx.value,
                    data: tx.data,
                })?;
                self.rpc("eth_sendRawTransaction", vec![json!(raw)]).await
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Receipt, LedgerError> {
        let fetch = || async {
            let receipt: Option<RawReceipt> = self
                .rpc("eth_getTransactionReceipt", vec![json!(tx_hash)])
                .await?;
            receipt.ok_or_else(|| LedgerError::ReceiptTimeout(tx_hash.to_string()))
        };

        let receipt = fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(self.max_polls),
            )
            .when(|e| matches!(e, LedgerError::ReceiptTimeout(_)))
            .await?;

        tracing::debug!(tx = %tx_hash, block = %receipt.block_number, "Transaction mined");
        Ok(receipt.into())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        self.rpc(
            "eth_call",
            vec![json!({ "to": to, "data": data }), json!("latest")],
        )
        .await
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, LedgerError> {
        self.rpc("eth_getCode", vec![json!(address), json!("latest")])
            .await
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.rpc("eth_getBalance", vec![json!(address), json!("latest")])
            .await
    }

    async fn latest_block(&self) -> Result<BlockInfo, LedgerError> {
        let block: RawBlock = self
            .rpc("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        Ok(BlockInfo {
            number: block.number.to(),
            timestamp: block.timestamp.to(),
        })
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, LedgerError> {
        let logs: Vec<RawLog> = self
            .rpc(
                "eth_getLogs",
                vec![json!({
                    "address": filter.addresses,
                    "topics": filter.topics,
                    "fromBlock": quantity(filter.from_block),
                    "toBlock": quantity(filter.to_block),
                })],
            )
            .await?;
        Ok(logs.into_iter().map(Log::from).collect())
    }
}

impl DevLedger for RpcLedger {
    async fn set_balance(&self, account: Address, amount: U256) -> Result<(), LedgerError> {
        let method = format!("{}_setBalance", self.dev_namespace);
        let _: Value = self
            .rpc(&method, vec![json!(account), json!(format!("{amount:#x}"))])
            .await?;
        Ok(())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, LedgerError> {
        self.rpc(
            "eth_getStorageAt",
            vec![json!(address), json!(slot_quantity(slot)), json!("latest")],
        )
        .await
    }

    async fn set_storage_at(
        &self,
        address: Address,
        slot: B256,
        value: B256,
    ) -> Result<(), LedgerError> {
        let method = format!("{}_setStorageAt", self.dev_namespace);
        let _: Value = self
            .rpc(
                &method,
                vec![json!(address), json!(slot_quantity(slot)), json!(value)],
            )
            .await?;
        Ok(())
    }
}

/// Storage slots are sent as quantities: hardhat rejects leading zeros.
fn slot_quantity(slot: B256) -> String {
    format!("{:#x}", U256::from_be_bytes(slot.0))
}
