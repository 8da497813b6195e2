//! Local transaction signing.

use alloy_core::{
    primitives::{Address, Bytes, U256, keccak256},
    rlp::{EMPTY_STRING_CODE, Encodable, Header},
};
use alloy_signer_local::{MnemonicBuilder, coins_bip39::English};
use k256::ecdsa::SigningKey;

use crate::error::LedgerError;

/// Mnemonic used by anvil and hardhat for their default dev accounts.
pub const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Who signs the transactions sent through an [`super::RpcLedger`].
#[derive(Clone)]
pub enum TxSigner {
    /// The node signs with one of its unlocked accounts (`eth_sendTransaction`).
    NodeManaged,
    /// Transactions are signed here and sent raw (`eth_sendRawTransaction`).
    Local(LocalKey),
}

impl std::fmt::Debug for TxSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeManaged => write!(f, "NodeManaged"),
            Self::Local(key) => write!(f, "Local({})", key.address()),
        }
    }
}

/// A secp256k1 key with its derived account address.
#[derive(Clone)]
pub struct LocalKey {
    signing_key: SigningKey,
    address: Address,
}

impl LocalKey {
    /// Parse a hex-encoded private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> Result<Self, LedgerError> {
        let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|e| LedgerError::Unsupported(format!("invalid private key hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(LedgerError::Unsupported(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| LedgerError::Unsupported(format!("invalid secp256k1 private key: {e}")))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Derive the `index`-th account of a BIP-39 mnemonic (`m/44'/60'/0'/0/index`).
    pub fn from_mnemonic(phrase: &str, index: u32) -> Result<Self, LedgerError> {
        let signer = MnemonicBuilder::<English>::default()
            .phrase(phrase)
            .index(index)
            .and_then(|builder| builder.build())
            .map_err(|e| LedgerError::Unsupported(format!("invalid mnemonic: {e}")))?;
        let signing_key = SigningKey::from_slice(&signer.credential().to_bytes())
            .map_err(|e| LedgerError::Unsupported(format!("invalid derived key: {e}")))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// The `index`-th default account of anvil/hardhat.
    pub fn dev_account(index: u32) -> Result<Self, LedgerError> {
        Self::from_mnemonic(DEV_MNEMONIC, index)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        // Uncompressed point without the 0x04 marker.
        let public_key = signing_key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&public_key.as_bytes()[1..]);
        let address = Address::from_slice(&hash[12..]);
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a legacy (EIP-155) transaction and return its raw encoding.
    pub fn sign_legacy(&self, tx: &LegacyTx) -> Result<Bytes, LedgerError> {
        let sighash = keccak256(tx.encode(None));
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(sighash.as_slice())
            .map_err(|e| LedgerError::Unsupported(format!("failed to sign transaction: {e}")))?;

        let v = recovery_id.to_byte() as u64 + 35 + 2 * tx.chain_id;
        let r = U256::from_be_slice(&signature.r().to_bytes());
        let s = U256::from_be_slice(&signature.s().to_bytes());
        Ok(tx.encode(Some((v, r, s))).into())
    }
}

/// Fields of a legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl LegacyTx {
    /// RLP encoding; without a signature this is the EIP-155 signing payload.
    fn encode(&self, signature: Option<(u64, U256, U256)>) -> Vec<u8> {
        let mut payload = Vec::new();
        self.nonce.encode(&mut payload);
        self.gas_price.encode(&mut payload);
        self.gas_limit.encode(&mut payload);
        match self.to {
            Some(to) => to.encode(&mut payload),
            None => payload.push(EMPTY_STRING_CODE),
        }
        self.value.encode(&mut payload);
        self.data.encode(&mut payload);
        match signature {
            Some((v, r, s)) => {
                v.encode(&mut payload);
                r.encode(&mut payload);
                s.encode(&mut payload);
            }
            None => {
                self.chain_id.encode(&mut payload);
                0u8.encode(&mut payload);
                0u8.encode(&mut payload);
            }
        }

        let mut out = Vec::with_capacity(payload.len() + 9);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }
}
