//! Deterministic address resolution.
//!
//! Every function here is pure: addresses are derived from the deployer, the salt (or
//! nonce) and the full init code, without touching the network. The [`AddressBook`]
//! holds the addresses pre-computed for one deployment run.

use std::collections::HashMap;

use alloy_core::primitives::{Address, B256, U256, keccak256};

/// Compute the address a CREATE2 deployment from `deployer` will occupy.
///
/// `init_code` must be the creation bytecode followed by the ABI-encoded constructor
/// arguments: any difference in the arguments yields a different address.
pub fn create2_address(deployer: Address, salt: B256, init_code: &[u8]) -> Address {
    deployer.create2_from_code(salt, init_code)
}

/// Compute the address a plain CREATE from `deployer` at `nonce` will occupy.
pub fn create_address(deployer: Address, nonce: u64) -> Address {
    deployer.create(nonce)
}

/// Turn a numeric salt into the 32-byte word passed on-chain.
pub fn salt_word(salt: u64) -> B256 {
    B256::left_padding_from(&salt.to_be_bytes())
}

/// Compute the address of the AMM pair for `(token_a, token_b)` created by `factory`.
///
/// Tokens are sorted, and the salt is the hash of their packed encoding.
pub fn pair_address(
    factory: Address,
    token_a: Address,
    token_b: Address,
    init_code_hash: B256,
) -> Address {
    let (token0, token1) = sort_tokens(token_a, token_b);
    let mut packed = [0u8; 40];
    packed[..20].copy_from_slice(token0.as_slice());
    packed[20..].copy_from_slice(token1.as_slice());
    factory.create2(keccak256(packed), init_code_hash)
}

/// Order two tokens the way pair factories do.
pub fn sort_tokens(token_a: Address, token_b: Address) -> (Address, Address) {
    if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    }
}

/// Key of a concentrated-liquidity position: `keccak256(owner ‖ index ‖ tickLower ‖ tickUpper)`
/// with the ticks packed as 3-byte signed integers.
pub fn position_hash(owner: Address, index: U256, tick_lower: i32, tick_upper: i32) -> B256 {
    let mut packed = Vec::with_capacity(20 + 32 + 3 + 3);
    packed.extend_from_slice(owner.as_slice());
    packed.extend_from_slice(&index.to_be_bytes::<32>());
    packed.extend_from_slice(&tick_lower.to_be_bytes()[1..]);
    packed.extend_from_slice(&tick_upper.to_be_bytes()[1..]);
    keccak256(packed)
}

/// How a pre-computed address was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Plain CREATE from the deployer account.
    Create { deployer: Address, nonce: u64 },
    /// CREATE2 through a factory contract.
    Create2 {
        factory: Address,
        salt: B256,
        init_code_hash: B256,
    },
}

/// An address computed before the contract exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: Address,
    pub derivation: Derivation,
}

impl ResolvedAddress {
    /// Resolve a CREATE2 deployment.
    pub fn create2(factory: Address, salt: B256, init_code: &[u8]) -> Self {
        Self {
            address: create2_address(factory, salt, init_code),
            derivation: Derivation::Create2 {
                factory,
                salt,
                init_code_hash: keccak256(init_code),
            },
        }
    }

    /// Resolve a plain CREATE deployment.
    pub fn create(deployer: Address, nonce: u64) -> Self {
        Self {
            address: create_address(deployer, nonce),
            derivation: Derivation::Create { deployer, nonce },
        }
    }
}

/// Addresses pre-computed for a single deployment run, keyed by step name.
///
/// Entries can be looked up any number of times (forward references) but are
/// consumed exactly once, when the contract is instantiated.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: HashMap<String, ResolvedAddress>,
    consumed: HashMap<String, ResolvedAddress>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the resolved address of `name`. Returns `false` if `name` was already known.
    pub fn insert(&mut self, name: impl Into<String>, resolved: ResolvedAddress) -> bool {
        let name = name.into();
        if self.entries.contains_key(&name) || self.consumed.contains_key(&name) {
            return false;
        }
        self.entries.insert(name, resolved);
        true
    }

    /// Look up the address of `name`, whether or not it has been consumed yet.
    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.entries
            .get(name)
            .or_else(|| self.consumed.get(name))
            .map(|resolved| resolved.address)
    }

    /// Take the resolved address of `name` for instantiation.
    ///
    /// Returns `None` if `name` was never resolved or has already been consumed.
    pub fn consume(&mut self, name: &str) -> Option<ResolvedAddress> {
        let resolved = self.entries.remove(name)?;
        self.consumed.insert(name.to_string(), resolved);
        Some(resolved)
    }

    /// Number of entries that have not been consumed yet.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Find another entry resolving to `address`, if any.
    pub fn holder_of(&self, address: Address) -> Option<&str> {
        self.entries
            .iter()
            .chain(self.consumed.iter())
            .find(|(_, resolved)| resolved.address == address)
            .map(|(name, _)| name.as_str())
    }
}
