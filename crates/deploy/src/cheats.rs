//! Helpers for tests and dev nodes: amounts, balance forcing and balance snapshots.

use alloy_core::primitives::{Address, B256, U256, b256, keccak256};
use anyhow::{Context, Result};
use futures::future::try_join_all;

use crate::{
    contracts::IERC20,
    instantiator::read_call,
    ledger::{DevLedger, Ledger},
};

/// Namespaced storage of OpenZeppelin v5 `ERC20`; its first member is the balances mapping.
pub const OZ_ERC20_STORAGE_SLOT: B256 =
    b256!("52c63247e1f47db19d5ce0460030c497f067ca4cebf71ba98eeadabe20bace00");

/// Number of sequential slots tried after the namespaced one.
pub const MAX_SLOT_PROBES: u64 = 32;

/// `amount` whole units of an 18-decimal token.
pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

/// Parse a decimal string such as `"1.5"` into base units with `decimals` decimals.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256> {
    let amount = amount.trim();
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() && fraction.is_empty() {
        anyhow::bail!("Invalid amount: '{}'", amount);
    }
    if fraction.len() > decimals as usize {
        anyhow::bail!(
            "Invalid amount: '{}' has more than {} decimals",
            amount,
            decimals
        );
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        anyhow::bail!("Invalid amount: '{}' contains non-digit characters", amount);
    }

    let padded = format!("{whole}{fraction:0<width$}", width = decimals as usize);
    let digits = padded.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).with_context(|| format!("Amount out of range: '{amount}'"))
}

/// Storage slot of `mapping[key]` for a Solidity mapping declared at `slot`.
pub fn mapping_slot(key: Address, slot: B256) -> B256 {
    let mut packed = [0u8; 64];
    packed[12..32].copy_from_slice(key.as_slice());
    packed[32..].copy_from_slice(slot.as_slice());
    keccak256(packed)
}

/// Set the native balance of `account` through the dev node.
pub async fn set_native_balance<L: DevLedger>(
    ledger: &L,
    account: Address,
    amount: U256,
) -> Result<()> {
    ledger
        .set_balance(account, amount)
        .await
        .with_context(|| format!("Failed to set native balance of {account}"))?;
    tracing::debug!(account = %account, amount = %amount, "Native balance set");
    Ok(())
}

/// Find the declaration slot of `token`'s balances mapping.
///
/// The token's own balance is bumped by one at each candidate slot and the candidate wins
/// if `balanceOf` observes it. Storage is restored after every probe. Gives up after the
/// namespaced slot and [`MAX_SLOT_PROBES`] sequential slots.
pub async fn find_balance_slot<L: DevLedger>(ledger: &L, token: Address) -> Result<B256> {
    let balance_of = |account: Address| async move {
        read_call(ledger, token, &IERC20::balanceOfCall { account })
            .await
            .map(|ret| ret.balance)
            .with_context(|| format!("Failed to read balanceOf on {token}"))
    };

    let probe_value = balance_of(token).await? + U256::from(1u64);
    let candidates = std::iter::once(OZ_ERC20_STORAGE_SLOT)
        .chain((0..MAX_SLOT_PROBES).map(|slot| B256::from(U256::from(slot))));

    for slot in candidates {
        let index = mapping_slot(token, slot);
        let original = ledger.storage_at(token, index).await?;
        ledger
            .set_storage_at(token, index, B256::from(probe_value))
            .await?;
        let observed = balance_of(token).await;
        ledger.set_storage_at(token, index, original).await?;

        if observed? == probe_value {
            tracing::debug!(token = %token, slot = %slot, "Balance slot found");
            return Ok(slot);
        }
    }

    anyhow::bail!(
        "No balances mapping found for {} after {} probes",
        token,
        MAX_SLOT_PROBES + 1
    )
}

/// Force the ERC-20 balance of `account` by writing the token's storage.
pub async fn set_erc20_balance<L: DevLedger>(
    ledger: &L,
    token: Address,
    account: Address,
    amount: U256,
) -> Result<()> {
    let slot = find_balance_slot(ledger, token).await?;
    ledger
        .set_storage_at(token, mapping_slot(account, slot), B256::from(amount))
        .await
        .with_context(|| format!("Failed to write balance of {account} on {token}"))?;
    tracing::debug!(token = %token, account = %account, amount = %amount, "ERC-20 balance set");
    Ok(())
}

/// A token balance at the time of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub token: Address,
    pub symbol: String,
    pub balance: U256,
}

/// Balances of one account across several tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub account: Address,
    pub balances: Vec<TokenBalance>,
}

impl BalanceSnapshot {
    /// Read symbols and balances of every token concurrently.
    pub async fn capture<L: Ledger>(
        ledger: &L,
        account: Address,
        tokens: &[Address],
    ) -> Result<Self> {
        let balances = try_join_all(tokens.iter().map(|&token| async move {
            let symbol_call = IERC20::symbolCall {};
            let balance_call = IERC20::balanceOfCall { account };
            let (symbol, balance) = futures::try_join!(
                read_call(ledger, token, &symbol_call),
                read_call(ledger, token, &balance_call),
            )
            .with_context(|| format!("Failed to read balance of {account} on {token}"))?;
            Ok::<_, anyhow::Error>(TokenBalance {
                token,
                symbol: symbol.symbol,
                balance: balance.balance,
            })
        }))
        .await?;

        Ok(Self { account, balances })
    }

    pub fn balance_of(&self, token: Address) -> Option<U256> {
        self.balances
            .iter()
            .find(|entry| entry.token == token)
            .map(|entry| entry.balance)
    }

    /// Fail unless every balance grew since this snapshot was taken.
    pub async fn assert_increased<L: Ledger>(&self, ledger: &L) -> Result<()> {
        let tokens: Vec<Address> = self.balances.iter().map(|entry| entry.token).collect();
        let current = Self::capture(ledger, self.account, &tokens).await?;

        for (before, after) in self.balances.iter().zip(&current.balances) {
            if after.balance <= before.balance {
                anyhow::bail!(
                    "{} balance of {} did not increase: {} -> {}",
                    before.symbol,
                    self.account,
                    before.balance,
                    after.balance
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ether() {
        assert_eq!(ether(1), U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(ether(250), U256::from(250_000_000_000_000_000_000u128));
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1", 18).unwrap(), ether(1));
        assert_eq!(
            parse_units("0.7", 18).unwrap(),
            U256::from(700_000_000_000_000_000u128)
        );
        assert_eq!(parse_units("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(parse_units(".5", 1).unwrap(), U256::from(5u64));
        assert_eq!(parse_units("0", 18).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_parse_units_invalid() {
        assert!(parse_units("1.1234567", 6).is_err());
        assert!(parse_units("abc", 18).is_err());
        assert!(parse_units("1e18", 18).is_err());
        assert!(parse_units("", 18).is_err());
        assert!(parse_units(".", 18).is_err());
    }

    #[test]
    fn test_mapping_slot_layout() {
        let key = Address::with_last_byte(0xaa);
        let mut packed = [0u8; 64];
        packed[31] = 0xaa;
        packed[63] = 3;
        assert_eq!(
            mapping_slot(key, B256::from(U256::from(3u64))),
            keccak256(packed)
        );
    }
}
