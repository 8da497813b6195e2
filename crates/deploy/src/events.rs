//! Historical liquidity events of concentrated-liquidity pools.

use std::fmt;

use alloy_core::{
    primitives::{Address, B256},
    sol_types::SolEvent,
};
use anyhow::{Context, Result};
use futures::future::try_join_all;

use crate::{
    contracts::{IClPool, IVoter},
    instantiator::read_call,
    ledger::{Ledger, Log, LogFilter},
};

/// Default number of blocks scanned for the first swap.
pub const DEFAULT_WINDOW: u64 = 10_000;

/// Where an event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRef {
    pub block_number: u64,
    pub tx_hash: Option<B256>,
}

/// First swap of a pool in the window, and the first mint and burn before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolActivity {
    pub pool: Address,
    pub gauge: Address,
    pub first_swap: Option<EventRef>,
    pub first_mint: Option<EventRef>,
    pub first_burn: Option<EventRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MintBurnReport {
    pub start_block: u64,
    pub pools: Vec<PoolActivity>,
}

impl MintBurnReport {
    /// Pools without any swap in the window.
    pub fn missing_swaps(&self) -> impl Iterator<Item = Address> + '_ {
        self.pools
            .iter()
            .filter(|activity| activity.first_swap.is_none())
            .map(|activity| activity.pool)
    }
}

impl fmt::Display for MintBurnReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for activity in &self.pools {
            if activity.first_mint.is_none() && activity.first_burn.is_none() {
                continue;
            }
            writeln!(f, "pool: {}", activity.pool)?;
            writeln!(f, "gauge: {}", activity.gauge)?;
            match activity.first_swap {
                Some(swap) => {
                    writeln!(f, "swapBlock: {}", swap.block_number)?;
                    writeln!(f, "swapHash: {}", display_hash(swap.tx_hash))?;
                }
                None => writeln!(f, "swapBlock: none")?,
            }
            if let Some(mint) = activity.first_mint {
                writeln!(f, "mintBlock: {}", mint.block_number)?;
                writeln!(f, "mintHash: {}", display_hash(mint.tx_hash))?;
            }
            if let Some(burn) = activity.first_burn {
                writeln!(f, "burnBlock: {}", burn.block_number)?;
                writeln!(f, "burnHash: {}", display_hash(burn.tx_hash))?;
            }
        }
        for pool in self.missing_swaps() {
            writeln!(f, "missing swap {}", pool)?;
        }
        Ok(())
    }
}

fn display_hash(hash: Option<B256>) -> String {
    hash.map(|h| h.to_string()).unwrap_or_else(|| "none".to_string())
}

/// For every concentrated-liquidity gauge registered on `voter`, find the first swap of
/// its pool within `[start_block, start_block + window]` and the first mint and burn from
/// `start_block` up to that swap. The window never extends past the latest block.
pub async fn gather_mint_burns<L: Ledger>(
    ledger: &L,
    voter: Address,
    start_block: u64,
    window: u64,
) -> Result<MintBurnReport> {
    let gauges = read_call(ledger, voter, &IVoter::getAllGaugesCall {})
        .await
        .context("Failed to list gauges")?
        .gauges;

    let cl_gauges = try_join_all(gauges.into_iter().map(|gauge| async move {
        let is_cl = read_call(ledger, voter, &IVoter::isClGaugeCall { gauge })
            .await?
            .isCl;
        if !is_cl {
            return Ok(None);
        }
        let pool = read_call(ledger, voter, &IVoter::poolForGaugeCall { gauge })
            .await?
            .pool;
        Ok::<_, crate::error::LedgerError>(Some((gauge, pool)))
    }))
    .await
    .context("Failed to map gauges to pools")?;

    let head = ledger
        .latest_block()
        .await
        .context("Failed to read the latest block")?
        .number;
    if start_block > head {
        tracing::warn!(start_block, head, "Start block is past the latest block");
        return Ok(MintBurnReport {
            start_block,
            pools: Vec::new(),
        });
    }
    let window_end = start_block.saturating_add(window).min(head);
    let pools = try_join_all(cl_gauges.into_iter().flatten().map(|(gauge, pool)| async move {
        let swap_filter = LogFilter::new(start_block, window_end)
            .address(pool)
            .event(IClPool::Swap::SIGNATURE_HASH);
        let first_swap = earliest(&ledger.logs(&swap_filter).await?);
        let until = first_swap.map_or(window_end, |swap| swap.block_number);

        let mint_filter = LogFilter::new(start_block, until)
            .address(pool)
            .event(IClPool::Mint::SIGNATURE_HASH);
        let burn_filter = LogFilter::new(start_block, until)
            .address(pool)
            .event(IClPool::Burn::SIGNATURE_HASH);
        let (mints, burns) =
            futures::try_join!(ledger.logs(&mint_filter), ledger.logs(&burn_filter))?;

        Ok::<_, crate::error::LedgerError>(PoolActivity {
            pool,
            gauge,
            first_swap,
            first_mint: earliest(&mints),
            first_burn: earliest(&burns),
        })
    }))
    .await
    .context("Failed to fetch pool logs")?;

    tracing::info!(
        voter = %voter,
        start_block,
        pools = pools.len(),
        "Mint and burn events gathered"
    );
    Ok(MintBurnReport { start_block, pools })
}

/// Earliest log by block, then by position in the block.
fn earliest(logs: &[Log]) -> Option<EventRef> {
    logs.iter()
        .min_by_key(|log| {
            (
                log.block_number.unwrap_or(u64::MAX),
                log.log_index.unwrap_or(u64::MAX),
            )
        })
        .map(|log| EventRef {
            block_number: log.block_number.unwrap_or_default(),
            tx_hash: log.transaction_hash,
        })
}
