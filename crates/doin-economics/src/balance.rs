use crate::types::DoinAmount;
use crate::{EconomicsError, Result};
use doin_types::{Block, CoinShare, PeerId, Transaction};
use std::collections::HashMap;
use tracing::info;

/// Per-peer coin balances, fully derivable from chain history.
///
/// The node applies distributions only when their block finalizes, so a
/// reorg above the finalized height never has balance side effects to
/// unwind.
#[derive(Debug, Default)]
pub struct BalanceTracker {
    balances: HashMap<PeerId, DoinAmount>,
    total_minted: DoinAmount,
}

impl BalanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, peer_id: &PeerId) -> DoinAmount {
        self.balances.get(peer_id).copied().unwrap_or(DoinAmount::ZERO)
    }

    pub fn total_minted(&self) -> DoinAmount {
        self.total_minted
    }

    /// Credit one block's coin distribution. Enforces the global supply cap.
    pub fn apply_distribution(&mut self, shares: &[CoinShare]) -> Result<()> {
        let minted: DoinAmount = shares
            .iter()
            .map(|s| DoinAmount::from_base_units(s.amount))
            .sum();

        let after = self.total_minted.saturating_add(minted);
        if after > DoinAmount::MAX_SUPPLY {
            return Err(EconomicsError::SupplyExceeded {
                attempted: after,
                cap: DoinAmount::MAX_SUPPLY,
            });
        }

        for share in shares {
            let entry = self
                .balances
                .entry(share.recipient)
                .or_insert(DoinAmount::ZERO);
            *entry = entry.saturating_add(DoinAmount::from_base_units(share.amount));
        }
        self.total_minted = after;
        Ok(())
    }

    /// Rebuild all balances by replaying coin distributions from the chain.
    pub fn rebuild_from_chain<'a>(&mut self, blocks: impl Iterator<Item = &'a Block>) -> Result<()> {
        self.balances.clear();
        self.total_minted = DoinAmount::ZERO;

        let mut applied = 0usize;
        for block in blocks {
            for tx in &block.transactions {
                if let Transaction::CoinDistribution { shares } = tx {
                    self.apply_distribution(shares)?;
                    applied += 1;
                }
            }
        }
        info!(distributions = applied, total_minted = %self.total_minted, "Balances rebuilt from chain");
        Ok(())
    }

    pub fn top_holders(&self, n: usize) -> Vec<(PeerId, DoinAmount)> {
        let mut holders: Vec<_> = self.balances.iter().map(|(p, a)| (*p, *a)).collect();
        holders.sort_by(|a, b| b.1.cmp(&a.1));
        holders.truncate(n);
        holders
    }
}
