//! Block reward distribution.
//!
//! Every block splits its minted reward 65% to optimizers (proportional to
//! `effective_increment × reward_fraction`), 30% to evaluators (uniform over
//! the quorum members of the block's accepted optimae) and 5% to the block
//! generator. Empty pools fall to the generator so nothing is burned.

use crate::emission::block_reward;
use crate::types::DoinAmount;
use doin_types::{CoinShare, PeerId, RewardRole};
use tracing::debug;

pub const OPTIMIZER_POOL_FRACTION: f64 = 0.65;
pub const EVALUATOR_POOL_FRACTION: f64 = 0.30;
pub const GENERATOR_FRACTION: f64 = 0.05;

/// An optimizer's contribution within one block.
#[derive(Debug, Clone)]
pub struct OptimizerWork {
    pub peer_id: PeerId,
    pub effective_increment: f64,
    pub reward_fraction: f64,
}

impl OptimizerWork {
    fn weight(&self) -> f64 {
        (self.effective_increment * self.reward_fraction).max(0.0)
    }
}

/// An evaluator's contribution within one block: quorum votes on optimae
/// that ended up accepted.
#[derive(Debug, Clone)]
pub struct EvaluatorWork {
    pub peer_id: PeerId,
    pub accepted_votes: u64,
}

/// All contributions packaged into a block.
#[derive(Debug, Clone, Default)]
pub struct ContributorWork {
    pub optimizers: Vec<OptimizerWork>,
    pub evaluators: Vec<EvaluatorWork>,
}

/// Distribute the block reward for `block_index` among contributors.
///
/// Returns the coin shares to embed in the block's `CoinDistribution`
/// transaction. The sum of all shares equals the block reward exactly; any
/// rounding remainder goes to the generator.
pub fn distribute_block_reward(
    block_index: u64,
    generator_id: PeerId,
    work: &ContributorWork,
) -> Vec<CoinShare> {
    let total = block_reward(block_index);
    if total.is_zero() {
        return Vec::new();
    }
    let total_units = total.to_base_units();

    let mut shares: Vec<CoinShare> = Vec::new();

    let optimizer_pool = (total_units as f64 * OPTIMIZER_POOL_FRACTION) as u64;
    let evaluator_pool = (total_units as f64 * EVALUATOR_POOL_FRACTION) as u64;

    // Optimizer pool: proportional to effective_increment × reward_fraction.
    let mut distributed: u64 = 0;
    let total_opt_weight: f64 = work.optimizers.iter().map(|o| o.weight()).sum();
    if total_opt_weight > 0.0 {
        for optimizer in &work.optimizers {
            let weight = optimizer.weight();
            if weight <= 0.0 {
                continue;
            }
            let amount = (optimizer_pool as f64 * (weight / total_opt_weight)) as u64;
            if amount > 0 {
                distributed += amount;
                shares.push(CoinShare {
                    recipient: optimizer.peer_id,
                    amount,
                    role: RewardRole::Optimizer,
                });
            }
        }
    }

    // Evaluator pool: uniform over votes on accepted optimae.
    let total_votes: u64 = work.evaluators.iter().map(|e| e.accepted_votes).sum();
    if total_votes > 0 {
        for evaluator in &work.evaluators {
            if evaluator.accepted_votes == 0 {
                continue;
            }
            let amount =
                (evaluator_pool as f64 * (evaluator.accepted_votes as f64 / total_votes as f64))
                    as u64;
            if amount > 0 {
                distributed += amount;
                shares.push(CoinShare {
                    recipient: evaluator.peer_id,
                    amount,
                    role: RewardRole::Evaluator,
                });
            }
        }
    }

    // Generator takes its 5% plus every undistributed remainder.
    let generator_amount = total_units - distributed;
    if generator_amount > 0 {
        shares.push(CoinShare {
            recipient: generator_id,
            amount: generator_amount,
            role: RewardRole::Generator,
        });
    }

    debug!(
        block_index,
        total = %total,
        shares = shares.len(),
        "Block reward distributed"
    );

    shares
}
