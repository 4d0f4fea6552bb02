//! Coin emission schedule.
//!
//! Block rewards start at 50 DOIN and halve every 210 000 blocks; total
//! supply never exceeds 21 000 000 DOIN. Minting by block generation is the
//! only way coins come into existence.

use crate::types::{DoinAmount, DOIN_BASE_UNIT};

pub const INITIAL_BLOCK_REWARD: DoinAmount = DoinAmount::from_base_units(50 * DOIN_BASE_UNIT);
pub const HALVING_INTERVAL: u64 = 210_000;
pub const MAX_SUPPLY: DoinAmount = DoinAmount::MAX_SUPPLY;

/// Block reward for a given height, after halvings. Zero once the shift
/// exhausts the initial reward.
pub fn block_reward(block_index: u64) -> DoinAmount {
    let halvings = block_index / HALVING_INTERVAL;
    if halvings >= 64 {
        return DoinAmount::ZERO;
    }
    DoinAmount::from_base_units(INITIAL_BLOCK_REWARD.to_base_units() >> halvings)
}

/// Total coins minted through the given height (inclusive), capped at the
/// maximum supply.
pub fn total_supply_at(block_index: u64) -> DoinAmount {
    let mut total: u64 = 0;
    let mut remaining = block_index + 1; // include block 0
    let mut epoch = 0u64;

    while remaining > 0 && epoch < 64 {
        let reward = INITIAL_BLOCK_REWARD.to_base_units() >> epoch;
        if reward == 0 {
            break;
        }
        let blocks_in_epoch = remaining.min(HALVING_INTERVAL);
        total = total.saturating_add(blocks_in_epoch.saturating_mul(reward));
        remaining -= blocks_in_epoch;
        epoch += 1;
    }

    DoinAmount::from_base_units(total.min(MAX_SUPPLY.to_base_units()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halving_schedule() {
        assert_eq!(block_reward(0), DoinAmount::from_doin(50.0));
        assert_eq!(block_reward(209_999), DoinAmount::from_doin(50.0));
        assert_eq!(block_reward(210_000), DoinAmount::from_doin(25.0));
        assert_eq!(block_reward(420_000), DoinAmount::from_doin(12.5));
    }

    #[test]
    fn test_reward_eventually_zero() {
        assert_eq!(block_reward(64 * HALVING_INTERVAL), DoinAmount::ZERO);
    }

    #[test]
    fn test_supply_never_exceeds_cap() {
        assert!(total_supply_at(100) <= MAX_SUPPLY);
        assert!(total_supply_at(100 * HALVING_INTERVAL) <= MAX_SUPPLY);
        assert!(total_supply_at(u64::MAX / 2) <= MAX_SUPPLY);
    }

    #[test]
    fn test_supply_monotone() {
        assert!(total_supply_at(10) < total_supply_at(1000));
    }
}
