pub mod balance;
pub mod emission;
pub mod rewards;
pub mod types;

pub use balance::BalanceTracker;
pub use emission::{block_reward, total_supply_at, HALVING_INTERVAL, MAX_SUPPLY};
pub use rewards::{distribute_block_reward, ContributorWork, EvaluatorWork, OptimizerWork};
pub use types::DoinAmount;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EconomicsError {
    #[error("Supply cap exceeded: minting {attempted} would pass {cap}")]
    SupplyExceeded {
        attempted: DoinAmount,
        cap: DoinAmount,
    },

    #[error("Insufficient balance: {available} < {required}")]
    InsufficientBalance {
        available: DoinAmount,
        required: DoinAmount,
    },
}

pub type Result<T> = std::result::Result<T, EconomicsError>;
