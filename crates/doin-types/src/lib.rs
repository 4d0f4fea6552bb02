pub mod block;
pub mod canonical;
pub mod domain;
pub mod error;
pub mod id;
pub mod keys;
pub mod optima;
pub mod task;
pub mod transaction;
pub mod vote;

pub use block::{Block, BlockHeader};
pub use canonical::{canonical_hash, to_canonical_json, CanonicalError};
pub use domain::{Domain, PluginHandles};
pub use error::{DoinError, ErrorKind, Result};
pub use id::{Digest, MessageId, OptimaId, TaskId};
pub use keys::{PeerId, Signature};
pub use optima::{Optima, OptimaStatus, RejectReason};
pub use task::{Task, TaskPayload, TaskState, PRIORITY_INFERENCE, PRIORITY_VERIFICATION};
pub use transaction::{CoinShare, ExperimentMeta, RewardRole, Transaction};
pub use vote::Vote;

/// Protocol parameters shared by every subsystem.
///
/// Mirrors the recognized configuration surface; the `Default` impl carries
/// the network defaults, `test()` lowers windows and quorum sizes so unit
/// tests converge quickly.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DoinParams {
    pub target_block_time_seconds: f64,
    pub initial_threshold: f64,
    pub confirmation_depth: u64,
    pub quorum_min_evaluators: usize,
    pub quorum_max_evaluators: usize,
    pub quorum_fraction: f64,
    pub quorum_tolerance: f64,
    pub commit_reveal_window_blocks: u64,
    pub voting_timeout_blocks: u64,
    pub max_param_bytes: usize,
    pub max_training_seconds: u64,
    pub max_memory_mb: u64,
    pub reputation_half_life_seconds: f64,
    pub min_reputation_for_consensus: f64,
    pub external_anchor_interval_blocks: u64,
    pub epoch_length_blocks: u64,
    pub claim_timeout_seconds: u64,
    pub max_pending_commits_per_peer: usize,
    pub max_block_timestamp_skew_seconds: i64,
    pub max_blocks_per_sync_response: usize,
}

impl Default for DoinParams {
    fn default() -> Self {
        Self {
            target_block_time_seconds: 600.0,
            initial_threshold: 1.0,
            confirmation_depth: 6,
            quorum_min_evaluators: 3,
            quorum_max_evaluators: 10,
            quorum_fraction: 0.67,
            quorum_tolerance: 0.15,
            commit_reveal_window_blocks: 8,
            voting_timeout_blocks: 4,
            max_param_bytes: 1 << 20,
            max_training_seconds: 3600,
            max_memory_mb: 8192,
            reputation_half_life_seconds: 604_800.0,
            min_reputation_for_consensus: 2.0,
            external_anchor_interval_blocks: 100,
            epoch_length_blocks: 100,
            claim_timeout_seconds: 900,
            max_pending_commits_per_peer: 4,
            max_block_timestamp_skew_seconds: 7200,
            max_blocks_per_sync_response: 50,
        }
    }
}

impl DoinParams {
    /// Parameters with lowered windows and quorum sizes for tests.
    pub fn test() -> Self {
        Self {
            target_block_time_seconds: 1.0,
            confirmation_depth: 3,
            quorum_min_evaluators: 1,
            quorum_max_evaluators: 5,
            commit_reveal_window_blocks: 4,
            voting_timeout_blocks: 2,
            epoch_length_blocks: 10,
            claim_timeout_seconds: 5,
            ..Self::default()
        }
    }
}
