use crate::canonical::canonical_hash;
use crate::id::{Digest, OptimaId, TaskId};
use crate::keys::PeerId;
use crate::optima::{Optima, RejectReason};
use serde::{Deserialize, Serialize};

/// Role a coin share rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardRole {
    Optimizer,
    Evaluator,
    Generator,
}

/// One recipient's slice of a block's coin distribution, in base units
/// (10^8 base units = 1 DOIN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinShare {
    pub recipient: PeerId,
    pub amount: u64,
    pub role: RewardRole,
}

/// Verification metadata recorded alongside an accepted optima so any node
/// can re-derive the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub optimization_seed: u64,
    pub median_verified: f64,
    pub quorum_size: u32,
}

/// Events logged on-chain. The ordering consensus of these records is the
/// network's decentralized timestamping service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    AcceptedOptima {
        optima: Optima,
        effective_increment: f64,
        reward_fraction: f64,
        experiment_meta: ExperimentMeta,
    },
    RejectedOptima {
        optima_id: OptimaId,
        optimizer_id: PeerId,
        domain_id: String,
        reason: RejectReason,
    },
    CompletedTask {
        task_id: TaskId,
        claimant: PeerId,
        result_hash: Digest,
    },
    ReputationUpdate {
        peer_id: PeerId,
        delta: f64,
    },
    CoinDistribution {
        shares: Vec<CoinShare>,
    },
}

impl Transaction {
    /// Content-derived transaction hash over the canonical encoding.
    pub fn hash(&self) -> Digest {
        canonical_hash(self).expect("transaction serialization is infallible")
    }

    /// Weighted-increment contribution of this transaction (`weight` of the
    /// optima's domain supplied by the caller).
    pub fn effective_increment(&self) -> Option<f64> {
        match self {
            Self::AcceptedOptima {
                effective_increment,
                ..
            } => Some(*effective_increment),
            _ => None,
        }
    }
}
