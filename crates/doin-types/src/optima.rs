use crate::id::{Digest, OptimaId};
use crate::keys::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an optima. Terminal states are immutable and are recorded in
/// exactly one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimaStatus {
    Committed,
    Revealed,
    Accepted,
    Rejected,
    Expired,
}

impl OptimaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired)
    }
}

/// Machine-readable rejection reason recorded on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    HashMismatch,
    InsufficientQuorum,
    MetricDiscrepancy,
    BoundsExceeded,
    SeedMismatch,
    Expired,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HashMismatch => "hash_mismatch",
            Self::InsufficientQuorum => "insufficient_quorum",
            Self::MetricDiscrepancy => "metric_discrepancy",
            Self::BoundsExceeded => "bounds_exceeded",
            Self::SeedMismatch => "seed_mismatch",
            Self::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// A unit of optimization work moving through commit → reveal → decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optima {
    pub id: OptimaId,
    pub domain_id: String,
    pub optimizer_id: PeerId,
    /// Binding commitment: `H(canonical(parameters) || nonce)`.
    pub commit_hash: Digest,
    pub reported_metric: f64,
    /// Commit timestamp; the priority timestamp for disputes.
    pub timestamp: DateTime<Utc>,
    /// Opaque parameter bytes, present after reveal.
    #[serde(default)]
    pub parameters: Option<Vec<u8>>,
    /// Random nonce binding the commitment, present after reveal.
    #[serde(default)]
    pub nonce: Option<Vec<u8>>,
    pub status: OptimaStatus,
}

impl Optima {
    pub fn new_committed(
        id: OptimaId,
        domain_id: String,
        optimizer_id: PeerId,
        commit_hash: Digest,
        reported_metric: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            domain_id,
            optimizer_id,
            commit_hash,
            reported_metric,
            timestamp,
            parameters: None,
            nonce: None,
            status: OptimaStatus::Committed,
        }
    }

    pub fn is_revealed(&self) -> bool {
        self.parameters.is_some() && self.nonce.is_some()
    }
}
