//! Deterministic quorum selection and vote tallying.
//!
//! Selection is a pure function of (optima, chain tip, eligible set): every
//! node derives the same evaluator committee without any coordination. The
//! optimizer is excluded by the caller when building the eligible set.

use doin_types::{Digest, OptimaId, PeerId};
use std::collections::BTreeMap;
use tracing::debug;

/// `K = clamp(ceil(sqrt(n)), k_min, k_max)`, never more than `n`.
pub fn quorum_size(eligible: usize, k_min: usize, k_max: usize) -> usize {
    let k = (eligible as f64).sqrt().ceil() as usize;
    k.clamp(k_min, k_max).min(eligible)
}

/// Deterministic committee for one optima.
///
/// Candidates are sorted lexicographically by peer id, then shuffled with a
/// Fisher–Yates pass driven by a blake3 XOF keyed by
/// `H(chain_tip_hash || optima_id)`; the first K entries are the quorum.
pub fn select_quorum(
    optima_id: &OptimaId,
    chain_tip_hash: &Digest,
    eligible: &[PeerId],
    k_min: usize,
    k_max: usize,
) -> Vec<PeerId> {
    if eligible.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<PeerId> = eligible.to_vec();
    candidates.sort();
    candidates.dedup();

    let mut seed_input = Vec::with_capacity(48);
    seed_input.extend_from_slice(chain_tip_hash.as_bytes());
    seed_input.extend_from_slice(optima_id.as_bytes());
    let seed = Digest::hash(&seed_input);

    let mut xof = blake3::Hasher::new_keyed(seed.as_bytes()).finalize_xof();
    let mut word = [0u8; 8];
    for i in (1..candidates.len()).rev() {
        xof.fill(&mut word);
        let j = (u64::from_be_bytes(word) % (i as u64 + 1)) as usize;
        candidates.swap(i, j);
    }

    let k = quorum_size(candidates.len(), k_min, k_max);
    candidates.truncate(k);
    debug!(optima = %optima_id, k, "Quorum selected");
    candidates
}

/// Outcome of recording a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    /// All selected evaluators have now voted.
    Complete,
    NotSelected,
    Duplicate,
    AlreadyDecided,
}

/// Decision computed over the received votes.
#[derive(Debug, Clone, PartialEq)]
pub struct TallyDecision {
    /// Votes needed: `ceil(K · quorum_fraction)`.
    pub required_votes: usize,
    pub received_votes: usize,
    pub sufficient: bool,
    pub median_verified: Option<f64>,
}

/// Collects votes for a single optima from its selected quorum.
#[derive(Debug, Clone)]
pub struct QuorumTally {
    optima_id: OptimaId,
    required: Vec<PeerId>,
    votes: BTreeMap<PeerId, f64>,
    decided: bool,
}

impl QuorumTally {
    pub fn new(optima_id: OptimaId, required: Vec<PeerId>) -> Self {
        Self {
            optima_id,
            required,
            votes: BTreeMap::new(),
            decided: false,
        }
    }

    pub fn optima_id(&self) -> &OptimaId {
        &self.optima_id
    }

    pub fn quorum(&self) -> &[PeerId] {
        &self.required
    }

    pub fn is_selected(&self, peer: &PeerId) -> bool {
        self.required.contains(peer)
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn add_vote(&mut self, evaluator: PeerId, measured_metric: f64) -> VoteOutcome {
        if self.decided {
            return VoteOutcome::AlreadyDecided;
        }
        if !self.is_selected(&evaluator) {
            return VoteOutcome::NotSelected;
        }
        if self.votes.contains_key(&evaluator) {
            return VoteOutcome::Duplicate;
        }
        self.votes.insert(evaluator, measured_metric);
        if self.votes.len() == self.required.len() {
            VoteOutcome::Complete
        } else {
            VoteOutcome::Recorded
        }
    }

    /// Selected evaluators that have not voted.
    pub fn missing_voters(&self) -> Vec<PeerId> {
        self.required
            .iter()
            .filter(|p| !self.votes.contains_key(p))
            .copied()
            .collect()
    }

    /// Compute the decision over current votes and freeze the tally.
    pub fn decide(&mut self, quorum_fraction: f64) -> TallyDecision {
        self.decided = true;
        let required_votes = ((self.required.len() as f64) * quorum_fraction).ceil() as usize;
        let received = self.votes.len();

        if received < required_votes || received == 0 {
            return TallyDecision {
                required_votes,
                received_votes: received,
                sufficient: false,
                median_verified: None,
            };
        }

        TallyDecision {
            required_votes,
            received_votes: received,
            sufficient: true,
            median_verified: Some(median(self.votes.values().copied())),
        }
    }

    /// Per-voter alignment against the accepted median: discrepancy in
    /// tolerance units and whether it stays within the band.
    pub fn alignments(&self, median_verified: f64, tolerance: f64) -> Vec<(PeerId, bool, f64)> {
        let tolerance = tolerance.max(f64::EPSILON);
        self.votes
            .iter()
            .map(|(peer, value)| {
                let discrepancy = (value - median_verified).abs() / tolerance;
                let confidence = (1.0 - discrepancy).clamp(0.0, 1.0);
                (*peer, discrepancy <= 1.0, confidence)
            })
            .collect()
    }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("vote metrics are finite"));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}
