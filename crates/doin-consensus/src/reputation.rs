use chrono::{DateTime, Utc};
use doin_types::{PeerId, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Base reward for an outcome aligned with the accepted quorum decision.
pub const REWARD_BASE: f64 = 0.3;
/// Maximum confidence bonus on top of the base reward.
pub const MAX_CONFIDENCE_BONUS: f64 = 0.1;
/// Penalty for diverging from the accepted outcome. One dishonest act
/// outweighs many honest ones.
pub const PENALTY_DIVERGENT: f64 = 3.0;
/// Penalty for failing to participate at all (no-show, not divergence).
pub const PENALTY_NO_SHOW: f64 = 0.5;

#[derive(Debug, Clone)]
struct ReputationScore {
    value: f64,
    last_update: DateTime<Utc>,
    optimae_accepted: u64,
    optimae_rejected: u64,
    evaluations_completed: u64,
    evaluations_divergent: u64,
}

impl ReputationScore {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            value: 0.0,
            last_update: now,
            optimae_accepted: 0,
            optimae_rejected: 0,
            evaluations_completed: 0,
            evaluations_divergent: 0,
        }
    }
}

/// Publicly visible reputation statistics for one peer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReputationStats {
    pub score: f64,
    pub optimae_accepted: u64,
    pub optimae_rejected: u64,
    pub evaluations_completed: u64,
    pub evaluations_divergent: u64,
}

/// Earned, decaying, non-transferable per-peer trust score.
///
/// Scores decay exponentially toward zero (half-life ≈ one week) and are
/// floored at zero. All updates are derivable from on-chain events, so any
/// node can rebuild the table from chain history alone.
pub struct ReputationTracker {
    scores: Arc<RwLock<HashMap<PeerId, ReputationScore>>>,
    half_life_seconds: f64,
}

impl ReputationTracker {
    pub fn new(half_life_seconds: f64) -> Self {
        Self {
            scores: Arc::new(RwLock::new(HashMap::new())),
            half_life_seconds,
        }
    }

    /// Current decayed score for a peer.
    pub async fn get_score(&self, peer_id: &PeerId) -> f64 {
        self.score_at(peer_id, Utc::now()).await
    }

    /// Decayed score as of `now`. Exposed so decay is testable without
    /// sleeping.
    pub async fn score_at(&self, peer_id: &PeerId, now: DateTime<Utc>) -> f64 {
        let mut scores = self.scores.write().await;
        match scores.get_mut(peer_id) {
            Some(rep) => {
                Self::apply_decay(rep, now, self.half_life_seconds);
                rep.value
            }
            None => 0.0,
        }
    }

    /// Aligned outcome (accepted optima for an optimizer, or a vote matching
    /// the accepted quorum outcome for an evaluator): +0.3 plus a bonus
    /// scaled by confidence.
    pub async fn record_aligned(&self, peer_id: &PeerId, confidence: f64, is_optimizer: bool) {
        let mut scores = self.scores.write().await;
        let now = Utc::now();
        let rep = scores.entry(*peer_id).or_insert_with(|| ReputationScore::new(now));
        Self::apply_decay(rep, now, self.half_life_seconds);

        let bonus = MAX_CONFIDENCE_BONUS * confidence.clamp(0.0, 1.0);
        rep.value += REWARD_BASE + bonus;
        if is_optimizer {
            rep.optimae_accepted += 1;
        } else {
            rep.evaluations_completed += 1;
        }
        debug!(peer = %peer_id, score = rep.value, bonus, "Reputation reward applied");
    }

    /// Divergence from the accepted outcome (or a slashable offense such as
    /// a hash-mismatch reveal): −3.0, floored at zero.
    pub async fn record_divergent(&self, peer_id: &PeerId, is_optimizer: bool) {
        let mut scores = self.scores.write().await;
        let now = Utc::now();
        let rep = scores.entry(*peer_id).or_insert_with(|| ReputationScore::new(now));
        Self::apply_decay(rep, now, self.half_life_seconds);

        rep.value = (rep.value - PENALTY_DIVERGENT).max(0.0);
        if is_optimizer {
            rep.optimae_rejected += 1;
        } else {
            rep.evaluations_completed += 1;
            rep.evaluations_divergent += 1;
        }
        info!(peer = %peer_id, score = rep.value, "Reputation slashed for divergence");
    }

    /// A selected evaluator that never voted: −0.5. They did not diverge,
    /// only failed to participate.
    pub async fn record_no_show(&self, peer_id: &PeerId) {
        let mut scores = self.scores.write().await;
        let now = Utc::now();
        let rep = scores.entry(*peer_id).or_insert_with(|| ReputationScore::new(now));
        Self::apply_decay(rep, now, self.half_life_seconds);

        rep.value = (rep.value - PENALTY_NO_SHOW).max(0.0);
        debug!(peer = %peer_id, score = rep.value, "Reputation reduced for no-show");
    }

    /// Apply a raw delta (used when replaying `ReputationUpdate`
    /// transactions from the chain).
    pub async fn apply_delta(&self, peer_id: &PeerId, delta: f64) {
        let mut scores = self.scores.write().await;
        let now = Utc::now();
        let rep = scores.entry(*peer_id).or_insert_with(|| ReputationScore::new(now));
        Self::apply_decay(rep, now, self.half_life_seconds);
        rep.value = (rep.value + delta).max(0.0);
    }

    /// Whether the peer may participate in consensus.
    pub async fn meets_threshold(&self, peer_id: &PeerId, min_score: f64) -> bool {
        self.get_score(peer_id).await >= min_score
    }

    /// Filter candidates down to those above the participation threshold.
    pub async fn eligible(&self, candidates: &[PeerId], min_score: f64) -> Vec<PeerId> {
        let mut out = Vec::new();
        for peer in candidates {
            if self.meets_threshold(peer, min_score).await {
                out.push(*peer);
            }
        }
        out
    }

    pub async fn stats(&self, peer_id: &PeerId) -> Option<ReputationStats> {
        let mut scores = self.scores.write().await;
        let now = Utc::now();
        scores.get_mut(peer_id).map(|rep| {
            Self::apply_decay(rep, now, self.half_life_seconds);
            ReputationStats {
                score: rep.value,
                optimae_accepted: rep.optimae_accepted,
                optimae_rejected: rep.optimae_rejected,
                evaluations_completed: rep.evaluations_completed,
                evaluations_divergent: rep.evaluations_divergent,
            }
        })
    }

    /// Set a score directly (tests and genesis bootstrapping).
    pub async fn set_score(&self, peer_id: &PeerId, value: f64) {
        let mut scores = self.scores.write().await;
        let now = Utc::now();
        let rep = scores.entry(*peer_id).or_insert_with(|| ReputationScore::new(now));
        rep.value = value;
        rep.last_update = now;
    }

    /// Rebuild the whole table from chain transaction history.
    pub async fn rebuild_from_chain(&self, transactions: &[Transaction]) {
        {
            let mut scores = self.scores.write().await;
            scores.clear();
        }
        for tx in transactions {
            if let Transaction::ReputationUpdate { peer_id, delta } = tx {
                self.apply_delta(peer_id, *delta).await;
            }
        }
        info!(transactions = transactions.len(), "Reputation rebuilt from chain");
    }

    fn apply_decay(rep: &mut ReputationScore, now: DateTime<Utc>, half_life_seconds: f64) {
        let elapsed = (now - rep.last_update).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 && half_life_seconds > 0.0 {
            rep.value *= 0.5f64.powf(elapsed / half_life_seconds);
            rep.last_update = now;
        }
    }
}
