//! Two-phase optimae submission.
//!
//! An optimizer first floods a binding commitment (hash of parameters and a
//! nonce), establishing its priority timestamp without disclosing anything.
//! Only after the commitment is in it reveals the parameters; the network
//! checks the hash binding before any quorum work starts. Reveals that miss
//! the window expire; reveals that break the binding are rejected and
//! slashed.
//!
//! Commit ingress is spam-protected: each optimizer gets at most
//! `RATE_LIMIT_MAX_OPTIMAE` submissions per sliding
//! `RATE_LIMIT_WINDOW_SECONDS`, plus a cap on concurrently live
//! commitments.

use chrono::{DateTime, Duration, Utc};
use doin_crypto::{verify_commitment, verify_signature};
use doin_types::{Digest, Optima, OptimaId, OptimaStatus, PeerId, Signature};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Sliding rate-limit window for optimae submissions.
pub const RATE_LIMIT_WINDOW_SECONDS: i64 = 60;
/// Maximum optimae submissions per peer within the window.
pub const RATE_LIMIT_MAX_OPTIMAE: usize = 5;

/// Result of processing a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Accepted,
    Duplicate,
    BadSignature,
    RateLimited,
}

/// Result of processing a reveal.
#[derive(Debug, Clone, PartialEq)]
pub enum RevealOutcome {
    /// Binding verified; the optima moves to REVEALED.
    Accepted(Optima),
    NoCommit,
    /// Binding broken; the optima is terminally REJECTED and the optimizer
    /// slashed.
    HashMismatch(Optima),
    /// The reveal window elapsed; the optima is terminally EXPIRED.
    LateReveal(Optima),
    BadSignature,
}

/// Phase-1 submission.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub optima_id: OptimaId,
    pub domain_id: String,
    pub optimizer_id: PeerId,
    pub commit_hash: Digest,
    pub reported_metric: f64,
    pub timestamp: DateTime<Utc>,
    pub signature: Signature,
}

impl CommitRequest {
    /// Bytes the optimizer signs.
    pub fn signing_bytes(
        optima_id: &OptimaId,
        domain_id: &str,
        commit_hash: &Digest,
        reported_metric: f64,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + domain_id.len() + 32 + 8);
        bytes.extend_from_slice(optima_id.as_bytes());
        bytes.extend_from_slice(domain_id.as_bytes());
        bytes.extend_from_slice(commit_hash.as_bytes());
        bytes.extend_from_slice(&reported_metric.to_be_bytes());
        bytes
    }

    pub fn to_signing_bytes(&self) -> Vec<u8> {
        Self::signing_bytes(
            &self.optima_id,
            &self.domain_id,
            &self.commit_hash,
            self.reported_metric,
        )
    }
}

/// Phase-2 submission.
#[derive(Debug, Clone)]
pub struct RevealRequest {
    pub optima_id: OptimaId,
    pub parameters: Vec<u8>,
    pub nonce: Vec<u8>,
    pub signature: Signature,
}

impl RevealRequest {
    pub fn signing_bytes(optima_id: &OptimaId, parameters: &[u8], nonce: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + 32);
        bytes.extend_from_slice(optima_id.as_bytes());
        bytes.extend_from_slice(doin_crypto::commitment_hash(parameters, nonce).as_bytes());
        bytes
    }

    pub fn to_signing_bytes(&self) -> Vec<u8> {
        Self::signing_bytes(&self.optima_id, &self.parameters, &self.nonce)
    }
}

struct PendingCommit {
    optima: Optima,
    commit_height: u64,
}

/// Tracks live commitments and enforces the reveal window.
pub struct CommitRevealManager {
    pending: HashMap<OptimaId, PendingCommit>,
    seen_hashes: HashMap<Digest, OptimaId>,
    submission_tracker: HashMap<PeerId, Vec<DateTime<Utc>>>,
    window_blocks: u64,
    max_pending_per_peer: usize,
}

impl CommitRevealManager {
    pub fn new(window_blocks: u64, max_pending_per_peer: usize) -> Self {
        Self {
            pending: HashMap::new(),
            seen_hashes: HashMap::new(),
            submission_tracker: HashMap::new(),
            window_blocks,
            max_pending_per_peer,
        }
    }

    pub fn commit(&mut self, request: CommitRequest, current_height: u64) -> CommitOutcome {
        self.commit_at(request, current_height, Utc::now())
    }

    /// As `commit`, with an explicit submission time driving the sliding
    /// rate-limit window.
    pub fn commit_at(
        &mut self,
        request: CommitRequest,
        current_height: u64,
        now: DateTime<Utc>,
    ) -> CommitOutcome {
        if !verify_signature(
            &request.optimizer_id,
            &request.to_signing_bytes(),
            &request.signature,
        ) {
            return CommitOutcome::BadSignature;
        }

        if self.pending.contains_key(&request.optima_id)
            || self.seen_hashes.contains_key(&request.commit_hash)
        {
            return CommitOutcome::Duplicate;
        }

        if !self.check_rate_limit(&request.optimizer_id, now) {
            debug!(
                optimizer = %request.optimizer_id,
                limit = RATE_LIMIT_MAX_OPTIMAE,
                window_seconds = RATE_LIMIT_WINDOW_SECONDS,
                "Commit rate limited: too many submissions in window"
            );
            return CommitOutcome::RateLimited;
        }

        let live = self
            .pending
            .values()
            .filter(|p| p.optima.optimizer_id == request.optimizer_id)
            .count();
        if live >= self.max_pending_per_peer {
            debug!(optimizer = %request.optimizer_id, live, "Commit rate limited: pending cap");
            return CommitOutcome::RateLimited;
        }

        self.submission_tracker
            .entry(request.optimizer_id)
            .or_default()
            .push(now);

        let optima = Optima::new_committed(
            request.optima_id,
            request.domain_id,
            request.optimizer_id,
            request.commit_hash,
            request.reported_metric,
            request.timestamp,
        );
        self.seen_hashes.insert(request.commit_hash, request.optima_id);
        self.pending.insert(
            request.optima_id,
            PendingCommit {
                optima,
                commit_height: current_height,
            },
        );
        CommitOutcome::Accepted
    }

    pub fn reveal(&mut self, request: RevealRequest, current_height: u64) -> RevealOutcome {
        let Some(pending) = self.pending.get(&request.optima_id) else {
            return RevealOutcome::NoCommit;
        };

        if !verify_signature(
            &pending.optima.optimizer_id,
            &request.to_signing_bytes(),
            &request.signature,
        ) {
            return RevealOutcome::BadSignature;
        }

        let commit_height = pending.commit_height;
        if current_height > commit_height + self.window_blocks {
            let mut optima = self.remove(&request.optima_id).expect("pending entry exists");
            optima.status = OptimaStatus::Expired;
            warn!(optima = %optima.id, commit_height, current_height, "Reveal past window");
            return RevealOutcome::LateReveal(optima);
        }

        let mut optima = self.remove(&request.optima_id).expect("pending entry exists");
        if !verify_commitment(&optima.commit_hash, &request.parameters, &request.nonce) {
            optima.status = OptimaStatus::Rejected;
            warn!(optima = %optima.id, "Reveal does not match commitment");
            return RevealOutcome::HashMismatch(optima);
        }

        optima.parameters = Some(request.parameters);
        optima.nonce = Some(request.nonce);
        optima.status = OptimaStatus::Revealed;
        RevealOutcome::Accepted(optima)
    }

    /// Expire commitments whose reveal window has fully elapsed. Returns the
    /// expired optimae for on-chain recording.
    pub fn expire_stale(&mut self, current_height: u64) -> Vec<Optima> {
        let expired_ids: Vec<OptimaId> = self
            .pending
            .iter()
            .filter(|(_, p)| current_height > p.commit_height + self.window_blocks)
            .map(|(id, _)| *id)
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| self.remove(&id))
            .map(|mut optima| {
                optima.status = OptimaStatus::Expired;
                optima
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn commit_height(&self, optima_id: &OptimaId) -> Option<u64> {
        self.pending.get(optima_id).map(|p| p.commit_height)
    }

    /// Per-peer sliding window: entries older than the window are pruned,
    /// and a peer at the submission cap is refused until the window slides.
    fn check_rate_limit(&mut self, peer: &PeerId, now: DateTime<Utc>) -> bool {
        let cutoff = now - Duration::seconds(RATE_LIMIT_WINDOW_SECONDS);
        let timestamps = self.submission_tracker.entry(*peer).or_default();
        timestamps.retain(|t| *t > cutoff);
        timestamps.len() < RATE_LIMIT_MAX_OPTIMAE
    }

    fn remove(&mut self, optima_id: &OptimaId) -> Option<Optima> {
        let pending = self.pending.remove(optima_id)?;
        self.seen_hashes.remove(&pending.optima.commit_hash);
        Some(pending.optima)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_crypto::{commitment_hash, Keypair};

    fn signed_commit(
        keypair: &Keypair,
        optima_id: OptimaId,
        domain_id: &str,
        commit_hash: Digest,
        reported_metric: f64,
    ) -> CommitRequest {
        let signature = keypair.sign(&CommitRequest::signing_bytes(
            &optima_id,
            domain_id,
            &commit_hash,
            reported_metric,
        ));
        CommitRequest {
            optima_id,
            domain_id: domain_id.to_string(),
            optimizer_id: keypair.peer_id(),
            commit_hash,
            reported_metric,
            timestamp: Utc::now(),
            signature,
        }
    }

    fn signed_reveal(
        keypair: &Keypair,
        optima_id: OptimaId,
        parameters: Vec<u8>,
        nonce: Vec<u8>,
    ) -> RevealRequest {
        let signature =
            keypair.sign(&RevealRequest::signing_bytes(&optima_id, &parameters, &nonce));
        RevealRequest {
            optima_id,
            parameters,
            nonce,
            signature,
        }
    }

    #[test]
    fn test_commit_then_matching_reveal() {
        let keypair = Keypair::generate();
        let mut manager = CommitRevealManager::new(8, 4);

        let params = vec![1, 2, 3];
        let nonce = b"nonce".to_vec();
        let commit_hash = commitment_hash(&params, &nonce);
        let optima_id = OptimaId::new();

        let outcome = manager.commit(
            signed_commit(&keypair, optima_id, "quadratic", commit_hash, -100.0),
            5,
        );
        assert_eq!(outcome, CommitOutcome::Accepted);

        match manager.reveal(signed_reveal(&keypair, optima_id, params, nonce), 7) {
            RevealOutcome::Accepted(optima) => {
                assert_eq!(optima.status, OptimaStatus::Revealed);
                assert!(optima.is_revealed());
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_single_bit_change_rejects() {
        let keypair = Keypair::generate();
        let mut manager = CommitRevealManager::new(8, 4);

        let nonce = b"n1".to_vec();
        let commit_hash = commitment_hash(&[1, 2, 3], &nonce);
        let optima_id = OptimaId::new();
        manager.commit(
            signed_commit(&keypair, optima_id, "quadratic", commit_hash, -100.0),
            0,
        );

        // Revealing [1, 2, 4] against a commitment to [1, 2, 3].
        match manager.reveal(signed_reveal(&keypair, optima_id, vec![1, 2, 4], nonce), 1) {
            RevealOutcome::HashMismatch(optima) => {
                assert_eq!(optima.status, OptimaStatus::Rejected);
            }
            other => panic!("expected HashMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_reveal_without_commit() {
        let keypair = Keypair::generate();
        let mut manager = CommitRevealManager::new(8, 4);
        let outcome = manager.reveal(
            signed_reveal(&keypair, OptimaId::new(), vec![1], vec![2]),
            0,
        );
        assert_eq!(outcome, RevealOutcome::NoCommit);
    }

    #[test]
    fn test_late_reveal_expires() {
        let keypair = Keypair::generate();
        let mut manager = CommitRevealManager::new(4, 4);

        let params = vec![1];
        let nonce = vec![2];
        let optima_id = OptimaId::new();
        manager.commit(
            signed_commit(
                &keypair,
                optima_id,
                "quadratic",
                commitment_hash(&params, &nonce),
                -1.0,
            ),
            10,
        );

        match manager.reveal(signed_reveal(&keypair, optima_id, params, nonce), 15) {
            RevealOutcome::LateReveal(optima) => {
                assert_eq!(optima.status, OptimaStatus::Expired);
            }
            other => panic!("expected LateReveal, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_commit_hash() {
        let keypair = Keypair::generate();
        let mut manager = CommitRevealManager::new(8, 4);
        let commit_hash = commitment_hash(&[1], &[2]);

        let first = manager.commit(
            signed_commit(&keypair, OptimaId::new(), "quadratic", commit_hash, -1.0),
            0,
        );
        assert_eq!(first, CommitOutcome::Accepted);

        let second = manager.commit(
            signed_commit(&keypair, OptimaId::new(), "quadratic", commit_hash, -1.0),
            0,
        );
        assert_eq!(second, CommitOutcome::Duplicate);
    }

    #[test]
    fn test_pending_cap_rate_limit() {
        let keypair = Keypair::generate();
        let mut manager = CommitRevealManager::new(8, 2);

        for i in 0..2u8 {
            let outcome = manager.commit(
                signed_commit(
                    &keypair,
                    OptimaId::new(),
                    "quadratic",
                    commitment_hash(&[i], &[0]),
                    -1.0,
                ),
                0,
            );
            assert_eq!(outcome, CommitOutcome::Accepted);
        }

        let outcome = manager.commit(
            signed_commit(
                &keypair,
                OptimaId::new(),
                "quadratic",
                commitment_hash(&[9], &[0]),
                -1.0,
            ),
            0,
        );
        assert_eq!(outcome, CommitOutcome::RateLimited);
    }

    #[test]
    fn test_submission_window_rate_limit() {
        let keypair = Keypair::generate();
        // Pending cap out of the way; only the window limits.
        let mut manager = CommitRevealManager::new(8, 100);
        let now = Utc::now();

        for i in 0..RATE_LIMIT_MAX_OPTIMAE as u8 {
            let outcome = manager.commit_at(
                signed_commit(
                    &keypair,
                    OptimaId::new(),
                    "quadratic",
                    commitment_hash(&[i], &[0]),
                    -1.0,
                ),
                0,
                now,
            );
            assert_eq!(outcome, CommitOutcome::Accepted);
        }

        // One more inside the window is refused.
        let outcome = manager.commit_at(
            signed_commit(
                &keypair,
                OptimaId::new(),
                "quadratic",
                commitment_hash(&[100], &[0]),
                -1.0,
            ),
            0,
            now,
        );
        assert_eq!(outcome, CommitOutcome::RateLimited);

        // The window slides: a minute later submissions flow again.
        let later = now + Duration::seconds(RATE_LIMIT_WINDOW_SECONDS + 1);
        let outcome = manager.commit_at(
            signed_commit(
                &keypair,
                OptimaId::new(),
                "quadratic",
                commitment_hash(&[101], &[0]),
                -1.0,
            ),
            0,
            later,
        );
        assert_eq!(outcome, CommitOutcome::Accepted);
    }

    #[test]
    fn test_window_limits_per_peer_not_globally() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let mut manager = CommitRevealManager::new(8, 100);
        let now = Utc::now();

        for i in 0..RATE_LIMIT_MAX_OPTIMAE as u8 {
            manager.commit_at(
                signed_commit(
                    &alice,
                    OptimaId::new(),
                    "quadratic",
                    commitment_hash(&[i], &[1]),
                    -1.0,
                ),
                0,
                now,
            );
        }

        // Alice is saturated; Bob is untouched.
        let outcome = manager.commit_at(
            signed_commit(
                &bob,
                OptimaId::new(),
                "quadratic",
                commitment_hash(&[200], &[1]),
                -1.0,
            ),
            0,
            now,
        );
        assert_eq!(outcome, CommitOutcome::Accepted);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let keypair = Keypair::generate();
        let other = Keypair::generate();
        let mut manager = CommitRevealManager::new(8, 4);

        let commit_hash = commitment_hash(&[1], &[2]);
        let optima_id = OptimaId::new();
        // Signed by the wrong key.
        let mut request = signed_commit(&other, optima_id, "quadratic", commit_hash, -1.0);
        request.optimizer_id = keypair.peer_id();
        assert_eq!(manager.commit(request, 0), CommitOutcome::BadSignature);
    }

    #[test]
    fn test_expire_stale_sweep() {
        let keypair = Keypair::generate();
        let mut manager = CommitRevealManager::new(2, 4);

        manager.commit(
            signed_commit(
                &keypair,
                OptimaId::new(),
                "quadratic",
                commitment_hash(&[1], &[1]),
                -1.0,
            ),
            0,
        );
        assert!(manager.expire_stale(2).is_empty());
        let expired = manager.expire_stale(3);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, OptimaStatus::Expired);
        assert_eq!(manager.pending_count(), 0);
    }
}
