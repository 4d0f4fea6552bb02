//! Optimae lifecycle coordination.
//!
//! Tracks each revealed optima through its voting window and turns a
//! completed (or timed-out) tally into a decision: the terminal optima
//! status, the incentive outcome, and the per-evaluator alignment data the
//! node converts into reputation and coin transactions.

use doin_consensus::{
    evaluate_incentive, IncentiveOutcome, QuorumTally, TallyDecision, VoteOutcome,
};
use doin_types::{Digest, Domain, Optima, OptimaId, OptimaStatus, PeerId, RejectReason};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug)]
struct VotingState {
    optima: Optima,
    tally: QuorumTally,
    tip_at_selection: Digest,
    deadline_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Accepted,
    Rejected(RejectReason),
}

/// Everything the node needs to record a decision on-chain.
#[derive(Debug)]
pub struct Decision {
    pub optima: Optima,
    pub kind: DecisionKind,
    /// Present only for sufficient quorums.
    pub incentive: Option<IncentiveOutcome>,
    pub median_verified: Option<f64>,
    /// (voter, aligned-with-median, confidence).
    pub alignments: Vec<(PeerId, bool, f64)>,
    pub no_shows: Vec<PeerId>,
    pub quorum_size: usize,
    pub tip_at_selection: Digest,
}

pub struct Coordinator {
    quorum_fraction: f64,
    voting_timeout_blocks: u64,
    voting: HashMap<OptimaId, VotingState>,
}

impl Coordinator {
    pub fn new(quorum_fraction: f64, voting_timeout_blocks: u64) -> Self {
        Self {
            quorum_fraction,
            voting_timeout_blocks,
            voting: HashMap::new(),
        }
    }

    /// Open the voting window for a revealed optima.
    pub fn start_voting(
        &mut self,
        optima: Optima,
        quorum: Vec<PeerId>,
        tip_at_selection: Digest,
        current_height: u64,
    ) {
        let optima_id = optima.id;
        let tally = QuorumTally::new(optima_id, quorum);
        info!(
            optima = %optima_id,
            quorum = tally.quorum().len(),
            deadline = current_height + self.voting_timeout_blocks,
            "Voting opened"
        );
        self.voting.insert(
            optima_id,
            VotingState {
                optima,
                tally,
                tip_at_selection,
                deadline_height: current_height + self.voting_timeout_blocks,
            },
        );
    }

    pub fn is_voting(&self, optima_id: &OptimaId) -> bool {
        self.voting.contains_key(optima_id)
    }

    pub fn quorum_of(&self, optima_id: &OptimaId) -> Option<Vec<PeerId>> {
        self.voting
            .get(optima_id)
            .map(|s| s.tally.quorum().to_vec())
    }

    pub fn tip_at_selection(&self, optima_id: &OptimaId) -> Option<Digest> {
        self.voting.get(optima_id).map(|s| s.tip_at_selection)
    }

    pub fn domain_id_of(&self, optima_id: &OptimaId) -> Option<String> {
        self.voting
            .get(optima_id)
            .map(|s| s.optima.domain_id.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.voting.len()
    }

    /// Record a vote. `Complete` means the node should decide now.
    pub fn on_vote(
        &mut self,
        optima_id: &OptimaId,
        evaluator: PeerId,
        measured_metric: f64,
    ) -> VoteOutcome {
        match self.voting.get_mut(optima_id) {
            Some(state) => {
                let outcome = state.tally.add_vote(evaluator, measured_metric);
                debug!(optima = %optima_id, evaluator = %evaluator, ?outcome, "Vote received");
                outcome
            }
            None => VoteOutcome::AlreadyDecided,
        }
    }

    /// Optimae whose voting window elapsed at this height.
    pub fn expired_at(&self, current_height: u64) -> Vec<OptimaId> {
        self.voting
            .iter()
            .filter(|(_, s)| current_height >= s.deadline_height)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Close the window and compute the decision.
    pub fn decide(
        &mut self,
        optima_id: &OptimaId,
        domain: &Domain,
        running_best: Option<f64>,
    ) -> Option<Decision> {
        let mut state = self.voting.remove(optima_id)?;
        let quorum_size = state.tally.quorum().len();
        let no_shows = state.tally.missing_voters();
        let TallyDecision {
            sufficient,
            median_verified,
            received_votes,
            required_votes,
        } = state.tally.decide(self.quorum_fraction);

        if !sufficient {
            info!(
                optima = %optima_id,
                received = received_votes,
                required = required_votes,
                "Rejected: insufficient quorum"
            );
            state.optima.status = OptimaStatus::Rejected;
            return Some(Decision {
                optima: state.optima,
                kind: DecisionKind::Rejected(RejectReason::InsufficientQuorum),
                incentive: None,
                median_verified: None,
                alignments: Vec::new(),
                no_shows,
                quorum_size,
                tip_at_selection: state.tip_at_selection,
            });
        }

        let median = median_verified.expect("sufficient tally has a median");
        let alignments = state.tally.alignments(median, domain.tolerance);
        let incentive =
            evaluate_incentive(domain, state.optima.reported_metric, median, running_best);

        let kind = if incentive.accepted {
            state.optima.status = OptimaStatus::Accepted;
            DecisionKind::Accepted
        } else {
            state.optima.status = OptimaStatus::Rejected;
            DecisionKind::Rejected(RejectReason::MetricDiscrepancy)
        };
        info!(
            optima = %optima_id,
            ?kind,
            median,
            reported = state.optima.reported_metric,
            discrepancy = incentive.discrepancy,
            "Quorum decision"
        );

        Some(Decision {
            optima: state.optima,
            kind,
            incentive: Some(incentive),
            median_verified: Some(median),
            alignments,
            no_shows,
            quorum_size,
            tip_at_selection: state.tip_at_selection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use doin_types::PluginHandles;

    fn domain() -> Domain {
        Domain {
            id: "quadratic".to_string(),
            name: "Quadratic".to_string(),
            description: String::new(),
            performance_metric: "mse".to_string(),
            higher_is_better: false,
            weight: 1.0,
            tolerance: 0.15,
            dimension_bounds: None,
            plugins: PluginHandles {
                optimize: "o".to_string(),
                infer: "i".to_string(),
                generate_synthetic: None,
            },
        }
    }

    fn revealed_optima(reported: f64) -> Optima {
        let mut optima = Optima::new_committed(
            OptimaId::new(),
            "quadratic".to_string(),
            PeerId::from_bytes([1u8; 32]),
            Digest::hash(b"c"),
            reported,
            Utc::now(),
        );
        optima.parameters = Some(vec![1, 2, 3]);
        optima.nonce = Some(vec![4]);
        optima.status = OptimaStatus::Revealed;
        optima
    }

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn test_accept_flow() {
        let mut coordinator = Coordinator::new(0.67, 4);
        let optima = revealed_optima(-100.0);
        let id = optima.id;
        coordinator.start_voting(optima, vec![peer(2)], Digest::hash(b"tip"), 10);

        assert_eq!(
            coordinator.on_vote(&id, peer(2), -99.99),
            VoteOutcome::Complete
        );
        let decision = coordinator.decide(&id, &domain(), None).unwrap();
        assert_eq!(decision.kind, DecisionKind::Accepted);
        assert_eq!(decision.optima.status, OptimaStatus::Accepted);
        assert!(decision.incentive.unwrap().effective_increment > 0.0);
        assert!(!coordinator.is_voting(&id));
    }

    #[test]
    fn test_discrepancy_reject_flow() {
        let mut coordinator = Coordinator::new(0.67, 4);
        let optima = revealed_optima(-100.0);
        let id = optima.id;
        coordinator.start_voting(optima, vec![peer(2)], Digest::hash(b"tip"), 10);

        // |−100 − (−99.7)| / 0.15 = 2.0 → reject.
        coordinator.on_vote(&id, peer(2), -99.7);
        let decision = coordinator.decide(&id, &domain(), None).unwrap();
        assert_eq!(
            decision.kind,
            DecisionKind::Rejected(RejectReason::MetricDiscrepancy)
        );
        assert!(!decision.incentive.unwrap().accepted);
    }

    #[test]
    fn test_timeout_insufficient_quorum() {
        let mut coordinator = Coordinator::new(0.67, 4);
        let optima = revealed_optima(-100.0);
        let id = optima.id;
        coordinator.start_voting(optima, vec![peer(2), peer(3), peer(4)], Digest::ZERO, 10);

        coordinator.on_vote(&id, peer(2), -100.0);
        assert!(coordinator.expired_at(13).is_empty());
        assert_eq!(coordinator.expired_at(14), vec![id]);

        let decision = coordinator.decide(&id, &domain(), None).unwrap();
        assert_eq!(
            decision.kind,
            DecisionKind::Rejected(RejectReason::InsufficientQuorum)
        );
        assert_eq!(decision.no_shows.len(), 2);
        assert!(decision.incentive.is_none());
    }

    #[test]
    fn test_divergent_evaluator_flagged() {
        let mut coordinator = Coordinator::new(0.5, 4);
        let optima = revealed_optima(-100.0);
        let id = optima.id;
        coordinator.start_voting(
            optima,
            vec![peer(2), peer(3), peer(4)],
            Digest::ZERO,
            10,
        );

        coordinator.on_vote(&id, peer(2), -100.0);
        coordinator.on_vote(&id, peer(3), -100.01);
        coordinator.on_vote(&id, peer(4), -150.0);

        let decision = coordinator.decide(&id, &domain(), None).unwrap();
        let divergent: Vec<&PeerId> = decision
            .alignments
            .iter()
            .filter(|(_, aligned, _)| !aligned)
            .map(|(p, _, _)| p)
            .collect();
        assert_eq!(divergent, vec![&peer(4)]);
    }

    #[test]
    fn test_vote_after_decision_ignored() {
        let mut coordinator = Coordinator::new(0.67, 4);
        let optima = revealed_optima(-100.0);
        let id = optima.id;
        coordinator.start_voting(optima, vec![peer(2)], Digest::ZERO, 10);
        coordinator.on_vote(&id, peer(2), -100.0);
        coordinator.decide(&id, &domain(), None).unwrap();

        assert_eq!(
            coordinator.on_vote(&id, peer(2), -100.0),
            VoteOutcome::AlreadyDecided
        );
        assert!(coordinator.decide(&id, &domain(), None).is_none());
    }
}
