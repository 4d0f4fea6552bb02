//! Heaviest-chain fork choice.
//!
//! The canonical chain is not the longest but the heaviest: the one with the
//! most accumulated verified optimization work, i.e. the sum over its blocks
//! of `domain_weight × effective_increment` from accepted optimae. An
//! attacker wanting to rewrite history must out-optimize the honest network.

use doin_types::{Block, Digest, Transaction};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Score of one candidate chain (or branch suffix; comparing suffixes from
/// a common fork point is equivalent to comparing full chains).
#[derive(Debug, Clone, PartialEq)]
pub struct ChainScore {
    pub tip_hash: Digest,
    pub height: u64,
    pub cumulative_increment: f64,
    pub accepted_count: u64,
    pub checkpoint_consistent: bool,
}

impl ChainScore {
    /// Ranking: checkpoint consistency, then cumulative weighted increment,
    /// then lower tip hash.
    fn ranking_cmp(&self, other: &Self) -> Ordering {
        if self.checkpoint_consistent != other.checkpoint_consistent {
            return self.checkpoint_consistent.cmp(&other.checkpoint_consistent);
        }
        if (self.cumulative_increment - other.cumulative_increment).abs() > 1e-10 {
            return self
                .cumulative_increment
                .partial_cmp(&other.cumulative_increment)
                .unwrap_or(Ordering::Equal);
        }
        // Lower hash wins: reversed comparison.
        other.tip_hash.cmp(&self.tip_hash)
    }

    pub fn is_better_than(&self, other: &Self) -> bool {
        self.ranking_cmp(other) == Ordering::Greater
    }
}

#[derive(Default)]
pub struct ForkChoice {
    candidates: HashMap<Digest, ChainScore>,
}

impl ForkChoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a chain (or branch suffix) from its blocks.
    ///
    /// `finalized` is the finalized (height, hash) pair; a candidate that
    /// carries a different block at the finalized height is marked
    /// inconsistent and never wins.
    pub fn score_chain(
        &mut self,
        blocks: &[Block],
        domain_weights: &HashMap<String, f64>,
        finalized: Option<(u64, Digest)>,
    ) -> ChainScore {
        let mut cumulative = 0.0;
        let mut accepted_count = 0u64;
        let mut checkpoint_consistent = true;

        for block in blocks {
            if let Some((final_height, final_hash)) = finalized {
                if block.index() == final_height && block.hash != final_hash {
                    checkpoint_consistent = false;
                }
            }
            for tx in &block.transactions {
                if let Transaction::AcceptedOptima {
                    optima,
                    effective_increment,
                    ..
                } = tx
                {
                    accepted_count += 1;
                    let weight = domain_weights.get(&optima.domain_id).copied().unwrap_or(1.0);
                    cumulative += (weight * effective_increment).abs();
                }
            }
        }

        let score = ChainScore {
            tip_hash: blocks.last().map(|b| b.hash).unwrap_or(Digest::ZERO),
            height: blocks.last().map(|b| b.index()).unwrap_or(0),
            cumulative_increment: cumulative,
            accepted_count,
            checkpoint_consistent,
        };
        self.candidates.insert(score.tip_hash, score.clone());
        score
    }

    /// The best chain among scored candidates.
    pub fn select_best(&self) -> Option<&ChainScore> {
        self.candidates
            .values()
            .max_by(|a, b| a.ranking_cmp(b))
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use doin_crypto::{commitment_hash, merkle_root};
    use doin_types::{
        BlockHeader, ExperimentMeta, Optima, OptimaId, OptimaStatus, PeerId,
    };

    fn accepted_tx(domain_id: &str, effective_increment: f64, tag: u8) -> Transaction {
        let parameters = vec![tag];
        let nonce = vec![tag, tag];
        let mut optima = Optima::new_committed(
            OptimaId::new(),
            domain_id.to_string(),
            PeerId::from_bytes([1u8; 32]),
            commitment_hash(&parameters, &nonce),
            -100.0,
            Utc::now(),
        );
        optima.parameters = Some(parameters);
        optima.nonce = Some(nonce);
        optima.status = OptimaStatus::Accepted;
        Transaction::AcceptedOptima {
            optima,
            effective_increment,
            reward_fraction: 1.0,
            experiment_meta: ExperimentMeta {
                optimization_seed: 1,
                median_verified: -100.0,
                quorum_size: 3,
            },
        }
    }

    fn block_with(parent: &Block, transactions: Vec<Transaction>) -> Block {
        let leaves: Vec<Digest> = transactions.iter().map(|tx| tx.hash()).collect();
        let header = BlockHeader {
            index: parent.index() + 1,
            previous_hash: parent.hash,
            timestamp: parent.header.timestamp + chrono::Duration::seconds(1),
            merkle_root: merkle_root(&leaves),
            generator_id: PeerId::from_bytes([9u8; 32]),
            threshold_used: 1.0,
        };
        Block::new(header, transactions)
    }

    fn weights() -> HashMap<String, f64> {
        HashMap::from([("quadratic".to_string(), 1.0)])
    }

    #[test]
    fn test_heavier_branch_wins_despite_fewer_optimae() {
        let genesis = Block::genesis();
        // Branch X: 3 accepted optimae summing to 0.5.
        let x = vec![block_with(
            &genesis,
            vec![
                accepted_tx("quadratic", 0.2, 1),
                accepted_tx("quadratic", 0.2, 2),
                accepted_tx("quadratic", 0.1, 3),
            ],
        )];
        // Branch Y: 2 accepted optimae summing to 0.9.
        let y = vec![block_with(
            &genesis,
            vec![
                accepted_tx("quadratic", 0.5, 4),
                accepted_tx("quadratic", 0.4, 5),
            ],
        )];

        let mut fork_choice = ForkChoice::new();
        fork_choice.score_chain(&x, &weights(), None);
        let y_score = fork_choice.score_chain(&y, &weights(), None);

        let best = fork_choice.select_best().unwrap();
        assert_eq!(best.tip_hash, y_score.tip_hash);
        assert!((best.cumulative_increment - 0.9).abs() < 1e-9);
        assert_eq!(best.accepted_count, 2);
    }

    #[test]
    fn test_tie_broken_by_lower_hash() {
        let genesis = Block::genesis();
        let a = vec![block_with(&genesis, vec![accepted_tx("quadratic", 0.5, 1)])];
        let b = vec![block_with(&genesis, vec![accepted_tx("quadratic", 0.5, 2)])];

        let mut fork_choice = ForkChoice::new();
        let score_a = fork_choice.score_chain(&a, &weights(), None);
        let score_b = fork_choice.score_chain(&b, &weights(), None);

        let expected = if score_a.tip_hash < score_b.tip_hash {
            score_a.tip_hash
        } else {
            score_b.tip_hash
        };
        assert_eq!(fork_choice.select_best().unwrap().tip_hash, expected);
    }

    #[test]
    fn test_checkpoint_inconsistent_never_wins() {
        let genesis = Block::genesis();
        let honest = vec![block_with(&genesis, vec![])];
        let heavy = vec![block_with(
            &genesis,
            vec![accepted_tx("quadratic", 100.0, 1)],
        )];

        let mut fork_choice = ForkChoice::new();
        let honest_score = fork_choice.score_chain(
            &honest,
            &weights(),
            Some((1, honest[0].hash)),
        );
        // The heavy branch disagrees with the finalized block at height 1.
        fork_choice.score_chain(&heavy, &weights(), Some((1, honest[0].hash)));

        assert_eq!(
            fork_choice.select_best().unwrap().tip_hash,
            honest_score.tip_hash
        );
    }

    #[test]
    fn test_domain_weight_applied() {
        let genesis = Block::genesis();
        let chain = vec![block_with(&genesis, vec![accepted_tx("quadratic", 0.5, 1)])];
        let heavy_weights = HashMap::from([("quadratic".to_string(), 4.0)]);

        let mut fork_choice = ForkChoice::new();
        let score = fork_choice.score_chain(&chain, &heavy_weights, None);
        assert!((score.cumulative_increment - 2.0).abs() < 1e-9);
    }
}
