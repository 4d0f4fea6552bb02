//! The proof-of-optimization block engine.
//!
//! Accepted optimae contribute `domain_weight × effective_increment` to a
//! running sum; when the sum crosses the dynamic threshold the engine
//! packages every pending transaction into a block, clears its accumulators
//! and lets the threshold controller adjust.

use crate::incentives::IncentiveOutcome;
use crate::threshold::{ThresholdController, ThresholdStats};
use chrono::{DateTime, Utc};
use doin_crypto::merkle_root;
use doin_types::{
    Block, BlockHeader, Digest, DoinError, Domain, ExperimentMeta, Optima, PeerId, Result,
    Transaction,
};
use std::collections::HashMap;
use tracing::{debug, info};

pub struct ProofOfOptimization {
    domains: HashMap<String, Domain>,
    running_best: HashMap<String, f64>,
    threshold: ThresholdController,
    pending_increments: HashMap<String, f64>,
    pending_transactions: Vec<Transaction>,
}

impl ProofOfOptimization {
    pub fn new(initial_threshold: f64, target_block_time: f64, epoch_length: u64) -> Self {
        Self {
            domains: HashMap::new(),
            running_best: HashMap::new(),
            threshold: ThresholdController::new(initial_threshold, target_block_time, epoch_length),
            pending_increments: HashMap::new(),
            pending_transactions: Vec::new(),
        }
    }

    /// Register a domain for increment tracking. Domains are never removed.
    pub fn register_domain(&mut self, domain: Domain) -> Result<()> {
        if domain.weight <= 0.0 {
            return Err(DoinError::Configuration(format!(
                "domain {} has non-positive weight",
                domain.id
            )));
        }
        debug!(domain = %domain.id, weight = domain.weight, "Domain registered");
        self.domains.insert(domain.id.clone(), domain);
        Ok(())
    }

    pub fn domain(&self, domain_id: &str) -> Option<&Domain> {
        self.domains.get(domain_id)
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    pub fn domain_weights(&self) -> HashMap<String, f64> {
        self.domains
            .iter()
            .map(|(id, d)| (id.clone(), d.weight))
            .collect()
    }

    /// Best accepted metric so far for a domain, the incentive baseline.
    pub fn running_best(&self, domain_id: &str) -> Option<f64> {
        self.running_best.get(domain_id).copied()
    }

    /// Record an accepted optima: accumulate its weighted increment, queue
    /// the on-chain record, and advance the domain's running best.
    pub fn record_accepted_optima(
        &mut self,
        optima: Optima,
        outcome: &IncentiveOutcome,
        meta: ExperimentMeta,
    ) -> Result<()> {
        let domain = self
            .domains
            .get(&optima.domain_id)
            .ok_or_else(|| DoinError::UnknownDomain(optima.domain_id.clone()))?;

        let weighted = domain.weight * outcome.effective_increment;
        *self
            .pending_increments
            .entry(optima.domain_id.clone())
            .or_insert(0.0) += weighted;

        let median = meta.median_verified;
        match self.running_best.get(&optima.domain_id) {
            Some(&best) if !domain.is_better(median, best) => {}
            _ => {
                self.running_best.insert(optima.domain_id.clone(), median);
            }
        }

        debug!(
            optima = %optima.id,
            domain = %optima.domain_id,
            weighted_increment = weighted,
            pending_sum = self.weighted_sum(),
            "Accepted optima recorded"
        );

        self.pending_transactions.push(Transaction::AcceptedOptima {
            optima,
            effective_increment: outcome.effective_increment,
            reward_fraction: outcome.reward_fraction,
            experiment_meta: meta,
        });
        Ok(())
    }

    /// Queue any other transaction for the next block.
    pub fn record_transaction(&mut self, tx: Transaction) {
        self.pending_transactions.push(tx);
    }

    /// Reconcile pending state with a block produced elsewhere.
    ///
    /// Transactions the block settles leave the pending pool (matched by
    /// hash, or by optima/task identity, since terminal optima states land in
    /// exactly one block), the running bests advance, and the threshold
    /// controller observes the block's cadence.
    pub fn on_external_block(&mut self, block: &Block) {
        let mut included_hashes = std::collections::HashSet::new();
        let mut included_optimae = std::collections::HashSet::new();
        let mut included_tasks = std::collections::HashSet::new();
        for tx in &block.transactions {
            included_hashes.insert(tx.hash());
            match tx {
                Transaction::AcceptedOptima { optima, experiment_meta, .. } => {
                    included_optimae.insert(optima.id);
                    if let Some(domain) = self.domains.get(&optima.domain_id) {
                        let median = experiment_meta.median_verified;
                        match self.running_best.get(&optima.domain_id) {
                            Some(&best) if !domain.is_better(median, best) => {}
                            _ => {
                                self.running_best.insert(optima.domain_id.clone(), median);
                            }
                        }
                    }
                }
                Transaction::RejectedOptima { optima_id, .. } => {
                    included_optimae.insert(*optima_id);
                }
                Transaction::CompletedTask { task_id, .. } => {
                    included_tasks.insert(*task_id);
                }
                _ => {}
            }
        }

        self.pending_transactions.retain(|tx| {
            if included_hashes.contains(&tx.hash()) {
                return false;
            }
            match tx {
                Transaction::AcceptedOptima { optima, .. } => {
                    !included_optimae.contains(&optima.id)
                }
                Transaction::RejectedOptima { optima_id, .. } => {
                    !included_optimae.contains(optima_id)
                }
                Transaction::CompletedTask { task_id, .. } => !included_tasks.contains(task_id),
                _ => true,
            }
        });
        self.recompute_pending_increments();
        self.threshold.on_new_block(block.header.timestamp);
    }

    fn recompute_pending_increments(&mut self) {
        let mut sums: HashMap<String, f64> = HashMap::new();
        for tx in &self.pending_transactions {
            if let Transaction::AcceptedOptima {
                optima,
                effective_increment,
                ..
            } = tx
            {
                let weight = self
                    .domains
                    .get(&optima.domain_id)
                    .map(|d| d.weight)
                    .unwrap_or(1.0);
                *sums.entry(optima.domain_id.clone()).or_insert(0.0) +=
                    weight * effective_increment;
            }
        }
        self.pending_increments = sums;
    }

    pub fn pending_transaction_count(&self) -> usize {
        self.pending_transactions.len()
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    /// Current weighted sum of pending increments across all domains.
    pub fn weighted_sum(&self) -> f64 {
        self.pending_increments.values().sum()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.threshold()
    }

    pub fn threshold_stats(&self) -> ThresholdStats {
        self.threshold.stats()
    }

    pub fn can_generate_block(&self) -> bool {
        self.weighted_sum() >= self.threshold.threshold()
    }

    /// Assemble a block if the threshold is met.
    ///
    /// Atomically snapshots the pending transactions, clears the
    /// accumulators and adjusts the threshold for the next block.
    pub fn generate_block(
        &mut self,
        parent: &Block,
        generator_id: PeerId,
        timestamp: DateTime<Utc>,
    ) -> Option<Block> {
        if !self.can_generate_block() {
            return None;
        }

        let transactions = std::mem::take(&mut self.pending_transactions);
        let leaves: Vec<Digest> = transactions.iter().map(|tx| tx.hash()).collect();
        let merkle = merkle_root(&leaves);

        let timestamp = timestamp.max(parent.header.timestamp);
        let header = BlockHeader {
            index: parent.index() + 1,
            previous_hash: parent.hash,
            timestamp,
            merkle_root: merkle,
            generator_id,
            threshold_used: self.threshold.threshold(),
        };
        let block = Block::new(header, transactions);

        self.pending_increments.clear();
        self.threshold.on_new_block(timestamp);

        info!(
            index = block.index(),
            hash = %block.hash,
            transactions = block.transactions.len(),
            next_threshold = self.threshold.threshold(),
            "Block generated"
        );
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incentives::evaluate_incentive;
    use doin_types::{OptimaId, OptimaStatus, PluginHandles};

    fn domain(id: &str, weight: f64) -> Domain {
        Domain {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            performance_metric: "mse".to_string(),
            higher_is_better: false,
            weight,
            tolerance: 0.15,
            dimension_bounds: None,
            plugins: PluginHandles {
                optimize: "o".to_string(),
                infer: "i".to_string(),
                generate_synthetic: None,
            },
        }
    }

    fn accepted_optima(domain_id: &str, metric: f64) -> Optima {
        let mut optima = Optima::new_committed(
            OptimaId::new(),
            domain_id.to_string(),
            PeerId::from_bytes([1u8; 32]),
            Digest::hash(b"commit"),
            metric,
            Utc::now(),
        );
        optima.parameters = Some(vec![1, 2, 3]);
        optima.nonce = Some(vec![4]);
        optima.status = OptimaStatus::Accepted;
        optima
    }

    fn meta(median: f64) -> ExperimentMeta {
        ExperimentMeta {
            optimization_seed: 42,
            median_verified: median,
            quorum_size: 3,
        }
    }

    fn engine() -> ProofOfOptimization {
        let mut engine = ProofOfOptimization::new(1.0, 600.0, 100);
        engine.register_domain(domain("quadratic", 1.0)).unwrap();
        engine.register_domain(domain("heavy", 2.0)).unwrap();
        engine
    }

    #[test]
    fn test_unknown_domain_rejected() {
        let mut engine = engine();
        let outcome = evaluate_incentive(&domain("x", 1.0), -1.0, -1.0, None);
        let result =
            engine.record_accepted_optima(accepted_optima("nope", -1.0), &outcome, meta(-1.0));
        assert!(matches!(result, Err(DoinError::UnknownDomain(_))));
    }

    #[test]
    fn test_weighted_accumulation_and_block_gate() {
        let mut engine = engine();
        let d = domain("heavy", 2.0);

        // First accepted optima: increment 1.0, weight 2.0 → sum 2.0 ≥ 1.0.
        let outcome = evaluate_incentive(&d, -100.0, -100.0, None);
        assert!(!engine.can_generate_block());
        engine
            .record_accepted_optima(accepted_optima("heavy", -100.0), &outcome, meta(-100.0))
            .unwrap();
        assert!((engine.weighted_sum() - 2.0).abs() < 1e-9);
        assert!(engine.can_generate_block());
    }

    #[test]
    fn test_running_best_advances() {
        let mut engine = engine();
        let d = domain("quadratic", 1.0);

        let outcome = evaluate_incentive(&d, -100.0, -100.0, None);
        engine
            .record_accepted_optima(accepted_optima("quadratic", -100.0), &outcome, meta(-100.0))
            .unwrap();
        assert_eq!(engine.running_best("quadratic"), Some(-100.0));

        // A worse median does not regress the best (lower is better).
        let outcome = evaluate_incentive(&d, -99.0, -99.0, Some(-100.0));
        engine
            .record_accepted_optima(accepted_optima("quadratic", -99.0), &outcome, meta(-99.0))
            .unwrap();
        assert_eq!(engine.running_best("quadratic"), Some(-100.0));

        let outcome = evaluate_incentive(&d, -101.0, -101.0, Some(-100.0));
        engine
            .record_accepted_optima(accepted_optima("quadratic", -101.0), &outcome, meta(-101.0))
            .unwrap();
        assert_eq!(engine.running_best("quadratic"), Some(-101.0));
    }

    #[test]
    fn test_generate_block_snapshots_and_clears() {
        let mut engine = engine();
        let d = domain("quadratic", 1.0);
        let outcome = evaluate_incentive(&d, -100.0, -100.0, None);
        engine
            .record_accepted_optima(accepted_optima("quadratic", -100.0), &outcome, meta(-100.0))
            .unwrap();
        engine.record_transaction(Transaction::ReputationUpdate {
            peer_id: PeerId::from_bytes([1u8; 32]),
            delta: 0.4,
        });

        let parent = Block::genesis();
        let block = engine
            .generate_block(&parent, PeerId::from_bytes([9u8; 32]), Utc::now())
            .expect("threshold met");

        assert_eq!(block.index(), 1);
        assert_eq!(block.previous_hash(), parent.hash);
        assert_eq!(block.transactions.len(), 2);

        // Merkle root matches a recomputation.
        let leaves: Vec<Digest> = block.transactions.iter().map(|tx| tx.hash()).collect();
        assert_eq!(block.header.merkle_root, merkle_root(&leaves));

        // Accumulators cleared.
        assert_eq!(engine.weighted_sum(), 0.0);
        assert_eq!(engine.pending_transaction_count(), 0);
        assert!(!engine.can_generate_block());
        assert!(engine
            .generate_block(&parent, PeerId::from_bytes([9u8; 32]), Utc::now())
            .is_none());
    }

    #[test]
    fn test_external_block_reconciles_pending() {
        let mut engine = engine();
        let d = domain("quadratic", 1.0);
        let outcome = evaluate_incentive(&d, -100.0, -100.0, None);
        let optima = accepted_optima("quadratic", -100.0);
        engine
            .record_accepted_optima(optima.clone(), &outcome, meta(-100.0))
            .unwrap();
        assert!(engine.can_generate_block());

        // Another node generated a block settling the same optima.
        let mut peer_engine = ProofOfOptimization::new(1.0, 600.0, 100);
        peer_engine.register_domain(d).unwrap();
        peer_engine
            .record_accepted_optima(optima, &outcome, meta(-100.0))
            .unwrap();
        let block = peer_engine
            .generate_block(&Block::genesis(), PeerId::from_bytes([8u8; 32]), Utc::now())
            .unwrap();

        engine.on_external_block(&block);
        assert_eq!(engine.weighted_sum(), 0.0);
        assert_eq!(engine.pending_transaction_count(), 0);
        assert_eq!(engine.running_best("quadratic"), Some(-100.0));
        assert!(!engine.can_generate_block());
    }

    #[test]
    fn test_block_timestamp_monotone() {
        let mut engine = engine();
        let d = domain("quadratic", 1.0);
        let outcome = evaluate_incentive(&d, -100.0, -100.0, None);
        engine
            .record_accepted_optima(accepted_optima("quadratic", -100.0), &outcome, meta(-100.0))
            .unwrap();

        let parent = Block::genesis();
        // A clock behind the parent still yields a monotone block timestamp.
        let stale = parent.header.timestamp - chrono::Duration::seconds(10);
        let block = engine
            .generate_block(&parent, PeerId::from_bytes([9u8; 32]), stale)
            .unwrap();
        assert!(block.header.timestamp >= parent.header.timestamp);
    }
}
