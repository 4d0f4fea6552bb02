//! The DOIN node.
//!
//! All protocol handling funnels through a single event path: each incoming
//! message, worker result or timer tick acquires the node state once, is
//! processed to a consistent state, and returns the envelopes to broadcast.
//! Plugin work runs on the worker pool and re-enters through
//! `on_worker_result`.

use crate::coordinator::{Coordinator, Decision, DecisionKind};
use crate::plugins::PluginRegistry;
use crate::tasks::TaskQueue;
use crate::worker::{EvaluationJob, EvaluationPool, EvaluationResult};
use chrono::Utc;
use doin_chain::{
    Anchor, AnchorSink, AnchorVerdict, ChainLog, ChainStore, ExternalAnchorManager,
    FinalityManager, ForkChoice,
};
use doin_consensus::{
    quorum::select_quorum, BoundsValidator, BoundsVerdict, CommitOutcome, CommitRequest,
    CommitRevealManager, ReputationTracker, RevealOutcome, RevealRequest, VoteOutcome,
    ProofOfOptimization,
};
use doin_crypto::{commitment_hash, optimization_seed, synthetic_data_seed, verify_signature, Keypair};
use doin_economics::{distribute_block_reward, BalanceTracker, ContributorWork, DoinAmount, EvaluatorWork, OptimizerWork};
use doin_network::{
    BlockAnnouncementPayload, ChainStatusPayload, CommitPayload, Envelope, FloodConfig,
    FloodDisposition, FloodManager, Payload, PeerDiscoveryPayload, PeerTable, RevealPayload,
    SyncManager, TaskClaimedPayload, TaskCompletedPayload, TaskCreatedPayload, VotePayload,
};
use doin_types::{
    Block, Digest, Domain, DoinError, DoinParams, ErrorKind, Optima, OptimaId, PeerId,
    RejectReason, Result, Task, TaskPayload, Transaction, Vote, PRIORITY_VERIFICATION,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

const SYNTHETIC_SAMPLES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMode {
    Normal,
    Syncing,
    Suspect,
    Halted,
}

/// Snapshot returned by `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub peer_id: String,
    pub mode: NodeMode,
    pub height: u64,
    pub tip_hash: String,
    pub finalized_height: u64,
    pub threshold: f64,
    pub weighted_sum: f64,
    pub peers: usize,
    pub pending_optimae: usize,
    pub pending_tasks: usize,
    pub total_minted: f64,
}

struct NodeInner {
    params: DoinParams,
    roles: Vec<String>,
    mode: NodeMode,
    commit_reveal: CommitRevealManager,
    bounds: BoundsValidator,
    engine: ProofOfOptimization,
    store: ChainStore,
    finality: FinalityManager,
    anchors: ExternalAnchorManager,
    chain_log: Option<ChainLog>,
    flood: FloodManager,
    sync: SyncManager,
    peers: PeerTable,
    tasks: TaskQueue,
    coordinator: Coordinator,
    reputation: ReputationTracker,
    balances: BalanceTracker,
    pending_work: ContributorWork,
    /// Last height whose reputation/coin effects were applied (finality).
    applied_height: u64,
}

impl NodeInner {
    fn refresh_mode(&mut self) {
        if matches!(self.mode, NodeMode::Suspect | NodeMode::Halted) {
            return;
        }
        self.mode = if self.sync.is_syncing() {
            NodeMode::Syncing
        } else {
            NodeMode::Normal
        };
    }
}

#[derive(Clone)]
pub struct DoinNode {
    name: String,
    keypair: Arc<Keypair>,
    pool: EvaluationPool,
    inner: Arc<RwLock<NodeInner>>,
}

impl DoinNode {
    /// Build a node. Returns the worker-result receiver; the embedding
    /// runtime (or test) drains it into `on_worker_result`.
    pub fn new(
        name: &str,
        keypair: Keypair,
        params: DoinParams,
        domains: Vec<Domain>,
        registry: PluginRegistry,
        roles: Vec<String>,
        data_dir: Option<&Path>,
        anchor_sink: Option<Arc<dyn AnchorSink>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EvaluationResult>)> {
        let mut engine = ProofOfOptimization::new(
            params.initial_threshold,
            params.target_block_time_seconds,
            params.epoch_length_blocks,
        );
        let domain_ids: Vec<String> = domains.iter().map(|d| d.id.clone()).collect();
        for domain in domains {
            engine.register_domain(domain)?;
        }

        let store = ChainStore::new(params.max_block_timestamp_skew_seconds);
        let finality = FinalityManager::new(params.confirmation_depth, store.genesis_hash());
        let anchors =
            ExternalAnchorManager::new(params.external_anchor_interval_blocks, anchor_sink);
        let chain_log = match data_dir {
            Some(dir) => Some(ChainLog::open(dir)?),
            None => None,
        };

        let mut peers = PeerTable::new();
        peers.upsert_from_discovery(&PeerDiscoveryPayload {
            peer_id: keypair.peer_id(),
            addresses: Vec::new(),
            domains: domain_ids,
            roles: roles.clone(),
        });

        let inner = NodeInner {
            commit_reveal: CommitRevealManager::new(
                params.commit_reveal_window_blocks,
                params.max_pending_commits_per_peer,
            ),
            bounds: BoundsValidator::new(&params),
            engine,
            store,
            finality,
            anchors,
            chain_log,
            flood: FloodManager::new(FloodConfig::default()),
            sync: SyncManager::new(params.max_blocks_per_sync_response),
            peers,
            tasks: TaskQueue::new(params.claim_timeout_seconds),
            coordinator: Coordinator::new(params.quorum_fraction, params.voting_timeout_blocks),
            reputation: ReputationTracker::new(params.reputation_half_life_seconds),
            balances: BalanceTracker::new(),
            pending_work: ContributorWork::default(),
            applied_height: 0,
            roles,
            mode: NodeMode::Normal,
            params,
        };

        let (pool, results_rx) = EvaluationPool::new(Arc::new(registry));
        let node = Self {
            name: name.to_string(),
            keypair: Arc::new(keypair),
            pool,
            inner: Arc::new(RwLock::new(inner)),
        };
        Ok((node, results_rx))
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    pub async fn status(&self) -> NodeStatus {
        let inner = self.inner.read().await;
        let (pending_tasks, _, _) = inner.tasks.counts();
        NodeStatus {
            name: self.name.clone(),
            peer_id: self.peer_id().to_hex(),
            mode: inner.mode,
            height: inner.store.height(),
            tip_hash: inner.store.tip().hash.to_hex(),
            finalized_height: inner.finality.finalized_height(),
            threshold: inner.engine.threshold(),
            weighted_sum: inner.engine.weighted_sum(),
            peers: inner.peers.len(),
            pending_optimae: inner.coordinator.pending_count(),
            pending_tasks,
            total_minted: inner.balances.total_minted().to_doin(),
        }
    }

    pub async fn mode(&self) -> NodeMode {
        self.inner.read().await.mode
    }

    pub async fn chain_height(&self) -> u64 {
        self.inner.read().await.store.height()
    }

    pub async fn tip_hash(&self) -> Digest {
        self.inner.read().await.store.tip().hash
    }

    pub async fn block_at(&self, height: u64) -> Option<Block> {
        self.inner.read().await.store.get_by_height(height).cloned()
    }

    pub async fn blocks_in_range(&self, from: u64, to: u64) -> Vec<Block> {
        let inner = self.inner.read().await;
        let cap = inner.params.max_blocks_per_sync_response as u64;
        inner
            .store
            .blocks_in_range(from, to.min(from.saturating_add(cap.saturating_sub(1))))
    }

    pub async fn chain_status(&self) -> ChainStatusPayload {
        let inner = self.inner.read().await;
        ChainStatusPayload {
            height: inner.store.height(),
            tip_hash: inner.store.tip().hash,
            finalized_height: inner.finality.finalized_height(),
        }
    }

    pub async fn reputation_of(&self, peer: &PeerId) -> f64 {
        self.inner.read().await.reputation.get_score(peer).await
    }

    pub async fn set_reputation(&self, peer: &PeerId, score: f64) {
        self.inner.read().await.reputation.set_score(peer, score).await;
    }

    pub async fn balance_of(&self, peer: &PeerId) -> DoinAmount {
        self.inner.read().await.balances.balance(peer)
    }

    pub async fn peer_infos(&self) -> Vec<doin_network::PeerInfo> {
        self.inner
            .read()
            .await
            .peers
            .all()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Transactions queued for the next block.
    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner
            .read()
            .await
            .engine
            .pending_transactions()
            .to_vec()
    }

    pub async fn pending_tasks(&self, limit: usize) -> Vec<Task> {
        self.inner
            .read()
            .await
            .tasks
            .pending(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Our own discovery announcement, for bootstrap.
    pub async fn discovery_envelope(&self) -> Result<Envelope> {
        let mut inner = self.inner.write().await;
        let payload = self.own_discovery(&inner);
        inner.flood.originate(&Payload::PeerDiscovery(payload), &self.keypair)
    }

    fn own_discovery(&self, inner: &NodeInner) -> PeerDiscoveryPayload {
        PeerDiscoveryPayload {
            peer_id: self.peer_id(),
            addresses: Vec::new(),
            domains: inner.engine.domains().map(|d| d.id.clone()).collect(),
            roles: inner.roles.clone(),
        }
    }

    // ── Optimizer-side submission ───────────────────────────────────────

    /// Commit to an optima: computes the binding hash and the deterministic
    /// optimization seed, floods the commit, and processes it locally.
    pub async fn submit_optima(
        &self,
        domain_id: &str,
        parameters: &[u8],
        nonce: &[u8],
        reported_metric: f64,
    ) -> Result<(OptimaId, CommitOutcome, Vec<Envelope>)> {
        let commit_hash = commitment_hash(parameters, nonce);
        let declared_seed = optimization_seed(&commit_hash, domain_id).value;
        self.submit_commit(domain_id, commit_hash, reported_metric, declared_seed)
            .await
    }

    /// Low-level commit with an explicit declared seed (a dishonest seed is
    /// rejected by the network).
    pub async fn submit_commit(
        &self,
        domain_id: &str,
        commit_hash: Digest,
        reported_metric: f64,
        declared_seed: u64,
    ) -> Result<(OptimaId, CommitOutcome, Vec<Envelope>)> {
        let optima_id = OptimaId::new();
        let signature = self.keypair.sign(&CommitRequest::signing_bytes(
            &optima_id,
            domain_id,
            &commit_hash,
            reported_metric,
        ));
        let payload = CommitPayload {
            optima_id,
            domain_id: domain_id.to_string(),
            optimizer_id: self.peer_id(),
            commit_hash,
            reported_metric,
            declared_seed,
            declared_budget: doin_consensus::DeclaredBudget {
                training_seconds: 60,
                memory_mb: 512,
                param_bytes: 1 << 16,
            },
            timestamp: Utc::now(),
            signature,
        };

        let mut inner = self.inner.write().await;
        let envelope = inner
            .flood
            .originate(&Payload::OptimaeCommit(payload.clone()), &self.keypair)?;
        let mut outbox = vec![envelope];
        let outcome = self.process_commit(&mut inner, payload).await?;
        self.settle(&mut inner, Vec::new(), &mut outbox).await?;
        Ok((optima_id, outcome, outbox))
    }

    /// Reveal a previously committed optima.
    pub async fn submit_reveal(
        &self,
        optima_id: OptimaId,
        parameters: Vec<u8>,
        nonce: Vec<u8>,
    ) -> Result<(RevealOutcome, Vec<Envelope>)> {
        let signature = self.keypair.sign(&RevealRequest::signing_bytes(
            &optima_id,
            &parameters,
            &nonce,
        ));
        let payload = RevealPayload {
            optima_id,
            parameters,
            nonce,
            signature,
        };

        let mut inner = self.inner.write().await;
        let envelope = inner
            .flood
            .originate(&Payload::OptimaeReveal(payload.clone()), &self.keypair)?;
        let mut outbox = vec![envelope];
        let outcome = self.process_reveal(&mut inner, payload, &mut outbox).await?;
        self.settle(&mut inner, Vec::new(), &mut outbox).await?;
        Ok((outcome, outbox))
    }

    // ── Network ingress ─────────────────────────────────────────────────

    /// Handle one incoming envelope; returns envelopes to broadcast
    /// (including the forwarded copy for flood messages).
    pub async fn handle_envelope(
        &self,
        envelope: &Envelope,
        from: Option<PeerId>,
    ) -> Result<Vec<Envelope>> {
        let mut inner = self.inner.write().await;
        match inner.flood.handle_incoming(envelope) {
            FloodDisposition::Duplicate => Ok(Vec::new()),
            FloodDisposition::Invalid(reason) => {
                debug!(%reason, "Dropping invalid envelope");
                if let Some(peer) = from {
                    inner.peers.record_protocol_error(&peer);
                }
                Ok(Vec::new())
            }
            FloodDisposition::Deliver { payload, forward } => {
                let mut outbox = Vec::new();
                if let Some(forwarded) = forward {
                    outbox.push(forwarded);
                }
                self.dispatch(&mut inner, payload, from, &mut outbox).await?;
                inner.refresh_mode();
                Ok(outbox)
            }
        }
    }

    async fn dispatch(
        &self,
        inner: &mut NodeInner,
        payload: Payload,
        from: Option<PeerId>,
        outbox: &mut Vec<Envelope>,
    ) -> Result<()> {
        match payload {
            Payload::OptimaeCommit(p) => {
                self.process_commit(inner, p).await?;
                self.settle(inner, Vec::new(), outbox).await?;
            }
            Payload::OptimaeReveal(p) => {
                self.process_reveal(inner, p, outbox).await?;
                self.settle(inner, Vec::new(), outbox).await?;
            }
            Payload::Vote(p) => {
                self.process_vote(inner, p, from, outbox).await?;
            }
            Payload::BlockAnnouncement(p) => {
                self.process_block_announcement(inner, p, from, outbox).await?;
            }
            Payload::ChainStatus(p) => {
                let local = inner.store.height();
                if let Some(request) = inner.sync.plan_request(local, &p) {
                    outbox.push(Envelope::seal(
                        &Payload::BlockRequest(request),
                        &self.keypair,
                        0,
                    )?);
                }
            }
            Payload::BlockRequest(p) => {
                let local = inner.store.height();
                let cap = inner.params.max_blocks_per_sync_response as u64;
                let to = p.to.min(p.from.saturating_add(cap.saturating_sub(1)));
                let blocks = inner.store.blocks_in_range(p.from, to);
                let response = inner.sync.build_response(blocks, local);
                outbox.push(Envelope::seal(
                    &Payload::BlockResponse(response),
                    &self.keypair,
                    0,
                )?);
            }
            Payload::BlockResponse(p) => {
                self.process_block_response(inner, p, from, outbox).await?;
            }
            Payload::TaskCreated(p) => {
                inner.tasks.add(p.task);
            }
            Payload::TaskClaimed(p) => {
                inner.tasks.apply_claim(&p.task_id, p.claimant, p.claimed_at);
            }
            Payload::TaskCompleted(p) => {
                let completed = inner.tasks.apply_completion(
                    &p.task_id,
                    &p.claimant,
                    p.result_hash,
                    p.measured_metric,
                    Utc::now(),
                );
                if completed {
                    inner.engine.record_transaction(Transaction::CompletedTask {
                        task_id: p.task_id,
                        claimant: p.claimant,
                        result_hash: p.result_hash,
                    });
                }
            }
            Payload::PeerDiscovery(p) => {
                let known = inner.peers.get(&p.peer_id).is_some();
                inner.peers.upsert_from_discovery(&p);
                if !known && p.peer_id != self.peer_id() {
                    let discovery = self.own_discovery(inner);
                    outbox.push(Envelope::seal(
                        &Payload::PeerDiscovery(discovery),
                        &self.keypair,
                        0,
                    )?);
                    // Offer our chain status so a fresh peer can sync.
                    let status = ChainStatusPayload {
                        height: inner.store.height(),
                        tip_hash: inner.store.tip().hash,
                        finalized_height: inner.finality.finalized_height(),
                    };
                    outbox.push(Envelope::seal(
                        &Payload::ChainStatus(status),
                        &self.keypair,
                        0,
                    )?);
                }
            }
        }
        Ok(())
    }

    // ── Commit / reveal / vote processing ───────────────────────────────

    async fn process_commit(
        &self,
        inner: &mut NodeInner,
        payload: CommitPayload,
    ) -> Result<CommitOutcome> {
        if inner.mode == NodeMode::Halted {
            return Ok(CommitOutcome::RateLimited);
        }
        let height = inner.store.height();

        if inner.engine.domain(&payload.domain_id).is_none() {
            debug!(domain = %payload.domain_id, "Commit for unknown domain dropped");
            return Ok(CommitOutcome::BadSignature);
        }

        // Anti-grinding: the optimization seed is fully determined by the
        // commitment; a dishonest declared seed is rejected on the spot.
        if !doin_crypto::verify_optimization_seed(
            &payload.commit_hash,
            &payload.domain_id,
            payload.declared_seed,
        ) {
            warn!(optima = %payload.optima_id, "Declared seed does not match derivation");
            inner.engine.record_transaction(Transaction::RejectedOptima {
                optima_id: payload.optima_id,
                optimizer_id: payload.optimizer_id,
                domain_id: payload.domain_id.clone(),
                reason: RejectReason::SeedMismatch,
            });
            return Ok(CommitOutcome::Duplicate);
        }

        match inner.bounds.check_commit(
            &payload.optimizer_id,
            &payload.declared_budget,
            height,
        ) {
            BoundsVerdict::Ok => {}
            BoundsVerdict::Violation { reason, slashable } => {
                debug!(%reason, slashable, "Commit rejected by bounds validator");
                if slashable {
                    inner.engine.record_transaction(Transaction::ReputationUpdate {
                        peer_id: payload.optimizer_id,
                        delta: -doin_consensus::reputation::PENALTY_DIVERGENT,
                    });
                }
                return Ok(CommitOutcome::RateLimited);
            }
        }

        let request = CommitRequest {
            optima_id: payload.optima_id,
            domain_id: payload.domain_id,
            optimizer_id: payload.optimizer_id,
            commit_hash: payload.commit_hash,
            reported_metric: payload.reported_metric,
            timestamp: payload.timestamp,
            signature: payload.signature,
        };
        let outcome = inner.commit_reveal.commit(request, height);
        debug!(?outcome, "Commit processed");
        Ok(outcome)
    }

    async fn process_reveal(
        &self,
        inner: &mut NodeInner,
        payload: RevealPayload,
        outbox: &mut Vec<Envelope>,
    ) -> Result<RevealOutcome> {
        if inner.mode == NodeMode::Halted {
            return Ok(RevealOutcome::NoCommit);
        }
        let height = inner.store.height();
        let request = RevealRequest {
            optima_id: payload.optima_id,
            parameters: payload.parameters,
            nonce: payload.nonce,
            signature: payload.signature,
        };
        let outcome = inner.commit_reveal.reveal(request, height);

        match &outcome {
            RevealOutcome::Accepted(optima) => {
                let optima = optima.clone();
                self.begin_verification(inner, optima, outbox).await?;
            }
            RevealOutcome::HashMismatch(optima) => {
                warn!(optima = %optima.id, "Reveal broke its commitment, optimizer slashed");
                inner.engine.record_transaction(Transaction::RejectedOptima {
                    optima_id: optima.id,
                    optimizer_id: optima.optimizer_id,
                    domain_id: optima.domain_id.clone(),
                    reason: RejectReason::HashMismatch,
                });
            }
            RevealOutcome::LateReveal(optima) => {
                inner.engine.record_transaction(Transaction::RejectedOptima {
                    optima_id: optima.id,
                    optimizer_id: optima.optimizer_id,
                    domain_id: optima.domain_id.clone(),
                    reason: RejectReason::Expired,
                });
            }
            RevealOutcome::NoCommit | RevealOutcome::BadSignature => {}
        }
        Ok(outcome)
    }

    /// Reveal accepted: bounds-check the materialized parameters, select the
    /// quorum at the current tip and fan out verification tasks.
    async fn begin_verification(
        &self,
        inner: &mut NodeInner,
        optima: Optima,
        outbox: &mut Vec<Envelope>,
    ) -> Result<()> {
        let height = inner.store.height();
        let tip_hash = inner.store.tip().hash;
        let domain = inner
            .engine
            .domain(&optima.domain_id)
            .ok_or_else(|| DoinError::UnknownDomain(optima.domain_id.clone()))?
            .clone();

        let parameters = optima
            .parameters
            .clone()
            .expect("accepted reveal carries parameters");
        match inner.bounds.check_reveal(
            &optima.optimizer_id,
            &domain,
            &parameters,
            height,
        ) {
            BoundsVerdict::Ok => {}
            BoundsVerdict::Violation { reason, slashable } => {
                warn!(optima = %optima.id, %reason, "Revealed parameters out of bounds");
                inner.engine.record_transaction(Transaction::RejectedOptima {
                    optima_id: optima.id,
                    optimizer_id: optima.optimizer_id,
                    domain_id: optima.domain_id.clone(),
                    reason: RejectReason::BoundsExceeded,
                });
                if slashable {
                    inner.engine.record_transaction(Transaction::ReputationUpdate {
                        peer_id: optima.optimizer_id,
                        delta: -doin_consensus::reputation::PENALTY_DIVERGENT,
                    });
                }
                return Ok(());
            }
        }

        // Eligible evaluators: registered for the domain, above the
        // reputation bar, never the optimizer itself.
        let mut candidates = inner.peers.evaluators_for_domain(&optima.domain_id);
        candidates.retain(|p| *p != optima.optimizer_id);
        let eligible = inner
            .reputation
            .eligible(&candidates, inner.params.min_reputation_for_consensus)
            .await;

        if eligible.len() < inner.params.quorum_min_evaluators {
            info!(
                optima = %optima.id,
                eligible = eligible.len(),
                required = inner.params.quorum_min_evaluators,
                "Rejected: not enough eligible evaluators"
            );
            inner.engine.record_transaction(Transaction::RejectedOptima {
                optima_id: optima.id,
                optimizer_id: optima.optimizer_id,
                domain_id: optima.domain_id.clone(),
                reason: RejectReason::InsufficientQuorum,
            });
            return Ok(());
        }

        let quorum = select_quorum(
            &optima.id,
            &tip_hash,
            &eligible,
            inner.params.quorum_min_evaluators,
            inner.params.quorum_max_evaluators,
        );

        for evaluator in &quorum {
            // The commit timestamp keeps task ids identical on every node.
            let task = Task::new(
                PRIORITY_VERIFICATION,
                TaskPayload::OptimaVerification {
                    optima_id: optima.id,
                    domain_id: optima.domain_id.clone(),
                    evaluator_id: *evaluator,
                },
                optima.optimizer_id,
                optima.timestamp,
            );
            inner.tasks.add(task.clone());
            let envelope = inner
                .flood
                .originate(&Payload::TaskCreated(TaskCreatedPayload { task }), &self.keypair)?;
            outbox.push(envelope);

            if *evaluator == self.peer_id() {
                let seed =
                    synthetic_data_seed(&optima.commit_hash, &optima.domain_id, evaluator, &tip_hash);
                self.pool.submit(EvaluationJob {
                    optima_id: optima.id,
                    domain_id: optima.domain_id.clone(),
                    evaluator_id: *evaluator,
                    parameters: parameters.clone(),
                    synthetic_seed: seed.value,
                    synthetic_samples: SYNTHETIC_SAMPLES,
                    deadline: Duration::from_secs(inner.params.max_training_seconds),
                });
            }
        }

        inner
            .coordinator
            .start_voting(optima, quorum, tip_hash, height);
        Ok(())
    }

    async fn process_vote(
        &self,
        inner: &mut NodeInner,
        payload: VotePayload,
        from: Option<PeerId>,
        outbox: &mut Vec<Envelope>,
    ) -> Result<()> {
        let signing = Vote::signing_bytes(
            &payload.optima_id,
            &payload.evaluator_id,
            payload.measured_metric,
        );
        if !verify_signature(&payload.evaluator_id, &signing, &payload.signature) {
            if let Some(peer) = from {
                inner.peers.record_protocol_error(&peer);
            }
            return Ok(());
        }

        let outcome = inner.coordinator.on_vote(
            &payload.optima_id,
            payload.evaluator_id,
            payload.measured_metric,
        );
        match outcome {
            VoteOutcome::Complete => {
                self.settle(inner, vec![payload.optima_id], outbox).await?;
            }
            VoteOutcome::NotSelected => {
                if let Some(peer) = from {
                    inner.peers.record_protocol_error(&peer);
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ── Worker results ──────────────────────────────────────────────────

    /// A local evaluation finished: vote, complete the task, flood both.
    pub async fn on_worker_result(&self, result: EvaluationResult) -> Result<Vec<Envelope>> {
        let mut inner = self.inner.write().await;
        let mut outbox = Vec::new();

        match result {
            EvaluationResult::Measured {
                optima_id,
                evaluator_id,
                metric,
            } => {
                if !inner.coordinator.is_voting(&optima_id) {
                    return Ok(outbox);
                }
                let signature = self.keypair.sign(&Vote::signing_bytes(
                    &optima_id,
                    &evaluator_id,
                    metric,
                ));
                let vote = VotePayload {
                    optima_id,
                    evaluator_id,
                    measured_metric: metric,
                    signature,
                };
                let envelope = inner
                    .flood
                    .originate(&Payload::Vote(vote.clone()), &self.keypair)?;
                outbox.push(envelope);

                // Complete the matching verification task.
                if let Some(task_id) = self.find_own_verification(&inner, &optima_id) {
                    let now = Utc::now();
                    let result_hash = Digest::hash(&metric.to_be_bytes());
                    inner
                        .tasks
                        .apply_claim(&task_id, evaluator_id, now);
                    if inner.tasks.apply_completion(
                        &task_id,
                        &evaluator_id,
                        result_hash,
                        Some(metric),
                        now,
                    ) {
                        inner.engine.record_transaction(Transaction::CompletedTask {
                            task_id,
                            claimant: evaluator_id,
                            result_hash,
                        });
                        let completed = TaskCompletedPayload {
                            task_id,
                            claimant: evaluator_id,
                            result_hash,
                            measured_metric: Some(metric),
                        };
                        let claimed = TaskClaimedPayload {
                            task_id,
                            claimant: evaluator_id,
                            claimed_at: now,
                        };
                        outbox.push(
                            inner
                                .flood
                                .originate(&Payload::TaskClaimed(claimed), &self.keypair)?,
                        );
                        outbox.push(
                            inner
                                .flood
                                .originate(&Payload::TaskCompleted(completed), &self.keypair)?,
                        );
                    }
                }

                let outcome =
                    inner
                        .coordinator
                        .on_vote(&optima_id, evaluator_id, metric);
                if outcome == VoteOutcome::Complete {
                    self.settle(&mut inner, vec![optima_id], &mut outbox).await?;
                }
            }
            EvaluationResult::Timeout {
                optima_id,
                evaluator_id,
            }
            | EvaluationResult::Failed {
                optima_id,
                evaluator_id,
                ..
            } => {
                // No vote; the voting timeout will handle the no-show.
                if let Some(task_id) = self.find_own_verification(&inner, &optima_id) {
                    inner.tasks.apply_failure(&task_id, Utc::now());
                }
                debug!(optima = %optima_id, evaluator = %evaluator_id, "Evaluation did not produce a vote");
            }
        }
        Ok(outbox)
    }

    fn find_own_verification(&self, inner: &NodeInner, optima_id: &OptimaId) -> Option<doin_types::TaskId> {
        let me = self.peer_id();
        inner
            .tasks
            .pending(usize::MAX)
            .into_iter()
            .find(|t| {
                matches!(
                    &t.payload,
                    TaskPayload::OptimaVerification {
                        optima_id: id,
                        evaluator_id,
                        ..
                    } if id == optima_id && *evaluator_id == me
                )
            })
            .map(|t| t.id)
    }

    // ── Decisions and block production ──────────────────────────────────

    /// Drive due decisions and block production to quiescence.
    async fn settle(
        &self,
        inner: &mut NodeInner,
        mut due: Vec<OptimaId>,
        outbox: &mut Vec<Envelope>,
    ) -> Result<()> {
        loop {
            for optima_id in std::mem::take(&mut due) {
                self.apply_decision(inner, &optima_id).await?;
            }
            if inner.mode == NodeMode::Normal && inner.engine.can_generate_block() {
                let expired = self.generate_block(inner, outbox).await?;
                due.extend(expired);
                continue;
            }
            if due.is_empty() {
                return Ok(());
            }
        }
    }

    async fn apply_decision(&self, inner: &mut NodeInner, optima_id: &OptimaId) -> Result<()> {
        let Some(domain_id) = inner.coordinator.domain_id_of(optima_id) else {
            return Ok(());
        };
        let Some(domain) = inner.engine.domain(&domain_id).cloned() else {
            return Ok(());
        };
        let running_best = inner.engine.running_best(&domain.id);
        let Some(decision) = inner.coordinator.decide(optima_id, &domain, running_best) else {
            return Ok(());
        };
        self.record_decision(inner, decision).await
    }

    async fn record_decision(&self, inner: &mut NodeInner, decision: Decision) -> Result<()> {
        let optima = &decision.optima;

        // Evaluator reputation transactions.
        for (voter, aligned, confidence) in &decision.alignments {
            let delta = if *aligned {
                doin_consensus::reputation::REWARD_BASE
                    + doin_consensus::reputation::MAX_CONFIDENCE_BONUS * confidence
            } else {
                -doin_consensus::reputation::PENALTY_DIVERGENT
            };
            inner.engine.record_transaction(Transaction::ReputationUpdate {
                peer_id: *voter,
                delta,
            });
        }
        for no_show in &decision.no_shows {
            inner.engine.record_transaction(Transaction::ReputationUpdate {
                peer_id: *no_show,
                delta: -doin_consensus::reputation::PENALTY_NO_SHOW,
            });
        }

        match decision.kind {
            DecisionKind::Accepted => {
                let incentive = decision
                    .incentive
                    .as_ref()
                    .expect("accepted decision carries an incentive outcome");
                let meta = doin_types::ExperimentMeta {
                    optimization_seed: optimization_seed(&optima.commit_hash, &optima.domain_id)
                        .value,
                    median_verified: decision
                        .median_verified
                        .expect("accepted decision has a median"),
                    quorum_size: decision.quorum_size as u32,
                };

                inner.pending_work.optimizers.push(OptimizerWork {
                    peer_id: optima.optimizer_id,
                    effective_increment: incentive.effective_increment,
                    reward_fraction: incentive.reward_fraction,
                });
                for (voter, aligned, _) in &decision.alignments {
                    if *aligned {
                        match inner
                            .pending_work
                            .evaluators
                            .iter_mut()
                            .find(|e| e.peer_id == *voter)
                        {
                            Some(entry) => entry.accepted_votes += 1,
                            None => inner.pending_work.evaluators.push(EvaluatorWork {
                                peer_id: *voter,
                                accepted_votes: 1,
                            }),
                        }
                    }
                }

                inner
                    .engine
                    .record_accepted_optima(decision.optima.clone(), incentive, meta)?;
            }
            DecisionKind::Rejected(reason) => {
                inner.engine.record_transaction(Transaction::RejectedOptima {
                    optima_id: optima.id,
                    optimizer_id: optima.optimizer_id,
                    domain_id: optima.domain_id.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Assemble and append a block; returns voting windows expired by the
    /// new height.
    async fn generate_block(
        &self,
        inner: &mut NodeInner,
        outbox: &mut Vec<Envelope>,
    ) -> Result<Vec<OptimaId>> {
        let next_index = inner.store.height() + 1;
        let work = std::mem::take(&mut inner.pending_work);
        let shares = distribute_block_reward(next_index, self.peer_id(), &work);
        if !shares.is_empty() {
            inner
                .engine
                .record_transaction(Transaction::CoinDistribution { shares });
        }

        let parent = inner.store.tip().clone();
        let block = inner
            .engine
            .generate_block(&parent, self.peer_id(), Utc::now())
            .ok_or_else(|| DoinError::Timeout("threshold not met at generation".to_string()))?;

        inner.store.append(block.clone())?;
        let expired = self.post_append(inner, &block, true).await?;

        let announcement = BlockAnnouncementPayload {
            index: block.index(),
            block_hash: block.hash,
            previous_hash: block.previous_hash(),
            generator_id: self.peer_id(),
            transaction_count: block.transactions.len() as u32,
            threshold_used: block.header.threshold_used,
            block: block.clone(),
        };
        outbox.push(
            inner
                .flood
                .originate(&Payload::BlockAnnouncement(announcement), &self.keypair)?,
        );
        Ok(expired)
    }

    /// Bookkeeping after a block lands on the canonical chain.
    async fn post_append(
        &self,
        inner: &mut NodeInner,
        block: &Block,
        own: bool,
    ) -> Result<Vec<OptimaId>> {
        if let Some(log) = inner.chain_log.as_mut() {
            if let Err(e) = log.append(block) {
                error!(error = %e, "Chain log write failed, halting");
                inner.mode = NodeMode::Halted;
                return Err(e);
            }
        }

        if !own {
            inner.engine.on_external_block(block);
        }

        let height = inner.store.height();

        // Finality: implicit checkpoint once depth is reached, then apply
        // the newly-final blocks' reputation and coin effects.
        let depth = inner.finality.confirmation_depth();
        let hash_at_depth = height
            .checked_sub(depth)
            .and_then(|h| inner.store.hash_at(h));
        if inner.finality.on_new_block(height, hash_at_depth).is_some() {
            self.apply_finalized(inner).await?;
        }

        if inner.anchors.should_anchor(height) {
            if let Some(hash) = inner.store.hash_at(height) {
                inner.anchors.publish(height, hash);
            }
        }

        // Commit windows that elapsed with this block.
        let expired_commits = inner.commit_reveal.expire_stale(height);
        for optima in expired_commits {
            inner.engine.record_transaction(Transaction::RejectedOptima {
                optima_id: optima.id,
                optimizer_id: optima.optimizer_id,
                domain_id: optima.domain_id.clone(),
                reason: RejectReason::Expired,
            });
        }

        Ok(inner.coordinator.expired_at(height))
    }

    /// Apply reputation and coin effects of newly-finalized blocks.
    async fn apply_finalized(&self, inner: &mut NodeInner) -> Result<()> {
        let finalized = inner.finality.finalized_height();
        while inner.applied_height < finalized {
            let height = inner.applied_height + 1;
            let Some(block) = inner.store.get_by_height(height).cloned() else {
                break;
            };
            for tx in &block.transactions {
                match tx {
                    Transaction::AcceptedOptima {
                        optima,
                        experiment_meta,
                        ..
                    } => {
                        let tolerance = inner
                            .engine
                            .domain(&optima.domain_id)
                            .map(|d| d.tolerance)
                            .unwrap_or(1.0)
                            .max(f64::EPSILON);
                        let discrepancy = (optima.reported_metric
                            - experiment_meta.median_verified)
                            .abs()
                            / tolerance;
                        let confidence = (1.0 - discrepancy).clamp(0.0, 1.0);
                        inner
                            .reputation
                            .record_aligned(&optima.optimizer_id, confidence, true)
                            .await;
                    }
                    Transaction::RejectedOptima {
                        optimizer_id,
                        reason,
                        ..
                    } => match reason {
                        RejectReason::HashMismatch
                        | RejectReason::MetricDiscrepancy
                        | RejectReason::SeedMismatch => {
                            inner.reputation.record_divergent(optimizer_id, true).await;
                        }
                        RejectReason::InsufficientQuorum
                        | RejectReason::Expired
                        | RejectReason::BoundsExceeded => {}
                    },
                    Transaction::ReputationUpdate { peer_id, delta } => {
                        inner.reputation.apply_delta(peer_id, *delta).await;
                    }
                    Transaction::CoinDistribution { shares } => {
                        if let Err(e) = inner.balances.apply_distribution(shares) {
                            error!(error = %e, height, "Coin distribution rejected");
                        }
                    }
                    Transaction::CompletedTask { .. } => {}
                }
            }
            inner.applied_height = height;
        }
        Ok(())
    }

    // ── Block receive / sync / forks ────────────────────────────────────

    async fn process_block_announcement(
        &self,
        inner: &mut NodeInner,
        payload: BlockAnnouncementPayload,
        from: Option<PeerId>,
        outbox: &mut Vec<Envelope>,
    ) -> Result<()> {
        if matches!(inner.mode, NodeMode::Suspect | NodeMode::Halted) {
            return Ok(());
        }
        let block = payload.block;
        if inner.store.contains(&block.hash) {
            return Ok(());
        }

        let local_height = inner.store.height();
        if block.index() == local_height + 1
            && block.previous_hash() == inner.store.tip().hash
        {
            match inner.store.append(block.clone()) {
                Ok(()) => {
                    let due = self.post_append(inner, &block, false).await?;
                    self.settle(inner, due, outbox).await?;
                }
                Err(e) if e.kind() == ErrorKind::Consistency => {
                    warn!(error = %e, "Announced block failed validation");
                    if let Some(peer) = from {
                        inner.peers.mark_untrusted(&peer);
                    }
                }
                Err(e) => return Err(e),
            }
            return Ok(());
        }

        if block.index() > local_height + 1 {
            // We are behind; start the sync handshake from the announced height.
            let status = ChainStatusPayload {
                height: block.index(),
                tip_hash: block.hash,
                finalized_height: 0,
            };
            if let Some(request) = inner.sync.plan_request(local_height, &status) {
                outbox.push(Envelope::seal(
                    &Payload::BlockRequest(request),
                    &self.keypair,
                    0,
                )?);
            }
            return Ok(());
        }

        // Competing branch.
        self.consider_fork(inner, block, from, outbox).await
    }

    async fn consider_fork(
        &self,
        inner: &mut NodeInner,
        block: Block,
        from: Option<PeerId>,
        outbox: &mut Vec<Envelope>,
    ) -> Result<()> {
        let block_hash = block.hash;
        if let Err(e) = inner.store.insert_side_block(block) {
            match e.kind() {
                ErrorKind::Consistency => {
                    warn!(error = %e, "Competing block failed validation");
                    if let Some(peer) = from {
                        inner.peers.mark_untrusted(&peer);
                    }
                    return Ok(());
                }
                _ => return Err(e),
            }
        }

        let (fork_height, branch) = inner.store.branch_to(&block_hash)?;
        if branch.is_empty() {
            return Ok(());
        }
        let canonical_suffix = inner
            .store
            .blocks_in_range(fork_height + 1, inner.store.height());

        let weights = inner.engine.domain_weights();
        let finalized = {
            let cp = inner.finality.latest_checkpoint();
            Some((cp.height, cp.block_hash))
        };
        let mut fork_choice = ForkChoice::new();
        let canonical_score = fork_choice.score_chain(&canonical_suffix, &weights, finalized);
        let candidate_score = fork_choice.score_chain(&branch, &weights, finalized);

        if !candidate_score.is_better_than(&canonical_score) {
            debug!(
                candidate = candidate_score.cumulative_increment,
                canonical = canonical_score.cumulative_increment,
                "Keeping current chain"
            );
            return Ok(());
        }

        if !inner.finality.is_reorg_allowed(fork_height) {
            error!(
                fork_height,
                finalized = inner.finality.finalized_height(),
                "Rejecting heavier branch: it crosses finality"
            );
            if let Some(peer) = from {
                inner.peers.mark_untrusted(&peer);
            }
            return Ok(());
        }

        let finality_view = &inner.finality;
        let outcome = {
            // Single-writer reorg: all-or-nothing swap of the canonical chain.
            let store = &mut inner.store;
            store.reorg_to(&block_hash, finality_view)?
        };

        // Transactions from reverted blocks go back to pending unless the
        // new branch already carries them.
        let applied_hashes: std::collections::HashSet<Digest> = outcome
            .applied
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.hash()))
            .collect();
        for reverted in &outcome.reverted {
            for tx in &reverted.transactions {
                if matches!(tx, Transaction::CoinDistribution { .. }) {
                    continue;
                }
                if !applied_hashes.contains(&tx.hash()) {
                    inner.engine.record_transaction(tx.clone());
                }
            }
        }
        let mut due = Vec::new();
        for applied in &outcome.applied {
            due.extend(self.post_append(inner, applied, false).await?);
        }
        self.settle(inner, due, outbox).await?;
        Ok(())
    }

    async fn process_block_response(
        &self,
        inner: &mut NodeInner,
        payload: doin_network::BlockResponsePayload,
        from: Option<PeerId>,
        outbox: &mut Vec<Envelope>,
    ) -> Result<()> {
        if payload.blocks.len() > inner.params.max_blocks_per_sync_response {
            if let Some(peer) = from {
                inner.peers.mark_untrusted(&peer);
            }
            return Ok(());
        }

        let mut due = Vec::new();
        for block in payload.blocks {
            if inner.store.contains(&block.hash) {
                continue;
            }
            match inner.store.append(block.clone()) {
                Ok(()) => {
                    due.extend(self.post_append(inner, &block, false).await?);
                }
                Err(e) => {
                    warn!(error = %e, "Synced block failed validation");
                    if let Some(peer) = from {
                        inner.peers.mark_untrusted(&peer);
                    }
                    break;
                }
            }
        }

        let local_height = inner.store.height();
        if !inner.sync.on_blocks_applied(local_height) {
            if let Some(request) = inner.sync.continue_request(local_height) {
                outbox.push(Envelope::seal(
                    &Payload::BlockRequest(request),
                    &self.keypair,
                    0,
                )?);
            }
        }
        inner.refresh_mode();
        self.settle(inner, due, outbox).await?;
        Ok(())
    }

    // ── External anchors and timers ─────────────────────────────────────

    /// Feed an anchor observed on the external ledger. A divergence flips
    /// the node to SUSPECT; it then refuses further progress until operator
    /// intervention.
    pub async fn on_external_anchor(&self, anchor: Anchor) -> AnchorVerdict {
        let mut inner = self.inner.write().await;
        let local = inner.store.hash_at(anchor.height);
        let verdict = inner.anchors.verify_received(&anchor, local);
        if verdict == AnchorVerdict::Divergence {
            error!(
                height = anchor.height,
                "External anchor divergence, entering SUSPECT mode"
            );
            inner.mode = NodeMode::Suspect;
        }
        verdict
    }

    /// Operator acknowledgement clearing SUSPECT mode.
    pub async fn operator_resume(&self) {
        let mut inner = self.inner.write().await;
        if inner.mode == NodeMode::Suspect {
            info!("Operator cleared SUSPECT mode");
            inner.mode = NodeMode::Normal;
        }
    }

    /// Periodic maintenance: reopen abandoned task claims.
    pub async fn tick(&self) -> Result<Vec<Envelope>> {
        let mut inner = self.inner.write().await;
        let reopened = inner.tasks.reopen_expired(Utc::now());
        if !reopened.is_empty() {
            debug!(count = reopened.len(), "Reopened abandoned tasks");
        }
        Ok(Vec::new())
    }

    // ── HTTP task surface ───────────────────────────────────────────────

    pub async fn claim_task(&self, task_id: &doin_types::TaskId, claimant: PeerId) -> Result<Task> {
        let mut inner = self.inner.write().await;
        let outcome = inner.tasks.apply_claim(task_id, claimant, Utc::now());
        match outcome {
            crate::tasks::ClaimOutcome::Claimed | crate::tasks::ClaimOutcome::Superseded => inner
                .tasks
                .get(task_id)
                .cloned()
                .ok_or_else(|| DoinError::MalformedMessage("task vanished".to_string())),
            _ => Err(DoinError::RateLimited(format!(
                "task {} not claimable",
                task_id
            ))),
        }
    }

    pub async fn complete_task(
        &self,
        task_id: &doin_types::TaskId,
        claimant: PeerId,
        result_hash: Digest,
        measured_metric: Option<f64>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner
            .tasks
            .apply_completion(task_id, &claimant, result_hash, measured_metric, Utc::now())
        {
            inner.engine.record_transaction(Transaction::CompletedTask {
                task_id: *task_id,
                claimant,
                result_hash,
            });
            Ok(())
        } else {
            Err(DoinError::RateLimited(format!(
                "task {} not completable by {}",
                task_id, claimant
            )))
        }
    }
}
