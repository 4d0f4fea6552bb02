//! Shared fixtures for node integration tests.
#![allow(dead_code)]

use doin_crypto::{merkle_root, Keypair};
use doin_node::plugins::{builtin, GenerateSynthetic, Infer, PluginRegistry, SyntheticData};
use doin_node::worker::EvaluationResult;
use doin_node::DoinNode;
use doin_network::Envelope;
use doin_types::{
    Block, BlockHeader, Digest, Domain, DoinParams, PeerId, PluginHandles, Result, Transaction,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn test_params() -> DoinParams {
    DoinParams {
        target_block_time_seconds: 1.0,
        confirmation_depth: 2,
        quorum_min_evaluators: 1,
        quorum_max_evaluators: 5,
        quorum_fraction: 0.67,
        quorum_tolerance: 0.15,
        commit_reveal_window_blocks: 4,
        voting_timeout_blocks: 2,
        epoch_length_blocks: 10,
        claim_timeout_seconds: 5,
        ..DoinParams::default()
    }
}

pub fn quadratic_domain() -> Domain {
    Domain {
        id: "quadratic".to_string(),
        name: "Quadratic fit".to_string(),
        description: String::new(),
        performance_metric: "mse".to_string(),
        higher_is_better: false,
        weight: 1.0,
        tolerance: 0.15,
        dimension_bounds: None,
        plugins: PluginHandles {
            optimize: "quadratic_optimize".to_string(),
            infer: "quadratic_infer".to_string(),
            generate_synthetic: Some("quadratic_synth".to_string()),
        },
    }
}

/// Evaluator returning a script-controlled metric, so tests can steer quorum
/// outcomes precisely.
pub struct ScriptedEvaluator {
    pub metric: Arc<Mutex<f64>>,
}

impl Infer for ScriptedEvaluator {
    fn evaluate(&self, _parameters: &[u8], _data: &SyntheticData) -> Result<f64> {
        Ok(*self.metric.lock().unwrap())
    }
}

struct TinySynthesizer;

impl GenerateSynthetic for TinySynthesizer {
    fn generate(&self, seed: u64, _samples: usize) -> Result<SyntheticData> {
        Ok(SyntheticData {
            seed,
            samples: vec![vec![0.5]],
        })
    }
}

pub struct TestNode {
    pub node: DoinNode,
    pub worker_rx: mpsc::UnboundedReceiver<EvaluationResult>,
    pub peer_id: PeerId,
}

/// Build a node. `scripted_metric` installs a controllable evaluator.
pub fn make_node(
    name: &str,
    roles: &[&str],
    params: DoinParams,
    scripted_metric: Option<Arc<Mutex<f64>>>,
) -> TestNode {
    let keypair = Keypair::generate();
    let peer_id = keypair.peer_id();

    let mut registry = PluginRegistry::new();
    let mut set = builtin::quadratic_plugin_set();
    if let Some(metric) = scripted_metric {
        set.infer = Arc::new(ScriptedEvaluator { metric });
        set.generate_synthetic = Arc::new(TinySynthesizer);
    }
    registry.register("quadratic", set);

    let (node, worker_rx) = DoinNode::new(
        name,
        keypair,
        params,
        vec![quadratic_domain()],
        registry,
        roles.iter().map(|s| s.to_string()).collect(),
        None,
        None,
    )
    .expect("node construction");

    TestNode {
        node,
        worker_rx,
        peer_id,
    }
}

/// Deliver envelope batches between two nodes until both outboxes drain.
/// Flood dedup guarantees termination.
pub async fn exchange(a: &TestNode, b: &TestNode, from_a: Vec<Envelope>, from_b: Vec<Envelope>) {
    let mut to_b = from_a;
    let mut to_a = from_b;
    loop {
        let mut next_to_a = Vec::new();
        for envelope in to_b.drain(..) {
            next_to_a.extend(
                b.node
                    .handle_envelope(&envelope, Some(a.peer_id))
                    .await
                    .expect("envelope handling"),
            );
        }
        let mut next_to_b = Vec::new();
        for envelope in to_a.drain(..) {
            next_to_b.extend(
                a.node
                    .handle_envelope(&envelope, Some(b.peer_id))
                    .await
                    .expect("envelope handling"),
            );
        }
        if next_to_a.is_empty() && next_to_b.is_empty() {
            return;
        }
        to_a = next_to_a;
        to_b = next_to_b;
    }
}

/// Introduce two nodes to each other (discovery + status handshake).
pub async fn connect(a: &TestNode, b: &TestNode) {
    let hello = a.node.discovery_envelope().await.expect("discovery");
    exchange(a, b, vec![hello], Vec::new()).await;
}

/// Hand-build a valid child block, bypassing the threshold (tests drive the
/// chain shape directly).
pub fn build_block(parent: &Block, transactions: Vec<Transaction>, generator: u8) -> Block {
    let leaves: Vec<Digest> = transactions.iter().map(|tx| tx.hash()).collect();
    let header = BlockHeader {
        index: parent.index() + 1,
        previous_hash: parent.hash,
        timestamp: parent.header.timestamp + chrono::Duration::seconds(1),
        merkle_root: merkle_root(&leaves),
        generator_id: PeerId::from_bytes([generator; 32]),
        threshold_used: 1.0,
    };
    Block::new(header, transactions)
}

/// A valid ACCEPTED_OPTIMA transaction with a chosen effective increment.
pub fn accepted_optima_tx(effective_increment: f64, tag: u8) -> Transaction {
    use doin_crypto::commitment_hash;
    use doin_types::{ExperimentMeta, Optima, OptimaId, OptimaStatus};

    let parameters = vec![tag, tag + 1];
    let nonce = vec![tag];
    let mut optima = Optima::new_committed(
        OptimaId::new(),
        "quadratic".to_string(),
        PeerId::from_bytes([42u8; 32]),
        commitment_hash(&parameters, &nonce),
        -100.0,
        chrono::Utc::now(),
    );
    optima.parameters = Some(parameters);
    optima.nonce = Some(nonce);
    optima.status = OptimaStatus::Accepted;

    Transaction::AcceptedOptima {
        optima,
        effective_increment,
        reward_fraction: 1.0,
        experiment_meta: ExperimentMeta {
            optimization_seed: 7,
            median_verified: -100.0,
            quorum_size: 1,
        },
    }
}

/// Announce a block to a node as if a peer generated it; returns the
/// envelopes the node wants to broadcast in response.
pub async fn announce_block(
    target: &TestNode,
    block: &Block,
    sender: &Keypair,
) -> Vec<Envelope> {
    use doin_network::{BlockAnnouncementPayload, Payload};
    let payload = Payload::BlockAnnouncement(BlockAnnouncementPayload {
        index: block.index(),
        block_hash: block.hash,
        previous_hash: block.previous_hash(),
        generator_id: sender.peer_id(),
        transaction_count: block.transactions.len() as u32,
        threshold_used: block.header.threshold_used,
        block: block.clone(),
    });
    let envelope = Envelope::seal(&payload, sender, 2).expect("seal announcement");
    target
        .node
        .handle_envelope(&envelope, Some(sender.peer_id()))
        .await
        .expect("announcement handling")
}
