//! Deterministic seed derivation.
//!
//! Optimizers must run training under a seed derived from their commitment,
//! so results are reproducible and lucky-seed grinding is impossible: a new
//! seed requires a new commitment. Evaluators generate synthetic data under
//! a per-evaluator seed that additionally mixes in the chain tip at quorum
//! selection, which the optimizer cannot predict at commit time.

use doin_types::Digest;

/// A derived seed: the full digest for verification plus a 64-bit value for
/// seeding plugin RNGs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub digest: Digest,
    pub value: u64,
}

impl Seed {
    fn from_digest(digest: Digest) -> Self {
        let bytes = digest.as_bytes();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[..8]);
        Self {
            digest,
            value: u64::from_be_bytes(prefix),
        }
    }
}

/// Seed the optimizer must use for its training run:
/// `H(commit_hash || domain_id)`.
pub fn optimization_seed(commit_hash: &Digest, domain_id: &str) -> Seed {
    let mut bytes = Vec::with_capacity(32 + domain_id.len());
    bytes.extend_from_slice(commit_hash.as_bytes());
    bytes.extend_from_slice(domain_id.as_bytes());
    Seed::from_digest(Digest::hash(&bytes))
}

/// Per-evaluator synthetic-data seed:
/// `H(commit_hash || domain_id || evaluator_id || chain_tip_hash)`.
///
/// Each evaluator tests on different synthetic data, so an optimizer cannot
/// pre-train against the verification set.
pub fn synthetic_data_seed(
    commit_hash: &Digest,
    domain_id: &str,
    evaluator_id: &doin_types::PeerId,
    chain_tip_hash: &Digest,
) -> Seed {
    let mut bytes = Vec::with_capacity(32 + domain_id.len() + 32 + 32);
    bytes.extend_from_slice(commit_hash.as_bytes());
    bytes.extend_from_slice(domain_id.as_bytes());
    bytes.extend_from_slice(evaluator_id.as_bytes());
    bytes.extend_from_slice(chain_tip_hash.as_bytes());
    Seed::from_digest(Digest::hash(&bytes))
}

/// Check a declared optimization seed against the deterministic derivation.
pub fn verify_optimization_seed(commit_hash: &Digest, domain_id: &str, declared: u64) -> bool {
    optimization_seed(commit_hash, domain_id).value == declared
}
