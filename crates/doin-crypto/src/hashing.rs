//! Hashing helpers shared by the chain and the commit-reveal scheme.

use doin_types::Digest;

/// Collision-resistant 256-bit hash of arbitrary bytes.
pub fn hash(data: &[u8]) -> Digest {
    Digest::hash(data)
}

/// Binding commitment over opaque parameter bytes and a nonce.
///
/// The parameter bytes are length-prefixed so the parameter/nonce boundary
/// is unambiguous: `H(len(params):u32be || params || nonce)`.
pub fn commitment_hash(parameters: &[u8], nonce: &[u8]) -> Digest {
    let mut bytes = Vec::with_capacity(4 + parameters.len() + nonce.len());
    bytes.extend_from_slice(&(parameters.len() as u32).to_be_bytes());
    bytes.extend_from_slice(parameters);
    bytes.extend_from_slice(nonce);
    Digest::hash(&bytes)
}

/// Check a reveal against its commitment.
pub fn verify_commitment(commit_hash: &Digest, parameters: &[u8], nonce: &[u8]) -> bool {
    commitment_hash(parameters, nonce) == *commit_hash
}

/// Merkle root of a list of leaf digests.
///
/// Pairwise hashing with the last leaf duplicated at odd levels; the empty
/// list maps to the zero digest.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return Digest::ZERO;
    }
    if leaves.len() == 1 {
        return leaves[0];
    }

    let mut level: Vec<Digest> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(pair[0].as_bytes());
            combined.extend_from_slice(pair[1].as_bytes());
            next.push(Digest::hash(&combined));
        }
        level = next;
    }
    level[0]
}
