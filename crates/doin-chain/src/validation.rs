//! Structural block validation.
//!
//! Every block appended to the store (locally generated or received from a
//! peer) must pass: contiguous index, hash chaining, Merkle recomputation,
//! monotone timestamps within clock skew, and the commit-reveal binding for
//! every accepted optima it carries.

use chrono::{DateTime, Duration, Utc};
use doin_crypto::{merkle_root, verify_commitment};
use doin_types::{Block, Digest, DoinError, Result, Transaction};

pub fn validate_child(
    parent: &Block,
    block: &Block,
    max_timestamp_skew_seconds: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    if block.index() != parent.index() + 1 {
        return Err(DoinError::NonMonotoneIndex {
            expected: parent.index() + 1,
            actual: block.index(),
        });
    }

    if block.previous_hash() != parent.hash {
        return Err(DoinError::HashMismatch(format!(
            "block {} previous_hash {} does not chain to parent {}",
            block.index(),
            block.previous_hash(),
            parent.hash
        )));
    }

    if block.hash != block.header.compute_hash() {
        return Err(DoinError::HashMismatch(format!(
            "block {} hash does not match its header",
            block.index()
        )));
    }

    let leaves: Vec<Digest> = block.transactions.iter().map(|tx| tx.hash()).collect();
    let computed = merkle_root(&leaves);
    if computed != block.header.merkle_root {
        return Err(DoinError::MerkleMismatch {
            expected: block.header.merkle_root.to_hex(),
            computed: computed.to_hex(),
        });
    }

    if block.header.timestamp < parent.header.timestamp {
        return Err(DoinError::TimestampOutOfBounds(format!(
            "block {} timestamp precedes its parent",
            block.index()
        )));
    }
    if block.header.timestamp > now + Duration::seconds(max_timestamp_skew_seconds) {
        return Err(DoinError::TimestampOutOfBounds(format!(
            "block {} timestamp is too far in the future",
            block.index()
        )));
    }

    for tx in &block.transactions {
        if let Transaction::AcceptedOptima { optima, .. } = tx {
            let (Some(parameters), Some(nonce)) = (&optima.parameters, &optima.nonce) else {
                return Err(DoinError::HashMismatch(format!(
                    "accepted optima {} has no revealed parameters",
                    optima.id
                )));
            };
            if !verify_commitment(&optima.commit_hash, parameters, nonce) {
                return Err(DoinError::HashMismatch(format!(
                    "accepted optima {} breaks its commitment",
                    optima.id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_crypto::commitment_hash;
    use doin_types::{
        BlockHeader, ExperimentMeta, Optima, OptimaId, OptimaStatus, PeerId,
    };

    fn child_of(parent: &Block, transactions: Vec<Transaction>) -> Block {
        let leaves: Vec<Digest> = transactions.iter().map(|tx| tx.hash()).collect();
        let header = BlockHeader {
            index: parent.index() + 1,
            previous_hash: parent.hash,
            timestamp: parent.header.timestamp + Duration::seconds(1),
            merkle_root: merkle_root(&leaves),
            generator_id: PeerId::from_bytes([9u8; 32]),
            threshold_used: 1.0,
        };
        Block::new(header, transactions)
    }

    fn accepted_optima_tx(parameters: Vec<u8>, nonce: Vec<u8>, commit: Digest) -> Transaction {
        let mut optima = Optima::new_committed(
            OptimaId::new(),
            "quadratic".to_string(),
            PeerId::from_bytes([1u8; 32]),
            commit,
            -100.0,
            Utc::now(),
        );
        optima.parameters = Some(parameters);
        optima.nonce = Some(nonce);
        optima.status = OptimaStatus::Accepted;
        Transaction::AcceptedOptima {
            optima,
            effective_increment: 1.0,
            reward_fraction: 1.0,
            experiment_meta: ExperimentMeta {
                optimization_seed: 1,
                median_verified: -100.0,
                quorum_size: 3,
            },
        }
    }

    #[test]
    fn test_valid_child_passes() {
        let genesis = Block::genesis();
        let block = child_of(&genesis, vec![]);
        assert!(validate_child(&genesis, &block, 7200, Utc::now()).is_ok());
    }

    #[test]
    fn test_index_gap_rejected() {
        let genesis = Block::genesis();
        let mut block = child_of(&genesis, vec![]);
        block.header.index = 5;
        block.hash = block.header.compute_hash();
        let err = validate_child(&genesis, &block, 7200, Utc::now()).unwrap_err();
        assert!(matches!(err, DoinError::NonMonotoneIndex { .. }));
    }

    #[test]
    fn test_broken_chain_rejected() {
        let genesis = Block::genesis();
        let mut block = child_of(&genesis, vec![]);
        block.header.previous_hash = Digest::hash(b"other");
        block.hash = block.header.compute_hash();
        assert!(validate_child(&genesis, &block, 7200, Utc::now()).is_err());
    }

    #[test]
    fn test_tampered_transactions_break_merkle() {
        let genesis = Block::genesis();
        let mut block = child_of(&genesis, vec![]);
        block
            .transactions
            .push(Transaction::ReputationUpdate {
                peer_id: PeerId::from_bytes([1u8; 32]),
                delta: 0.3,
            });
        let err = validate_child(&genesis, &block, 7200, Utc::now()).unwrap_err();
        assert!(matches!(err, DoinError::MerkleMismatch { .. }));
    }

    #[test]
    fn test_commit_reveal_binding_checked() {
        let genesis = Block::genesis();
        let commit = commitment_hash(&[1, 2, 3], b"n");
        // Parameters do not match the commitment.
        let tx = accepted_optima_tx(vec![1, 2, 4], b"n".to_vec(), commit);
        let block = child_of(&genesis, vec![tx]);
        let err = validate_child(&genesis, &block, 7200, Utc::now()).unwrap_err();
        assert!(matches!(err, DoinError::HashMismatch(_)));

        // Matching binding passes.
        let tx = accepted_optima_tx(vec![1, 2, 3], b"n".to_vec(), commit);
        let block = child_of(&genesis, vec![tx]);
        assert!(validate_child(&genesis, &block, 7200, Utc::now()).is_ok());
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let genesis = Block::genesis();
        let mut block = child_of(&genesis, vec![]);
        block.header.timestamp = Utc::now() + Duration::seconds(100_000);
        block.hash = block.header.compute_hash();
        let err = validate_child(&genesis, &block, 7200, Utc::now()).unwrap_err();
        assert!(matches!(err, DoinError::TimestampOutOfBounds(_)));
    }
}
