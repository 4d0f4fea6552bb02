use crate::id::Digest;
use crate::keys::PeerId;
use crate::transaction::Transaction;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Consensus-critical block fields.
///
/// The block hash covers `index || previous_hash || merkle_root || timestamp`;
/// generator and threshold ride along for auditability but are bound through
/// the transactions they influence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub index: u64,
    pub previous_hash: Digest,
    pub timestamp: DateTime<Utc>,
    pub merkle_root: Digest,
    pub generator_id: PeerId,
    /// Proof-of-optimization threshold in force when this block was made.
    pub threshold_used: f64,
}

impl BlockHeader {
    pub fn compute_hash(&self) -> Digest {
        let mut bytes = Vec::with_capacity(8 + 32 + 32 + 8);
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes.extend_from_slice(self.previous_hash.as_bytes());
        bytes.extend_from_slice(self.merkle_root.as_bytes());
        bytes.extend_from_slice(&self.timestamp.timestamp_millis().to_be_bytes());
        Digest::hash(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub hash: Digest,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        let hash = header.compute_hash();
        Self {
            header,
            transactions,
            hash,
        }
    }

    /// The genesis block. Fixed fields (epoch timestamp, zero hashes) so
    /// every node starts from an identical block.
    pub fn genesis() -> Self {
        let header = BlockHeader {
            index: 0,
            previous_hash: Digest::ZERO,
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            merkle_root: Digest::ZERO,
            generator_id: PeerId::from_bytes([0u8; 32]),
            threshold_used: 0.0,
        };
        Self::new(header, Vec::new())
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn previous_hash(&self) -> Digest {
        self.header.previous_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_identical_across_nodes() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.index(), 0);
        assert!(a.previous_hash().is_zero());
    }

    #[test]
    fn test_hash_covers_header_fields() {
        let genesis = Block::genesis();
        let mut header = genesis.header.clone();
        header.index = 1;
        assert_ne!(header.compute_hash(), genesis.hash);

        let mut header2 = genesis.header.clone();
        header2.merkle_root = Digest::hash(b"txs");
        assert_ne!(header2.compute_hash(), genesis.hash);
    }

    #[test]
    fn test_block_hash_set_on_construction() {
        let header = BlockHeader {
            index: 1,
            previous_hash: Block::genesis().hash,
            timestamp: Utc::now(),
            merkle_root: Digest::ZERO,
            generator_id: PeerId::from_bytes([9u8; 32]),
            threshold_used: 1.0,
        };
        let block = Block::new(header.clone(), vec![]);
        assert_eq!(block.hash, header.compute_hash());
    }
}
