//! Finality checkpoints.
//!
//! A block is final once `confirmation_depth` successors exist on the
//! heaviest chain; operators may also pin explicit checkpoints. No
//! reorganization may cross a finalized block, which bounds reorg depth and
//! defeats long-range history rewrites.

use chrono::{DateTime, Utc};
use doin_types::{Digest, DoinError, Result};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Implicit,
    Explicit,
    External,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Checkpoint {
    pub height: u64,
    pub block_hash: Digest,
    pub timestamp: DateTime<Utc>,
    pub source: CheckpointSource,
}

pub struct FinalityManager {
    confirmation_depth: u64,
    checkpoints: Vec<Checkpoint>,
}

impl FinalityManager {
    pub fn new(confirmation_depth: u64, genesis_hash: Digest) -> Self {
        // Genesis is final by construction.
        Self {
            confirmation_depth,
            checkpoints: vec![Checkpoint {
                height: 0,
                block_hash: genesis_hash,
                timestamp: Utc::now(),
                source: CheckpointSource::Explicit,
            }],
        }
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    pub fn latest_checkpoint(&self) -> &Checkpoint {
        self.checkpoints.last().expect("genesis checkpoint always present")
    }

    /// Highest finalized height. Blocks at or below it are immutable.
    pub fn finalized_height(&self) -> u64 {
        self.latest_checkpoint().height
    }

    /// Pin an explicit checkpoint. Fails if it would revert finality.
    pub fn add_checkpoint(
        &mut self,
        height: u64,
        block_hash: Digest,
        source: CheckpointSource,
    ) -> Result<&Checkpoint> {
        if height <= self.finalized_height() {
            return Err(DoinError::ReorgBelowFinality {
                finalized: self.finalized_height(),
                target: height,
            });
        }
        self.checkpoints.push(Checkpoint {
            height,
            block_hash,
            timestamp: Utc::now(),
            source,
        });
        info!(height, hash = %block_hash, ?source, "Checkpoint added");
        Ok(self.latest_checkpoint())
    }

    /// Called after a block lands on the canonical chain. Creates an
    /// implicit checkpoint once a block is buried `confirmation_depth` deep.
    pub fn on_new_block(
        &mut self,
        chain_height: u64,
        hash_at_depth: Option<Digest>,
    ) -> Option<&Checkpoint> {
        let hash = hash_at_depth?;
        let candidate = chain_height.checked_sub(self.confirmation_depth)?;
        if candidate <= self.finalized_height() {
            return None;
        }
        self.checkpoints.push(Checkpoint {
            height: candidate,
            block_hash: hash,
            timestamp: Utc::now(),
            source: CheckpointSource::Implicit,
        });
        Some(self.latest_checkpoint())
    }

    /// Whether rolling the chain back to `target_height` (re-writing every
    /// block above it) is permitted.
    pub fn is_reorg_allowed(&self, target_height: u64) -> bool {
        target_height >= self.finalized_height()
    }

    /// A block claiming a checkpointed height must carry the checkpointed
    /// hash.
    pub fn validate_block_ancestry(&self, height: u64, block_hash: &Digest) -> bool {
        self.checkpoints
            .iter()
            .all(|cp| cp.height != height || cp.block_hash == *block_hash)
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> FinalityManager {
        FinalityManager::new(6, Digest::hash(b"genesis"))
    }

    #[test]
    fn test_genesis_finalized() {
        let m = manager();
        assert_eq!(m.finalized_height(), 0);
        assert!(m.is_reorg_allowed(0));
    }

    #[test]
    fn test_implicit_finality_at_depth() {
        let mut m = manager();
        // Height 6: block 0 is already final, nothing new.
        assert!(m.on_new_block(6, Some(Digest::hash(b"b0"))).is_none());
        // Height 7 buries block 1 six deep.
        let cp = m.on_new_block(7, Some(Digest::hash(b"b1"))).unwrap();
        assert_eq!(cp.height, 1);
        assert_eq!(cp.source, CheckpointSource::Implicit);
        assert_eq!(m.finalized_height(), 1);
    }

    #[test]
    fn test_depth_minus_one_still_reorgable() {
        let mut m = manager();
        m.on_new_block(16, Some(Digest::hash(b"b10"))).unwrap();
        assert_eq!(m.finalized_height(), 10);
        // Rolling back to height 10 (rewriting 11+) is fine.
        assert!(m.is_reorg_allowed(10));
        // Rolling back to height 9 would rewrite finalized block 10.
        assert!(!m.is_reorg_allowed(9));
    }

    #[test]
    fn test_explicit_checkpoint_cannot_revert() {
        let mut m = manager();
        m.add_checkpoint(5, Digest::hash(b"b5"), CheckpointSource::Explicit)
            .unwrap();
        let err = m
            .add_checkpoint(3, Digest::hash(b"b3"), CheckpointSource::Explicit)
            .unwrap_err();
        assert!(matches!(err, DoinError::ReorgBelowFinality { .. }));
    }

    #[test]
    fn test_ancestry_validation() {
        let mut m = manager();
        let hash = Digest::hash(b"b5");
        m.add_checkpoint(5, hash, CheckpointSource::Explicit).unwrap();
        assert!(m.validate_block_ancestry(5, &hash));
        assert!(!m.validate_block_ancestry(5, &Digest::hash(b"other")));
        assert!(m.validate_block_ancestry(6, &Digest::hash(b"anything")));
    }
}
