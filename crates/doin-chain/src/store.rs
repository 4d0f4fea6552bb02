//! In-memory chain store.
//!
//! Blocks refer to their parents by hash; the store keeps every known block
//! (including side-fork blocks) in a hash-indexed map plus the canonical
//! chain as a height-indexed vector. Mutation is single-writer: only the
//! node's event loop appends or reorgs.

use crate::finality::FinalityManager;
use crate::validation::validate_child;
use chrono::Utc;
use doin_types::{Block, Digest, DoinError, Result};
use std::collections::HashMap;
use tracing::{info, warn};

/// Result of a completed reorganization.
#[derive(Debug)]
pub struct ReorgOutcome {
    pub fork_height: u64,
    pub reverted: Vec<Block>,
    pub applied: Vec<Block>,
}

pub struct ChainStore {
    blocks: HashMap<Digest, Block>,
    canonical: Vec<Digest>,
    max_timestamp_skew_seconds: i64,
}

impl ChainStore {
    pub fn new(max_timestamp_skew_seconds: i64) -> Self {
        let genesis = Block::genesis();
        let genesis_hash = genesis.hash;
        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, genesis);
        Self {
            blocks,
            canonical: vec![genesis_hash],
            max_timestamp_skew_seconds,
        }
    }

    pub fn genesis_hash(&self) -> Digest {
        self.canonical[0]
    }

    pub fn tip(&self) -> &Block {
        let tip_hash = self.canonical.last().expect("canonical chain is never empty");
        &self.blocks[tip_hash]
    }

    pub fn height(&self) -> u64 {
        (self.canonical.len() - 1) as u64
    }

    pub fn get_by_hash(&self, hash: &Digest) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn get_by_height(&self, height: u64) -> Option<&Block> {
        let hash = self.canonical.get(height as usize)?;
        self.blocks.get(hash)
    }

    pub fn hash_at(&self, height: u64) -> Option<Digest> {
        self.canonical.get(height as usize).copied()
    }

    pub fn contains(&self, hash: &Digest) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Canonical blocks in `[from, to]`, clamped to the chain.
    pub fn blocks_in_range(&self, from: u64, to: u64) -> Vec<Block> {
        let to = to.min(self.height());
        if from > to {
            return Vec::new();
        }
        (from..=to)
            .filter_map(|h| self.get_by_height(h).cloned())
            .collect()
    }

    pub fn canonical_blocks(&self) -> impl Iterator<Item = &Block> {
        self.canonical.iter().map(|h| &self.blocks[h])
    }

    /// Append a block to the canonical tip after full validation.
    pub fn append(&mut self, block: Block) -> Result<()> {
        validate_child(
            self.tip(),
            &block,
            self.max_timestamp_skew_seconds,
            Utc::now(),
        )?;
        let hash = block.hash;
        self.blocks.insert(hash, block);
        self.canonical.push(hash);
        Ok(())
    }

    /// Store a block that extends a known non-tip parent (a fork branch).
    /// The block is validated against its parent but does not move the
    /// canonical chain; `reorg_to` does that if fork choice prefers it.
    pub fn insert_side_block(&mut self, block: Block) -> Result<()> {
        let parent = self
            .blocks
            .get(&block.previous_hash())
            .ok_or_else(|| {
                DoinError::HashMismatch(format!(
                    "side block {} has unknown parent {}",
                    block.index(),
                    block.previous_hash()
                ))
            })?
            .clone();
        validate_child(&parent, &block, self.max_timestamp_skew_seconds, Utc::now())?;
        self.blocks.insert(block.hash, block);
        Ok(())
    }

    /// Walk back from `tip_hash` to the canonical chain. Returns the fork
    /// height (last common block) and the branch blocks in ascending order.
    pub fn branch_to(&self, tip_hash: &Digest) -> Result<(u64, Vec<Block>)> {
        let mut branch = Vec::new();
        let mut cursor = *tip_hash;

        loop {
            let block = self.blocks.get(&cursor).ok_or_else(|| {
                DoinError::HashMismatch(format!("unknown block {} while tracing branch", cursor))
            })?;
            if self.hash_at(block.index()) == Some(block.hash) {
                // Reached the canonical chain.
                branch.reverse();
                return Ok((block.index(), branch));
            }
            branch.push(block.clone());
            cursor = block.previous_hash();
        }
    }

    /// Reorganize the canonical chain to end at `tip_hash`. All-or-nothing;
    /// refuses to cross the finalized height.
    pub fn reorg_to(
        &mut self,
        tip_hash: &Digest,
        finality: &FinalityManager,
    ) -> Result<ReorgOutcome> {
        let (fork_height, branch) = self.branch_to(tip_hash)?;

        if !finality.is_reorg_allowed(fork_height) {
            warn!(
                fork_height,
                finalized = finality.finalized_height(),
                "Reorg rejected: crosses finality"
            );
            return Err(DoinError::ReorgBelowFinality {
                finalized: finality.finalized_height(),
                target: fork_height,
            });
        }

        let reverted: Vec<Block> = self.canonical[(fork_height as usize + 1)..]
            .iter()
            .map(|h| self.blocks[h].clone())
            .collect();
        self.canonical.truncate(fork_height as usize + 1);
        for block in &branch {
            self.canonical.push(block.hash);
        }

        info!(
            fork_height,
            reverted = reverted.len(),
            applied = branch.len(),
            new_tip = %self.tip().hash,
            "Chain reorganized"
        );
        Ok(ReorgOutcome {
            fork_height,
            reverted,
            applied: branch,
        })
    }
}
