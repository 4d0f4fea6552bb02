//! Block sync handshake.
//!
//! On connect, or on a block announcement more than one ahead of the local
//! tip, nodes exchange `ChainStatus` and request missing ranges in bounded
//! batches. Received blocks are validated by the chain store before they are
//! appended; this module only plans requests and assembles responses.

use crate::messages::{BlockRequestPayload, BlockResponsePayload, ChainStatusPayload};
use doin_types::Block;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// Catching up toward a known remote height.
    Syncing { target_height: u64 },
}

pub struct SyncManager {
    max_blocks_per_response: usize,
    state: SyncState,
}

impl SyncManager {
    pub fn new(max_blocks_per_response: usize) -> Self {
        Self {
            max_blocks_per_response: max_blocks_per_response.max(1),
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self.state, SyncState::Syncing { .. })
    }

    /// Decide whether a peer's status warrants a block request.
    pub fn plan_request(
        &mut self,
        local_height: u64,
        status: &ChainStatusPayload,
    ) -> Option<BlockRequestPayload> {
        if status.height <= local_height {
            if let SyncState::Syncing { target_height } = self.state {
                if local_height >= target_height {
                    self.state = SyncState::Idle;
                }
            }
            return None;
        }

        let from = local_height + 1;
        let to = status
            .height
            .min(from + self.max_blocks_per_response as u64 - 1);
        self.state = SyncState::Syncing {
            target_height: status.height,
        };
        debug!(from, to, remote = status.height, "Sync request planned");
        Some(BlockRequestPayload { from, to })
    }

    /// Next batch toward the current sync target, if any remains.
    pub fn continue_request(&mut self, local_height: u64) -> Option<BlockRequestPayload> {
        match self.state {
            SyncState::Syncing { target_height } if target_height > local_height => {
                let from = local_height + 1;
                let to = target_height.min(from + self.max_blocks_per_response as u64 - 1);
                Some(BlockRequestPayload { from, to })
            }
            _ => None,
        }
    }

    /// Assemble a response for a peer's request, capped at the batch limit.
    /// `blocks` must be the canonical blocks covering the requested range.
    pub fn build_response(&self, blocks: Vec<Block>, local_height: u64) -> BlockResponsePayload {
        let capped: Vec<Block> = blocks.into_iter().take(self.max_blocks_per_response).collect();
        let has_more = capped
            .last()
            .map(|b| b.index() < local_height)
            .unwrap_or(false);
        BlockResponsePayload {
            blocks: capped,
            has_more,
        }
    }

    /// Note progress after validated blocks were appended. Returns true if
    /// the sync target has been reached.
    pub fn on_blocks_applied(&mut self, new_local_height: u64) -> bool {
        match self.state {
            SyncState::Syncing { target_height } if new_local_height >= target_height => {
                self.state = SyncState::Idle;
                true
            }
            SyncState::Idle => true,
            _ => false,
        }
    }
}
