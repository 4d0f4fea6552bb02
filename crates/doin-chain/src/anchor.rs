//! External anchoring.
//!
//! At configured intervals the node publishes `(height, block_hash)` to an
//! independently-secured ledger, giving outside observers tamper evidence.
//! A received anchor that disagrees with local history is the strongest
//! possible alarm: the node enters SUSPECT mode and stops making progress
//! until an operator intervenes.

use chrono::{DateTime, Utc};
use doin_types::Digest;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Anchor {
    pub height: u64,
    pub block_hash: Digest,
    pub timestamp: DateTime<Utc>,
}

/// Pluggable publication channel with the `(height, block_hash, timestamp)`
/// contract. Production sinks (another chain, a transparency log) live
/// outside the core.
pub trait AnchorSink: Send + Sync {
    fn publish(&self, anchor: &Anchor) -> Result<(), String>;
}

/// Verdict of checking a received anchor against local history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorVerdict {
    Match,
    Divergence,
    /// The local chain has no block at the anchored height yet.
    Unknown,
}

pub struct ExternalAnchorManager {
    interval_blocks: u64,
    sink: Option<Arc<dyn AnchorSink>>,
    published: Vec<Anchor>,
}

impl ExternalAnchorManager {
    pub fn new(interval_blocks: u64, sink: Option<Arc<dyn AnchorSink>>) -> Self {
        Self {
            interval_blocks: interval_blocks.max(1),
            sink,
            published: Vec::new(),
        }
    }

    pub fn should_anchor(&self, height: u64) -> bool {
        height > 0 && height % self.interval_blocks == 0
    }

    /// Publish an anchor for the given canonical block.
    pub fn publish(&mut self, height: u64, block_hash: Digest) -> Anchor {
        let anchor = Anchor {
            height,
            block_hash,
            timestamp: Utc::now(),
        };
        if let Some(sink) = &self.sink {
            if let Err(reason) = sink.publish(&anchor) {
                error!(height, %reason, "Anchor publication failed");
            } else {
                info!(height, hash = %block_hash, "Anchor published");
            }
        }
        self.published.push(anchor.clone());
        anchor
    }

    /// Compare a received anchor to the local canonical hash at its height.
    pub fn verify_received(&self, received: &Anchor, local_hash: Option<Digest>) -> AnchorVerdict {
        match local_hash {
            None => AnchorVerdict::Unknown,
            Some(hash) if hash == received.block_hash => AnchorVerdict::Match,
            Some(_) => {
                error!(
                    height = received.height,
                    expected = %received.block_hash,
                    "Local chain diverges from external anchor"
                );
                AnchorVerdict::Divergence
            }
        }
    }

    pub fn published(&self) -> &[Anchor] {
        &self.published
    }
}

/// In-memory sink for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryAnchorSink {
    anchors: Mutex<Vec<Anchor>>,
}

impl MemoryAnchorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchors(&self) -> Vec<Anchor> {
        self.anchors.lock().expect("anchor sink lock poisoned").clone()
    }
}

impl AnchorSink for MemoryAnchorSink {
    fn publish(&self, anchor: &Anchor) -> Result<(), String> {
        self.anchors
            .lock()
            .map_err(|e| e.to_string())?
            .push(anchor.clone());
        Ok(())
    }
}
