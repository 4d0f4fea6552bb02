//! Resource and bounds validation at ingress.
//!
//! Adversarial submissions that would crash evaluators (OOM, runaway
//! training) are rejected before any plugin runs. Declared budgets are
//! checked at commit time, materialized parameters again at reveal. The
//! first violation per peer per window is non-slashing; repeats slash.

use doin_types::{DoinParams, Domain, PeerId};
use std::collections::HashMap;
use tracing::warn;

/// Resource budget an optimizer declares with its commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeclaredBudget {
    pub training_seconds: u64,
    pub memory_mb: u64,
    pub param_bytes: usize,
}

/// Result of a bounds check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundsVerdict {
    Ok,
    Violation { reason: String, slashable: bool },
}

impl BoundsVerdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Debug, Default)]
struct OffenseWindow {
    window_start: u64,
    count: u32,
}

pub struct BoundsValidator {
    max_param_bytes: usize,
    max_training_seconds: u64,
    max_memory_mb: u64,
    offense_window_blocks: u64,
    offenses: HashMap<PeerId, OffenseWindow>,
}

impl BoundsValidator {
    pub fn new(params: &DoinParams) -> Self {
        Self {
            max_param_bytes: params.max_param_bytes,
            max_training_seconds: params.max_training_seconds,
            max_memory_mb: params.max_memory_mb,
            offense_window_blocks: params.epoch_length_blocks,
            offenses: HashMap::new(),
        }
    }

    /// Check the budget an optimizer declared at commit time.
    pub fn check_commit(
        &mut self,
        peer: &PeerId,
        budget: &DeclaredBudget,
        current_height: u64,
    ) -> BoundsVerdict {
        let reason = if budget.training_seconds > self.max_training_seconds {
            Some(format!(
                "declared training {}s exceeds cap {}s",
                budget.training_seconds, self.max_training_seconds
            ))
        } else if budget.memory_mb > self.max_memory_mb {
            Some(format!(
                "declared memory {}MB exceeds cap {}MB",
                budget.memory_mb, self.max_memory_mb
            ))
        } else if budget.param_bytes > self.max_param_bytes {
            Some(format!(
                "declared {} parameter bytes exceeds cap {}",
                budget.param_bytes, self.max_param_bytes
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => self.record_offense(peer, reason, current_height),
            None => BoundsVerdict::Ok,
        }
    }

    /// Check materialized parameters at reveal time.
    pub fn check_reveal(
        &mut self,
        peer: &PeerId,
        domain: &Domain,
        parameters: &[u8],
        current_height: u64,
    ) -> BoundsVerdict {
        if parameters.len() > self.max_param_bytes {
            let reason = format!(
                "{} parameter bytes exceeds cap {}",
                parameters.len(),
                self.max_param_bytes
            );
            return self.record_offense(peer, reason, current_height);
        }

        if let Some((min_dims, max_dims)) = domain.dimension_bounds {
            // Parameters are vectors of f64s on the wire.
            let dims = parameters.len() / 8;
            if dims < min_dims || dims > max_dims {
                let reason = format!(
                    "{} dimensions outside domain bounds [{}, {}]",
                    dims, min_dims, max_dims
                );
                return self.record_offense(peer, reason, current_height);
            }
        }

        BoundsVerdict::Ok
    }

    fn record_offense(
        &mut self,
        peer: &PeerId,
        reason: String,
        current_height: u64,
    ) -> BoundsVerdict {
        let window = self.offenses.entry(*peer).or_default();
        if current_height >= window.window_start + self.offense_window_blocks {
            window.window_start = current_height;
            window.count = 0;
        }
        window.count += 1;

        let slashable = window.count > 1;
        warn!(
            peer = %peer,
            offense = window.count,
            slashable,
            %reason,
            "Bounds violation"
        );
        BoundsVerdict::Violation { reason, slashable }
    }
}
