//! Dynamic threshold control.
//!
//! Two correction loops keep block production near the target cadence:
//!
//! 1. Epoch adjustment, every `epoch_length` blocks: compare the epoch's
//!    actual duration to target, scale the threshold by the ratio, clamped
//!    to [0.25, 4.0] per epoch.
//! 2. Per-block EMA smoothing between epochs: an exponential moving average
//!    of block intervals nudges the threshold by at most ±2% per block.
//!
//! Fast blocks raise the threshold (more optimization work required per
//! block); slow blocks lower it. On an epoch boundary the epoch correction
//! applies first, then the per-block correction on the adjusted value.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

pub const EMA_ALPHA: f64 = 0.1;
pub const PER_BLOCK_CORRECTION_LIMIT: f64 = 0.02;
pub const MAX_EPOCH_ADJUSTMENT: f64 = 4.0;
pub const MIN_THRESHOLD: f64 = 1e-6;
pub const MAX_THRESHOLD: f64 = 1e9;

/// Snapshot of the controller for status surfaces.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThresholdStats {
    pub threshold: f64,
    pub target_block_time: f64,
    pub ema_block_time: f64,
    pub blocks_in_epoch: u64,
    pub epoch_length: u64,
    pub total_epoch_adjustments: u64,
}

pub struct ThresholdController {
    threshold: f64,
    target_block_time: f64,
    epoch_length: u64,
    ema_block_time: f64,
    last_block_time: Option<DateTime<Utc>>,
    epoch_start_time: Option<DateTime<Utc>>,
    blocks_in_epoch: u64,
    total_epoch_adjustments: u64,
}

impl ThresholdController {
    pub fn new(initial_threshold: f64, target_block_time: f64, epoch_length: u64) -> Self {
        Self {
            threshold: initial_threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD),
            target_block_time,
            epoch_length: epoch_length.max(1),
            ema_block_time: target_block_time,
            last_block_time: None,
            epoch_start_time: None,
            blocks_in_epoch: 0,
            total_epoch_adjustments: 0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Process a newly appended block and return the threshold for the next
    /// one.
    pub fn on_new_block(&mut self, block_timestamp: DateTime<Utc>) -> f64 {
        let elapsed = match self.last_block_time {
            Some(last) => ((block_timestamp - last).num_milliseconds() as f64 / 1000.0).max(0.001),
            None => self.target_block_time,
        };

        self.ema_block_time = EMA_ALPHA * elapsed + (1.0 - EMA_ALPHA) * self.ema_block_time;
        self.blocks_in_epoch += 1;
        self.last_block_time = Some(block_timestamp);
        if self.epoch_start_time.is_none() {
            self.epoch_start_time = Some(block_timestamp);
        }

        if self.blocks_in_epoch >= self.epoch_length {
            self.epoch_adjustment(block_timestamp);
        }
        self.per_block_correction();

        self.threshold
    }

    fn per_block_correction(&mut self) {
        if self.ema_block_time <= 0.0 {
            return;
        }
        // Blocks faster than target → ratio > 1 → raise the threshold.
        let ratio = self.target_block_time / self.ema_block_time;
        let correction = (ratio - 1.0).clamp(-PER_BLOCK_CORRECTION_LIMIT, PER_BLOCK_CORRECTION_LIMIT);
        self.threshold =
            (self.threshold * (1.0 + correction)).clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        debug!(
            threshold = self.threshold,
            ema = self.ema_block_time,
            correction,
            "Per-block threshold correction"
        );
    }

    fn epoch_adjustment(&mut self, now: DateTime<Utc>) {
        let Some(epoch_start) = self.epoch_start_time else {
            self.reset_epoch(now);
            return;
        };

        let actual = (now - epoch_start).num_milliseconds() as f64 / 1000.0;
        let target = self.epoch_length as f64 * self.target_block_time;
        if actual <= 0.0 || target <= 0.0 {
            self.reset_epoch(now);
            return;
        }

        // A fast epoch (actual < target) scales the threshold up.
        let ratio = (target / actual).clamp(1.0 / MAX_EPOCH_ADJUSTMENT, MAX_EPOCH_ADJUSTMENT);
        self.threshold = (self.threshold * ratio).clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        self.total_epoch_adjustments += 1;
        info!(
            threshold = self.threshold,
            ratio,
            actual_epoch_seconds = actual,
            "Epoch threshold adjustment"
        );
        self.reset_epoch(now);
    }

    fn reset_epoch(&mut self, now: DateTime<Utc>) {
        self.epoch_start_time = Some(now);
        self.blocks_in_epoch = 0;
    }

    pub fn stats(&self) -> ThresholdStats {
        ThresholdStats {
            threshold: self.threshold,
            target_block_time: self.target_block_time,
            ema_block_time: self.ema_block_time,
            blocks_in_epoch: self.blocks_in_epoch,
            epoch_length: self.epoch_length,
            total_epoch_adjustments: self.total_epoch_adjustments,
        }
    }
}
