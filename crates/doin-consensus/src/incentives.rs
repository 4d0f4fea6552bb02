//! Incentive model for verification rewards.
//!
//! Verified performance on synthetic data will naturally differ a little
//! from reported performance: a genuinely good model generalizes (small
//! gap), an overfitted one fails badly (large gap). The reward fraction
//! scales with how close the report was to the quorum median.

use doin_types::Domain;

/// Increment credited to the first accepted optima of a domain, before any
/// running best exists to measure against.
pub const FIRST_RESULT_INCREMENT: f64 = 1.0;

/// Bonus multiplier granted when the report lands within a quarter of the
/// tolerance band.
pub const MAX_BONUS_MULTIPLIER: f64 = 1.2;
const BONUS_DISCREPANCY_CUTOFF: f64 = 0.25;

/// Outcome of the incentive computation for one verified optima.
#[derive(Debug, Clone, PartialEq)]
pub struct IncentiveOutcome {
    pub accepted: bool,
    /// `|reported − median_verified| / tolerance`; > 1 means rejection.
    pub discrepancy: f64,
    pub confidence: f64,
    /// Fraction of the base reward earned, in [0, 1.2].
    pub reward_fraction: f64,
    /// Non-negative improvement of the verified median over the domain's
    /// running best (unweighted; the engine applies the domain weight).
    pub effective_increment: f64,
}

impl IncentiveOutcome {
    fn rejected(discrepancy: f64) -> Self {
        Self {
            accepted: false,
            discrepancy,
            confidence: 0.0,
            reward_fraction: 0.0,
            effective_increment: 0.0,
        }
    }
}

/// Evaluate the incentive for a quorum-verified optima.
///
/// `running_best` is the domain's best accepted metric so far; `None` for a
/// domain with no accepted optimae yet.
pub fn evaluate_incentive(
    domain: &Domain,
    reported_metric: f64,
    median_verified: f64,
    running_best: Option<f64>,
) -> IncentiveOutcome {
    let tolerance = domain.tolerance.max(f64::EPSILON);
    let discrepancy = (reported_metric - median_verified).abs() / tolerance;

    if discrepancy > 1.0 {
        return IncentiveOutcome::rejected(discrepancy);
    }

    let confidence = (1.0 - discrepancy).clamp(0.0, 1.0);
    let multiplier = if discrepancy <= BONUS_DISCREPANCY_CUTOFF {
        MAX_BONUS_MULTIPLIER
    } else {
        1.0
    };
    let reward_fraction = multiplier * confidence;

    let effective_increment = match running_best {
        Some(best) => domain.improvement(median_verified, best).max(0.0),
        None => FIRST_RESULT_INCREMENT,
    };

    IncentiveOutcome {
        accepted: true,
        discrepancy,
        confidence,
        reward_fraction,
        effective_increment,
    }
}
