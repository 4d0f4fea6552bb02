use serde::{Deserialize, Serialize};

/// Capability handles for the three plugin kinds a domain needs.
///
/// The strings are registry keys; the core never inspects plugin internals
/// beyond the capability interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHandles {
    pub optimize: String,
    pub infer: String,
    #[serde(default)]
    pub generate_synthetic: Option<String>,
}

/// Immutable descriptor of a problem domain registered at startup.
///
/// Once a domain id is referenced by chain state it is never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Name of the performance metric ("mse", "accuracy", ...).
    pub performance_metric: String,
    pub higher_is_better: bool,
    /// Weight of this domain toward the proof-of-optimization threshold.
    pub weight: f64,
    /// Absolute metric tolerance used by quorum agreement and incentives.
    pub tolerance: f64,
    /// Allowed parameter-vector dimension range, if the domain constrains it.
    #[serde(default)]
    pub dimension_bounds: Option<(usize, usize)>,
    pub plugins: PluginHandles,
}

impl Domain {
    /// Signed improvement of `candidate` over `baseline`, respecting the
    /// metric direction. Positive means better.
    pub fn improvement(&self, candidate: f64, baseline: f64) -> f64 {
        if self.higher_is_better {
            candidate - baseline
        } else {
            baseline - candidate
        }
    }

    /// Whether `candidate` beats `incumbent` under the metric direction.
    pub fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        self.improvement(candidate, incumbent) > 0.0
    }
}
