//! Plugin capability interfaces.
//!
//! The core treats ML work as three opaque capabilities per domain and never
//! reflects on plugin internals. Parameters cross the boundary as opaque
//! byte vectors (big-endian f64 sequences for the built-in demo domain).

use doin_types::{DoinError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Synthetic evaluation data produced under a deterministic seed.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub seed: u64,
    /// Sample inputs, one vector per sample.
    pub samples: Vec<Vec<f64>>,
}

/// Result of a local optimization run.
#[derive(Debug, Clone)]
pub struct OptimizationArtifact {
    pub parameters: Vec<u8>,
    pub metric: f64,
}

pub trait Optimize: Send + Sync {
    /// Run an optimization pass under the given deterministic seed.
    fn optimize(&self, seed: u64) -> Result<OptimizationArtifact>;
}

pub trait Infer: Send + Sync {
    /// Measure the metric of `parameters` against synthetic data.
    fn evaluate(&self, parameters: &[u8], data: &SyntheticData) -> Result<f64>;

    /// Run the model on one input vector.
    fn infer(&self, parameters: &[u8], input: &[f64]) -> Result<Vec<f64>> {
        let _ = (parameters, input);
        Err(DoinError::MalformedMessage(
            "inference not supported by this plugin".to_string(),
        ))
    }
}

pub trait GenerateSynthetic: Send + Sync {
    fn generate(&self, seed: u64, samples: usize) -> Result<SyntheticData>;
}

/// The capability triple registered for one domain.
#[derive(Clone)]
pub struct PluginSet {
    pub optimize: Arc<dyn Optimize>,
    pub infer: Arc<dyn Infer>,
    pub generate_synthetic: Arc<dyn GenerateSynthetic>,
}

/// Registry mapping `domain_id → capability triple`.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginSet>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, domain_id: &str, set: PluginSet) {
        self.plugins.insert(domain_id.to_string(), set);
    }

    pub fn get(&self, domain_id: &str) -> Result<&PluginSet> {
        self.plugins
            .get(domain_id)
            .ok_or_else(|| DoinError::UnknownDomain(domain_id.to_string()))
    }

    pub fn has(&self, domain_id: &str) -> bool {
        self.plugins.contains_key(domain_id)
    }
}

/// Encode a parameter vector as opaque big-endian bytes.
pub fn encode_parameters(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for v in values {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    bytes
}

/// Decode opaque parameter bytes back into f64s.
pub fn decode_parameters(bytes: &[u8]) -> Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(DoinError::MalformedMessage(format!(
            "parameter blob length {} is not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| f64::from_be_bytes(c.try_into().expect("chunk is 8 bytes")))
        .collect())
}

pub mod builtin {
    //! A small self-contained demo domain: fit coefficients (a, b, c) of
    //! `y = ax² + bx + c` against the target `y = x²`, metric = negative-free
    //! MSE (lower is better). Fully deterministic given its seeds, which is
    //! what the verification protocol needs from any real plugin.

    use super::*;

    const TARGET: [f64; 3] = [1.0, 0.0, 0.0];

    fn xof_stream(seed: u64) -> blake3::OutputReader {
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&seed.to_be_bytes());
        blake3::Hasher::new_keyed(&key).finalize_xof()
    }

    fn next_unit(reader: &mut blake3::OutputReader) -> f64 {
        let mut word = [0u8; 8];
        reader.fill(&mut word);
        (u64::from_be_bytes(word) as f64) / (u64::MAX as f64)
    }

    fn predict(coeffs: &[f64], x: f64) -> f64 {
        coeffs[0] * x * x + coeffs[1] * x + coeffs[2]
    }

    fn mse(coeffs: &[f64], samples: &[Vec<f64>]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples
            .iter()
            .map(|s| {
                let x = s[0];
                let err = predict(coeffs, x) - predict(&TARGET, x);
                err * err
            })
            .sum();
        sum / samples.len() as f64
    }

    pub struct QuadraticOptimizer {
        pub rounds: usize,
    }

    impl Optimize for QuadraticOptimizer {
        fn optimize(&self, seed: u64) -> Result<OptimizationArtifact> {
            let mut reader = xof_stream(seed);
            let samples: Vec<Vec<f64>> = (0..32)
                .map(|_| vec![next_unit(&mut reader) * 4.0 - 2.0])
                .collect();

            // Seeded random search around the target surface.
            let mut best = vec![0.0, 0.0, 0.0];
            let mut best_metric = mse(&best, &samples);
            for _ in 0..self.rounds {
                let candidate: Vec<f64> = (0..3)
                    .map(|i| TARGET[i] + (next_unit(&mut reader) - 0.5) * 0.2)
                    .collect();
                let metric = mse(&candidate, &samples);
                if metric < best_metric {
                    best = candidate;
                    best_metric = metric;
                }
            }

            Ok(OptimizationArtifact {
                parameters: encode_parameters(&best),
                metric: best_metric,
            })
        }
    }

    pub struct QuadraticEvaluator;

    impl Infer for QuadraticEvaluator {
        fn evaluate(&self, parameters: &[u8], data: &SyntheticData) -> Result<f64> {
            let coeffs = decode_parameters(parameters)?;
            if coeffs.len() != 3 {
                return Err(DoinError::BoundsExceeded(format!(
                    "expected 3 coefficients, got {}",
                    coeffs.len()
                )));
            }
            Ok(mse(&coeffs, &data.samples))
        }

        fn infer(&self, parameters: &[u8], input: &[f64]) -> Result<Vec<f64>> {
            let coeffs = decode_parameters(parameters)?;
            if coeffs.len() != 3 || input.is_empty() {
                return Err(DoinError::BoundsExceeded(
                    "quadratic inference needs 3 coefficients and an input".to_string(),
                ));
            }
            Ok(vec![predict(&coeffs, input[0])])
        }
    }

    pub struct QuadraticSynthesizer;

    impl GenerateSynthetic for QuadraticSynthesizer {
        fn generate(&self, seed: u64, samples: usize) -> Result<SyntheticData> {
            let mut reader = xof_stream(seed);
            let samples = (0..samples)
                .map(|_| vec![next_unit(&mut reader) * 4.0 - 2.0])
                .collect();
            Ok(SyntheticData { seed, samples })
        }
    }

    /// The standard demo plugin set.
    pub fn quadratic_plugin_set() -> PluginSet {
        PluginSet {
            optimize: Arc::new(QuadraticOptimizer { rounds: 64 }),
            infer: Arc::new(QuadraticEvaluator),
            generate_synthetic: Arc::new(QuadraticSynthesizer),
        }
    }
}
