//! Evaluation worker pool.
//!
//! Plugin work never runs on the protocol loop: evaluation jobs go to
//! blocking worker threads with a hard wall-clock deadline, and results come
//! back over a channel the loop consumes. A deadline expiry surfaces as
//! `Timeout`, which the coordinator treats as an evaluator no-show.

use crate::plugins::PluginRegistry;
use doin_types::{OptimaId, PeerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub optima_id: OptimaId,
    pub domain_id: String,
    pub evaluator_id: PeerId,
    pub parameters: Vec<u8>,
    /// Per-evaluator synthetic data seed.
    pub synthetic_seed: u64,
    pub synthetic_samples: usize,
    pub deadline: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    Measured {
        optima_id: OptimaId,
        evaluator_id: PeerId,
        metric: f64,
    },
    Timeout {
        optima_id: OptimaId,
        evaluator_id: PeerId,
    },
    Failed {
        optima_id: OptimaId,
        evaluator_id: PeerId,
        reason: String,
    },
}

#[derive(Clone)]
pub struct EvaluationPool {
    registry: Arc<PluginRegistry>,
    results: mpsc::UnboundedSender<EvaluationResult>,
}

impl EvaluationPool {
    pub fn new(registry: Arc<PluginRegistry>) -> (Self, mpsc::UnboundedReceiver<EvaluationResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                results: tx,
            },
            rx,
        )
    }

    /// Submit a job. The result arrives on the receiver returned by `new`.
    pub fn submit(&self, job: EvaluationJob) {
        let registry = self.registry.clone();
        let results = self.results.clone();

        tokio::spawn(async move {
            let optima_id = job.optima_id;
            let evaluator_id = job.evaluator_id;
            let deadline = job.deadline;

            let work = tokio::task::spawn_blocking(move || run_evaluation(&registry, &job));
            let result = match tokio::time::timeout(deadline, work).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => EvaluationResult::Failed {
                    optima_id,
                    evaluator_id,
                    reason: format!("worker panicked: {}", join_error),
                },
                Err(_) => {
                    warn!(optima = %optima_id, "Evaluation deadline expired");
                    EvaluationResult::Timeout {
                        optima_id,
                        evaluator_id,
                    }
                }
            };
            let _ = results.send(result);
        });
    }
}

fn run_evaluation(registry: &PluginRegistry, job: &EvaluationJob) -> EvaluationResult {
    let set = match registry.get(&job.domain_id) {
        Ok(set) => set,
        Err(e) => {
            return EvaluationResult::Failed {
                optima_id: job.optima_id,
                evaluator_id: job.evaluator_id,
                reason: e.to_string(),
            }
        }
    };

    let data = match set
        .generate_synthetic
        .generate(job.synthetic_seed, job.synthetic_samples)
    {
        Ok(data) => data,
        Err(e) => {
            return EvaluationResult::Failed {
                optima_id: job.optima_id,
                evaluator_id: job.evaluator_id,
                reason: format!("synthetic generation failed: {}", e),
            }
        }
    };

    match set.infer.evaluate(&job.parameters, &data) {
        Ok(metric) => {
            debug!(optima = %job.optima_id, metric, "Evaluation measured");
            EvaluationResult::Measured {
                optima_id: job.optima_id,
                evaluator_id: job.evaluator_id,
                metric,
            }
        }
        Err(e) => EvaluationResult::Failed {
            optima_id: job.optima_id,
            evaluator_id: job.evaluator_id,
            reason: e.to_string(),
        },
    }
}
