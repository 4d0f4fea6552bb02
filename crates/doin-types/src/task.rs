use crate::canonical::to_canonical_json;
use crate::id::{Digest, OptimaId, TaskId};
use crate::keys::PeerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verification tasks run at the highest priority; inference requests are
/// background work.
pub const PRIORITY_VERIFICATION: u8 = 0;
pub const PRIORITY_INFERENCE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a task asks its claimant to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Verify a revealed optima; addressed to one selected quorum member.
    OptimaVerification {
        optima_id: OptimaId,
        domain_id: String,
        evaluator_id: PeerId,
    },
    /// Serve an inference request against the current champion.
    Inference {
        domain_id: String,
        input_ref: Digest,
    },
}

/// A replicated, pull-based work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub priority: u8,
    pub payload: TaskPayload,
    pub state: TaskState,
    pub requester_id: PeerId,
    #[serde(default)]
    pub claimant: Option<PeerId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result_hash: Option<Digest>,
    #[serde(default)]
    pub measured_metric: Option<f64>,
}

impl Task {
    pub fn new(
        priority: u8,
        payload: TaskPayload,
        requester_id: PeerId,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = Self::compute_id(&payload, &requester_id, &created_at);
        Self {
            id,
            priority,
            payload,
            state: TaskState::Pending,
            requester_id,
            claimant: None,
            created_at,
            claimed_at: None,
            completed_at: None,
            result_hash: None,
            measured_metric: None,
        }
    }

    fn compute_id(
        payload: &TaskPayload,
        requester_id: &PeerId,
        created_at: &DateTime<Utc>,
    ) -> TaskId {
        let content = serde_json::json!({
            "payload": payload,
            "requester_id": requester_id,
            "created_at": created_at.to_rfc3339(),
        });
        let canonical =
            to_canonical_json(&content).expect("task content serialization is infallible");
        TaskId::new(canonical.as_bytes())
    }

    pub fn claim(&mut self, claimant: PeerId, at: DateTime<Utc>) {
        self.state = TaskState::Claimed;
        self.claimant = Some(claimant);
        self.claimed_at = Some(at);
    }

    pub fn complete(&mut self, result_hash: Digest, measured_metric: Option<f64>, at: DateTime<Utc>) {
        self.state = TaskState::Completed;
        self.result_hash = Some(result_hash);
        self.measured_metric = measured_metric;
        self.completed_at = Some(at);
    }

    pub fn fail(&mut self, at: DateTime<Utc>) {
        self.state = TaskState::Failed;
        self.completed_at = Some(at);
    }

    /// Return a claimed task to the pending pool (claim timeout).
    pub fn reopen(&mut self) {
        self.state = TaskState::Pending;
        self.claimant = None;
        self.claimed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verification_task() -> Task {
        Task::new(
            PRIORITY_VERIFICATION,
            TaskPayload::OptimaVerification {
                optima_id: OptimaId::new(),
                domain_id: "quadratic".to_string(),
                evaluator_id: PeerId::from_bytes([2u8; 32]),
            },
            PeerId::from_bytes([1u8; 32]),
            Utc::now(),
        )
    }

    #[test]
    fn test_id_deterministic_from_content() {
        let created = Utc::now();
        let payload = TaskPayload::Inference {
            domain_id: "quadratic".to_string(),
            input_ref: Digest::hash(b"input"),
        };
        let a = Task::new(PRIORITY_INFERENCE, payload.clone(), PeerId::from_bytes([1u8; 32]), created);
        let b = Task::new(PRIORITY_INFERENCE, payload, PeerId::from_bytes([1u8; 32]), created);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_lifecycle() {
        let mut task = verification_task();
        assert_eq!(task.state, TaskState::Pending);

        let evaluator = PeerId::from_bytes([2u8; 32]);
        task.claim(evaluator, Utc::now());
        assert_eq!(task.state, TaskState::Claimed);
        assert_eq!(task.claimant, Some(evaluator));

        task.complete(Digest::hash(b"result"), Some(-99.9), Utc::now());
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.state.is_terminal());
    }

    #[test]
    fn test_reopen_clears_claim() {
        let mut task = verification_task();
        task.claim(PeerId::from_bytes([2u8; 32]), Utc::now());
        task.reopen();
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.claimant.is_none());
    }
}
