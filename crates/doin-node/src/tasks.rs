//! Replicated task queue.
//!
//! Every node holds the same queue view, converged through flooded
//! TASK_CREATED / TASK_CLAIMED / TASK_COMPLETED messages. Claim conflicts
//! resolve to the earliest claim by (timestamp, peer id); claims abandoned
//! past the timeout reopen.

use chrono::{DateTime, Duration, Utc};
use doin_types::{Digest, PeerId, Task, TaskId, TaskState};
use std::collections::HashMap;
use tracing::debug;

/// Outcome of applying a (possibly remote) claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// An earlier claim superseded the current claimant.
    Superseded,
    /// A claim already outranks this one; ignored.
    Outranked,
    NotClaimable,
    UnknownTask,
}

pub struct TaskQueue {
    tasks: HashMap<TaskId, Task>,
    claim_timeout: Duration,
}

impl TaskQueue {
    pub fn new(claim_timeout_seconds: u64) -> Self {
        Self {
            tasks: HashMap::new(),
            claim_timeout: Duration::seconds(claim_timeout_seconds as i64),
        }
    }

    /// Insert a task; replays of the same flood message are idempotent.
    pub fn add(&mut self, task: Task) {
        self.tasks.entry(task.id).or_insert(task);
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Pending tasks ordered by (priority, created_at).
    pub fn pending(&self, limit: usize) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .collect();
        pending.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit);
        pending
    }

    /// Apply a claim. The earliest (timestamp, peer id) claim is
    /// authoritative; a later-arriving earlier claim supersedes.
    pub fn apply_claim(
        &mut self,
        task_id: &TaskId,
        claimant: PeerId,
        claimed_at: DateTime<Utc>,
    ) -> ClaimOutcome {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return ClaimOutcome::UnknownTask;
        };
        match task.state {
            TaskState::Pending => {
                task.claim(claimant, claimed_at);
                debug!(task = %task_id, claimant = %claimant, "Task claimed");
                ClaimOutcome::Claimed
            }
            TaskState::Claimed => {
                let current = (
                    task.claimed_at.unwrap_or(claimed_at),
                    task.claimant.unwrap_or(claimant),
                );
                if (claimed_at, claimant) < current {
                    task.claim(claimant, claimed_at);
                    ClaimOutcome::Superseded
                } else {
                    ClaimOutcome::Outranked
                }
            }
            _ => ClaimOutcome::NotClaimable,
        }
    }

    /// Complete a claimed task. Only the authoritative claimant completes.
    pub fn apply_completion(
        &mut self,
        task_id: &TaskId,
        claimant: &PeerId,
        result_hash: Digest,
        measured_metric: Option<f64>,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        // A completion may race ahead of its claim message.
        if task.state == TaskState::Pending {
            task.claim(*claimant, at);
        }
        if task.state != TaskState::Claimed || task.claimant.as_ref() != Some(claimant) {
            return false;
        }
        task.complete(result_hash, measured_metric, at);
        true
    }

    pub fn apply_failure(&mut self, task_id: &TaskId, at: DateTime<Utc>) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.state.is_terminal() {
            return false;
        }
        task.fail(at);
        true
    }

    /// Reopen claimed tasks whose claimant went quiet. Returns reopened ids.
    pub fn reopen_expired(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        let timeout = self.claim_timeout;
        let mut reopened = Vec::new();
        for task in self.tasks.values_mut() {
            if task.state == TaskState::Claimed {
                let stale = task
                    .claimed_at
                    .map(|at| now - at > timeout)
                    .unwrap_or(true);
                if stale {
                    task.reopen();
                    reopened.push(task.id);
                }
            }
        }
        reopened
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let mut pending = 0;
        let mut claimed = 0;
        let mut completed = 0;
        for task in self.tasks.values() {
            match task.state {
                TaskState::Pending => pending += 1,
                TaskState::Claimed => claimed += 1,
                TaskState::Completed => completed += 1,
                TaskState::Failed => {}
            }
        }
        (pending, claimed, completed)
    }
}
