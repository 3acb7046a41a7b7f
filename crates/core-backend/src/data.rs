use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
}

impl RunState {
    /// Whether the run can never leave this state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }
}

/// Why a run was added to its task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCreated {
    Scheduled,
    Retry,
    TaskRetry,
    Rerun,
}

/// Why a run reached a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonResolved {
    Completed,
    Failed,
    Canceled,
    DeadlineExceeded,
    ClaimExpired,
    WorkerShutdown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// One attempt to execute a task. A run is identified by its index within
/// [`Task::runs`].
pub struct Run {
    pub state: RunState,
    pub reason_created: ReasonCreated,
    #[serde(default)]
    pub reason_resolved: Option<ReasonResolved>,
    #[serde(default)]
    pub worker_group: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Claim lease deadline while the run is `running`.
    #[serde(default)]
    pub taken_until: Option<DateTime<Utc>>,
    pub scheduled: DateTime<Utc>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: Option<DateTime<Utc>>,
}

impl Run {
    /// Fresh pending run appended when a resolved run still has retry budget.
    pub fn retry(scheduled: DateTime<Utc>) -> Self {
        Self {
            state: RunState::Pending,
            reason_created: ReasonCreated::Retry,
            reason_resolved: None,
            worker_group: None,
            worker_id: None,
            taken_until: None,
            scheduled,
            started: None,
            resolved: None,
        }
    }

    /// Whether this run was resolved as an expired claim.
    pub fn is_claim_expired(&self) -> bool {
        self.state == RunState::Exception
            && self.reason_resolved == Some(ReasonResolved::ClaimExpired)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Persistent task record.
pub struct Task {
    pub task_id: Uuid,
    pub task_group_id: Uuid,
    pub scheduler_id: String,
    /// After this instant any resolution other than deadline-exceeded is
    /// suppressed.
    pub deadline: DateTime<Utc>,
    pub retries_left: u32,
    /// Mirror of the unique running run's `taken_until`, or
    /// [`Task::never_taken`] when no run is running. Conditional-load key for
    /// claim expiration.
    pub taken_until: DateTime<Utc>,
    pub runs: Vec<Run>,
    /// Routing keys the publisher attaches to task events.
    pub routes: Vec<String>,
    /// Concurrency token, bumped by every successful store write.
    pub version: u64,
}

impl Task {
    /// Sentinel `taken_until` for tasks with no running run.
    pub fn never_taken() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    pub fn run(&self, run_id: u32) -> Option<&Run> {
        self.runs.get(run_id as usize)
    }

    pub fn run_mut(&mut self, run_id: u32) -> Option<&mut Run> {
        self.runs.get_mut(run_id as usize)
    }

    /// Event-facing digest of the current task state.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.task_id,
            task_group_id: self.task_group_id,
            scheduler_id: self.scheduler_id.clone(),
            deadline: self.deadline,
            retries_left: self.retries_left,
            runs: self
                .runs
                .iter()
                .enumerate()
                .map(|(run_id, run)| RunStatus {
                    run_id: run_id as u32,
                    state: run.state,
                    reason_created: run.reason_created,
                    reason_resolved: run.reason_resolved,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Digest of one run inside a [`TaskStatus`].
pub struct RunStatus {
    pub run_id: u32,
    pub state: RunState,
    pub reason_created: ReasonCreated,
    #[serde(default)]
    pub reason_resolved: Option<ReasonResolved>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Task digest embedded in published events.
pub struct TaskStatus {
    pub task_id: Uuid,
    pub task_group_id: Uuid,
    pub scheduler_id: String,
    pub deadline: DateTime<Utc>,
    pub retries_left: u32,
    pub runs: Vec<RunStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Receipt identifying a polled queue message for acknowledgement.
pub struct MessageReceipt(pub Uuid);

#[derive(Clone, Debug)]
/// Advisory message that wakes the resolver at or after a claim's expiration.
///
/// Delivery is at-least-once; acknowledgement via the receipt is idempotent.
pub struct ClaimExpiredMessage {
    pub task_id: Uuid,
    pub run_id: u32,
    /// The lease deadline this message advises about. Only meaningful while it
    /// still matches the task record.
    pub taken_until: DateTime<Utc>,
    pub receipt: MessageReceipt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
/// Payload of a task-pending event.
pub struct TaskPendingMessage {
    pub status: TaskStatus,
    pub run_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
/// Payload of a task-exception event.
pub struct TaskExceptionMessage {
    pub status: TaskStatus,
    pub run_id: u32,
    #[serde(default)]
    pub worker_group: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
}

/// Resolution verdict reported to the dependency tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskResolution {
    Completed,
    Failed,
    Exception,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn task_with_runs(runs: Vec<Run>) -> Task {
        let now = Utc::now();
        Task {
            task_id: Uuid::new_v4(),
            task_group_id: Uuid::new_v4(),
            scheduler_id: "-".to_string(),
            deadline: now + Duration::hours(1),
            retries_left: 1,
            taken_until: Task::never_taken(),
            runs,
            routes: Vec::new(),
            version: 1,
        }
    }

    #[test]
    fn status_digests_runs_in_order() {
        let now = Utc::now();
        let mut first = Run::retry(now);
        first.state = RunState::Exception;
        first.reason_resolved = Some(ReasonResolved::ClaimExpired);
        let task = task_with_runs(vec![first, Run::retry(now)]);

        let status = task.status();
        assert_eq!(status.runs.len(), 2);
        assert_eq!(status.runs[0].run_id, 0);
        assert_eq!(
            status.runs[0].reason_resolved,
            Some(ReasonResolved::ClaimExpired)
        );
        assert_eq!(status.runs[1].run_id, 1);
        assert_eq!(status.runs[1].state, RunState::Pending);
    }

    #[test]
    fn never_taken_predates_any_claim() {
        assert!(Task::never_taken() < Utc::now());
    }

    #[test]
    fn only_resolved_states_are_terminal() {
        assert!(RunState::Exception.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Running.is_terminal());
    }

    #[test]
    fn run_states_serialize_kebab_case() {
        let json = serde_json::to_string(&RunState::Exception).expect("serialize");
        assert_eq!(json, "\"exception\"");
        let json = serde_json::to_string(&ReasonResolved::ClaimExpired).expect("serialize");
        assert_eq!(json, "\"claim-expired\"");
        let json = serde_json::to_string(&ReasonCreated::TaskRetry).expect("serialize");
        assert_eq!(json, "\"task-retry\"");
    }
}
