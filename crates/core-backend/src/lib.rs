//! Core backend traits for the foreman queue service.

mod data;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use self::data::*;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Abstract persistence backend for task records.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    fn clone_box(&self) -> Box<dyn TaskStore>;

    /// Return the task only if it exists and its `taken_until` equals the
    /// given value. A changed `taken_until` means the claim was reclaimed or
    /// resolved by another actor.
    async fn load_if_taken_until(
        &self,
        task_id: Uuid,
        taken_until: DateTime<Utc>,
    ) -> BackendResult<Option<Task>>;

    /// Apply `modifier` to the task under optimistic concurrency.
    ///
    /// The modifier must decide from whichever snapshot it is handed: on a
    /// version conflict the store reloads the current row and re-applies it.
    /// A modifier that leaves the snapshot unchanged ends the attempt without
    /// a write. Returns the task as stored when the call settled.
    async fn modify_task(
        &self,
        task: Task,
        modifier: &(dyn for<'a> Fn(&'a mut Task) + Send + Sync),
    ) -> BackendResult<Task>;
}

impl Clone for Box<dyn TaskStore> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Advisory queue of claim-expiration messages.
#[async_trait::async_trait]
pub trait ClaimQueue: Send + Sync {
    fn clone_box(&self) -> Box<dyn ClaimQueue>;

    /// Return a batch of due messages, at most 32. Polled messages stay
    /// invisible to other pollers until their invisibility window lapses.
    async fn poll_claim_queue(&self) -> BackendResult<Vec<ClaimExpiredMessage>>;

    /// Acknowledge a message. Removing an already-removed receipt is a no-op.
    async fn remove_message(&self, receipt: &MessageReceipt) -> BackendResult<()>;
}

impl Clone for Box<dyn ClaimQueue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Queue that hands pending runs to workers.
#[async_trait::async_trait]
pub trait PendingQueue: Send + Sync {
    fn clone_box(&self) -> Box<dyn PendingQueue>;

    /// Make `(task, run_id)` available for claiming.
    async fn put_pending_message(&self, task: &Task, run_id: u32) -> BackendResult<()>;
}

impl Clone for Box<dyn PendingQueue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Publisher for user-observable task events.
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    fn clone_box(&self) -> Box<dyn EventPublisher>;

    async fn task_pending(
        &self,
        message: TaskPendingMessage,
        routes: &[String],
    ) -> BackendResult<()>;

    async fn task_exception(
        &self,
        message: TaskExceptionMessage,
        routes: &[String],
    ) -> BackendResult<()>;
}

impl Clone for Box<dyn EventPublisher> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Tracker of inter-task dependencies, told about terminal resolutions.
#[async_trait::async_trait]
pub trait DependencyTracker: Send + Sync {
    fn clone_box(&self) -> Box<dyn DependencyTracker>;

    async fn resolve_task(
        &self,
        task_id: Uuid,
        task_group_id: Uuid,
        scheduler_id: &str,
        resolution: TaskResolution,
    ) -> BackendResult<()>;
}

impl Clone for Box<dyn DependencyTracker> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
