use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering},
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use foreman_backend_memory::MemoryBackend;
use foreman_core_backend::{
    BackendError, BackendResult, ClaimExpiredMessage, ClaimQueue, DependencyTracker,
    EventPublisher, MessageReceipt, PendingQueue, Task, TaskExceptionMessage, TaskPendingMessage,
    TaskResolution, TaskStore,
};

/// Memory backend wrapper that injects failures into selected operations.
#[derive(Clone)]
pub struct FaultInjectingBackend {
    inner: MemoryBackend,
    remaining_modify_failures: Arc<AtomicUsize>,
    fail_polls: Arc<AtomicBool>,
    hang_polls: Arc<AtomicBool>,
    ignore_load_predicate: Arc<AtomicBool>,
    modify_calls: Arc<AtomicUsize>,
    poll_calls: Arc<AtomicUsize>,
}

impl FaultInjectingBackend {
    fn wrap(inner: MemoryBackend) -> Self {
        Self {
            inner,
            remaining_modify_failures: Arc::new(AtomicUsize::new(0)),
            fail_polls: Arc::new(AtomicBool::new(false)),
            hang_polls: Arc::new(AtomicBool::new(false)),
            ignore_load_predicate: Arc::new(AtomicBool::new(false)),
            modify_calls: Arc::new(AtomicUsize::new(0)),
            poll_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `failures` calls to `modify_task`, then delegate.
    pub fn with_modify_failures(inner: MemoryBackend, failures: usize) -> Self {
        let backend = Self::wrap(inner);
        backend
            .remaining_modify_failures
            .store(failures, AtomicOrdering::SeqCst);
        backend
    }

    /// Fail every `poll_claim_queue` call.
    pub fn with_poll_failures(inner: MemoryBackend) -> Self {
        let backend = Self::wrap(inner);
        backend.fail_polls.store(true, AtomicOrdering::SeqCst);
        backend
    }

    /// Make every `poll_claim_queue` call block forever.
    pub fn with_hanging_polls(inner: MemoryBackend) -> Self {
        let backend = Self::wrap(inner);
        backend.hang_polls.store(true, AtomicOrdering::SeqCst);
        backend
    }

    /// Return tasks from `load_if_taken_until` without applying the
    /// `taken_until` predicate, modelling a store that ignores it.
    pub fn with_predicate_ignoring_loads(inner: MemoryBackend) -> Self {
        let backend = Self::wrap(inner);
        backend
            .ignore_load_predicate
            .store(true, AtomicOrdering::SeqCst);
        backend
    }

    /// Toggle `poll_claim_queue` failures at runtime.
    pub fn set_poll_failures(&self, fail: bool) {
        self.fail_polls.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub fn modify_calls(&self) -> usize {
        self.modify_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TaskStore for FaultInjectingBackend {
    fn clone_box(&self) -> Box<dyn TaskStore> {
        Box::new(self.clone())
    }

    async fn load_if_taken_until(
        &self,
        task_id: Uuid,
        taken_until: DateTime<Utc>,
    ) -> BackendResult<Option<Task>> {
        if self.ignore_load_predicate.load(AtomicOrdering::SeqCst) {
            return Ok(self.inner.task(task_id));
        }
        self.inner.load_if_taken_until(task_id, taken_until).await
    }

    async fn modify_task(
        &self,
        task: Task,
        modifier: &(dyn for<'a> Fn(&'a mut Task) + Send + Sync),
    ) -> BackendResult<Task> {
        self.modify_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let remaining = self.remaining_modify_failures.load(AtomicOrdering::SeqCst);
        if remaining > 0 {
            self.remaining_modify_failures
                .store(remaining - 1, AtomicOrdering::SeqCst);
            return Err(BackendError::Message(
                "injected modify_task failure".to_string(),
            ));
        }
        self.inner.modify_task(task, modifier).await
    }
}

#[async_trait::async_trait]
impl ClaimQueue for FaultInjectingBackend {
    fn clone_box(&self) -> Box<dyn ClaimQueue> {
        Box::new(self.clone())
    }

    async fn poll_claim_queue(&self) -> BackendResult<Vec<ClaimExpiredMessage>> {
        self.poll_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.hang_polls.load(AtomicOrdering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.fail_polls.load(AtomicOrdering::SeqCst) {
            return Err(BackendError::Message(
                "injected poll_claim_queue failure".to_string(),
            ));
        }
        self.inner.poll_claim_queue().await
    }

    async fn remove_message(&self, receipt: &MessageReceipt) -> BackendResult<()> {
        self.inner.remove_message(receipt).await
    }
}

#[async_trait::async_trait]
impl PendingQueue for FaultInjectingBackend {
    fn clone_box(&self) -> Box<dyn PendingQueue> {
        Box::new(self.clone())
    }

    async fn put_pending_message(&self, task: &Task, run_id: u32) -> BackendResult<()> {
        self.inner.put_pending_message(task, run_id).await
    }
}

#[async_trait::async_trait]
impl EventPublisher for FaultInjectingBackend {
    fn clone_box(&self) -> Box<dyn EventPublisher> {
        Box::new(self.clone())
    }

    async fn task_pending(
        &self,
        message: TaskPendingMessage,
        routes: &[String],
    ) -> BackendResult<()> {
        self.inner.task_pending(message, routes).await
    }

    async fn task_exception(
        &self,
        message: TaskExceptionMessage,
        routes: &[String],
    ) -> BackendResult<()> {
        self.inner.task_exception(message, routes).await
    }
}

#[async_trait::async_trait]
impl DependencyTracker for FaultInjectingBackend {
    fn clone_box(&self) -> Box<dyn DependencyTracker> {
        Box::new(self.clone())
    }

    async fn resolve_task(
        &self,
        task_id: Uuid,
        task_group_id: Uuid,
        scheduler_id: &str,
        resolution: TaskResolution,
    ) -> BackendResult<()> {
        self.inner
            .resolve_task(task_id, task_group_id, scheduler_id, resolution)
            .await
    }
}
