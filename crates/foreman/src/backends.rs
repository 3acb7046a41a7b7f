//! Backend seam over the queue's persistence and messaging crates.

pub use foreman_backend_memory::{
    DependencyResolution, MemoryBackend, PendingMessage, PublishedEvent,
};
pub use foreman_core_backend::{
    BackendError, BackendResult, ClaimExpiredMessage, ClaimQueue, DependencyTracker,
    EventPublisher, MessageReceipt, PendingQueue, ReasonCreated, ReasonResolved, Run, RunState,
    RunStatus, Task, TaskExceptionMessage, TaskPendingMessage, TaskResolution, TaskStatus,
    TaskStore,
};
