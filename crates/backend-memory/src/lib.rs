//! In-memory backend that stores tasks, queues, and events for tests or
//! local runs.

mod claim_queue;
mod dependency_tracker;
mod event_publisher;
mod pending_queue;
mod task_store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use foreman_core_backend::{Task, TaskExceptionMessage, TaskPendingMessage, TaskResolution};

const DEFAULT_INVISIBILITY_WINDOW: Duration = Duration::from_secs(30);

/// Claim-queue entry with its visibility bookkeeping.
#[derive(Clone, Debug)]
struct QueuedClaim {
    receipt: Uuid,
    task_id: Uuid,
    run_id: u32,
    taken_until: DateTime<Utc>,
    visible_at: DateTime<Utc>,
}

/// Pending-queue entry recorded for inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMessage {
    pub task_id: Uuid,
    pub run_id: u32,
}

/// Event recorded by the in-memory publisher.
#[derive(Clone, Debug, PartialEq)]
pub enum PublishedEvent {
    TaskPending {
        message: TaskPendingMessage,
        routes: Vec<String>,
    },
    TaskException {
        message: TaskExceptionMessage,
        routes: Vec<String>,
    },
}

/// Resolution recorded by the in-memory dependency tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyResolution {
    pub task_id: Uuid,
    pub task_group_id: Uuid,
    pub scheduler_id: String,
    pub resolution: TaskResolution,
}

/// Backend that keeps all queue state in memory.
#[derive(Clone)]
pub struct MemoryBackend {
    tasks: Arc<Mutex<HashMap<Uuid, Task>>>,
    claim_queue: Arc<Mutex<Vec<QueuedClaim>>>,
    pending_messages: Arc<Mutex<Vec<PendingMessage>>>,
    published: Arc<Mutex<Vec<PublishedEvent>>>,
    resolutions: Arc<Mutex<Vec<DependencyResolution>>>,
    invisibility_window: Duration,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            claim_queue: Arc::new(Mutex::new(Vec::new())),
            pending_messages: Arc::new(Mutex::new(Vec::new())),
            published: Arc::new(Mutex::new(Vec::new())),
            resolutions: Arc::new(Mutex::new(Vec::new())),
            invisibility_window: DEFAULT_INVISIBILITY_WINDOW,
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose polled claim messages become visible again after
    /// `window` when left unacknowledged.
    pub fn with_invisibility_window(window: Duration) -> Self {
        Self {
            invisibility_window: window,
            ..Self::default()
        }
    }

    pub fn insert_task(&self, task: Task) {
        let mut tasks = self.tasks.lock().expect("tasks poisoned");
        tasks.insert(task.task_id, task);
    }

    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        let tasks = self.tasks.lock().expect("tasks poisoned");
        tasks.get(&task_id).cloned()
    }

    /// Enqueue an advisory message that becomes visible at `taken_until`.
    pub fn put_claim_message(&self, task_id: Uuid, run_id: u32, taken_until: DateTime<Utc>) {
        let mut queue = self.claim_queue.lock().expect("claim queue poisoned");
        queue.push(QueuedClaim {
            receipt: Uuid::new_v4(),
            task_id,
            run_id,
            taken_until,
            visible_at: taken_until,
        });
    }

    /// Number of messages still on the claim queue, visible or not.
    pub fn claim_queue_len(&self) -> usize {
        self.claim_queue.lock().expect("claim queue poisoned").len()
    }

    /// Number of claim messages a poll issued now would see.
    pub fn visible_claim_messages(&self) -> usize {
        let now = Utc::now();
        self.claim_queue
            .lock()
            .expect("claim queue poisoned")
            .iter()
            .filter(|message| message.visible_at <= now)
            .count()
    }

    pub fn pending_messages(&self) -> Vec<PendingMessage> {
        self.pending_messages
            .lock()
            .expect("pending messages poisoned")
            .clone()
    }

    pub fn published_events(&self) -> Vec<PublishedEvent> {
        self.published.lock().expect("published poisoned").clone()
    }

    pub fn resolutions(&self) -> Vec<DependencyResolution> {
        self.resolutions.lock().expect("resolutions poisoned").clone()
    }
}
