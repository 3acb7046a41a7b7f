use chrono::{DateTime, Utc};
use uuid::Uuid;

use foreman_core_backend::{BackendError, BackendResult, Task, TaskStore};

#[async_trait::async_trait]
impl TaskStore for crate::MemoryBackend {
    fn clone_box(&self) -> Box<dyn TaskStore> {
        Box::new(self.clone())
    }

    async fn load_if_taken_until(
        &self,
        task_id: Uuid,
        taken_until: DateTime<Utc>,
    ) -> BackendResult<Option<Task>> {
        let tasks = self.tasks.lock().expect("tasks poisoned");
        Ok(tasks
            .get(&task_id)
            .filter(|task| task.taken_until == taken_until)
            .cloned())
    }

    async fn modify_task(
        &self,
        task: Task,
        modifier: &(dyn for<'a> Fn(&'a mut Task) + Send + Sync),
    ) -> BackendResult<Task> {
        let mut snapshot = task;
        loop {
            let mut candidate = snapshot.clone();
            modifier(&mut candidate);
            if candidate == snapshot {
                return Ok(snapshot);
            }
            let mut tasks = self.tasks.lock().expect("tasks poisoned");
            let stored = tasks.get_mut(&snapshot.task_id).ok_or_else(|| {
                BackendError::Message(format!("no such task: {}", snapshot.task_id))
            })?;
            if stored.version == snapshot.version {
                candidate.version += 1;
                *stored = candidate.clone();
                return Ok(candidate);
            }
            // Lost the version race; re-apply the modifier to the stored row.
            snapshot = stored.clone();
        }
    }
}
