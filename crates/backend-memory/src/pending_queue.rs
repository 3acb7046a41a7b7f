use foreman_core_backend::{BackendResult, PendingQueue, Task};

use crate::PendingMessage;

#[async_trait::async_trait]
impl PendingQueue for crate::MemoryBackend {
    fn clone_box(&self) -> Box<dyn PendingQueue> {
        Box::new(self.clone())
    }

    async fn put_pending_message(&self, task: &Task, run_id: u32) -> BackendResult<()> {
        let mut pending = self
            .pending_messages
            .lock()
            .expect("pending messages poisoned");
        pending.push(PendingMessage {
            task_id: task.task_id,
            run_id,
        });
        Ok(())
    }
}
