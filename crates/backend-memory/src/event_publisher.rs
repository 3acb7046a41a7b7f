use foreman_core_backend::{
    BackendResult, EventPublisher, TaskExceptionMessage, TaskPendingMessage,
};

use crate::PublishedEvent;

#[async_trait::async_trait]
impl EventPublisher for crate::MemoryBackend {
    fn clone_box(&self) -> Box<dyn EventPublisher> {
        Box::new(self.clone())
    }

    async fn task_pending(
        &self,
        message: TaskPendingMessage,
        routes: &[String],
    ) -> BackendResult<()> {
        let mut published = self.published.lock().expect("published poisoned");
        published.push(PublishedEvent::TaskPending {
            message,
            routes: routes.to_vec(),
        });
        Ok(())
    }

    async fn task_exception(
        &self,
        message: TaskExceptionMessage,
        routes: &[String],
    ) -> BackendResult<()> {
        let mut published = self.published.lock().expect("published poisoned");
        published.push(PublishedEvent::TaskException {
            message,
            routes: routes.to_vec(),
        });
        Ok(())
    }
}
