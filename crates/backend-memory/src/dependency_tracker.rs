use uuid::Uuid;

use foreman_core_backend::{BackendResult, DependencyTracker, TaskResolution};

use crate::DependencyResolution;

#[async_trait::async_trait]
impl DependencyTracker for crate::MemoryBackend {
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
        let mut resolutions = self.resolutions.lock().expect("resolutions poisoned");
        resolutions.push(DependencyResolution {
            task_id,
            task_group_id,
            scheduler_id: scheduler_id.to_string(),
            resolution,
        });
        Ok(())
    }
}
