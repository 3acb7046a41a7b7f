use chrono::{Duration as ChronoDuration, Utc};

use foreman_core_backend::{
    BackendError, BackendResult, ClaimExpiredMessage, ClaimQueue, MessageReceipt,
};

const CLAIM_POLL_BATCH: usize = 32;

#[async_trait::async_trait]
impl ClaimQueue for crate::MemoryBackend {
    fn clone_box(&self) -> Box<dyn ClaimQueue> {
        Box::new(self.clone())
    }

    async fn poll_claim_queue(&self) -> BackendResult<Vec<ClaimExpiredMessage>> {
        let window = ChronoDuration::from_std(self.invisibility_window)
            .map_err(|err| BackendError::Message(format!("invalid invisibility window: {err}")))?;
        let now = Utc::now();
        let mut queue = self.claim_queue.lock().expect("claim queue poisoned");
        let mut batch = Vec::new();
        for message in queue.iter_mut() {
            if batch.len() >= CLAIM_POLL_BATCH {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            message.visible_at = now + window;
            batch.push(ClaimExpiredMessage {
                task_id: message.task_id,
                run_id: message.run_id,
                taken_until: message.taken_until,
                receipt: MessageReceipt(message.receipt),
            });
        }
        Ok(batch)
    }

    async fn remove_message(&self, receipt: &MessageReceipt) -> BackendResult<()> {
        let mut queue = self.claim_queue.lock().expect("claim queue poisoned");
        queue.retain(|message| message.receipt != receipt.0);
        Ok(())
    }
}
