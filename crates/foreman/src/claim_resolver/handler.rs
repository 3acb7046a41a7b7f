//! Resolution of a single claim-expiration advisory message.

use chrono::Utc;
use tracing::{debug, info};

use crate::backends::{
    BackendResult, ClaimExpiredMessage, ClaimQueue, DependencyTracker, EventPublisher,
    PendingQueue, ReasonCreated, ReasonResolved, Run, RunState, Task, TaskExceptionMessage,
    TaskPendingMessage, TaskResolution, TaskStore,
};
use crate::telemetry::Monitor;

/// Resolve one advisory message.
///
/// Benign races (the task moved on, the run was reclaimed or resolved by
/// another actor) acknowledge the message without further effect. Errors from
/// the store or queues propagate without acknowledging, so the queue
/// redelivers the message after its invisibility window.
pub(super) async fn handle_message<B>(
    backend: &B,
    monitor: &dyn Monitor,
    message: ClaimExpiredMessage,
) -> BackendResult<()>
where
    B: TaskStore + ClaimQueue + PendingQueue + EventPublisher + DependencyTracker + Send + Sync,
{
    let Some(task) = backend
        .load_if_taken_until(message.task_id, message.taken_until)
        .await?
    else {
        // Task is gone, or the claim was reclaimed or resolved before the
        // message became visible.
        debug!(
            task_id = %message.task_id,
            run_id = message.run_id,
            "no task matching expired claim"
        );
        return backend.remove_message(&message.receipt).await;
    };

    if task.taken_until != message.taken_until {
        // The load above is conditional on taken_until; a mismatch here means
        // the predicate was not applied, and resolving against this row could
        // expire a live claim.
        monitor.report_error(&format!(
            "task {} loaded with taken_until {} against predicate {}",
            task.task_id, task.taken_until, message.taken_until
        ));
        return backend.remove_message(&message.receipt).await;
    }

    let run_id = message.run_id;
    let taken_until = message.taken_until;
    let updated = backend
        .modify_task(task, &|task: &mut Task| {
            let now = Utc::now();
            let last_run_id = task.runs.len().saturating_sub(1) as u32;
            let deadline_passed = task.deadline <= now;
            let task_id = task.task_id;
            let Some(run) = task.run_mut(run_id) else {
                // The claim this message advises about never created a run.
                return;
            };
            if run.state != RunState::Running || run.taken_until != Some(taken_until) {
                // A concurrent reclaim or resolution won the race.
                return;
            }
            if deadline_passed {
                // Past the deadline the deadline path is authoritative;
                // claim-expired here would double-resolve the run.
                return;
            }

            run.state = RunState::Exception;
            run.reason_resolved = Some(ReasonResolved::ClaimExpired);
            run.resolved = Some(now);
            // task.taken_until stays in place so a redelivered message can
            // re-trigger this transition if the fan-out below fails.

            if run_id != last_run_id {
                monitor.report_error(&format!(
                    "resolving non-final run {run_id} of task {task_id} as claim-expired"
                ));
                return;
            }
            if task.retries_left > 0 {
                task.retries_left -= 1;
                task.runs.push(Run::retry(now));
            }
        })
        .await?;

    let Some(run) = updated.run(run_id) else {
        return backend.remove_message(&message.receipt).await;
    };
    let owns_resolution = run.is_claim_expired() && updated.runs.len() <= run_id as usize + 2;
    if !owns_resolution {
        // Another actor resolved the run, or appended runs past our retry and
        // with them took over the user-facing fan-out.
        debug!(
            task_id = %updated.task_id,
            run_id,
            "expired claim already handled elsewhere"
        );
        return backend.remove_message(&message.receipt).await;
    }

    let retry_run = updated.run(run_id + 1).filter(|run| {
        run.state == RunState::Pending && run.reason_created == ReasonCreated::Retry
    });
    if retry_run.is_some() {
        let pending_run_id = run_id + 1;
        backend.put_pending_message(&updated, pending_run_id).await?;
        backend
            .task_pending(
                TaskPendingMessage {
                    status: updated.status(),
                    run_id: pending_run_id,
                },
                &updated.routes,
            )
            .await?;
        info!(
            task_id = %updated.task_id,
            run_id = pending_run_id,
            "task pending after expired claim"
        );
    } else {
        backend
            .resolve_task(
                updated.task_id,
                updated.task_group_id,
                &updated.scheduler_id,
                TaskResolution::Exception,
            )
            .await?;
        backend
            .task_exception(
                TaskExceptionMessage {
                    status: updated.status(),
                    run_id,
                    worker_group: run.worker_group.clone(),
                    worker_id: run.worker_id.clone(),
                },
                &updated.routes,
            )
            .await?;
        info!(
            task_id = %updated.task_id,
            run_id,
            "task exception after expired claim"
        );
    }

    backend.remove_message(&message.receipt).await
}
