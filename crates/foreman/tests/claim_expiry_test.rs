//! End-to-end claim expiration scenarios through a running resolver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use foreman::backends::{
    MemoryBackend, PublishedEvent, ReasonCreated, Run, RunState, Task, TaskResolution,
};
use foreman::{ClaimResolver, ClaimResolverConfig, LogMonitor};
use foreman_backend_fault_injection::FaultInjectingBackend;

fn resolver_config() -> ClaimResolverConfig {
    ClaimResolverConfig {
        polling_delay: Duration::from_millis(10),
        parallelism: 2,
        max_failures: 10,
        max_iteration_time: Duration::from_secs(5),
    }
}

/// Task with one running run whose lease lapsed 30 seconds ago.
fn expired_task(retries_left: u32) -> (Task, DateTime<Utc>) {
    let now = Utc::now();
    let taken_until = now - ChronoDuration::seconds(30);
    let task = Task {
        task_id: Uuid::new_v4(),
        task_group_id: Uuid::new_v4(),
        scheduler_id: "integration".to_string(),
        deadline: now + ChronoDuration::hours(1),
        retries_left,
        taken_until,
        runs: vec![Run {
            state: RunState::Running,
            reason_created: ReasonCreated::Scheduled,
            reason_resolved: None,
            worker_group: Some("test-group".to_string()),
            worker_id: Some("worker-1".to_string()),
            taken_until: Some(taken_until),
            scheduled: now - ChronoDuration::minutes(5),
            started: Some(now - ChronoDuration::minutes(4)),
            resolved: None,
        }],
        routes: vec!["notify.integration".to_string()],
        version: 1,
    };
    (task, taken_until)
}

fn seed(backend: &MemoryBackend, task: &Task, taken_until: DateTime<Utc>) {
    backend.insert_task(task.clone());
    backend.put_claim_message(task.task_id, 0, taken_until);
}

async fn wait_for(deadline: Duration, mut predicate: impl FnMut() -> bool) {
    let started = Instant::now();
    while !predicate() {
        assert!(
            started.elapsed() < deadline,
            "condition not reached within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn expired_claim_is_resolved_and_retried() {
    let backend = MemoryBackend::new();
    let (task, taken_until) = expired_task(2);
    seed(&backend, &task, taken_until);

    let resolver = ClaimResolver::new(backend.clone(), Arc::new(LogMonitor), resolver_config());
    let handle = resolver.start();

    let pending = backend.clone();
    wait_for(Duration::from_secs(2), move || {
        !pending.pending_messages().is_empty()
    })
    .await;
    handle.shutdown().await.expect("clean shutdown");

    let stored = backend.task(task.task_id).expect("stored");
    assert!(stored.runs[0].is_claim_expired());
    assert_eq!(stored.runs[1].state, RunState::Pending);
    assert_eq!(stored.runs[1].reason_created, ReasonCreated::Retry);
    assert_eq!(stored.retries_left, 1);

    let events = backend.published_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        PublishedEvent::TaskPending { message, .. } if message.run_id == 1
    ));
    assert_eq!(backend.claim_queue_len(), 0);
}

#[tokio::test]
async fn expired_claim_without_budget_is_published_as_exception() {
    let backend = MemoryBackend::new();
    let (task, taken_until) = expired_task(0);
    seed(&backend, &task, taken_until);

    let resolver = ClaimResolver::new(backend.clone(), Arc::new(LogMonitor), resolver_config());
    let handle = resolver.start();

    let resolutions = backend.clone();
    wait_for(Duration::from_secs(2), move || {
        !resolutions.resolutions().is_empty()
    })
    .await;
    handle.shutdown().await.expect("clean shutdown");

    let stored = backend.task(task.task_id).expect("stored");
    assert!(stored.runs[0].is_claim_expired());
    assert_eq!(stored.runs.len(), 1);

    let events = backend.published_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        PublishedEvent::TaskException { message, .. }
            if message.run_id == 0 && message.worker_id.as_deref() == Some("worker-1")
    ));
    let resolutions = backend.resolutions();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].resolution, TaskResolution::Exception);
    assert!(backend.pending_messages().is_empty());
    assert_eq!(backend.claim_queue_len(), 0);
}

#[tokio::test]
async fn transient_store_failure_is_retried_by_redelivery() {
    let memory = MemoryBackend::with_invisibility_window(Duration::from_millis(40));
    let backend = FaultInjectingBackend::with_modify_failures(memory.clone(), 1);
    let (task, taken_until) = expired_task(1);
    seed(&memory, &task, taken_until);

    let resolver = ClaimResolver::new(backend.clone(), Arc::new(LogMonitor), resolver_config());
    let handle = resolver.start();

    let pending = memory.clone();
    wait_for(Duration::from_secs(2), move || {
        !pending.pending_messages().is_empty()
    })
    .await;
    handle.shutdown().await.expect("clean shutdown");

    assert!(backend.modify_calls() >= 2, "first attempt failed, redelivery succeeded");
    let stored = memory.task(task.task_id).expect("stored");
    assert!(stored.runs[0].is_claim_expired());
    assert_eq!(stored.retries_left, 0);
    assert_eq!(
        memory.published_events().len(),
        1,
        "single notification despite redelivery"
    );
    assert_eq!(memory.pending_messages().len(), 1);
    assert_eq!(memory.claim_queue_len(), 0);
}

#[tokio::test]
async fn a_backlog_larger_than_one_batch_drains() {
    let backend = MemoryBackend::new();
    let mut with_budget = 0usize;
    let mut without_budget = 0usize;
    for index in 0..40 {
        let retries = (index % 2) as u32;
        if retries > 0 {
            with_budget += 1;
        } else {
            without_budget += 1;
        }
        let (task, taken_until) = expired_task(retries);
        seed(&backend, &task, taken_until);
    }

    let resolver = ClaimResolver::new(backend.clone(), Arc::new(LogMonitor), resolver_config());
    let handle = resolver.start();

    let drained = backend.clone();
    wait_for(Duration::from_secs(5), move || drained.claim_queue_len() == 0).await;
    handle.shutdown().await.expect("clean shutdown");

    assert_eq!(backend.published_events().len(), 40);
    assert_eq!(backend.pending_messages().len(), with_budget);
    assert_eq!(backend.resolutions().len(), without_budget);
}
