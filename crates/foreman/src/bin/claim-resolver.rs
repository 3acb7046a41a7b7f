//! Claim Resolver - runs the claim-expiration resolution loop.
//!
//! This binary drives the resolver against the in-memory backend, seeded with
//! a handful of tasks whose claims have already lapsed. It exists to exercise
//! the resolver locally end to end; a deployment wires the same task against
//! the service's store and queue backends.
//!
//! Configuration is via environment variables:
//! - FOREMAN_POLLING_DELAY_MS: idle gap between poll iterations (default: 5000)
//! - FOREMAN_CLAIM_PARALLELISM: concurrent poll loops per iteration (default: 4)
//! - FOREMAN_MAX_FAILURES: consecutive iteration failures tolerated (default: 10)
//! - FOREMAN_MAX_ITERATION_TIME_MS: per-iteration wall clock bound (default: 600000)
//! - FOREMAN_SEED_TASKS: expired claims to seed at startup (default: 8)

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use foreman::backends::{MemoryBackend, ReasonCreated, Run, RunState, Task};
use foreman::config::Config;
use foreman::telemetry::LogMonitor;
use foreman::ClaimResolver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman=info,claim_resolver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        polling_delay_ms = config.claim_resolver.polling_delay.as_millis(),
        parallelism = config.claim_resolver.parallelism,
        max_failures = config.claim_resolver.max_failures,
        max_iteration_time_ms = config.claim_resolver.max_iteration_time.as_millis(),
        "starting claim resolver"
    );

    let seed_tasks: usize = std::env::var("FOREMAN_SEED_TASKS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8);

    let backend = MemoryBackend::new();
    seed_expired_claims(&backend, seed_tasks);
    info!(seed_tasks, "seeded expired claims");

    let resolver = ClaimResolver::new(backend, Arc::new(LogMonitor), config.claim_resolver);
    let handle = resolver.start();

    let shutdown = handle.shutdown_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; shutting down claim resolver");
            shutdown.cancel();
        }
    });

    handle.join().await?;
    Ok(())
}

/// Seed tasks whose single running run's lease lapsed half a minute ago,
/// alternating between tasks with and without retry budget.
fn seed_expired_claims(backend: &MemoryBackend, count: usize) {
    let now = Utc::now();
    for index in 0..count {
        let taken_until = now - Duration::seconds(30);
        let task = Task {
            task_id: Uuid::new_v4(),
            task_group_id: Uuid::new_v4(),
            scheduler_id: "local".to_string(),
            deadline: now + Duration::hours(1),
            retries_left: (index % 2) as u32 * 2,
            taken_until,
            runs: vec![Run {
                state: RunState::Running,
                reason_created: ReasonCreated::Scheduled,
                reason_resolved: None,
                worker_group: Some("local".to_string()),
                worker_id: Some(format!("worker-{index}")),
                taken_until: Some(taken_until),
                scheduled: now - Duration::minutes(10),
                started: Some(now - Duration::minutes(9)),
                resolved: None,
            }],
            routes: vec!["notify.local".to_string()],
            version: 1,
        };
        backend.insert_task(task.clone());
        backend.put_claim_message(task.task_id, 0, taken_until);
    }
}
