//! Resolver configuration.

use std::time::Duration;

use crate::claim_resolver::ClaimResolverConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub claim_resolver: ClaimResolverConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let polling_delay_ms: u64 = std::env::var("FOREMAN_POLLING_DELAY_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(5_000);

        let parallelism: usize = std::env::var("FOREMAN_CLAIM_PARALLELISM")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(4);
        if parallelism == 0 {
            anyhow::bail!("FOREMAN_CLAIM_PARALLELISM must be at least 1");
        }

        let max_failures: u32 = std::env::var("FOREMAN_MAX_FAILURES")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(10);

        let max_iteration_time_ms: u64 = std::env::var("FOREMAN_MAX_ITERATION_TIME_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(600_000);

        Ok(Self {
            claim_resolver: ClaimResolverConfig {
                polling_delay: Duration::from_millis(polling_delay_ms),
                parallelism,
                max_failures,
                max_iteration_time: Duration::from_millis(max_iteration_time_ms),
            },
        })
    }
}
