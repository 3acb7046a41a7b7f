//! Foreman - task queue service; this crate hosts the claim-expiration
//! resolution subsystem.

pub mod backends;
pub mod claim_resolver;
pub mod config;
pub mod telemetry;

pub use claim_resolver::{ClaimResolver, ClaimResolverConfig, ClaimResolverHandle, ResolverError};
pub use config::Config;
pub use telemetry::{LogMonitor, Monitor};
