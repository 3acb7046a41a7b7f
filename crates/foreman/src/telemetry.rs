//! Error reporting and alerting seam.
//!
//! Structured logging goes through `tracing` directly; the [`Monitor`] trait
//! covers reports that must reach an operator regardless of log level.

use tracing::error;

pub trait Monitor: Send + Sync {
    fn clone_box(&self) -> Box<dyn Monitor>;

    /// Report a non-fatal incident worth operator attention.
    fn report_error(&self, error: &str);

    /// Raise a fatal alert. The process is expected to terminate shortly
    /// after.
    fn alert(&self, message: &str);
}

impl Clone for Box<dyn Monitor> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Monitor that routes reports through tracing.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMonitor;

impl Monitor for LogMonitor {
    fn clone_box(&self) -> Box<dyn Monitor> {
        Box::new(*self)
    }

    fn report_error(&self, error: &str) {
        error!(error, "reported error");
    }

    fn alert(&self, message: &str) {
        error!(message, "alert");
    }
}
