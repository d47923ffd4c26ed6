//! Dispatch Hooks
//!
//! Outbound capabilities the orchestrator calls but does not implement:
//! side-effect notifications on state transitions and the run history sink.

use super::control::RunState;
use super::progress::RunSummary;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// State transition worth telling a human about.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    RunStarted { run_id: Uuid, total: usize },
    Sent { index: usize, destination: String },
    Failed { index: usize, destination: String, error: String },
    AutoPaused { sent: usize, count: u32 },
    RunFinished { state: RunState, succeeded: usize, failed: usize },
}

/// Sound, vibration, desktop toast, terminal bell…
///
/// Called inline from the dispatch loop, so implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &DispatchEvent);
}

/// Notifier that only writes structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::RunStarted { run_id, total } => {
                tracing::info!(%run_id, total, "Dispatch run started");
            }
            DispatchEvent::Sent { index, .. } => {
                tracing::debug!(index, "Message sent");
            }
            DispatchEvent::Failed { index, error, .. } => {
                tracing::debug!(index, %error, "Message failed");
            }
            DispatchEvent::AutoPaused { sent, count } => {
                tracing::info!(sent, count, "Dispatch auto-paused");
            }
            DispatchEvent::RunFinished {
                state,
                succeeded,
                failed,
            } => {
                tracing::info!(%state, succeeded, failed, "Dispatch run finished");
            }
        }
    }
}

/// Write-only store for finished runs. Failures are logged, never fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record_run(&self, summary: &RunSummary) -> Result<()>;
}
