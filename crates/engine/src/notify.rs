//! Completion-notification seam.
//!
//! The engine emits one event per run when it reaches a terminal status;
//! the delivery mechanism (webhook, message bus, …) is an external
//! collaborator's concern behind [`CompletionNotifier`].

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::models::RunStatus;

/// Emitted exactly once, at terminal status.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub summary: String,
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, event: CompletionEvent);
}

/// Default notifier: a structured log line, nothing more.
pub struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, event: CompletionEvent) {
        info!(
            run_id = %event.run_id,
            status = %event.status,
            "run complete: {}",
            event.summary
        );
    }
}
