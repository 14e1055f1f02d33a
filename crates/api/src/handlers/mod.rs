//! Request handlers, one module per resource.

pub mod runs;
pub mod workflows;

use std::sync::Arc;

use engine::Engine;
use store::SnapshotStore;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn SnapshotStore>,
}
