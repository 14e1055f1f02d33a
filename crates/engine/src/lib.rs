//! `engine` crate — core domain models, validation, dependency resolution,
//! templating, run-scoped memory, and the orchestration engine.

pub mod models;
pub mod error;
pub mod trace;
pub mod validate;
pub mod dag;
pub mod template;
pub mod memory;
pub mod executor;
pub mod recursive;
pub mod notify;
pub mod orchestrator;

pub use models::{
    ConvergencePredicate, ExecutionRun, JoinPolicy, RunStatus, StepStatus, Workflow, WorkflowStep,
};
pub use error::{EngineError, TemplateError, Violation};
pub use trace::{TraceEntry, TracePhase};
pub use validate::validate;
pub use dag::{resolve_layers, Layer, LayerEntry};
pub use orchestrator::{Engine, EngineConfig};
pub use notify::{CompletionEvent, CompletionNotifier, LogNotifier};
