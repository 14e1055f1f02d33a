//! Engine-level error and violation types.

use thiserror::Error;
use uuid::Uuid;

/// A single structural problem found by the validator.
///
/// Violations are findings, not control flow: `validate` always returns the
/// complete list, and the same workflow always yields the same list.
#[derive(Debug, Error, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Two or more steps share the same ID.
    #[error("duplicate step ID '{step_id}'")]
    DuplicateStepId { step_id: String },

    /// A `depends_on` entry references a step that doesn't exist.
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    /// The dependency graph is not acyclic.
    #[error("dependency cycle involving steps {step_ids:?}")]
    Cycle { step_ids: Vec<String> },

    /// A template placeholder references a step outside the step's declared
    /// dependency set.
    #[error("step '{step_id}' template references '{reference}' which is not a declared dependency")]
    UndeclaredTemplateReference { step_id: String, reference: String },

    /// `${previous...}` only means something inside a recursive group.
    #[error("step '{step_id}' uses '${{previous...}}' outside a recursive group")]
    PreviousOutsideGroup { step_id: String },

    /// A recursive group needs at least two members.
    #[error("recursive group '{group}' has {members} member(s), needs at least 2")]
    RecursiveGroupTooSmall { group: String, members: usize },

    /// A recursive group's iteration cap is missing, zero, or contested.
    #[error("recursive group '{group}' has no agreed positive max_iterations")]
    InvalidIterationBound { group: String },

    /// A recursive group has no agreed convergence predicate.
    #[error("recursive group '{group}' has no agreed convergence predicate")]
    MissingConvergencePredicate { group: String },

    /// A group name that doubles as a step id would make trace entries and
    /// output references ambiguous.
    #[error("recursive group '{group}' collides with a step ID")]
    GroupNameCollision { group: String },

    /// Some members of a group are critical and some are not; there is no
    /// policy for a partially-critical group.
    #[error("recursive group '{group}' mixes critical and non-critical members")]
    MixedGroupCriticality { group: String },

    /// A `concurrent_with` hint names a step with a dependency path to or
    /// from the hinting step.
    #[error("step '{step_id}' hints concurrency with '{other}' but a dependency path connects them")]
    ConflictingConcurrencyHint { step_id: String, other: String },

    /// A `concurrent_with` hint names a step that doesn't exist.
    #[error("step '{step_id}' hints concurrency with unknown step '{other}'")]
    UnknownConcurrencyHint { step_id: String, other: String },
}

/// Template-resolution failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    /// A placeholder could not be resolved against the available outputs
    /// and memory. Surfaces as a *step* failure, never a run failure.
    #[error("unresolved reference '${{{reference}}}'")]
    UnresolvedReference { reference: String },
}

/// Errors produced at the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow failed validation; no step was executed.
    #[error("workflow failed validation with {} violation(s)", .0.len())]
    Invalid(Vec<Violation>),

    /// A step names an agent the registry doesn't know. Detected while
    /// resolving capabilities, before any step runs.
    #[error("step '{step_id}' names unknown agent '{agent}'")]
    UnknownAgent { step_id: String, agent: String },

    /// The dependency graph could not be layered. Unreachable for a
    /// validated workflow.
    #[error("dependency graph cannot be layered; validate the workflow first")]
    Unlayerable,

    /// No live or stored run under this ID.
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    /// The run's memory actor is gone — the run is already tearing down.
    #[error("run memory channel closed")]
    MemoryChannelClosed,

    /// Persistence error from the store crate.
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}
