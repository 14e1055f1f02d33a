//! Core domain models for the orchestration engine.
//!
//! These types are the source of truth for what a workflow and a run look
//! like in memory. A `Workflow` is immutable once validated; an
//! `ExecutionRun` is mutated only by the orchestration engine and becomes
//! immutable once it reaches a terminal status. Both serialize cleanly so
//! runs can be snapshotted to a [`store::SnapshotStore`] as single JSON
//! documents.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::trace::TraceEntry;

// ---------------------------------------------------------------------------
// ConvergencePredicate
// ---------------------------------------------------------------------------

/// Decides when a recursive group stops iterating.
///
/// Evaluated after every round over the latest one or two rounds' results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvergencePredicate {
    /// Every member's confidence reached the threshold. Satisfiable on
    /// round 1.
    MinConfidence { threshold: f64 },
    /// Every member's confidence moved less than `threshold` since the
    /// previous round. Needs at least two rounds.
    ConfidenceDelta { threshold: f64 },
    /// Every member produced the same output as in the previous round.
    StableOutput,
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier within this workflow (referenced by `depends_on`
    /// and by `${id.path}` template placeholders).
    pub id: String,
    /// Name of the registered agent capability this step invokes.
    pub agent: String,
    /// Input template. `${stepId.path}` reads a dependency's output,
    /// `${memory.key}` reads shared memory, `${previous.path}` reads the
    /// prior round inside a recursive group. Absent means the agent is
    /// invoked with an empty object.
    #[serde(default)]
    pub input: Option<String>,
    /// Step ids that must reach a terminal status before this step runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// A critical step's failure fails the whole run and stops downstream
    /// dispatch.
    #[serde(default)]
    pub critical: bool,
    /// Tag grouping this step into a recursive-refinement group.
    #[serde(default)]
    pub recursive_group: Option<String>,
    /// Iteration cap for the step's recursive group.
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Convergence predicate for the step's recursive group.
    #[serde(default)]
    pub convergence: Option<ConvergencePredicate>,
    /// Scheduling hint: steps expected to share a layer. Never changes
    /// layering; a hint contradicting a dependency is a validation error.
    #[serde(default)]
    pub concurrent_with: Vec<String>,
    /// Per-step invocation timeout override, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl WorkflowStep {
    /// Convenience constructor used by tests and builders; everything
    /// optional stays at its default.
    pub fn new(id: impl Into<String>, agent: impl Into<String>, deps: &[&str]) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            input: None,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            critical: false,
            recursive_group: None,
            max_iterations: None,
            convergence: None,
            concurrent_with: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn with_input(mut self, template: impl Into<String>) -> Self {
        self.input = Some(template.into());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn in_group(
        mut self,
        group: impl Into<String>,
        max_iterations: u32,
        convergence: ConvergencePredicate,
    ) -> Self {
        self.recursive_group = Some(group.into());
        self.max_iterations = Some(max_iterations);
        self.convergence = Some(convergence);
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// How a layer's failures affect its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Wait for every step in the layer regardless of failures.
    #[default]
    WaitAll,
    /// Stop scheduling the moment a critical step fails; steps not yet
    /// started stay pending, in-flight invocations finish.
    FailFast,
}

/// A complete workflow definition — a declarative DAG of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    /// Declaration order is significant: it is the deterministic tie-break
    /// for trace-sequence assignment within a layer.
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub join_policy: JoinPolicy,
    /// Seed values loaded into shared memory before layer 0.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Convenience constructor for tests and builders.
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps,
            join_policy: JoinPolicy::default(),
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_join_policy(mut self, policy: JoinPolicy) -> Self {
        self.join_policy = policy;
        self
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Per-step status over the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    NonConverged,
}

impl StepStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::NonConverged)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending      => write!(f, "pending"),
            Self::Running      => write!(f, "running"),
            Self::Succeeded    => write!(f, "succeeded"),
            Self::Failed       => write!(f, "failed"),
            Self::NonConverged => write!(f, "non_converged"),
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every step and group succeeded.
    Success,
    /// Only non-critical failures, non-converged groups, or steps left
    /// pending by cancellation / fail-fast.
    Partial,
    /// A critical step or group failed.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed  => write!(f, "failed"),
        }
    }
}

/// One instantiated, stateful execution of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Set when cancellation was requested, whether or not any step was
    /// actually skipped because of it.
    pub cancelled: bool,
    pub step_status: HashMap<String, StepStatus>,
    /// Recorded outputs, step id → output mapping. Recursive-group members
    /// carry their last completed round's output.
    pub outputs: HashMap<String, Value>,
    /// Error detail for every failed step.
    pub errors: HashMap<String, String>,
    /// Rounds executed per recursive group.
    pub group_rounds: HashMap<String, u32>,
    /// Shared-memory snapshot at the last barrier (final state once the run
    /// is terminal).
    pub memory: HashMap<String, Value>,
    /// Ordered reasoning-trace log (commit-sequence order).
    pub trace: Vec<TraceEntry>,
}

impl ExecutionRun {
    /// Fresh run with every step pending.
    pub fn new(run_id: Uuid, workflow: &Workflow) -> Self {
        Self {
            run_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            cancelled: false,
            step_status: workflow
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepStatus::Pending))
                .collect(),
            outputs: HashMap::new(),
            errors: HashMap::new(),
            group_rounds: HashMap::new(),
            memory: HashMap::new(),
            trace: Vec::new(),
        }
    }

    /// `succeeded/total` counts used in completion summaries.
    pub fn summary(&self) -> String {
        let succeeded = self
            .step_status
            .values()
            .filter(|s| **s == StepStatus::Succeeded)
            .count();
        format!(
            "{}/{} steps succeeded, status {}",
            succeeded,
            self.step_status.len(),
            self.status
        )
    }
}
