//! The `Agent` trait — the capability contract every agent must fulfil.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AgentError;

// ---------------------------------------------------------------------------
// SharedMemory
// ---------------------------------------------------------------------------

/// Run-scoped shared key/value context, readable and writable by any agent
/// during invocation.
///
/// Defined here (in the agents crate) so both the engine and individual agent
/// implementations can import it without a circular dependency. The engine's
/// memory store serializes all writes, so concurrent agents never lose a
/// write — but siblings in the same layer must not assume any ordering
/// relative to each other.
#[async_trait]
pub trait SharedMemory: Send + Sync {
    /// Read a single key, observing all writes committed before this call.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Write a single key. The write is committed before the call returns.
    async fn put(&self, key: &str, value: Value);

    /// Copy of the full memory map as of this call.
    async fn snapshot(&self) -> HashMap<String, Value>;
}

// ---------------------------------------------------------------------------
// AgentContext
// ---------------------------------------------------------------------------

/// Shared context passed to every agent during invocation.
#[derive(Clone)]
pub struct AgentContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub run_id: uuid::Uuid,
    /// ID of the step being executed.
    pub step_id: String,
    /// Run-scoped shared memory.
    pub memory: Arc<dyn SharedMemory>,
}

// ---------------------------------------------------------------------------
// AgentResult
// ---------------------------------------------------------------------------

/// Self-reported outcome of a single agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ok,
    Error,
}

/// What an agent hands back from one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Structured output, recorded under the step's ID for downstream steps.
    pub output: Value,
    /// Self-assessed confidence in `[0, 1]`.
    pub confidence: f64,
    /// Ordered reasoning lines, folded into the run's trace log.
    pub trace: Vec<String>,
    /// `Ok` or `Error` — an `Error` status fails the step exactly like a
    /// raised [`AgentError`].
    pub status: AgentStatus,
}

impl AgentResult {
    /// Successful result with the given output and confidence.
    pub fn ok(output: Value, confidence: f64) -> Self {
        Self {
            output,
            confidence,
            trace: Vec::new(),
            status: AgentStatus::Ok,
        }
    }

    /// Attach reasoning-trace lines.
    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// The core capability trait.
///
/// Agents are opaque to the engine: any persistence or notification they
/// trigger is their own concern. Failure is reported either through `Err` or
/// through `AgentResult { status: Error, .. }` — both are captured by the
/// step executor, never propagated.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry name this agent is looked up under.
    fn name(&self) -> &str;

    /// Execute the capability against the resolved step input.
    async fn invoke(&self, input: Value, ctx: &AgentContext) -> Result<AgentResult, AgentError>;
}
