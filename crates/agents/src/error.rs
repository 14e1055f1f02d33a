//! Agent-level error type.

use thiserror::Error;

/// Errors raised by an agent's `invoke` method.
///
/// The engine treats every variant the same way: the invocation is captured
/// as a failed step result and never aborts sibling steps. Retry policy is
/// deliberately not encoded here — a retrying wrapper around an [`crate::Agent`]
/// is the extension point.
#[derive(Debug, Error, Clone)]
pub enum AgentError {
    /// The resolved input could not be understood by the agent.
    #[error("invalid agent input: {0}")]
    InvalidInput(String),

    /// The agent started work but could not complete it.
    #[error("agent execution failed: {0}")]
    Execution(String),
}
