//! `EchoAgent` — a trivial built-in that reflects its input.
//!
//! Used by the CLI `run` subcommand to dry-run a workflow definition without
//! any real capabilities wired in: every step "succeeds" with its resolved
//! input as output, so layering, templating, and propagation can be
//! inspected end to end.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Agent, AgentContext, AgentError, AgentResult};

pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: Value, ctx: &AgentContext) -> Result<AgentResult, AgentError> {
        debug!(step_id = %ctx.step_id, "echoing resolved input");
        let output = json!({ "agent": self.name, "echo": input });
        Ok(AgentResult::ok(output, 1.0)
            .with_trace(vec![format!("echoed input for step '{}'", ctx.step_id)]))
    }
}
