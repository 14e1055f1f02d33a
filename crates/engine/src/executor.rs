//! Step execution — one agent invocation, fully isolated.
//!
//! Whatever goes wrong inside an invocation — an error raised by the agent,
//! a self-reported `status: error`, a timeout, or an unresolvable input
//! template — is captured as a failed [`StepResult`]. Nothing here ever
//! aborts sibling steps running in the same layer.
//!
//! Every invocation commits exactly two trace entries (request, response)
//! through the memory actor's single writer, which is what gives the trace
//! log a stable total order even though layer siblings run concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use agents::{Agent, AgentContext, AgentStatus};

use crate::memory::MemoryHandle;
use crate::models::{StepStatus, WorkflowStep};
use crate::template;
use crate::trace::TracePhase;

/// Everything a dispatched step needs from its run: identity, the memory
/// handle, the shared worker-pool semaphore, the run's cancellation token,
/// and the default invocation timeout. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct RunContext {
    pub workflow_id: uuid::Uuid,
    pub run_id: uuid::Uuid,
    pub memory: MemoryHandle,
    pub semaphore: Arc<tokio::sync::Semaphore>,
    pub cancel: tokio_util::sync::CancellationToken,
    pub default_timeout: Duration,
}

impl RunContext {
    pub fn agent_ctx(&self, step_id: &str) -> AgentContext {
        AgentContext {
            workflow_id: self.workflow_id,
            run_id: self.run_id,
            step_id: step_id.to_string(),
            memory: Arc::new(self.memory.clone()),
        }
    }
}

/// Terminal outcome of a single step invocation.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    /// `Succeeded` or `Failed` — never an intermediate status.
    pub status: StepStatus,
    pub output: Option<Value>,
    pub confidence: Option<f64>,
    pub error_detail: Option<String>,
}

impl StepResult {
    pub fn succeeded(step_id: impl Into<String>, output: Value, confidence: f64) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Succeeded,
            output: Some(output),
            confidence: Some(confidence),
            error_detail: None,
        }
    }

    pub fn failed(step_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            output: None,
            confidence: None,
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Resolve a step's input template and invoke its agent.
///
/// `outputs` and `memory_snapshot` are the accumulated state as of the
/// prior layer barrier. A resolution failure is a step failure (the
/// cascading-failure path for dependents of failed steps) and skips the
/// invocation entirely.
pub async fn run_step(
    step: &WorkflowStep,
    agent: Arc<dyn Agent>,
    outputs: &HashMap<String, Value>,
    memory_snapshot: &HashMap<String, Value>,
    ctx: &AgentContext,
    memory: &MemoryHandle,
    timeout: Duration,
) -> StepResult {
    let input = match step.input.as_deref() {
        Some(tpl) => match template::resolve(tpl, outputs, memory_snapshot) {
            Ok(input) => input,
            Err(err) => {
                debug!(step_id = %step.id, error = %err, "input resolution failed");
                return StepResult::failed(&step.id, err.to_string());
            }
        },
        None => json!({}),
    };

    let timeout = step
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(timeout);

    invoke_step(&step.id, agent, input, ctx, memory, timeout).await
}

/// Invoke an agent with already-resolved input under a bounded timeout.
pub async fn invoke_step(
    step_id: &str,
    agent: Arc<dyn Agent>,
    input: Value,
    ctx: &AgentContext,
    memory: &MemoryHandle,
    timeout: Duration,
) -> StepResult {
    commit_trace(memory, step_id, TracePhase::Request, preview(&input), None).await;

    let result = match tokio::time::timeout(timeout, agent.invoke(input, ctx)).await {
        Ok(Ok(result)) => match result.status {
            AgentStatus::Ok => {
                let confidence = result.confidence.clamp(0.0, 1.0);
                let content = if result.trace.is_empty() {
                    preview(&result.output)
                } else {
                    result.trace.join(" | ")
                };
                commit_trace(memory, step_id, TracePhase::Response, content, Some(confidence))
                    .await;
                return StepResult::succeeded(step_id, result.output, confidence);
            }
            AgentStatus::Error => {
                let detail = if result.trace.is_empty() {
                    "agent reported an error".to_string()
                } else {
                    result.trace.join(" | ")
                };
                StepResult::failed(step_id, detail)
            }
        },
        Ok(Err(err)) => StepResult::failed(step_id, err.to_string()),
        Err(_) => StepResult::failed(
            step_id,
            format!("invocation timed out after {}s", timeout.as_secs()),
        ),
    };

    let detail = result.error_detail.clone().unwrap_or_default();
    commit_trace(memory, step_id, TracePhase::Response, detail, None).await;
    result
}

async fn commit_trace(
    memory: &MemoryHandle,
    step_id: &str,
    phase: TracePhase,
    content: String,
    confidence: Option<f64>,
) {
    if let Err(err) = memory.append_trace(step_id, phase, content, confidence).await {
        warn!(step_id, error = %err, "trace entry dropped");
    }
}

/// Short single-line rendering of a JSON value for trace entries.
fn preview(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(&rendered, 200)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let shortened: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", shortened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agents::mock::MockAgent;
    use agents::SharedMemory;
    use async_trait::async_trait;
    use agents::{AgentError, AgentResult};
    use serde_json::json;
    use uuid::Uuid;

    fn context(memory: &MemoryHandle, step_id: &str) -> AgentContext {
        AgentContext {
            workflow_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            step_id: step_id.to_string(),
            memory: Arc::new(memory.clone()),
        }
    }

    #[tokio::test]
    async fn successful_invocation_emits_request_and_response() {
        let memory = crate::memory::spawn(HashMap::new());
        let agent = Arc::new(MockAgent::returning("a", json!({"ok": true}), 0.9));
        let ctx = context(&memory, "one");

        let result = invoke_step(
            "one",
            agent,
            json!({"q": 1}),
            &ctx,
            &memory,
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_success());
        assert_eq!(result.confidence, Some(0.9));

        let entries = memory.step_trace("one").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].phase, TracePhase::Request);
        assert_eq!(entries[1].phase, TracePhase::Response);
        assert_eq!(entries[1].confidence, Some(0.9));
    }

    #[tokio::test]
    async fn agent_error_status_becomes_a_failed_result() {
        let memory = crate::memory::spawn(HashMap::new());
        let agent = Arc::new(MockAgent::reporting_error("a", "cannot comply"));
        let ctx = context(&memory, "one");

        let result = invoke_step(
            "one",
            agent,
            json!({}),
            &ctx,
            &memory,
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error_detail.as_deref(), Some("cannot comply"));
        assert_eq!(memory.step_trace("one").await.unwrap().len(), 2);
    }

    struct SleepyAgent;

    #[async_trait]
    impl Agent for SleepyAgent {
        fn name(&self) -> &str {
            "sleepy"
        }
        async fn invoke(
            &self,
            _input: Value,
            _ctx: &AgentContext,
        ) -> Result<AgentResult, AgentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(AgentResult::ok(json!({}), 1.0))
        }
    }

    #[tokio::test]
    async fn slow_agent_times_out_into_a_failed_result() {
        let memory = crate::memory::spawn(HashMap::new());
        let ctx = context(&memory, "slow");

        let result = invoke_step(
            "slow",
            Arc::new(SleepyAgent),
            json!({}),
            &ctx,
            &memory,
            Duration::from_millis(20),
        )
        .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error_detail.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unresolved_template_fails_without_invoking_the_agent() {
        let memory = crate::memory::spawn(HashMap::new());
        let agent = Arc::new(MockAgent::returning("a", json!({}), 1.0));
        let step = crate::models::WorkflowStep::new("consumer", "a", &["dep"])
            .with_input("${dep.field}");
        let ctx = context(&memory, "consumer");

        let result = run_step(
            &step,
            agent.clone(),
            &HashMap::new(), // dep produced no output
            &HashMap::new(),
            &ctx,
            &memory,
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error_detail.unwrap().contains("unresolved reference"));
        assert_eq!(agent.call_count(), 0);
        // No invocation, no request/response pair.
        assert!(memory.step_trace("consumer").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn agents_can_write_memory_mid_invocation() {
        struct WritingAgent;

        #[async_trait]
        impl Agent for WritingAgent {
            fn name(&self) -> &str {
                "writer"
            }
            async fn invoke(
                &self,
                _input: Value,
                ctx: &AgentContext,
            ) -> Result<AgentResult, AgentError> {
                ctx.memory.put("note", json!("left behind")).await;
                Ok(AgentResult::ok(json!({}), 1.0))
            }
        }

        let memory = crate::memory::spawn(HashMap::new());
        let ctx = context(&memory, "w");
        let result = invoke_step(
            "w",
            Arc::new(WritingAgent),
            json!({}),
            &ctx,
            &memory,
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_success());
        assert_eq!(memory.get("note").await.unwrap(), Some(json!("left behind")));
    }
}
