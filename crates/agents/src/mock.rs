//! `MockAgent` — a test double for `Agent`.
//!
//! Useful in unit and integration tests where a real capability is either
//! unavailable or irrelevant. The `Sequence` behaviour returns a different
//! result per call, which is how convergence tests script a recursive
//! group's confidence trajectory round by round.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::{Agent, AgentContext, AgentError, AgentResult, AgentStatus};

/// Behaviour injected into `MockAgent` at construction time.
pub enum MockBehaviour {
    /// Return the same result on every call.
    Return(AgentResult),
    /// Return results in order; once exhausted, repeat the last one.
    Sequence(Vec<AgentResult>),
    /// Return a result with `status: Error`.
    ReportError(String),
    /// Fail with an [`AgentError::Execution`].
    Fail(String),
}

/// A mock agent that records every call it receives and returns a
/// programmer-specified result.
pub struct MockAgent {
    name: String,
    behaviour: MockBehaviour,
    /// All inputs seen by this agent (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
    cursor: Mutex<usize>,
}

impl MockAgent {
    pub fn new(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            cursor: Mutex::new(0),
        }
    }

    /// Mock that always succeeds with the given output and confidence.
    pub fn returning(name: impl Into<String>, output: Value, confidence: f64) -> Self {
        Self::new(name, MockBehaviour::Return(AgentResult::ok(output, confidence)))
    }

    /// Mock that walks through the given results call by call.
    pub fn scripted(name: impl Into<String>, results: Vec<AgentResult>) -> Self {
        Self::new(name, MockBehaviour::Sequence(results))
    }

    /// Mock that always reports `status: Error`.
    pub fn reporting_error(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::ReportError(msg.into()))
    }

    /// Mock that always fails with an execution error.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Fail(msg.into()))
    }

    /// Number of times this agent has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: Value, _ctx: &AgentContext) -> Result<AgentResult, AgentError> {
        self.calls.lock().unwrap().push(input);

        match &self.behaviour {
            MockBehaviour::Return(result) => Ok(result.clone()),
            MockBehaviour::Sequence(results) => {
                let mut cursor = self.cursor.lock().unwrap();
                let idx = (*cursor).min(results.len().saturating_sub(1));
                *cursor += 1;
                results
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| AgentError::Execution("empty mock sequence".into()))
            }
            MockBehaviour::ReportError(msg) => Ok(AgentResult {
                output: Value::Null,
                confidence: 0.0,
                trace: vec![msg.clone()],
                status: AgentStatus::Error,
            }),
            MockBehaviour::Fail(msg) => Err(AgentError::Execution(msg.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct NullMemory;

    #[async_trait]
    impl crate::SharedMemory for NullMemory {
        async fn get(&self, _key: &str) -> Option<Value> {
            None
        }
        async fn put(&self, _key: &str, _value: Value) {}
        async fn snapshot(&self) -> HashMap<String, Value> {
            HashMap::new()
        }
    }

    fn ctx() -> AgentContext {
        AgentContext {
            workflow_id: uuid::Uuid::new_v4(),
            run_id: uuid::Uuid::new_v4(),
            step_id: "step".into(),
            memory: Arc::new(NullMemory),
        }
    }

    #[tokio::test]
    async fn scripted_sequence_repeats_last_result() {
        let agent = MockAgent::scripted(
            "draft",
            vec![
                AgentResult::ok(json!({"round": 1}), 0.4),
                AgentResult::ok(json!({"round": 2}), 0.8),
            ],
        );
        let ctx = ctx();

        let first = agent.invoke(json!({}), &ctx).await.unwrap();
        let second = agent.invoke(json!({}), &ctx).await.unwrap();
        let third = agent.invoke(json!({}), &ctx).await.unwrap();

        assert_eq!(first.confidence, 0.4);
        assert_eq!(second.confidence, 0.8);
        assert_eq!(third.output, json!({"round": 2}));
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test]
    async fn reported_error_is_not_an_err() {
        let agent = MockAgent::reporting_error("broken", "bad day");
        let result = agent.invoke(json!({}), &ctx()).await.unwrap();
        assert_eq!(result.status, AgentStatus::Error);
    }
}
