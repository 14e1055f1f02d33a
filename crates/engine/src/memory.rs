//! Run-scoped shared memory behind a single-writer actor.
//!
//! One tokio task per run owns the key/value map, the trace log, and one
//! sequence counter. Every mutation — a `put` or a trace append — travels
//! through the same mpsc channel and is answered over a oneshot, so no
//! write is ever lost and every write receives a unique, strictly
//! increasing sequence number. That shared counter is what makes the trace
//! log a total order that respects layer causality.
//!
//! Reads taken while resolving a step's input observe the state as of the
//! prior layer barrier (the orchestrator snapshots once per layer);
//! mid-invocation reads observe every write committed before them, with no
//! ordering guarantee between siblings of the same layer.
//!
//! The actor stops when the last [`MemoryHandle`] drops.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use agents::SharedMemory;

use crate::error::EngineError;
use crate::trace::{TraceEntry, TraceLog, TracePhase};

enum Command {
    Get {
        key: String,
        reply: oneshot::Sender<Option<Value>>,
    },
    Put {
        key: String,
        value: Value,
        reply: oneshot::Sender<u64>,
    },
    Snapshot {
        reply: oneshot::Sender<HashMap<String, Value>>,
    },
    AppendTrace {
        step_id: String,
        phase: TracePhase,
        content: String,
        confidence: Option<f64>,
        reply: oneshot::Sender<u64>,
    },
    FullTrace {
        reply: oneshot::Sender<Vec<TraceEntry>>,
    },
    StepTrace {
        step_id: String,
        reply: oneshot::Sender<Vec<TraceEntry>>,
    },
}

/// Cloneable handle to one run's memory actor.
#[derive(Clone)]
pub struct MemoryHandle {
    tx: mpsc::Sender<Command>,
}

/// Spawn the actor for a new run, pre-loaded with the seed context.
pub fn spawn(seed: HashMap<String, Value>) -> MemoryHandle {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_actor(seed, rx));
    MemoryHandle { tx }
}

async fn run_actor(seed: HashMap<String, Value>, mut rx: mpsc::Receiver<Command>) {
    let mut values = seed;
    let mut sequence: u64 = 0;
    let mut trace = TraceLog::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Get { key, reply } => {
                let _ = reply.send(values.get(&key).cloned());
            }
            Command::Put { key, value, reply } => {
                sequence += 1;
                values.insert(key, value);
                let _ = reply.send(sequence);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(values.clone());
            }
            Command::AppendTrace {
                step_id,
                phase,
                content,
                confidence,
                reply,
            } => {
                sequence += 1;
                trace.append(TraceEntry {
                    step_id,
                    sequence,
                    phase,
                    content,
                    confidence,
                });
                let _ = reply.send(sequence);
            }
            Command::FullTrace { reply } => {
                let _ = reply.send(trace.all());
            }
            Command::StepTrace { step_id, reply } => {
                let _ = reply.send(trace.for_step(&step_id));
            }
        }
    }
}

impl MemoryHandle {
    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EngineError::MemoryChannelClosed)?;
        rx.await.map_err(|_| EngineError::MemoryChannelClosed)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Get { key: key.to_string(), reply }, rx).await
    }

    /// Commit a write; returns its sequence number.
    pub async fn put(&self, key: impl Into<String>, value: Value) -> Result<u64, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Put { key: key.into(), value, reply }, rx).await
    }

    pub async fn snapshot(&self) -> Result<HashMap<String, Value>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot { reply }, rx).await
    }

    /// Commit a trace entry; returns its sequence number.
    pub async fn append_trace(
        &self,
        step_id: impl Into<String>,
        phase: TracePhase,
        content: impl Into<String>,
        confidence: Option<f64>,
    ) -> Result<u64, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::AppendTrace {
                step_id: step_id.into(),
                phase,
                content: content.into(),
                confidence,
                reply,
            },
            rx,
        )
        .await
    }

    /// Full ordered trace log.
    pub async fn trace_log(&self) -> Result<Vec<TraceEntry>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::FullTrace { reply }, rx).await
    }

    /// One step's entries, preserving relative order.
    pub async fn step_trace(&self, step_id: &str) -> Result<Vec<TraceEntry>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::StepTrace { step_id: step_id.to_string(), reply }, rx)
            .await
    }
}

// The agent-facing view. The run coordinator holds a handle until teardown,
// so the actor outlives every invocation; a closed channel here means the
// run is already gone and the access degrades to a no-op.
#[async_trait]
impl SharedMemory for MemoryHandle {
    async fn get(&self, key: &str) -> Option<Value> {
        match MemoryHandle::get(self, key).await {
            Ok(value) => value,
            Err(_) => {
                warn!(key, "memory read after run teardown");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: Value) {
        if MemoryHandle::put(self, key, value).await.is_err() {
            warn!(key, "memory write after run teardown");
        }
    }

    async fn snapshot(&self) -> HashMap<String, Value> {
        MemoryHandle::snapshot(self).await.unwrap_or_default()
    }
}
