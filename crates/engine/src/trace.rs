//! Reasoning-trace log types.
//!
//! The trace is an append-only per-run log. Entries are committed through
//! the memory store's single writer, so `sequence` is a total order that is
//! causal with respect to dependency order: a later layer's entries always
//! carry higher sequence numbers than an earlier layer's, even though
//! within-layer commit order is not wall-clock order.

use serde::{Deserialize, Serialize};

/// Which side of an invocation (or round) an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    Request,
    Response,
    Round,
}

/// One committed trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Step id — for `Round` entries, the recursive group's name.
    pub step_id: String,
    /// Strictly increasing commit sequence assigned by the single writer.
    pub sequence: u64,
    pub phase: TracePhase,
    pub content: String,
    /// Present on `Response` entries of successful invocations and on
    /// `Round` entries.
    pub confidence: Option<f64>,
}

/// Append-only log owned by the memory actor.
#[derive(Debug, Default)]
pub struct TraceLog {
    entries: Vec<TraceEntry>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    /// Full ordered log.
    pub fn all(&self) -> Vec<TraceEntry> {
        self.entries.clone()
    }

    /// One step's entries, preserving relative order.
    pub fn for_step(&self, step_id: &str) -> Vec<TraceEntry> {
        self.entries
            .iter()
            .filter(|e| e.step_id == step_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
