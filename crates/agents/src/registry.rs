//! Capability registry — maps agent names to implementations.
//!
//! The orchestration engine resolves every step's agent from a registry
//! exactly once per run, so a registry swap mid-run can never split a run
//! across two capability sets.

use std::collections::HashMap;
use std::sync::Arc;

use crate::Agent;

/// Immutable name → implementation map.
///
/// Built once at startup (or per test) and shared behind an `Arc`; there is
/// deliberately no way to mutate a registry that is already in use.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own [`Agent::name`]. Re-registering a
    /// name replaces the previous implementation.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// All registered names, sorted for stable output.
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
