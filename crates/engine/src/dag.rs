//! Dependency resolution — turns a validated workflow into execution layers.
//!
//! Layer *i* contains exactly the units whose entire dependency set lives in
//! layers `0..i-1`; units without dependencies form layer 0. A recursive
//! group is condensed into a single unit and becomes eligible at the layer
//! where all of its cross-group dependencies are satisfied; its internal
//! iteration belongs to the recursive execution mode, not to layering.
//!
//! Within a layer, entries are ordered by declaration index. That order is
//! a deterministic tie-break used for trace-sequence assignment only;
//! members of a layer always execute concurrently.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::Workflow;

/// One schedulable unit inside a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerEntry {
    /// A single non-recursive step.
    Step(String),
    /// A whole recursive group, members in declaration order.
    Group { name: String, members: Vec<String> },
}

impl LayerEntry {
    /// Step ids covered by this entry.
    pub fn step_ids(&self) -> Vec<&str> {
        match self {
            Self::Step(id) => vec![id.as_str()],
            Self::Group { members, .. } => members.iter().map(String::as_str).collect(),
        }
    }
}

/// A maximal set of units simultaneously eligible to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub entries: Vec<LayerEntry>,
}

impl Layer {
    pub fn width(&self) -> usize {
        self.entries.iter().map(|e| e.step_ids().len()).sum()
    }
}

struct Unit {
    key: String,
    is_group: bool,
    /// Declaration index of the first member — the layer tie-break.
    first_index: usize,
    members: Vec<String>,
    deps: Vec<String>,
}

/// Compute the execution layers of a validated workflow.
///
/// # Errors
/// [`EngineError::Unlayerable`] if the graph cannot be levelled — only
/// possible for a workflow that skipped [`crate::validate`].
pub fn resolve_layers(workflow: &Workflow) -> Result<Vec<Layer>, EngineError> {
    let unit_key = |step: &crate::models::WorkflowStep| -> String {
        step.recursive_group
            .clone()
            .unwrap_or_else(|| step.id.clone())
    };

    let step_unit: HashMap<&str, String> = workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), unit_key(s)))
        .collect();

    // Condense steps into units, keeping declaration order.
    let mut units: Vec<Unit> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    for (idx, step) in workflow.steps.iter().enumerate() {
        let key = unit_key(step);
        let unit_idx = *index_of.entry(key.clone()).or_insert_with(|| {
            units.push(Unit {
                key,
                is_group: step.recursive_group.is_some(),
                first_index: idx,
                members: Vec::new(),
                deps: Vec::new(),
            });
            units.len() - 1
        });
        units[unit_idx].members.push(step.id.clone());
        for dep in &step.depends_on {
            let Some(dep_unit) = step_unit.get(dep.as_str()).cloned() else {
                return Err(EngineError::Unlayerable);
            };
            if dep_unit != units[unit_idx].key && !units[unit_idx].deps.contains(&dep_unit) {
                units[unit_idx].deps.push(dep_unit);
            }
        }
    }

    // Longest-path levelling: a unit's layer is one past its deepest
    // dependency.
    let mut level: HashMap<&str, usize> = HashMap::new();
    let mut remaining: Vec<&Unit> = units.iter().collect();
    while !remaining.is_empty() {
        let mut progressed = false;
        remaining.retain(|unit| {
            let ready = unit.deps.iter().all(|d| level.contains_key(d.as_str()));
            if ready {
                let depth = unit
                    .deps
                    .iter()
                    .map(|d| level[d.as_str()] + 1)
                    .max()
                    .unwrap_or(0);
                level.insert(unit.key.as_str(), depth);
                progressed = true;
            }
            !ready
        });
        if !progressed {
            return Err(EngineError::Unlayerable);
        }
    }

    let layer_count = units
        .iter()
        .map(|u| level[u.key.as_str()] + 1)
        .max()
        .unwrap_or(0);

    let mut layers: Vec<Layer> = (0..layer_count)
        .map(|_| Layer { entries: Vec::new() })
        .collect();

    // Units were built in declaration order, so pushing in order keeps the
    // tie-break without an extra sort.
    for unit in &units {
        let entry = if unit.is_group {
            LayerEntry::Group {
                name: unit.key.clone(),
                members: unit.members.clone(),
            }
        } else {
            LayerEntry::Step(unit.key.clone())
        };
        layers[level[unit.key.as_str()]].entries.push(entry);
    }

    Ok(layers)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConvergencePredicate, WorkflowStep};

    fn layer_ids(layer: &Layer) -> Vec<&str> {
        layer.entries.iter().flat_map(|e| e.step_ids()).collect()
    }

    #[test]
    fn fanout_layers_split_on_the_shared_dependency() {
        // architect (no deps); backend, frontend both depend on architect.
        let workflow = Workflow::new(
            "fanout",
            vec![
                WorkflowStep::new("architect", "planner", &[]),
                WorkflowStep::new("backend", "coder", &["architect"]),
                WorkflowStep::new("frontend", "coder", &["architect"]),
            ],
        );
        let layers = resolve_layers(&workflow).expect("layerable");
        assert_eq!(layers.len(), 2);
        assert_eq!(layer_ids(&layers[0]), vec!["architect"]);
        assert_eq!(layer_ids(&layers[1]), vec!["backend", "frontend"]);
    }

    #[test]
    fn diamond_resolves_to_three_layers() {
        let workflow = Workflow::new(
            "diamond",
            vec![
                WorkflowStep::new("a", "agent", &[]),
                WorkflowStep::new("b", "agent", &["a"]),
                WorkflowStep::new("c", "agent", &["a"]),
                WorkflowStep::new("d", "agent", &["b", "c"]),
            ],
        );
        let layers = resolve_layers(&workflow).expect("layerable");
        assert_eq!(layers.len(), 3);
        assert_eq!(layer_ids(&layers[1]), vec!["b", "c"]);
        assert_eq!(layer_ids(&layers[2]), vec!["d"]);
    }

    #[test]
    fn declaration_order_is_the_tie_break_within_a_layer() {
        let workflow = Workflow::new(
            "ties",
            vec![
                WorkflowStep::new("zeta", "agent", &[]),
                WorkflowStep::new("alpha", "agent", &[]),
                WorkflowStep::new("mid", "agent", &[]),
            ],
        );
        let layers = resolve_layers(&workflow).expect("layerable");
        assert_eq!(layer_ids(&layers[0]), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn recursive_group_is_one_unit_at_its_eligibility_layer() {
        let predicate = ConvergencePredicate::ConfidenceDelta { threshold: 0.05 };
        let workflow = Workflow::new(
            "grouped",
            vec![
                WorkflowStep::new("brief", "planner", &[]),
                WorkflowStep::new("draft", "writer", &["brief"])
                    .in_group("refine", 5, predicate.clone()),
                WorkflowStep::new("critique", "critic", &[])
                    .in_group("refine", 5, predicate),
                WorkflowStep::new("publish", "publisher", &["draft", "critique"]),
            ],
        );
        let layers = resolve_layers(&workflow).expect("layerable");
        assert_eq!(layers.len(), 3);
        assert_eq!(layer_ids(&layers[0]), vec!["brief"]);
        assert_eq!(
            layers[1].entries,
            vec![LayerEntry::Group {
                name: "refine".into(),
                members: vec!["draft".into(), "critique".into()],
            }]
        );
        assert_eq!(layer_ids(&layers[2]), vec!["publish"]);
    }

    #[test]
    fn empty_workflow_has_no_layers() {
        let workflow = Workflow::new("empty", vec![]);
        assert!(resolve_layers(&workflow).expect("layerable").is_empty());
    }
}
