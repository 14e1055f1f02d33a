//! Workflow validation — run this before resolving layers or executing.
//!
//! Every check runs; nothing short-circuits. The caller gets the complete
//! list of violations, and validating the same workflow twice yields the
//! identical list. Execution never starts while the list is non-empty.
//!
//! Rules enforced:
//! 1. Step IDs must be unique within the workflow.
//! 2. Every `depends_on` entry must reference a declared step.
//! 3. The dependency graph must be acyclic once recursive groups are
//!    condensed to single units (Kahn's algorithm; whatever cannot be
//!    processed is reported as one cycle naming its steps).
//! 4. Template placeholders must stay inside the step's declared world:
//!    its dependencies, its own recursive group, `memory`, or `previous`
//!    (the latter only inside a group).
//! 5. Recursive groups must have ≥2 members, an agreed positive iteration
//!    cap, an agreed convergence predicate, a name that is not also a step
//!    ID, and uniform criticality.
//! 6. `concurrent_with` hints must name existing steps not connected to the
//!    hinting step by any dependency path.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Violation;
use crate::models::{Workflow, WorkflowStep};
use crate::template;

/// Validate the workflow. An empty list means the workflow may execute.
pub fn validate(workflow: &Workflow) -> Vec<Violation> {
    let mut violations = Vec::new();

    // -----------------------------------------------------------------------
    // 1. Step-ID uniqueness
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !seen_ids.insert(step.id.as_str()) {
            violations.push(Violation::DuplicateStepId {
                step_id: step.id.clone(),
            });
        }
    }

    let step_ids: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();

    // -----------------------------------------------------------------------
    // 2. Dependency references
    // -----------------------------------------------------------------------
    for step in &workflow.steps {
        for dep in &step.depends_on {
            if !step_ids.contains(dep.as_str()) {
                violations.push(Violation::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Acyclicity on the condensed graph
    // -----------------------------------------------------------------------
    violations.extend(detect_cycle(workflow, &step_ids));

    // -----------------------------------------------------------------------
    // 4. Template placeholder scoping
    // -----------------------------------------------------------------------
    let group_of: HashMap<&str, &str> = workflow
        .steps
        .iter()
        .filter_map(|s| s.recursive_group.as_deref().map(|g| (s.id.as_str(), g)))
        .collect();

    for step in &workflow.steps {
        let Some(template) = step.input.as_deref() else {
            continue;
        };
        for reference in template::placeholders(template) {
            let root = reference.split('.').next().unwrap_or("");

            if root == "memory" {
                continue;
            }
            if root == "previous" {
                if step.recursive_group.is_none() {
                    violations.push(Violation::PreviousOutsideGroup {
                        step_id: step.id.clone(),
                    });
                }
                continue;
            }
            let same_group = match (step.recursive_group.as_deref(), group_of.get(root)) {
                (Some(own), Some(peers)) => own == *peers,
                _ => false,
            };
            if same_group || step.depends_on.iter().any(|d| d == root) {
                continue;
            }
            violations.push(Violation::UndeclaredTemplateReference {
                step_id: step.id.clone(),
                reference,
            });
        }
    }

    // -----------------------------------------------------------------------
    // 5. Recursive-group shape
    // -----------------------------------------------------------------------
    violations.extend(check_groups(workflow, &step_ids));

    // -----------------------------------------------------------------------
    // 6. Concurrency hints
    // -----------------------------------------------------------------------
    for step in &workflow.steps {
        for other in &step.concurrent_with {
            if !step_ids.contains(other.as_str()) {
                violations.push(Violation::UnknownConcurrencyHint {
                    step_id: step.id.clone(),
                    other: other.clone(),
                });
            } else if depends_transitively(workflow, &step.id, other)
                || depends_transitively(workflow, other, &step.id)
            {
                violations.push(Violation::ConflictingConcurrencyHint {
                    step_id: step.id.clone(),
                    other: other.clone(),
                });
            }
        }
    }

    violations
}

/// Kahn's algorithm over the condensed unit graph (recursive groups
/// collapsed, intra-group edges dropped). Whatever survives the peeling is
/// part of a cycle and reported as one violation naming the involved steps.
fn detect_cycle(workflow: &Workflow, step_ids: &HashSet<&str>) -> Option<Violation> {
    let unit_of = |step: &WorkflowStep| -> String {
        step.recursive_group
            .clone()
            .unwrap_or_else(|| step.id.clone())
    };

    let mut units: HashSet<String> = HashSet::new();
    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    for step in &workflow.steps {
        let unit = unit_of(step);
        units.insert(unit.clone());
        members.entry(unit).or_default().push(step.id.clone());
    }

    let step_unit: HashMap<&str, String> = workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), unit_of(s)))
        .collect();

    let mut edges: HashSet<(String, String)> = HashSet::new();
    for step in &workflow.steps {
        let to = unit_of(step);
        for dep in &step.depends_on {
            if !step_ids.contains(dep.as_str()) {
                continue; // already reported as UnknownDependency
            }
            let from = step_unit[dep.as_str()].clone();
            if from != to {
                edges.insert((from, to.clone()));
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = units.iter().map(|u| (u.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in &edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
        *in_degree.entry(to.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&u, _)| u)
        .collect();

    let mut processed = 0usize;
    while let Some(unit) = queue.pop_front() {
        processed += 1;
        if let Some(next) = adjacency.get(unit) {
            for &n in next {
                let deg = in_degree.entry(n).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(n);
                }
            }
        }
    }

    if processed == units.len() {
        return None;
    }

    // Everything with a positive in-degree is stuck on the cycle.
    let mut step_ids: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d > 0)
        .flat_map(|(&unit, _)| members[unit].iter().cloned())
        .collect();
    step_ids.sort();
    Some(Violation::Cycle { step_ids })
}

fn check_groups(workflow: &Workflow, step_ids: &HashSet<&str>) -> Vec<Violation> {
    let mut violations = Vec::new();

    // Preserve first-appearance order so the violation list is stable.
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&WorkflowStep>> = HashMap::new();
    for step in &workflow.steps {
        if let Some(group) = step.recursive_group.as_deref() {
            if !groups.contains_key(group) {
                order.push(group);
            }
            groups.entry(group).or_default().push(step);
        }
    }

    for group in order {
        let members = &groups[group];

        if members.len() < 2 {
            violations.push(Violation::RecursiveGroupTooSmall {
                group: group.to_string(),
                members: members.len(),
            });
        }
        if step_ids.contains(group) {
            violations.push(Violation::GroupNameCollision {
                group: group.to_string(),
            });
        }

        let caps: Vec<u32> = members.iter().filter_map(|m| m.max_iterations).collect();
        let cap_agreed = !caps.is_empty() && caps.iter().all(|c| *c == caps[0] && *c > 0);
        if !cap_agreed {
            violations.push(Violation::InvalidIterationBound {
                group: group.to_string(),
            });
        }

        let predicates: Vec<_> = members.iter().filter_map(|m| m.convergence.as_ref()).collect();
        let predicate_agreed =
            !predicates.is_empty() && predicates.iter().all(|p| **p == *predicates[0]);
        if !predicate_agreed {
            violations.push(Violation::MissingConvergencePredicate {
                group: group.to_string(),
            });
        }

        let criticals = members.iter().filter(|m| m.critical).count();
        if criticals > 0 && criticals < members.len() {
            violations.push(Violation::MixedGroupCriticality {
                group: group.to_string(),
            });
        }
    }

    violations
}

/// True when `from` transitively depends on `to` via `depends_on` edges.
/// Tolerates cycles (visited set), since hints are checked even on graphs
/// that also carry a cycle violation.
fn depends_transitively(workflow: &Workflow, from: &str, to: &str) -> bool {
    let deps_of: HashMap<&str, &[String]> = workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let Some(deps) = deps_of.get(current) else {
            continue;
        };
        for dep in deps.iter() {
            if dep == to {
                return true;
            }
            queue.push_back(dep.as_str());
        }
    }
    false
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConvergencePredicate, WorkflowStep};

    fn delta(threshold: f64) -> ConvergencePredicate {
        ConvergencePredicate::ConfidenceDelta { threshold }
    }

    #[test]
    fn valid_fanout_workflow_has_no_violations() {
        let workflow = Workflow::new(
            "fanout",
            vec![
                WorkflowStep::new("architect", "planner", &[]),
                WorkflowStep::new("backend", "coder", &["architect"])
                    .with_input("${architect.plan}"),
                WorkflowStep::new("frontend", "coder", &["architect"])
                    .with_input("${architect.plan} and ${memory.brief}"),
            ],
        );
        assert!(validate(&workflow).is_empty());
    }

    #[test]
    fn duplicate_step_id_is_reported() {
        let workflow = Workflow::new(
            "dup",
            vec![
                WorkflowStep::new("a", "agent", &[]),
                WorkflowStep::new("a", "agent", &[]),
            ],
        );
        assert_eq!(
            validate(&workflow),
            vec![Violation::DuplicateStepId { step_id: "a".into() }]
        );
    }

    #[test]
    fn two_step_cycle_is_rejected_naming_both_steps() {
        let workflow = Workflow::new(
            "cycle",
            vec![
                WorkflowStep::new("a", "agent", &["b"]),
                WorkflowStep::new("b", "agent", &["a"]),
            ],
        );
        let violations = validate(&workflow);
        assert_eq!(
            violations,
            vec![Violation::Cycle { step_ids: vec!["a".into(), "b".into()] }]
        );
    }

    #[test]
    fn undeclared_template_reference_is_rejected() {
        // Scenario: `${missingStep.field}` where missingStep is not declared
        // as a dependency.
        let workflow = Workflow::new(
            "undeclared",
            vec![
                WorkflowStep::new("missingStep", "agent", &[]),
                WorkflowStep::new("consumer", "agent", &[]).with_input("${missingStep.field}"),
            ],
        );
        assert_eq!(
            validate(&workflow),
            vec![Violation::UndeclaredTemplateReference {
                step_id: "consumer".into(),
                reference: "missingStep.field".into(),
            }]
        );
    }

    #[test]
    fn group_peer_references_are_allowed() {
        let workflow = Workflow::new(
            "peers",
            vec![
                WorkflowStep::new("draft", "writer", &[])
                    .with_input("${previous.notes}")
                    .in_group("refine", 5, delta(0.05)),
                WorkflowStep::new("critique", "critic", &[])
                    .with_input("${draft.text}")
                    .in_group("refine", 5, delta(0.05)),
            ],
        );
        assert!(validate(&workflow).is_empty());
    }

    #[test]
    fn previous_outside_a_group_is_rejected() {
        let workflow = Workflow::new(
            "loner",
            vec![WorkflowStep::new("solo", "agent", &[]).with_input("${previous.out}")],
        );
        assert_eq!(
            validate(&workflow),
            vec![Violation::PreviousOutsideGroup { step_id: "solo".into() }]
        );
    }

    #[test]
    fn malformed_groups_collect_every_violation() {
        let mut lonely = WorkflowStep::new("draft", "writer", &[]);
        lonely.recursive_group = Some("refine".into());
        // No peer, no cap, no predicate: three findings for one group.
        let violations = validate(&Workflow::new("bad-group", vec![lonely]));
        assert!(violations.contains(&Violation::RecursiveGroupTooSmall {
            group: "refine".into(),
            members: 1,
        }));
        assert!(violations.contains(&Violation::InvalidIterationBound { group: "refine".into() }));
        assert!(violations
            .contains(&Violation::MissingConvergencePredicate { group: "refine".into() }));
    }

    #[test]
    fn zero_iteration_cap_is_invalid() {
        let workflow = Workflow::new(
            "zero-cap",
            vec![
                WorkflowStep::new("draft", "writer", &[]).in_group("refine", 0, delta(0.1)),
                WorkflowStep::new("critique", "critic", &[]).in_group("refine", 0, delta(0.1)),
            ],
        );
        assert_eq!(
            validate(&workflow),
            vec![Violation::InvalidIterationBound { group: "refine".into() }]
        );
    }

    #[test]
    fn mixed_group_criticality_is_rejected() {
        let workflow = Workflow::new(
            "mixed",
            vec![
                WorkflowStep::new("draft", "writer", &[])
                    .in_group("refine", 3, delta(0.1))
                    .critical(),
                WorkflowStep::new("critique", "critic", &[]).in_group("refine", 3, delta(0.1)),
            ],
        );
        assert_eq!(
            validate(&workflow),
            vec![Violation::MixedGroupCriticality { group: "refine".into() }]
        );
    }

    #[test]
    fn mutually_dependent_groups_surface_as_a_cycle() {
        let workflow = Workflow::new(
            "group-cycle",
            vec![
                WorkflowStep::new("a1", "agent", &["b2"]).in_group("ga", 3, delta(0.1)),
                WorkflowStep::new("a2", "agent", &[]).in_group("ga", 3, delta(0.1)),
                WorkflowStep::new("b1", "agent", &["a2"]).in_group("gb", 3, delta(0.1)),
                WorkflowStep::new("b2", "agent", &[]).in_group("gb", 3, delta(0.1)),
            ],
        );
        let violations = validate(&workflow);
        assert_eq!(violations.len(), 1);
        assert!(matches!(&violations[0], Violation::Cycle { step_ids }
            if *step_ids == vec!["a1", "a2", "b1", "b2"]));
    }

    #[test]
    fn conflicting_concurrency_hint_is_rejected() {
        let mut late = WorkflowStep::new("late", "agent", &["mid"]);
        late.concurrent_with = vec!["early".into()];
        let workflow = Workflow::new(
            "hint",
            vec![
                WorkflowStep::new("early", "agent", &[]),
                WorkflowStep::new("mid", "agent", &["early"]),
                late,
            ],
        );
        assert_eq!(
            validate(&workflow),
            vec![Violation::ConflictingConcurrencyHint {
                step_id: "late".into(),
                other: "early".into(),
            }]
        );
    }

    #[test]
    fn compatible_concurrency_hint_is_fine() {
        let mut b = WorkflowStep::new("b", "agent", &["root"]);
        b.concurrent_with = vec!["c".into()];
        let workflow = Workflow::new(
            "hint-ok",
            vec![
                WorkflowStep::new("root", "agent", &[]),
                b,
                WorkflowStep::new("c", "agent", &["root"]),
            ],
        );
        assert!(validate(&workflow).is_empty());
    }

    #[test]
    fn validation_is_idempotent() {
        let workflow = Workflow::new(
            "idempotent",
            vec![
                WorkflowStep::new("a", "agent", &["b"]),
                WorkflowStep::new("b", "agent", &["a"]),
                WorkflowStep::new("c", "agent", &["ghost"]).with_input("${ghost.x}"),
            ],
        );
        assert_eq!(validate(&workflow), validate(&workflow));
    }
}
