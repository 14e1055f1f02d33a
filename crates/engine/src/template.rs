//! Template engine — resolves `${...}` placeholders against accumulated
//! step outputs and shared memory.
//!
//! Two placeholder forms are supported:
//! - `${stepId.dotted.path}` — a path into that step's recorded output;
//! - `${memory.key.path}` — a path into the shared-memory snapshot.
//!
//! Resolution happens at step-invocation time, not at validation time,
//! because outputs only exist once dependencies complete. A reference that
//! cannot be fully walked fails with
//! [`TemplateError::UnresolvedReference`]; the step executor turns that
//! into a step failure rather than letting it abort the run.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde_json::Value;

use crate::error::TemplateError;

fn placeholder_regex() -> Regex {
    Regex::new(r"\$\{([A-Za-z0-9_][A-Za-z0-9_.\-]*)\}").unwrap()
}

/// All placeholder references in a template, in order of appearance.
/// Shared with the validator so scanning and resolution can never disagree
/// on what counts as a placeholder.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Resolve a template against the given outputs and memory.
///
/// A template without placeholders passes through unchanged. A template
/// that consists of exactly one placeholder resolves structurally — the
/// referenced value is returned as-is, objects stay objects. Any other
/// template resolves to a string with each placeholder substituted.
pub fn resolve(
    template: &str,
    outputs: &HashMap<String, Value>,
    memory: &HashMap<String, Value>,
) -> Result<Value, TemplateError> {
    let re = placeholder_regex();

    // Whole-template single placeholder: structural passthrough.
    if let Some(caps) = re.captures(template) {
        let m = caps.get(0).expect("capture 0 always present");
        if m.start() == 0 && m.end() == template.len() {
            return lookup(&caps[1], outputs, memory);
        }
    } else {
        return Ok(Value::String(template.to_string()));
    }

    let mut resolved = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let m = caps.get(0).expect("capture 0 always present");
        resolved.push_str(&template[last..m.start()]);
        resolved.push_str(&fragment(&lookup(&caps[1], outputs, memory)?));
        last = m.end();
    }
    resolved.push_str(&template[last..]);

    Ok(Value::String(resolved))
}

/// Replace every placeholder rooted at one of `roots` with the empty
/// string, leaving all other placeholders untouched.
///
/// Used by the recursive mode for round 1, where peer and `previous`
/// references have no predecessor round to resolve against.
pub fn blank_references(template: &str, roots: &HashSet<String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            let root = caps[1].split('.').next().unwrap_or("");
            if roots.contains(root) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn lookup(
    reference: &str,
    outputs: &HashMap<String, Value>,
    memory: &HashMap<String, Value>,
) -> Result<Value, TemplateError> {
    let unresolved = || TemplateError::UnresolvedReference {
        reference: reference.to_string(),
    };

    let mut segments = reference.split('.');
    let root = segments.next().ok_or_else(unresolved)?;

    let mut current = if root == "memory" {
        // `${memory}` alone is meaningless; the next segment is the key.
        let key = segments.next().ok_or_else(unresolved)?;
        memory.get(key).ok_or_else(unresolved)?
    } else {
        outputs.get(root).ok_or_else(unresolved)?
    };

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx)),
            _ => None,
        }
        .ok_or_else(unresolved)?;
    }

    Ok(current.clone())
}

fn fragment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> HashMap<String, Value> {
        HashMap::from([
            (
                "architect".to_string(),
                json!({ "plan": { "title": "v2 rollout", "phases": ["api", "ui"] } }),
            ),
            ("review".to_string(), json!({ "score": 7 })),
        ])
    }

    fn memory() -> HashMap<String, Value> {
        HashMap::from([("brief".to_string(), json!("ship the rollout"))])
    }

    #[test]
    fn template_without_placeholders_passes_through() {
        let resolved = resolve("just text", &outputs(), &memory()).unwrap();
        assert_eq!(resolved, json!("just text"));
    }

    #[test]
    fn whole_template_placeholder_resolves_structurally() {
        let resolved = resolve("${architect.plan}", &outputs(), &memory()).unwrap();
        assert_eq!(resolved, json!({ "title": "v2 rollout", "phases": ["api", "ui"] }));
    }

    #[test]
    fn embedded_placeholders_resolve_to_a_string() {
        let resolved = resolve(
            "Title: ${architect.plan.title}, score ${review.score}",
            &outputs(),
            &memory(),
        )
        .unwrap();
        assert_eq!(resolved, json!("Title: v2 rollout, score 7"));
    }

    #[test]
    fn array_indices_walk_into_lists() {
        let resolved = resolve("${architect.plan.phases.1}", &outputs(), &memory()).unwrap();
        assert_eq!(resolved, json!("ui"));
    }

    #[test]
    fn memory_references_read_the_snapshot() {
        let resolved = resolve("Brief: ${memory.brief}", &outputs(), &memory()).unwrap();
        assert_eq!(resolved, json!("Brief: ship the rollout"));
    }

    #[test]
    fn missing_step_is_unresolved() {
        let err = resolve("${ghost.field}", &outputs(), &memory()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnresolvedReference { reference: "ghost.field".into() }
        );
    }

    #[test]
    fn missing_path_inside_output_is_unresolved() {
        assert!(resolve("${architect.plan.owner}", &outputs(), &memory()).is_err());
    }

    #[test]
    fn resolution_is_deterministic() {
        let template = "Title: ${architect.plan.title} (${memory.brief})";
        let first = resolve(template, &outputs(), &memory()).unwrap();
        let second = resolve(template, &outputs(), &memory()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn blank_references_only_touches_given_roots() {
        let roots = HashSet::from(["previous".to_string(), "critique".to_string()]);
        let blanked = blank_references(
            "${memory.brief} / ${previous.notes} / ${critique.verdict}",
            &roots,
        );
        assert_eq!(blanked, "${memory.brief} /  / ");
    }

    #[test]
    fn placeholder_scan_matches_resolution() {
        let refs = placeholders("a ${x.y} b ${memory.k} c");
        assert_eq!(refs, vec!["x.y", "memory.k"]);
    }
}
