//! Recursive-refinement execution mode.
//!
//! A recursive group is logically cyclic — each round's output feeds the
//! next round's input — but runs as a bounded, unrolled sequence of rounds
//! so the acyclic invariant holds everywhere else. Round 1 resolves member
//! templates against the outputs of prior (non-group) layers with peer and
//! `previous` references blanked; round *k*>1 rebinds every peer id to its
//! round *k−1* output and `previous` to the member's own round *k−1*
//! output. Members of a round run concurrently on the run's worker pool.
//!
//! Termination: convergence predicate satisfied → `succeeded`; iteration
//! cap reached (or the run cancelled between rounds) → `non_converged`,
//! surfacing the last completed round's outputs; any member failing
//! mid-round → `failed` for the group as a unit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use agents::Agent;

use crate::executor::{run_step, RunContext, StepResult};
use crate::models::{ConvergencePredicate, StepStatus, WorkflowStep};
use crate::template;
use crate::trace::TracePhase;

/// Terminal outcome of a whole recursive group.
#[derive(Debug)]
pub struct GroupOutcome {
    pub group: String,
    /// `Succeeded`, `Failed`, or `NonConverged` — applied to every member.
    pub status: StepStatus,
    /// Rounds actually executed.
    pub rounds: u32,
    /// Last attempted round's per-member results (error details live here).
    pub member_results: HashMap<String, StepResult>,
    /// Last *completed* round's outputs; empty when the group failed.
    pub outputs: HashMap<String, Value>,
}

/// Drive one recursive group to a terminal status.
///
/// `member_steps` must be the group's members in declaration order;
/// `agents` maps each member id to its resolved capability;
/// `base_outputs` holds the outputs of prior non-group layers.
pub async fn run_group(
    group: &str,
    member_steps: &[WorkflowStep],
    agents: &HashMap<String, Arc<dyn Agent>>,
    base_outputs: &HashMap<String, Value>,
    rc: &RunContext,
) -> GroupOutcome {
    let max_iterations = member_steps
        .iter()
        .find_map(|s| s.max_iterations)
        .unwrap_or(1)
        .max(1);
    let predicate = member_steps.iter().find_map(|s| s.convergence.clone());

    // Round-1 templates blank these roots; later rounds bind them.
    let mut blank_roots: HashSet<String> =
        member_steps.iter().map(|s| s.id.clone()).collect();
    blank_roots.insert("previous".to_string());

    let mut prev_outputs: Option<HashMap<String, Value>> = None;
    let mut prev_confidences: Option<HashMap<String, f64>> = None;
    let mut last_results: HashMap<String, StepResult> = HashMap::new();
    let mut rounds = 0u32;

    loop {
        if rc.cancel.is_cancelled() {
            debug!(group, rounds, "group cancelled between rounds");
            break;
        }
        if rounds >= max_iterations {
            break;
        }
        rounds += 1;

        // Outputs visible to this round: prior layers plus round k-1.
        let mut round_view = base_outputs.clone();
        if let Some(prev) = &prev_outputs {
            round_view.extend(prev.clone());
        }
        let memory_snapshot = rc.memory.snapshot().await.unwrap_or_default();

        let mut join = JoinSet::new();
        for step in member_steps {
            let mut step = step.clone();
            let agent = match agents.get(&step.id) {
                Some(agent) => agent.clone(),
                None => continue, // resolved before the run; cannot miss
            };

            let mut view = round_view.clone();
            if let Some(prev) = &prev_outputs {
                if let Some(own) = prev.get(&step.id) {
                    view.insert("previous".to_string(), own.clone());
                }
            } else if let Some(tpl) = step.input.as_deref() {
                step.input = Some(template::blank_references(tpl, &blank_roots));
            }

            let rc = rc.clone();
            let snapshot = memory_snapshot.clone();
            join.spawn(async move {
                let _permit = match rc.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return StepResult::failed(&step.id, "worker pool closed"),
                };
                let ctx = rc.agent_ctx(&step.id);
                run_step(&step, agent, &view, &snapshot, &ctx, &rc.memory, rc.default_timeout)
                    .await
            });
        }

        let mut results: HashMap<String, StepResult> = HashMap::new();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.step_id.clone(), result);
                }
                Err(err) => warn!(group, error = %err, "group member task aborted"),
            }
        }
        for step in member_steps {
            results.entry(step.id.clone()).or_insert_with(|| {
                StepResult::failed(&step.id, "invocation task failed")
            });
        }

        let failed = results.values().any(|r| !r.is_success());
        last_results = results;
        if failed {
            info!(group, rounds, "member failure fails the group");
            commit_round_trace(rc, group, rounds, None, "member failed").await;
            return GroupOutcome {
                group: group.to_string(),
                status: StepStatus::Failed,
                rounds,
                member_results: last_results,
                outputs: HashMap::new(),
            };
        }

        let round_outputs: HashMap<String, Value> = last_results
            .iter()
            .map(|(id, r)| (id.clone(), r.output.clone().unwrap_or(Value::Null)))
            .collect();
        let round_confidences: HashMap<String, f64> = last_results
            .iter()
            .map(|(id, r)| (id.clone(), r.confidence.unwrap_or(0.0)))
            .collect();

        let mean = round_confidences.values().sum::<f64>() / round_confidences.len().max(1) as f64;
        let satisfied = predicate
            .as_ref()
            .map(|p| {
                converged(
                    p,
                    &round_outputs,
                    &round_confidences,
                    prev_outputs.as_ref(),
                    prev_confidences.as_ref(),
                )
            })
            .unwrap_or(false);

        commit_round_trace(
            rc,
            group,
            rounds,
            Some(mean),
            if satisfied { "converged" } else { "not converged" },
        )
        .await;

        if satisfied {
            info!(group, rounds, "group converged");
            return GroupOutcome {
                group: group.to_string(),
                status: StepStatus::Succeeded,
                rounds,
                member_results: last_results,
                outputs: round_outputs,
            };
        }

        prev_outputs = Some(round_outputs);
        prev_confidences = Some(round_confidences);
    }

    // Iteration cap or cancellation: surface the last completed round.
    info!(group, rounds, "group did not converge");
    GroupOutcome {
        group: group.to_string(),
        status: StepStatus::NonConverged,
        rounds,
        member_results: last_results,
        outputs: prev_outputs.unwrap_or_default(),
    }
}

fn converged(
    predicate: &ConvergencePredicate,
    outputs: &HashMap<String, Value>,
    confidences: &HashMap<String, f64>,
    prev_outputs: Option<&HashMap<String, Value>>,
    prev_confidences: Option<&HashMap<String, f64>>,
) -> bool {
    match predicate {
        ConvergencePredicate::MinConfidence { threshold } => {
            confidences.values().all(|c| *c >= *threshold)
        }
        ConvergencePredicate::ConfidenceDelta { threshold } => match prev_confidences {
            Some(prev) => confidences.iter().all(|(id, c)| {
                prev.get(id)
                    .map(|p| (c - p).abs() < *threshold)
                    .unwrap_or(false)
            }),
            None => false,
        },
        ConvergencePredicate::StableOutput => {
            prev_outputs.map(|prev| prev == outputs).unwrap_or(false)
        }
    }
}

async fn commit_round_trace(
    rc: &RunContext,
    group: &str,
    round: u32,
    confidence: Option<f64>,
    verdict: &str,
) {
    let content = format!("round {round}: {verdict}");
    if let Err(err) = rc
        .memory
        .append_trace(group, TracePhase::Round, content, confidence)
        .await
    {
        warn!(group, error = %err, "round trace entry dropped");
    }
}
