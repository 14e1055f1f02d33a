//! The orchestration engine — the only component that mutates run state.
//!
//! `Engine` is an explicit instance owning its run registry; there is no
//! process-wide orchestration state. One call to [`Engine::execute_workflow`]
//! drives one run: validate, resolve capabilities once, seed memory, compute
//! layers, dispatch each layer onto the bounded worker pool under the
//! workflow's join policy, persist a snapshot after every barrier, aggregate
//! the overall status, and emit the completion event.
//!
//! Cancellation is cooperative: the run-scoped token is checked at every
//! layer boundary and before every recursive round. Steps already dispatched
//! always finish — an agent invocation is an atomic unit of work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use agents::{Agent, AgentRegistry};
use store::{RunRecord, SnapshotStore};

use crate::dag::{resolve_layers, Layer, LayerEntry};
use crate::error::EngineError;
use crate::executor::{run_step, RunContext, StepResult};
use crate::memory;
use crate::models::{ExecutionRun, JoinPolicy, RunStatus, StepStatus, Workflow};
use crate::notify::{CompletionEvent, CompletionNotifier};
use crate::recursive::{run_group, GroupOutcome};
use crate::trace::TraceEntry;
use crate::validate::validate;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently running invocations per run. The
    /// effective pool for a layer is min(this, layer width).
    pub max_parallel_steps: usize,
    /// Invocation timeout applied when a step has no `timeout_secs`.
    pub default_step_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 8,
            default_step_timeout: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-run capability map, resolved from the registry exactly once.
type ResolvedAgents = HashMap<String, Arc<dyn Agent>>;

/// Outcome of one dispatched layer entry.
enum TaskOutcome {
    Step(StepResult),
    Group(GroupOutcome),
    /// Entry never started (fail-fast); ids revert to pending.
    Skipped(Vec<String>),
}

pub struct Engine {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn CompletionNotifier>,
    config: EngineConfig,
    /// Live runs and their cancellation tokens.
    live: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl Engine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn CompletionNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            config,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Execute a workflow to completion and return the finished run.
    ///
    /// # Errors
    /// [`EngineError::Invalid`] if validation finds violations and
    /// [`EngineError::UnknownAgent`] if a capability is missing — both
    /// before any step executes.
    pub async fn execute_workflow(
        &self,
        workflow: &Workflow,
        seed_context: HashMap<String, Value>,
    ) -> Result<ExecutionRun, EngineError> {
        self.execute_with_id(Uuid::new_v4(), workflow, seed_context)
            .await
    }

    /// Validate, then run the workflow in the background; returns the run id
    /// for polling. An invalid workflow never produces a run id.
    pub fn submit(
        self: Arc<Self>,
        workflow: Workflow,
        seed_context: HashMap<String, Value>,
    ) -> Result<Uuid, EngineError> {
        self.preflight(&workflow)?;
        let run_id = Uuid::new_v4();
        let engine = self;
        tokio::spawn(async move {
            if let Err(err) = engine.execute_with_id(run_id, &workflow, seed_context).await {
                error!(%run_id, error = %err, "background run failed to execute");
            }
        });
        Ok(run_id)
    }

    /// Request cooperative cancellation of a live run. Returns false when
    /// the run is unknown or already terminal.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        match self.live.read().await.get(&run_id) {
            Some(token) => {
                info!(%run_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Latest known state of a run (live runs are snapshotted after every
    /// layer barrier, so the store is always at most one layer behind).
    pub async fn run(&self, run_id: Uuid) -> Result<ExecutionRun, EngineError> {
        let record = self.store.load_run(run_id).await.map_err(|err| match err {
            store::StoreError::NotFound => EngineError::RunNotFound(run_id),
            other => EngineError::Store(other),
        })?;
        let run = serde_json::from_value(record.snapshot)
            .map_err(store::StoreError::Serialization)?;
        Ok(run)
    }

    /// Full ordered trace log for a run.
    pub async fn trace(&self, run_id: Uuid) -> Result<Vec<TraceEntry>, EngineError> {
        Ok(self.run(run_id).await?.trace)
    }

    /// One step's trace entries, preserving relative order.
    pub async fn step_trace(
        &self,
        run_id: Uuid,
        step_id: &str,
    ) -> Result<Vec<TraceEntry>, EngineError> {
        let trace = self.trace(run_id).await?;
        Ok(trace.into_iter().filter(|e| e.step_id == step_id).collect())
    }

    /// Validation plus one-time capability resolution.
    fn preflight(&self, workflow: &Workflow) -> Result<ResolvedAgents, EngineError> {
        let violations = validate(workflow);
        if !violations.is_empty() {
            return Err(EngineError::Invalid(violations));
        }
        let mut agents: ResolvedAgents = HashMap::new();
        for step in &workflow.steps {
            let agent =
                self.registry
                    .get(&step.agent)
                    .ok_or_else(|| EngineError::UnknownAgent {
                        step_id: step.id.clone(),
                        agent: step.agent.clone(),
                    })?;
            agents.insert(step.id.clone(), agent);
        }
        Ok(agents)
    }

    #[instrument(skip(self, workflow, seed_context), fields(workflow_id = %workflow.id))]
    async fn execute_with_id(
        &self,
        run_id: Uuid,
        workflow: &Workflow,
        seed_context: HashMap<String, Value>,
    ) -> Result<ExecutionRun, EngineError> {
        let agents = self.preflight(workflow)?;
        let layers = resolve_layers(workflow)?;
        info!(
            run_id = %run_id,
            layers = layers.len(),
            steps = workflow.steps.len(),
            "workflow validated"
        );

        // Workflow-level context first, call-site seed wins on conflicts.
        let mut seed = workflow.context.clone();
        seed.extend(seed_context);

        let cancel = CancellationToken::new();
        self.live.write().await.insert(run_id, cancel.clone());

        let rc = RunContext {
            workflow_id: workflow.id,
            run_id,
            memory: memory::spawn(seed),
            semaphore: Arc::new(Semaphore::new(self.config.max_parallel_steps)),
            cancel,
            default_timeout: self.config.default_step_timeout,
        };

        let mut run = ExecutionRun::new(run_id, workflow);
        self.save_snapshot(&run).await;

        let mut critical_failure = false;
        for layer in &layers {
            if rc.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            if critical_failure {
                break;
            }

            critical_failure |= self
                .dispatch_layer(&mut run, workflow, layer, &agents, &rc)
                .await;

            run.memory = rc.memory.snapshot().await.unwrap_or_default();
            self.save_snapshot(&run).await;
        }

        run.cancelled |= rc.cancel.is_cancelled();
        run.memory = rc.memory.snapshot().await.unwrap_or_default();
        run.trace = rc.memory.trace_log().await.unwrap_or_default();
        run.status = aggregate_status(&run, workflow);
        run.finished_at = Some(Utc::now());
        self.save_snapshot(&run).await;

        self.live.write().await.remove(&run_id);
        self.notifier
            .notify(CompletionEvent {
                run_id,
                status: run.status,
                summary: run.summary(),
            })
            .await;
        info!(run_id = %run_id, status = %run.status, "run finished");

        Ok(run)
    }

    /// Dispatch one layer and wait for its barrier. Returns true when a
    /// critical step or group failed.
    async fn dispatch_layer(
        &self,
        run: &mut ExecutionRun,
        workflow: &Workflow,
        layer: &Layer,
        agents: &ResolvedAgents,
        rc: &RunContext,
    ) -> bool {
        let outputs = Arc::new(run.outputs.clone());
        let memory_snapshot = Arc::new(rc.memory.snapshot().await.unwrap_or_default());
        // Fail-fast trips this to keep *unstarted* siblings from running;
        // in-flight invocations are never preempted.
        let layer_abort = CancellationToken::new();

        let mut join: JoinSet<TaskOutcome> = JoinSet::new();
        for entry in &layer.entries {
            for id in entry.step_ids() {
                run.step_status.insert(id.to_string(), StepStatus::Running);
            }

            match entry {
                LayerEntry::Step(id) => {
                    let Some(step) = workflow.step(id).cloned() else {
                        continue;
                    };
                    let Some(agent) = agents.get(id).cloned() else {
                        continue;
                    };
                    let rc = rc.clone();
                    let outputs = Arc::clone(&outputs);
                    let memory_snapshot = Arc::clone(&memory_snapshot);
                    let layer_abort = layer_abort.clone();
                    join.spawn(async move {
                        let _permit = match rc.semaphore.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return TaskOutcome::Skipped(vec![step.id]),
                        };
                        if layer_abort.is_cancelled() {
                            return TaskOutcome::Skipped(vec![step.id]);
                        }
                        let ctx = rc.agent_ctx(&step.id);
                        let result = run_step(
                            &step,
                            agent,
                            &outputs,
                            &memory_snapshot,
                            &ctx,
                            &rc.memory,
                            rc.default_timeout,
                        )
                        .await;
                        TaskOutcome::Step(result)
                    });
                }
                LayerEntry::Group { name, members } => {
                    let member_steps: Vec<_> = members
                        .iter()
                        .filter_map(|m| workflow.step(m).cloned())
                        .collect();
                    let group_agents: ResolvedAgents = members
                        .iter()
                        .filter_map(|m| agents.get(m).map(|a| (m.clone(), a.clone())))
                        .collect();
                    let name = name.clone();
                    let members = members.clone();
                    let rc = rc.clone();
                    let outputs = Arc::clone(&outputs);
                    let layer_abort = layer_abort.clone();
                    join.spawn(async move {
                        if layer_abort.is_cancelled() {
                            return TaskOutcome::Skipped(members);
                        }
                        let outcome =
                            run_group(&name, &member_steps, &group_agents, &outputs, &rc).await;
                        TaskOutcome::Group(outcome)
                    });
                }
            }
        }

        let mut critical_failure = false;
        while let Some(joined) = join.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(error = %err, "layer task aborted");
                    continue;
                }
            };
            match outcome {
                TaskOutcome::Step(result) => {
                    let critical = workflow
                        .step(&result.step_id)
                        .map(|s| s.critical)
                        .unwrap_or(false);
                    if !result.is_success() {
                        warn!(
                            step_id = %result.step_id,
                            detail = result.error_detail.as_deref().unwrap_or(""),
                            "step failed"
                        );
                        if critical {
                            critical_failure = true;
                            if workflow.join_policy == JoinPolicy::FailFast {
                                layer_abort.cancel();
                            }
                        }
                    }
                    apply_step_result(run, result);
                }
                TaskOutcome::Group(outcome) => {
                    let critical = workflow
                        .steps
                        .iter()
                        .any(|s| s.recursive_group.as_deref() == Some(outcome.group.as_str()) && s.critical);
                    if outcome.status == StepStatus::Failed && critical {
                        critical_failure = true;
                        if workflow.join_policy == JoinPolicy::FailFast {
                            layer_abort.cancel();
                        }
                    }
                    apply_group_outcome(run, workflow, outcome);
                }
                TaskOutcome::Skipped(ids) => {
                    for id in ids {
                        run.step_status.insert(id, StepStatus::Pending);
                    }
                }
            }
        }

        // A panicked task leaves its steps in Running; pin them to Failed so
        // the run still reaches a coherent terminal state.
        for entry in &layer.entries {
            for id in entry.step_ids() {
                if run.step_status.get(id) == Some(&StepStatus::Running) {
                    run.step_status.insert(id.to_string(), StepStatus::Failed);
                    run.errors
                        .insert(id.to_string(), "invocation task failed".to_string());
                }
            }
        }

        critical_failure
    }

    async fn save_snapshot(&self, run: &ExecutionRun) {
        let record = match RunRecord::new(run.run_id, run.workflow_id, run.status.to_string(), run)
        {
            Ok(record) => record,
            Err(err) => {
                warn!(run_id = %run.run_id, error = %err, "snapshot serialization failed");
                return;
            }
        };
        if let Err(err) = self.store.save_run_snapshot(record).await {
            warn!(run_id = %run.run_id, error = %err, "snapshot save failed");
        }
    }
}

fn apply_step_result(run: &mut ExecutionRun, result: StepResult) {
    run.step_status.insert(result.step_id.clone(), result.status);
    if let Some(output) = result.output {
        run.outputs.insert(result.step_id.clone(), output);
    }
    if let Some(detail) = result.error_detail {
        run.errors.insert(result.step_id, detail);
    }
}

fn apply_group_outcome(run: &mut ExecutionRun, workflow: &Workflow, outcome: GroupOutcome) {
    run.group_rounds.insert(outcome.group.clone(), outcome.rounds);
    for step in &workflow.steps {
        if step.recursive_group.as_deref() == Some(outcome.group.as_str()) {
            run.step_status.insert(step.id.clone(), outcome.status);
        }
    }
    for (member, result) in outcome.member_results {
        if let Some(detail) = result.error_detail {
            run.errors.insert(member, detail);
        }
    }
    for (member, output) in outcome.outputs {
        run.outputs.insert(member, output);
    }
}

/// `failed` beats `partial` beats `success`; only critical failures fail
/// the run, everything else short of full success is partial.
fn aggregate_status(run: &ExecutionRun, workflow: &Workflow) -> RunStatus {
    let mut all_succeeded = true;
    for step in &workflow.steps {
        match run.step_status.get(&step.id) {
            Some(StepStatus::Succeeded) => {}
            Some(StepStatus::Failed) if step.critical => return RunStatus::Failed,
            _ => all_succeeded = false,
        }
    }
    if all_succeeded {
        RunStatus::Success
    } else {
        RunStatus::Partial
    }
}
