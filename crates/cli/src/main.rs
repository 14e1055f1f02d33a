//! `agentflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server (echo capabilities, in-memory store).
//! - `validate` — validate a workflow JSON file.
//! - `run`      — dry-run a workflow file against echo capabilities.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use agents::echo::EchoAgent;
use agents::AgentRegistry;
use engine::{Engine, EngineConfig, LogNotifier, RunStatus, Workflow};
use store::MemoryStore;

#[derive(Parser)]
#[command(
    name = "agentflow",
    about = "Multi-agent workflow orchestration engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        /// Agent names to register as echo capabilities.
        #[arg(long, value_delimiter = ',', default_value = "echo")]
        agents: Vec<String>,
        /// Worker-pool cap per run.
        #[arg(long, default_value_t = 8)]
        max_parallel: usize,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Dry-run a workflow file: every referenced agent becomes an echo
    /// capability, so layering and templating can be inspected end to end.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Seed context as a JSON object.
        #[arg(long)]
        seed: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, agents, max_parallel } => {
            info!("Starting API server on {bind}");
            let (engine, store) = build_engine(echo_registry(agents), max_parallel);
            let state = api::AppState {
                engine,
                store: store as Arc<dyn store::SnapshotStore>,
            };
            api::serve(&bind, state).await?;
        }

        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            let violations = engine::validate(&workflow);
            if violations.is_empty() {
                println!(
                    "✅ Workflow '{}' is valid ({} steps)",
                    workflow.name,
                    workflow.steps.len()
                );
            } else {
                eprintln!("❌ Validation failed with {} violation(s):", violations.len());
                for violation in &violations {
                    eprintln!("  - {violation}");
                }
                std::process::exit(1);
            }
        }

        Command::Run { path, seed } => {
            let workflow = load_workflow(&path)?;
            let seed: HashMap<String, serde_json::Value> = match seed {
                Some(raw) => serde_json::from_str(&raw).context("seed must be a JSON object")?,
                None => HashMap::new(),
            };

            let names: HashSet<String> =
                workflow.steps.iter().map(|s| s.agent.clone()).collect();
            let (engine, _store) = build_engine(echo_registry(names), 8);

            let run = engine.execute_workflow(&workflow, seed).await?;

            println!("Run {} — {}", run.run_id, run.summary());
            let mut step_ids: Vec<_> = run.step_status.keys().collect();
            step_ids.sort();
            for step_id in step_ids {
                println!("  {:<24} {}", step_id, run.step_status[step_id]);
            }
            if !run.outputs.is_empty() {
                println!("Outputs:\n{}", serde_json::to_string_pretty(&run.outputs)?);
            }
            if run.status == RunStatus::Failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn echo_registry(names: impl IntoIterator<Item = String>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for name in names {
        registry.register(Arc::new(EchoAgent::new(name)));
    }
    registry
}

fn build_engine(
    registry: AgentRegistry,
    max_parallel: usize,
) -> (Arc<Engine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        max_parallel_steps: max_parallel,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::new(
        Arc::new(registry),
        store.clone(),
        Arc::new(LogNotifier),
        config,
    ));
    (engine, store)
}

fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow JSON")
}
