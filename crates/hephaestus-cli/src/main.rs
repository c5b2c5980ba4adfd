//! Minimal CLI front-end for the Hephaestus evolution core (spec.md §6:
//! "full CLI is out of scope"). Wires the in-scope capabilities
//! (`CompletionService`, `VersionControl`) to stub implementations, since
//! a real LLM provider client and git invocation are both explicitly
//! contracted-but-external per spec.md §1.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hephaestus_core::completion::StaticCompletionService;
use hephaestus_core::{
    AgentRegistry, Config, Coordinator, CoordinatorConfig, EvolutionPolicy, InMemoryVersionControl, Memory,
    NoopEvolution, ParameterStore, Phase, PredictiveFailureEngine, ValidationRegistry,
};
use hephaestus_evolution::EvolutionEngine;

const NOOP_ARCHITECT_RESPONSE: &str = r#"{"patch": {"operations": []}, "rationale": "no changes proposed"}"#;

#[derive(Parser)]
#[command(name = "hephaestus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hephaestus recursive self-improvement core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator in the foreground until interrupted.
    Run,
    /// Enqueue one objective and wait for it to reach a terminal phase.
    Submit {
        text: String,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Print a summary of persisted memory under HEPHAESTUS_HOME.
    Status,
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(3);
        }
    };

    match cli.command {
        Commands::Run => runtime.block_on(run()),
        Commands::Submit { text, priority } => runtime.block_on(submit(text, priority)),
        Commands::Status => status(),
    }
}

fn build_coordinator(config: &Config) -> anyhow::Result<Arc<Coordinator>> {
    let memory = Arc::new(Memory::open(config.memory_path())?);
    let agents = Arc::new(AgentRegistry::new());
    let validations = Arc::new(ValidationRegistry::new());
    config.load_strategies_into(&validations)?;
    let params = Arc::new(ParameterStore::new());
    let predictor = Arc::new(PredictiveFailureEngine::new());
    let completion = Arc::new(StaticCompletionService::new(Vec::new()).with_default(NOOP_ARCHITECT_RESPONSE));
    let vcs = Arc::new(InMemoryVersionControl::new());

    let evolution: Arc<dyn hephaestus_core::EvolutionHandle> = match config.evolution_policy {
        EvolutionPolicy::Off => Arc::new(NoopEvolution),
        EvolutionPolicy::On | EvolutionPolicy::Emergency => {
            Arc::new(EvolutionEngine::new(agents.clone(), validations.clone(), params.clone(), memory.clone()))
        }
    };

    let coordinator_config = CoordinatorConfig { workspace_root: config.home.clone(), max_corrective_depth: config.max_corrective_depth, ..CoordinatorConfig::default() };
    let evolution_log = Some(Arc::new(hephaestus_core::EvolutionLog::open(config.evolution_log_path())?));

    Ok(Coordinator::with_evolution_log(
        coordinator_config,
        agents,
        validations,
        memory,
        predictor,
        params,
        vcs,
        completion,
        evolution,
        evolution_log,
    ))
}

async fn run() -> ExitCode {
    let config = Config::from_env();
    let coordinator = match build_coordinator(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to start coordinator: {e}");
            return ExitCode::from(3);
        }
    };

    coordinator.start();
    tracing::info!(target: "hephaestus::cli", "coordinator running, press ctrl-c to stop");
    let _ = tokio::signal::ctrl_c().await;
    coordinator.shutdown();
    ExitCode::SUCCESS
}

async fn submit(text: String, priority: i64) -> ExitCode {
    if text.trim().is_empty() {
        eprintln!("objective text must not be empty");
        return ExitCode::from(2);
    }

    let config = Config::from_env();
    let coordinator = match build_coordinator(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to reach backend: {e}");
            return ExitCode::from(3);
        }
    };

    let id = match coordinator.submit(text, priority, HashMap::new()) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("submit failed: {e}");
            return ExitCode::from(3);
        }
    };

    coordinator.start();
    for _ in 0..100 {
        if let Some(cycle_status) = coordinator.status(id) {
            if matches!(cycle_status.phase, Phase::Committed | Phase::Failed { .. }) {
                coordinator.shutdown();
                println!("{}", serde_json::json!({"objective_id": id, "phase": cycle_status.phase}));
                return ExitCode::SUCCESS;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    coordinator.shutdown();
    eprintln!("objective {id} did not reach a terminal phase in time");
    ExitCode::from(3)
}

fn status() -> ExitCode {
    let config = Config::from_env();
    let memory = match Memory::open(config.memory_path()) {
        Ok(memory) => memory,
        Err(e) => {
            eprintln!("failed to reach backend: {e}");
            return ExitCode::from(3);
        }
    };

    let summary = memory.summary();
    println!(
        "{}",
        serde_json::json!({
            "total": summary.total,
            "success_rate": summary.success_rate,
            "per_cluster_failures": summary.per_cluster_failures,
        })
    );
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["hephaestus", "status"]).expect("parse status");
        assert!(matches!(cli.command, Commands::Status));

        let cli = Cli::try_parse_from(["hephaestus", "submit", "fix the bug", "--priority", "5"]).expect("parse submit");
        match cli.command {
            Commands::Submit { text, priority } => {
                assert_eq!(text, "fix the bug");
                assert_eq!(priority, 5);
            }
            _ => panic!("expected Submit"),
        }
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["hephaestus", "submit"]).is_err());
    }
}
