//! Coordinator: owns the long-lived components and the cooperative task
//! set (spec.md §3 Ownership, §5 Concurrency & Resource Model).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::agent::AgentRegistry;
use crate::completion::CompletionService;
use crate::cycle::{CycleRunner, CycleState, Phase};
use crate::error::{CoreError, FailureReason};
use crate::evolution_log::{EvolutionLog, EvolutionLogRow};
use crate::generator::{GeneratorInputs, ObjectiveGenerator};
use crate::memory::Memory;
use crate::objective::{Objective, ObjectiveId, Origin};
use crate::params::ParameterStore;
use crate::predictive::PredictiveFailureEngine;
use crate::queue::ObjectiveQueue;
use crate::validation::ValidationRegistry;
use crate::vcs::VersionControl;

/// Hook `EvolutionEngine` (in `hephaestus-evolution`) implements so the
/// Coordinator can drive it without `hephaestus-core` depending on that
/// crate. One `tick()` is one observe/propose/test/select/deploy/monitor
/// pass (spec.md §4.10).
#[async_trait]
pub trait EvolutionHandle: Send + Sync {
    async fn tick(&self);
}

/// No-op handle used when `HEPHAESTUS_EVOLUTION=off` (spec.md §9 default).
pub struct NoopEvolution;
#[async_trait]
impl EvolutionHandle for NoopEvolution {
    async fn tick(&self) {}
}

#[derive(Debug, Clone)]
pub struct CycleStatus {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub reason: Option<FailureReason>,
}

/// Configuration the Coordinator needs beyond what each component already
/// carries; distinct from `crate::config::Config` so tests can construct
/// one without touching the filesystem or environment.
pub struct CoordinatorConfig {
    pub workspace_root: PathBuf,
    pub max_corrective_depth: u32,
    pub dequeue_timeout: Duration,
    pub evolution_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            max_corrective_depth: 3,
            dequeue_timeout: Duration::from_secs(5),
            evolution_interval: Duration::from_secs(60),
            queue_capacity: 256,
        }
    }
}

pub struct Coordinator {
    queue: Arc<ObjectiveQueue>,
    memory: Arc<Memory>,
    cycle_runner: CycleRunner,
    generator: ObjectiveGenerator,
    completion: Arc<dyn CompletionService>,
    evolution: Arc<dyn EvolutionHandle>,
    evolution_log: Option<Arc<EvolutionLog>>,
    statuses: StdMutex<HashMap<ObjectiveId, CycleStatus>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    dequeue_timeout: Duration,
    evolution_interval: Duration,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        agents: Arc<AgentRegistry>,
        validations: Arc<ValidationRegistry>,
        memory: Arc<Memory>,
        predictor: Arc<PredictiveFailureEngine>,
        params: Arc<ParameterStore>,
        vcs: Arc<dyn VersionControl>,
        completion: Arc<dyn CompletionService>,
        evolution: Arc<dyn EvolutionHandle>,
    ) -> Arc<Self> {
        Self::with_evolution_log(config, agents, validations, memory, predictor, params, vcs, completion, evolution, None)
    }

    /// Same as `new`, additionally appending a row to `evolution_log` for
    /// every cycle that reaches a terminal phase (spec.md §6).
    #[allow(clippy::too_many_arguments)]
    pub fn with_evolution_log(
        config: CoordinatorConfig,
        agents: Arc<AgentRegistry>,
        validations: Arc<ValidationRegistry>,
        memory: Arc<Memory>,
        predictor: Arc<PredictiveFailureEngine>,
        params: Arc<ParameterStore>,
        vcs: Arc<dyn VersionControl>,
        completion: Arc<dyn CompletionService>,
        evolution: Arc<dyn EvolutionHandle>,
        evolution_log: Option<Arc<EvolutionLog>>,
    ) -> Arc<Self> {
        let queue = Arc::new(ObjectiveQueue::new(config.queue_capacity));
        let cycle_runner = CycleRunner::new(
            agents,
            validations,
            memory.clone(),
            predictor,
            params,
            vcs,
            completion.clone(),
            config.workspace_root,
            config.max_corrective_depth,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            queue,
            memory,
            cycle_runner,
            generator: ObjectiveGenerator::new(),
            completion,
            evolution,
            evolution_log,
            statuses: StdMutex::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            dequeue_timeout: config.dequeue_timeout,
            evolution_interval: config.evolution_interval,
        })
    }

    /// Enqueue API (spec.md §6): `submit`. Each call does its work and
    /// returns immediately — the "Input task" is this call itself, not a
    /// background loop, since enqueue is already internally synchronized
    /// and never blocks.
    pub fn submit(&self, text: impl Into<String>, priority: i64, metadata: HashMap<String, Value>) -> Result<ObjectiveId, CoreError> {
        let mut objective = Objective::new(text, priority, Origin::User);
        objective.metadata = metadata;
        let id = self.queue.enqueue(objective)?;
        self.statuses.lock().expect("lock poisoned").insert(
            id,
            CycleStatus { phase: Phase::Idle, started_at: Utc::now(), reason: None },
        );
        Ok(id)
    }

    pub fn status(&self, id: ObjectiveId) -> Option<CycleStatus> {
        self.statuses.lock().expect("lock poisoned").get(&id).cloned()
    }

    pub fn queue_snapshot(&self) -> Vec<Objective> {
        self.queue.peek_all()
    }

    /// Spawns the Worker and Evolution tasks. Returns immediately; call
    /// `shutdown()` to request cooperative termination.
    pub fn start(self: &Arc<Self>) {
        let worker_self = self.clone();
        tokio::spawn(async move { worker_self.run_worker().await });

        let evolution_self = self.clone();
        tokio::spawn(async move { evolution_self.run_evolution().await });
    }

    pub fn shutdown(&self) {
        info!(target: "hephaestus::coordinator", "shutdown requested");
        let _ = self.shutdown_tx.send(true);
        self.queue.shutdown();
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            if self.is_shutting_down() {
                info!(target: "hephaestus::coordinator", "worker task stopping");
                return;
            }

            let objective = match self.queue.dequeue(self.dequeue_timeout).await {
                Some(objective) => objective,
                None => {
                    if self.is_shutting_down() {
                        return;
                    }
                    let inputs = GeneratorInputs { project_scan_summary: String::new(), roadmap: String::new() };
                    self.generator.generate(&inputs, &self.memory, self.completion.as_ref()).await
                }
            };

            self.record_status(objective.id, Phase::Generated, None);
            let (state, corrective) = self.cycle_runner.run(objective).await;
            let reason = match &state.phase {
                Phase::Failed { reason } => Some(*reason),
                _ => None,
            };
            self.record_status(state.objective.id, state.phase.clone(), reason);
            self.append_evolution_log(&state);

            if let Some(corrective) = corrective {
                if let Err(e) = self.queue.enqueue(corrective) {
                    warn!(target: "hephaestus::coordinator", error = ?e, "failed to enqueue corrective objective");
                }
            }
        }
    }

    async fn run_evolution(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.evolution_interval);
        loop {
            ticker.tick().await;
            if self.is_shutting_down() {
                info!(target: "hephaestus::coordinator", "evolution task stopping");
                return;
            }
            self.evolution.tick().await;
        }
    }

    fn record_status(&self, id: ObjectiveId, phase: Phase, reason: Option<FailureReason>) {
        let started_at = self
            .statuses
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .map(|s| s.started_at)
            .unwrap_or_else(Utc::now);
        self.statuses.lock().expect("lock poisoned").insert(id, CycleStatus { phase, started_at, reason });
    }

    fn append_evolution_log(&self, state: &CycleState) {
        let Some(log) = &self.evolution_log else { return };
        if let Err(e) = log.append(&EvolutionLogRow::from_state(state)) {
            warn!(target: "hephaestus::coordinator", error = %e, "failed to append evolution log row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::StaticCompletionService;
    use crate::vcs::InMemoryVersionControl;

    fn build_coordinator(dir: &std::path::Path, responses: Vec<String>) -> Arc<Coordinator> {
        let completion = Arc::new(StaticCompletionService::new(responses));
        let config = CoordinatorConfig { workspace_root: dir.to_path_buf(), ..CoordinatorConfig::default() };
        Coordinator::new(
            config,
            Arc::new(AgentRegistry::new()),
            Arc::new(ValidationRegistry::new()),
            Arc::new(Memory::in_memory()),
            Arc::new(PredictiveFailureEngine::new()),
            Arc::new(ParameterStore::new()),
            Arc::new(InMemoryVersionControl::new()),
            completion,
            Arc::new(NoopEvolution),
        )
    }

    #[tokio::test]
    async fn submit_then_status_reflects_committed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let architect_response =
            serde_json::json!({"patch": {"operations": []}, "rationale": "noop"}).to_string();
        let coordinator = build_coordinator(dir.path(), vec![architect_response]);

        let id = coordinator.submit("do nothing", 1, HashMap::new()).unwrap();
        coordinator.start();

        for _ in 0..50 {
            if let Some(status) = coordinator.status(id) {
                if status.phase == Phase::Committed {
                    coordinator.shutdown();
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        coordinator.shutdown();
        panic!("objective never reached COMMITTED");
    }

    #[test]
    fn queue_snapshot_reflects_pending_objectives() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = build_coordinator(dir.path(), vec![]);
        coordinator.submit("a", 1, HashMap::new()).unwrap();
        coordinator.submit("b", 5, HashMap::new()).unwrap();
        let snapshot = coordinator.queue_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].text, "b");
    }
}
