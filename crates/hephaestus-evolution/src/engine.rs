//! EvolutionEngine: the background mutation/fitness loop (spec.md §4.10).
//! Implements `hephaestus_core::EvolutionHandle` so `Coordinator` can drive
//! it without `hephaestus-core` depending on this crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use hephaestus_core::completion::StaticCompletionService;
use hephaestus_core::{
    AgentRegistry, CompletionService, CycleRunner, EvolutionHandle, InMemoryVersionControl, Memory, Objective, Outcome,
    ParameterStore, Phase, PredictiveFailureEngine, ValidationRegistry, VersionControl,
};
use hephaestus_core::params;

use crate::fitness::{self, ReplaySummary};
use crate::mutation::{Mutation, MutationKind, MutationStatus};
use crate::replay::{ReplayRunner, ReplaySet};
use crate::rollback::RollbackLedger;

/// Consecutive failures that trip emergency mode (spec.md §4.10 "Anti-loop
/// safety"): only conservative mutations (prompt, parameter) are proposed,
/// structural ones (strategy, workflow, agent behavior) are frozen.
const EMERGENCY_FAILURE_THRESHOLD: usize = 3;
const DEFAULT_CANDIDATES_PER_TICK: usize = 3;
const DEFAULT_REPLAY_SIZE: usize = 10;
const DEFAULT_MONITOR_WINDOW: usize = 20;

pub struct EvolutionEngine {
    agents: Arc<AgentRegistry>,
    validations: Arc<ValidationRegistry>,
    params: Arc<ParameterStore>,
    memory: Arc<Memory>,
    rollback: RollbackLedger,
    candidates_per_tick: usize,
    replay_size: usize,
    monitor_window: usize,
}

impl EvolutionEngine {
    pub fn new(agents: Arc<AgentRegistry>, validations: Arc<ValidationRegistry>, params: Arc<ParameterStore>, memory: Arc<Memory>) -> Self {
        Self {
            agents,
            validations,
            params,
            memory,
            rollback: RollbackLedger::new(),
            candidates_per_tick: DEFAULT_CANDIDATES_PER_TICK,
            replay_size: DEFAULT_REPLAY_SIZE,
            monitor_window: DEFAULT_MONITOR_WINDOW,
        }
    }

    fn consecutive_failures(&self) -> usize {
        let mut count = 0;
        for record in self.memory.recent(10) {
            if record.outcome == Outcome::Failure {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    /// Step 1 (Observe) is folded into the caller reading `Memory::summary`
    /// and `consecutive_failures`; step 2 (Propose) lives here.
    fn propose(&self, summary: &hephaestus_core::memory::Summary, emergency: bool) -> Vec<Mutation> {
        let mut candidates = Vec::new();
        candidates.extend(self.propose_prompt_mutation(summary));
        candidates.extend(self.propose_parameter_mutation(summary));
        if !emergency {
            candidates.extend(self.propose_strategy_mutation());
            candidates.extend(self.propose_workflow_mutation(summary));
            candidates.extend(self.propose_agent_behavior_mutation(summary));
        } else {
            info!(target: "hephaestus::evolution", "emergency mode: structural mutations frozen");
        }
        candidates.truncate(self.candidates_per_tick);
        candidates
    }

    fn propose_prompt_mutation(&self, summary: &hephaestus_core::memory::Summary) -> Option<Mutation> {
        let worst_cluster = summary.per_cluster_failures.iter().max_by_key(|(_, count)| **count).map(|(cluster, _)| cluster.clone())?;
        let agent_name = "architect";
        let spec = self.agents.spec(agent_name)?;
        let hint = format!(
            " Objectives resembling cluster {} have failed most often recently; double-check assumptions before proposing a patch.",
            worst_cluster
        );
        if spec.prompt_template.contains(&hint) {
            return None;
        }
        let after = format!("{}{}", spec.prompt_template, hint);
        Some(Mutation::new(MutationKind::Prompt, agent_name, spec.prompt_template, after))
    }

    fn propose_parameter_mutation(&self, summary: &hephaestus_core::memory::Summary) -> Option<Mutation> {
        let target = params::HIGH_RISK_THRESHOLD;
        let current = self.params.get(target, 0.7);
        let after = if summary.success_rate < 0.5 { (current - 0.05).max(0.3) } else { (current + 0.02).min(0.95) };
        if (after - current).abs() < 1e-9 {
            return None;
        }
        Some(Mutation::new(MutationKind::Parameter, target, current.to_string(), after.to_string()))
    }

    fn propose_strategy_mutation(&self) -> Option<Mutation> {
        let (strategy, _) = self.validations.resolve("SYNTAX_ONLY");
        if strategy.steps.iter().any(|s| s == "patch_applicator") {
            return None;
        }
        let mut steps = strategy.steps.clone();
        steps.push("patch_applicator".to_string());
        Some(Mutation::new(MutationKind::Strategy, strategy.name, strategy.steps.join(","), steps.join(",")))
    }

    fn propose_workflow_mutation(&self, summary: &hephaestus_core::memory::Summary) -> Option<Mutation> {
        let (strategy, _) = self.validations.resolve("SYNTAX_AND_PYTEST");
        let after = if summary.success_rate < 0.5 { "test_runner" } else { "skip_sanity_check" };
        if strategy.sanity_check == after {
            return None;
        }
        Some(Mutation::new(MutationKind::Workflow, strategy.name, strategy.sanity_check, after))
    }

    fn propose_agent_behavior_mutation(&self, summary: &hephaestus_core::memory::Summary) -> Option<Mutation> {
        let agent_name = "maestro";
        let spec = self.agents.spec(agent_name)?;
        let after = if summary.success_rate < 0.5 { (spec.temperature - 0.05).max(0.05) } else { (spec.temperature + 0.05).min(0.9) };
        if (after - spec.temperature).abs() < 1e-6 {
            return None;
        }
        Some(Mutation::new(MutationKind::AgentBehavior, agent_name, spec.temperature.to_string(), after.to_string()))
    }

    /// Builds an isolated set of registries seeded from the live ones, with
    /// `overrides` applied on top, for replay testing without touching
    /// production state.
    fn build_harness(&self, overrides: &[Mutation]) -> Harness {
        let agents = clone_agents(&self.agents);
        let validations = clone_validations(&self.validations);
        let params = clone_params(&self.params);
        for mutation in overrides {
            apply_mutation(mutation, &agents, &validations, &params);
        }
        Harness {
            agents: Arc::new(agents),
            validations: Arc::new(validations),
            params: Arc::new(params),
            memory: Arc::new(Memory::in_memory()),
            predictor: Arc::new(PredictiveFailureEngine::new()),
            vcs: Arc::new(InMemoryVersionControl::new()),
            completion: Arc::new(
                StaticCompletionService::new(Vec::new())
                    .with_default(r#"{"patch": {"operations": []}, "rationale": "replay"}"#),
            ),
            workspace_root: PathBuf::from("."),
        }
    }

    fn deploy(&self, mutation: Mutation) {
        apply_mutation(&mutation, &self.agents, &self.validations, &self.params);
        let baseline_success_rate = self.memory.rolling_success_rate(self.monitor_window);
        info!(target: "hephaestus::evolution", kind = ?mutation.kind, target = %mutation.target, "deployed mutation");
        self.rollback.record_deployment(mutation, baseline_success_rate);
    }

    fn monitor(&self) {
        let current = self.memory.rolling_success_rate(self.monitor_window);
        let margin = self.params.get(params::EVOLUTION_ROLLBACK_MARGIN, 0.1);
        for deployment in self.rollback.check_rollbacks(current, margin) {
            let reverse = deployment.mutation.reversed();
            apply_mutation(&reverse, &self.agents, &self.validations, &self.params);
        }
    }
}

#[async_trait]
impl EvolutionHandle for EvolutionEngine {
    async fn tick(&self) {
        let summary = self.memory.summary();
        let failures = self.consecutive_failures();
        let emergency = failures >= EMERGENCY_FAILURE_THRESHOLD;
        if emergency {
            warn!(target: "hephaestus::evolution", consecutive_failures = failures, "emergency evolution mode active");
        }

        let candidates = self.propose(&summary, emergency);
        if candidates.is_empty() {
            self.monitor();
            return;
        }

        let replay = ReplaySet::from_memory(&self.memory, self.replay_size);
        if replay.is_empty() {
            self.monitor();
            return;
        }

        let baseline_harness = self.build_harness(&[]);
        let baseline_summary = replay.evaluate(&baseline_harness).await;
        let acceptance_threshold = self.params.get(params::EVOLUTION_ACCEPTANCE_THRESHOLD, 0.05);

        for mut mutation in candidates {
            if let Some(dead_end) = self.rollback.is_dead_end(&mutation) {
                mutation.status = MutationStatus::Rejected;
                info!(target: "hephaestus::evolution", target = %mutation.target, reason = %dead_end.reason, "candidate skipped: evolutionary dead-end");
                continue;
            }

            mutation.status = MutationStatus::Testing;
            let candidate_harness = self.build_harness(std::slice::from_ref(&mutation));
            let candidate_summary = replay.evaluate(&candidate_harness).await;
            let regression_count = regressions(&baseline_summary, &candidate_summary);
            let report = fitness::score(&baseline_summary, &candidate_summary, regression_count);
            mutation.fitness = Some(report.score);

            if report.score >= acceptance_threshold && regression_count == 0 {
                mutation.status = MutationStatus::Accepted;
                self.deploy(mutation);
            } else {
                mutation.status = MutationStatus::Rejected;
                self.rollback.mark_dead_end(&mutation, "fitness below acceptance threshold or regression detected");
            }
        }

        self.monitor();
    }
}

fn regressions(baseline: &ReplaySummary, candidate: &ReplaySummary) -> u32 {
    baseline
        .case_results
        .iter()
        .zip(candidate.case_results.iter())
        .filter(|(was_ok, now_ok)| **was_ok && !**now_ok)
        .count() as u32
}

fn clone_agents(live: &AgentRegistry) -> AgentRegistry {
    let scratch = AgentRegistry::new();
    for name in ["architect", "code_reviewer", "maestro", "error_analyzer"] {
        if let Some(spec) = live.spec(name) {
            scratch.register_spec(name, spec);
        }
    }
    scratch
}

fn clone_validations(live: &ValidationRegistry) -> ValidationRegistry {
    let scratch = ValidationRegistry::new();
    for name in live.strategy_names() {
        let (strategy, _) = live.resolve(&name);
        scratch.register_strategy(strategy);
    }
    scratch
}

fn clone_params(live: &ParameterStore) -> ParameterStore {
    let scratch = ParameterStore::new();
    for (name, value) in live.snapshot().iter() {
        scratch.set(name, *value);
    }
    scratch
}

fn apply_mutation(mutation: &Mutation, agents: &AgentRegistry, validations: &ValidationRegistry, params: &ParameterStore) {
    match mutation.kind {
        MutationKind::Prompt => {
            if let Some(mut spec) = agents.spec(&mutation.target) {
                spec.prompt_template = mutation.after.clone();
                agents.register_spec(&mutation.target, spec);
            }
        }
        MutationKind::AgentBehavior => {
            if let (Some(mut spec), Ok(value)) = (agents.spec(&mutation.target), mutation.after.parse::<f32>()) {
                spec.temperature = value;
                agents.register_spec(&mutation.target, spec);
            }
        }
        MutationKind::Parameter => {
            if let Ok(value) = mutation.after.parse::<f64>() {
                params.set(&mutation.target, value);
            }
        }
        MutationKind::Strategy => {
            let (mut strategy, fell_back) = validations.resolve(&mutation.target);
            if fell_back {
                warn!(target: "hephaestus::evolution", target = %mutation.target, "cannot apply strategy mutation: unknown strategy");
                return;
            }
            strategy.steps = mutation.after.split(',').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect();
            validations.register_strategy(strategy);
        }
        MutationKind::Workflow => {
            let (mut strategy, fell_back) = validations.resolve(&mutation.target);
            if fell_back {
                warn!(target: "hephaestus::evolution", target = %mutation.target, "cannot apply workflow mutation: unknown strategy");
                return;
            }
            strategy.sanity_check = mutation.after.clone();
            validations.register_strategy(strategy);
        }
    }
}

/// Drives one held-out objective through a real `CycleRunner` built from
/// the (possibly mutated) scratch registries.
struct Harness {
    agents: Arc<AgentRegistry>,
    validations: Arc<ValidationRegistry>,
    params: Arc<ParameterStore>,
    memory: Arc<Memory>,
    predictor: Arc<PredictiveFailureEngine>,
    vcs: Arc<dyn VersionControl>,
    completion: Arc<dyn CompletionService>,
    workspace_root: PathBuf,
}

#[async_trait]
impl ReplayRunner for Harness {
    async fn attempt(&self, objective: &Objective) -> (bool, Duration) {
        let runner = CycleRunner::new(
            self.agents.clone(),
            self.validations.clone(),
            self.memory.clone(),
            self.predictor.clone(),
            self.params.clone(),
            self.vcs.clone(),
            self.completion.clone(),
            self.workspace_root.clone(),
            1,
        );
        let start = Instant::now();
        let (state, _) = runner.run(objective.clone()).await;
        (matches!(state.phase, Phase::Committed), start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hephaestus_core::MemoryRecord;

    fn new_engine() -> EvolutionEngine {
        EvolutionEngine::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(ValidationRegistry::new()),
            Arc::new(ParameterStore::new()),
            Arc::new(Memory::in_memory()),
        )
    }

    #[tokio::test]
    async fn tick_with_empty_memory_is_a_no_op() {
        let engine = new_engine();
        engine.tick().await;
        assert_eq!(engine.rollback.active_count(), 0);
    }

    /// The replay harness substitutes a deterministic no-op completion stub
    /// (see `replay.rs`), so a candidate and the baseline commit identically
    /// every time: nothing ever clears the acceptance threshold. A tick over
    /// real failure history should propose candidates, replay them, and
    /// reject every one rather than deploy blind — and remember them as
    /// dead ends so the next tick does not re-test the same candidates.
    #[tokio::test]
    async fn tick_proposes_and_rejects_structurally_indistinguishable_candidates() {
        let memory = Arc::new(Memory::in_memory());
        for _ in 0..3 {
            memory
                .record(MemoryRecord::new("refactor the async scheduler internals", Outcome::Failure))
                .unwrap();
        }
        let agents = Arc::new(AgentRegistry::new());
        let before = agents.spec("architect").unwrap().prompt_template;

        let engine = EvolutionEngine::new(agents.clone(), Arc::new(ValidationRegistry::new()), Arc::new(ParameterStore::new()), memory);
        engine.tick().await;

        let after = agents.spec("architect").unwrap().prompt_template;
        assert_eq!(before, after, "no candidate should clear the acceptance threshold against an identical replay baseline");
        assert_eq!(engine.rollback.active_count(), 0);
    }

    #[test]
    fn clone_params_copies_every_live_value() {
        let live = ParameterStore::new();
        live.set(params::HIGH_RISK_THRESHOLD, 0.42);
        let scratch = clone_params(&live);
        assert_eq!(scratch.get(params::HIGH_RISK_THRESHOLD, 0.0), 0.42);
    }

    #[test]
    fn apply_mutation_updates_target_agent_prompt() {
        let agents = AgentRegistry::new();
        let validations = ValidationRegistry::new();
        let params = ParameterStore::new();
        let mutation = Mutation::new(MutationKind::Prompt, "architect", "old", "new prompt text");
        apply_mutation(&mutation, &agents, &validations, &params);
        assert_eq!(agents.spec("architect").unwrap().prompt_template, "new prompt text");
    }
}
