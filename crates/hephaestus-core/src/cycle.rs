//! CycleRunner: the central state machine, one objective at a time
//! (spec.md §4.9, §4.11).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{
    AgentRegistry, ArchitectInput, CodeReviewerInput, ErrorAnalyzerDirective, ErrorAnalyzerInput, FileExcerpt,
    MaestroInput, ReviewVerdict,
};
use crate::completion::CompletionService;
use crate::error::FailureReason;
use crate::memory::{Memory, MemoryRecord, Outcome};
use crate::objective::{Objective, Origin};
use crate::params::ParameterStore;
use crate::patch::Patch;
use crate::predictive::PredictiveFailureEngine;
use crate::sandbox::Sandbox;
use crate::validation::{ValidationContext, ValidationRegistry};
use crate::vcs::VersionControl;

/// Phases of a single cycle (spec.md §4.11). `Idle` precedes acquisition;
/// every other state is reachable from the state before it, never
/// backwards — recovery is always a new cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Generated,
    Predicted,
    Planned,
    Reviewed,
    StrategyChosen,
    SandboxOk,
    Applied,
    Committed,
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleState {
    pub objective: Objective,
    pub patch: Option<Patch>,
    pub strategy_name: Option<String>,
    pub phase: Phase,
    pub attempt: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_transition_at: chrono::DateTime<chrono::Utc>,
    /// `PredictiveFailureEngine`'s risk score for this cycle's objective,
    /// carried through to `evolution_log.csv` (spec.md §6).
    pub risk_score: f64,
}

impl CycleState {
    fn new(objective: Objective) -> Self {
        let now = chrono::Utc::now();
        Self {
            objective,
            patch: None,
            strategy_name: None,
            phase: Phase::Idle,
            attempt: 0,
            started_at: now,
            last_transition_at: now,
            risk_score: 0.0,
        }
    }

    fn transition(&mut self, phase: Phase) {
        self.phase = phase;
        self.last_transition_at = chrono::Utc::now();
    }
}

pub const MAX_CORRECTIVE_DEPTH_DEFAULT: u32 = 3;

pub struct CycleRunner {
    agents: Arc<AgentRegistry>,
    validations: Arc<ValidationRegistry>,
    memory: Arc<Memory>,
    predictor: Arc<PredictiveFailureEngine>,
    params: Arc<ParameterStore>,
    vcs: Arc<dyn VersionControl>,
    completion: Arc<dyn CompletionService>,
    workspace_root: std::path::PathBuf,
    max_corrective_depth: u32,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<AgentRegistry>,
        validations: Arc<ValidationRegistry>,
        memory: Arc<Memory>,
        predictor: Arc<PredictiveFailureEngine>,
        params: Arc<ParameterStore>,
        vcs: Arc<dyn VersionControl>,
        completion: Arc<dyn CompletionService>,
        workspace_root: std::path::PathBuf,
        max_corrective_depth: u32,
    ) -> Self {
        Self { agents, validations, memory, predictor, params, vcs, completion, workspace_root, max_corrective_depth }
    }

    /// Runs exactly one objective through to a terminal phase (spec.md §4.9).
    /// Returns the objective the caller should enqueue next, if any (a
    /// corrective objective produced by ErrorAnalyzer).
    pub async fn run(&self, objective: Objective) -> (CycleState, Option<Objective>) {
        let mut state = CycleState::new(objective);
        state.transition(Phase::Generated);
        info!(target: "hephaestus::cycle", objective = %state.objective.id, text = %state.objective.text, "cycle started");

        let prediction = self.predictor.predict(&state.objective, &self.memory, &self.params);
        let predicted_high_risk = prediction.recommended_modifications.is_some();
        state.risk_score = prediction.risk_score;
        if let Some(modification) = &prediction.recommended_modifications {
            state.objective.metadata.insert("prediction_modification".to_string(), serde_json::json!(modification));
            state.objective.text = format!("{}\n\n{}", modification, state.objective.text);
        }
        state.transition(Phase::Predicted);

        let plan = self.plan(&mut state).await;
        let Some(patch) = plan else {
            let (next_state, next_objective) = self.handle_failure(state, predicted_high_risk).await;
            return (next_state, next_objective);
        };
        state.patch = Some(patch.clone());
        state.transition(Phase::Planned);

        if patch.is_empty() {
            return self.finish_success(state, "SYNTAX_ONLY".to_string(), Duration::default(), predicted_high_risk).await;
        }

        let reviewed_patch = match self.review(&mut state, patch).await {
            Ok(patch) => patch,
            Err(reason) => {
                state.transition(Phase::Failed { reason });
                let (next_state, next_objective) = self.handle_failure_with_state(state, reason, predicted_high_risk).await;
                return (next_state, next_objective);
            }
        };
        state.patch = Some(reviewed_patch.clone());
        state.transition(Phase::Reviewed);

        let strategy_name = self.choose_strategy(&mut state, &reviewed_patch).await;
        state.strategy_name = Some(strategy_name.clone());
        state.transition(Phase::StrategyChosen);

        let start = Instant::now();
        let validated = self.sandbox_validate(&state, &reviewed_patch, &strategy_name).await;
        if let Err(reason) = validated {
            state.transition(Phase::Failed { reason });
            let (next_state, next_objective) = self.handle_failure_with_state(state, reason, predicted_high_risk).await;
            return (next_state, next_objective);
        }
        state.transition(Phase::SandboxOk);

        if let Err(reason) = self.apply_to_working_tree(&reviewed_patch) {
            state.transition(Phase::Failed { reason });
            let (next_state, next_objective) = self.handle_failure_with_state(state, reason, predicted_high_risk).await;
            return (next_state, next_objective);
        }
        state.transition(Phase::Applied);

        let strategy = self.validations.resolve(&strategy_name).0;
        let sanity_ctx = ValidationContext { workspace_root: self.workspace_root.clone(), patch: &reviewed_patch, strategy_name: &strategy_name };
        let sanity = self.validations.run_sanity_check(&strategy, &sanity_ctx);
        if !sanity.pass {
            let reason = if sanity.timed_out { FailureReason::Timeout } else { FailureReason::SanityFailed };
            warn!(target: "hephaestus::cycle", objective = %state.objective.id, reason = %reason, "sanity check failed, rolling back");
            if let Some(head) = self.vcs.current_head() {
                let _ = self.vcs.reset_to(&self.workspace_root, head);
            }
            state.transition(Phase::Failed { reason });
            let (next_state, next_objective) = self.handle_failure_with_state(state, reason, predicted_high_risk).await;
            return (next_state, next_objective);
        }

        let duration = start.elapsed();
        self.finish_success(state, strategy_name, duration, predicted_high_risk).await
    }

    async fn plan(&self, state: &mut CycleState) -> Option<Patch> {
        let input = ArchitectInput {
            objective_text: state.objective.text.clone(),
            file_excerpts: Vec::new(),
            code_skeleton: String::new(),
        };
        match self.agents.invoke_architect(&input, self.completion.as_ref()).await {
            Ok(output) => {
                if output.patch.validate().is_err() {
                    None
                } else {
                    Some(output.patch)
                }
            }
            Err(e) => {
                warn!(target: "hephaestus::cycle", objective = %state.objective.id, error = %e, "planning failed");
                None
            }
        }
    }

    async fn review(&self, state: &mut CycleState, patch: Patch) -> Result<Patch, FailureReason> {
        let input = CodeReviewerInput { patch: patch.clone(), file_contexts: Vec::<FileExcerpt>::new() };
        match self.agents.invoke_code_reviewer(&input, self.completion.as_ref()).await {
            Ok(ReviewVerdict::Approve) => Ok(patch),
            Ok(ReviewVerdict::ApproveWithEdits { patch: edited }) => Ok(edited),
            Ok(ReviewVerdict::Reject { reason }) => {
                warn!(target: "hephaestus::cycle", objective = %state.objective.id, reason = %reason, "patch rejected by reviewer");
                Err(FailureReason::ReviewRejected)
            }
            Err(e) => {
                warn!(target: "hephaestus::cycle", objective = %state.objective.id, error = %e, "review call failed");
                Err(e.to_failure_reason())
            }
        }
    }

    async fn choose_strategy(&self, state: &mut CycleState, patch: &Patch) -> String {
        let failure_history: Vec<String> = self
            .memory
            .similar_failures(&state.objective.text, 5)
            .into_iter()
            .map(|r| r.objective_text)
            .collect();
        let input = MaestroInput { objective_text: state.objective.text.clone(), patch_summary: patch.summary(), failure_history };
        match self.agents.invoke_maestro(&input, self.completion.as_ref()).await {
            Ok(output) => {
                let (strategy, fell_back) = self.validations.resolve(&output.strategy_name);
                if fell_back {
                    warn!(
                        target: "hephaestus::cycle",
                        objective = %state.objective.id,
                        requested = %output.strategy_name,
                        fallback = %strategy.name,
                        reason = %FailureReason::StrategyUnknown,
                        "maestro named an unknown strategy, falling back"
                    );
                }
                strategy.name
            }
            Err(e) => {
                warn!(target: "hephaestus::cycle", objective = %state.objective.id, error = %e, "strategy selection failed, using default");
                self.validations.resolve("SYNTAX_ONLY").0.name
            }
        }
    }

    async fn sandbox_validate(&self, state: &CycleState, patch: &Patch, strategy_name: &str) -> Result<(), FailureReason> {
        let sandbox = Sandbox::open(&self.workspace_root).map_err(|_| FailureReason::SandboxError)?;
        let apply_result = sandbox.apply(patch);
        if let Err(e) = apply_result {
            sandbox.close();
            return Err(e.to_failure_reason());
        }
        let (strategy, _) = self.validations.resolve(strategy_name);
        let ctx = ValidationContext { workspace_root: sandbox.root().to_path_buf(), patch, strategy_name };
        let report = self.validations.run_strategy(&strategy, &ctx);
        sandbox.close();
        if report.pass {
            Ok(())
        } else {
            info!(target: "hephaestus::cycle", objective = %state.objective.id, failed_step = ?report.failed_step, "sandbox validation failed");
            Err(report.failure_reason.unwrap_or(FailureReason::SandboxError))
        }
    }

    fn apply_to_working_tree(&self, patch: &Patch) -> Result<(), FailureReason> {
        crate::patch_apply::PatchApplicator::new(&self.workspace_root)
            .apply(patch)
            .map_err(|_| FailureReason::ApplyFailed)
    }

    async fn finish_success(
        &self,
        mut state: CycleState,
        strategy_name: String,
        duration: Duration,
        predicted_high_risk: bool,
    ) -> (CycleState, Option<Objective>) {
        let is_noop = state.patch.as_ref().map(|p| p.is_empty()).unwrap_or(true);
        if !is_noop {
            match self.vcs.commit(&self.workspace_root, &commit_message(&state)) {
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "hephaestus::cycle", objective = %state.objective.id, error = %e, "commit failed");
                    state.transition(Phase::Failed { reason: FailureReason::ApplyFailed });
                    let record = MemoryRecord::new(state.objective.text.clone(), Outcome::Failure)
                        .with_failure_reason(FailureReason::ApplyFailed)
                        .with_patch_summary(state.patch.as_ref().map(|p| p.summary()).unwrap_or_default());
                    let _ = self.memory.record(record);
                    self.predictor.record_outcome(predicted_high_risk, true);
                    return (state, None);
                }
            }
        }
        state.transition(Phase::Committed);

        let record = MemoryRecord::new(state.objective.text.clone(), Outcome::Success)
            .with_strategy(strategy_name)
            .with_duration(duration)
            .with_patch_summary(state.patch.as_ref().map(|p| p.summary()).unwrap_or_else(|| "no-op".to_string()));
        let _ = self.memory.record(record);
        self.predictor.record_outcome(predicted_high_risk, false);
        info!(target: "hephaestus::cycle", objective = %state.objective.id, "cycle committed");
        (state, None)
    }

    /// On any validation/review/plan failure: records the failure, invokes
    /// ErrorAnalyzer, and applies its directive (spec.md §4.9 step 3-8, "On
    /// failure invokes ErrorAnalyzer").
    async fn handle_failure(&self, state: CycleState, predicted_high_risk: bool) -> (CycleState, Option<Objective>) {
        self.handle_failure_with_state(state, FailureReason::PlanningFailed, predicted_high_risk).await
    }

    async fn handle_failure_with_state(
        &self,
        mut state: CycleState,
        reason: FailureReason,
        predicted_high_risk: bool,
    ) -> (CycleState, Option<Objective>) {
        state.transition(Phase::Failed { reason });
        let record = MemoryRecord::new(state.objective.text.clone(), Outcome::Failure)
            .with_failure_reason(reason)
            .with_patch_summary(state.patch.as_ref().map(|p| p.summary()).unwrap_or_default());
        let _ = self.memory.record(record);
        self.predictor.record_outcome(predicted_high_risk, true);

        if state.objective.corrective_depth >= self.max_corrective_depth {
            info!(target: "hephaestus::cycle", objective = %state.objective.id, depth = state.objective.corrective_depth, "corrective chain abandoned: depth limit reached");
            return (state, None);
        }

        let recent_steps = vec![format!("{:?}", state.phase)];
        let input = ErrorAnalyzerInput { failure_reason: reason.as_str().to_string(), context: state.objective.text.clone(), recent_steps };
        match self.agents.invoke_error_analyzer(&input, self.completion.as_ref()).await {
            Ok(output) => {
                let next = self.apply_error_directive(&state.objective, output.directive);
                (state, next)
            }
            Err(_) => (state, None),
        }
    }

    fn apply_error_directive(&self, objective: &Objective, directive: ErrorAnalyzerDirective) -> Option<Objective> {
        match directive {
            ErrorAnalyzerDirective::RegeneratePatch => Some(objective.corrective(objective.text.clone(), objective.priority)),
            ErrorAnalyzerDirective::NewObjective { text } => Some(objective.corrective(text, objective.priority)),
            ErrorAnalyzerDirective::MetaAnalysis { text } => {
                let mut corrective = objective.corrective(format!("[META-ANALYSIS] {}", text), objective.priority);
                corrective.origin = Origin::MetaAnalysis;
                Some(corrective)
            }
            ErrorAnalyzerDirective::Abandon => None,
        }
    }
}

fn commit_message(state: &CycleState) -> String {
    match &state.patch {
        Some(patch) => format!("hephaestus: {}", patch.summary()),
        None => "hephaestus: no-op".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::StaticCompletionService;
    use crate::vcs::InMemoryVersionControl;

    fn serialize_agent_response(value: serde_json::Value) -> String {
        serde_json::to_string(&value).unwrap()
    }

    #[tokio::test]
    async fn happy_path_commits_on_empty_patch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn f() {}").unwrap();

        let architect_response = serialize_agent_response(serde_json::json!({"patch": {"operations": []}, "rationale": "nothing to do"}));
        let completion = Arc::new(StaticCompletionService::new(vec![architect_response]));

        let runner = CycleRunner::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(ValidationRegistry::new()),
            Arc::new(Memory::in_memory()),
            Arc::new(PredictiveFailureEngine::new()),
            Arc::new(ParameterStore::new()),
            Arc::new(InMemoryVersionControl::new()),
            completion,
            dir.path().to_path_buf(),
            MAX_CORRECTIVE_DEPTH_DEFAULT,
        );

        let objective = Objective::new("do nothing", 1, Origin::User);
        let (state, next) = runner.run(objective).await;
        assert_eq!(state.phase, Phase::Committed);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn planning_failure_invokes_error_analyzer_and_enqueues_corrective() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer_response = serialize_agent_response(serde_json::json!({"directive": "new_objective", "text": "retry more carefully", "summary": "retry"}));
        let completion = Arc::new(StaticCompletionService::new(vec!["not valid json from architect".to_string(), analyzer_response]));

        let runner = CycleRunner::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(ValidationRegistry::new()),
            Arc::new(Memory::in_memory()),
            Arc::new(PredictiveFailureEngine::new()),
            Arc::new(ParameterStore::new()),
            Arc::new(InMemoryVersionControl::new()),
            completion,
            dir.path().to_path_buf(),
            MAX_CORRECTIVE_DEPTH_DEFAULT,
        );

        let objective = Objective::new("add feature x", 1, Origin::User);
        let (state, next) = runner.run(objective).await;
        assert!(matches!(state.phase, Phase::Failed { .. }));
        let next = next.expect("expected corrective objective");
        assert_eq!(next.text, "retry more carefully");
        assert_eq!(next.corrective_depth, 1);
    }

    #[tokio::test]
    async fn reviewer_rejection_records_review_rejected_not_planning_failed() {
        let dir = tempfile::tempdir().unwrap();
        let architect_response = serialize_agent_response(
            serde_json::json!({"patch": {"operations": [{"op": "CREATE_FILE", "file": "a.rs", "content": "fn f() {}"}]}, "rationale": "add a"}),
        );
        let reviewer_response = serialize_agent_response(serde_json::json!({"verdict": "reject", "reason": "too risky"}));
        let analyzer_response = serialize_agent_response(serde_json::json!({"directive": "abandon", "summary": "drop it"}));
        let completion = Arc::new(StaticCompletionService::new(vec![architect_response, reviewer_response, analyzer_response]));

        let runner = CycleRunner::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(ValidationRegistry::new()),
            Arc::new(Memory::in_memory()),
            Arc::new(PredictiveFailureEngine::new()),
            Arc::new(ParameterStore::new()),
            Arc::new(InMemoryVersionControl::new()),
            completion,
            dir.path().to_path_buf(),
            MAX_CORRECTIVE_DEPTH_DEFAULT,
        );

        let objective = Objective::new("add a", 1, Origin::User);
        let (state, _next) = runner.run(objective).await;
        assert_eq!(state.phase, Phase::Failed { reason: FailureReason::ReviewRejected });
    }

    #[tokio::test]
    async fn unknown_strategy_falls_back_and_still_commits() {
        let dir = tempfile::tempdir().unwrap();
        let architect_response = serialize_agent_response(
            serde_json::json!({"patch": {"operations": [{"op": "CREATE_FILE", "file": "a.rs", "content": "fn f() {}"}]}, "rationale": "add a"}),
        );
        let reviewer_response = serialize_agent_response(serde_json::json!({"verdict": "approve"}));
        let maestro_response = serialize_agent_response(serde_json::json!({"strategy_name": "DOES_NOT_EXIST"}));
        let completion = Arc::new(StaticCompletionService::new(vec![architect_response, reviewer_response, maestro_response]));

        let runner = CycleRunner::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(ValidationRegistry::new()),
            Arc::new(Memory::in_memory()),
            Arc::new(PredictiveFailureEngine::new()),
            Arc::new(ParameterStore::new()),
            Arc::new(InMemoryVersionControl::new()),
            completion,
            dir.path().to_path_buf(),
            MAX_CORRECTIVE_DEPTH_DEFAULT,
        );

        let objective = Objective::new("add a", 1, Origin::User);
        let (state, _next) = runner.run(objective).await;
        assert_eq!(state.phase, Phase::Committed);
        assert_eq!(state.strategy_name.as_deref(), Some("SYNTAX_ONLY"));
    }

    #[tokio::test]
    async fn corrective_chain_abandoned_past_max_depth() {
        let dir = tempfile::tempdir().unwrap();
        let completion = Arc::new(StaticCompletionService::new(vec!["not valid json".to_string()]));

        let runner = CycleRunner::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(ValidationRegistry::new()),
            Arc::new(Memory::in_memory()),
            Arc::new(PredictiveFailureEngine::new()),
            Arc::new(ParameterStore::new()),
            Arc::new(InMemoryVersionControl::new()),
            completion,
            dir.path().to_path_buf(),
            1,
        );

        let root = Objective::new("add feature x", 1, Origin::User);
        let already_deep = root.corrective("add feature x", 1);
        let (state, next) = runner.run(already_deep).await;
        assert!(matches!(state.phase, Phase::Failed { .. }));
        assert!(next.is_none());
    }
}
