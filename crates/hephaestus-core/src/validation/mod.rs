//! ValidationRegistry and ValidationStep (spec.md §4.5).

pub mod steps;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::error::FailureReason;
use crate::patch::Patch;

/// Context passed to a `ValidationStep::run` call.
pub struct ValidationContext<'a> {
    pub workspace_root: PathBuf,
    pub patch: &'a Patch,
    pub strategy_name: &'a str,
}

/// Outcome of one validation step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub pass: bool,
    pub report: String,
    /// Set when the step failed because it exceeded its deadline, so
    /// callers can record `FailureReason::Timeout` instead of the step's
    /// own fixed failure reason (spec.md §5, §7).
    pub timed_out: bool,
}

impl StepOutcome {
    pub fn ok(report: impl Into<String>) -> Self {
        Self { pass: true, report: report.into(), timed_out: false }
    }
    pub fn fail(report: impl Into<String>) -> Self {
        Self { pass: false, report: report.into(), timed_out: false }
    }
    pub fn timeout(report: impl Into<String>) -> Self {
        Self { pass: false, report: report.into(), timed_out: true }
    }
}

/// A single validation step in a strategy.
pub trait ValidationStep: Send + Sync {
    /// The name this step is registered under.
    fn name(&self) -> &str;
    fn run(&self, ctx: &ValidationContext) -> StepOutcome;
    /// The `FailureReason` recorded when this step fails.
    fn failure_reason(&self) -> FailureReason;
}

/// Named, ordered sequence of validation steps (spec.md §3).
#[derive(Debug, Clone)]
pub struct ValidationStrategy {
    pub name: String,
    pub steps: Vec<String>,
    pub sanity_check: String,
}

/// Outcome of running a full strategy (all steps in order).
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub pass: bool,
    /// Name of the step that failed, if any.
    pub failed_step: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub logs: Vec<(String, StepOutcomeLog)>,
}

#[derive(Debug, Clone)]
pub struct StepOutcomeLog {
    pub pass: bool,
    pub report: String,
}

const DEFAULT_STRATEGY: &str = "SYNTAX_ONLY";

/// Named validation strategies and the steps they are built from.
/// Readers see a consistent snapshot for the duration of a cycle (spec.md §4.12):
/// a cycle clones the `Arc` once at start and keeps using that snapshot.
pub struct ValidationRegistry {
    strategies: RwLock<Arc<HashMap<String, ValidationStrategy>>>,
    steps: RwLock<Arc<HashMap<String, Arc<dyn ValidationStep>>>>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        let registry = Self {
            strategies: RwLock::new(Arc::new(HashMap::new())),
            steps: RwLock::new(Arc::new(HashMap::new())),
        };
        registry.register_step(Arc::new(steps::SyntaxCheck));
        registry.register_step(Arc::new(steps::JsonCheck));
        registry.register_step(Arc::new(steps::PatchApplicatorStep));
        registry.register_step(Arc::new(steps::TestRunner::default()));
        registry.register_step(Arc::new(steps::NewFileTestRunner));
        registry.register_step(Arc::new(steps::FileExistence::default()));
        registry.register_step(Arc::new(steps::Benchmark::default()));
        registry.register_step(Arc::new(steps::SkipSanityCheck));

        registry.register_strategy(ValidationStrategy {
            name: DEFAULT_STRATEGY.to_string(),
            steps: vec!["syntax_check".to_string()],
            sanity_check: "skip_sanity_check".to_string(),
        });
        registry.register_strategy(ValidationStrategy {
            name: "SYNTAX_AND_PYTEST".to_string(),
            steps: vec!["syntax_check".to_string(), "patch_applicator".to_string(), "test_runner".to_string()],
            sanity_check: "test_runner".to_string(),
        });
        registry
    }

    pub fn register_step(&self, step: Arc<dyn ValidationStep>) {
        let mut guard = self.steps.write().expect("lock poisoned");
        let mut next = (**guard).clone();
        next.insert(step.name().to_string(), step);
        *guard = Arc::new(next);
    }

    pub fn register_strategy(&self, strategy: ValidationStrategy) {
        let mut guard = self.strategies.write().expect("lock poisoned");
        let mut next = (**guard).clone();
        next.insert(strategy.name.clone(), strategy);
        *guard = Arc::new(next);
    }

    /// Resolves a strategy by name. Unknown names fall back to
    /// `SYNTAX_ONLY` with a warning (spec.md §3).
    pub fn resolve(&self, name: &str) -> (ValidationStrategy, bool) {
        let strategies = self.strategies.read().expect("lock poisoned").clone();
        if let Some(strategy) = strategies.get(name) {
            (strategy.clone(), false)
        } else {
            warn!(target: "hephaestus::validation", requested = name, "unknown strategy, falling back to SYNTAX_ONLY");
            (strategies.get(DEFAULT_STRATEGY).cloned().expect("default strategy always registered"), true)
        }
    }

    pub fn step(&self, name: &str) -> Option<Arc<dyn ValidationStep>> {
        self.steps.read().expect("lock poisoned").get(name).cloned()
    }

    /// Names of every currently registered strategy. Used by
    /// `EvolutionEngine` to clone the live registry onto a scratch replay
    /// instance before testing a candidate mutation.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.read().expect("lock poisoned").keys().cloned().collect()
    }

    /// Runs every step of `strategy` in order against `ctx`, short-circuiting
    /// on the first failure (spec.md §4.5: "failure of any step terminates
    /// the strategy with a named reason").
    pub fn run_strategy(&self, strategy: &ValidationStrategy, ctx: &ValidationContext) -> ValidationReport {
        let mut logs = Vec::new();
        for step_name in &strategy.steps {
            let Some(step) = self.step(step_name) else {
                logs.push((step_name.clone(), StepOutcomeLog { pass: false, report: "step not registered".to_string() }));
                return ValidationReport {
                    pass: false,
                    failed_step: Some(step_name.clone()),
                    failure_reason: Some(FailureReason::SandboxError),
                    logs,
                };
            };
            let outcome = step.run(ctx);
            logs.push((step_name.clone(), StepOutcomeLog { pass: outcome.pass, report: outcome.report.clone() }));
            if !outcome.pass {
                let failure_reason = if outcome.timed_out { FailureReason::Timeout } else { step.failure_reason() };
                return ValidationReport {
                    pass: false,
                    failed_step: Some(step_name.clone()),
                    failure_reason: Some(failure_reason),
                    logs,
                };
            }
        }
        ValidationReport { pass: true, failed_step: None, failure_reason: None, logs }
    }

    /// Runs the strategy's `sanity_check` step alone against the working tree.
    pub fn run_sanity_check(&self, strategy: &ValidationStrategy, ctx: &ValidationContext) -> StepOutcome {
        match self.step(&strategy.sanity_check) {
            Some(step) => step.run(ctx),
            None => StepOutcome::fail(format!("sanity check `{}` not registered", strategy.sanity_check)),
        }
    }
}

impl Default for ValidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;
    use tempfile::tempdir;

    #[test]
    fn unknown_strategy_falls_back_to_syntax_only() {
        let registry = ValidationRegistry::new();
        let (strategy, fell_back) = registry.resolve("DOES_NOT_EXIST");
        assert!(fell_back);
        assert_eq!(strategy.name, DEFAULT_STRATEGY);
    }

    #[test]
    fn known_strategy_resolves_without_fallback() {
        let registry = ValidationRegistry::new();
        let (strategy, fell_back) = registry.resolve("SYNTAX_AND_PYTEST");
        assert!(!fell_back);
        assert_eq!(strategy.name, "SYNTAX_AND_PYTEST");
    }

    #[test]
    fn skip_sanity_check_always_passes() {
        let registry = ValidationRegistry::new();
        let dir = tempdir().unwrap();
        let patch = Patch::empty();
        let ctx = ValidationContext { workspace_root: dir.path().to_path_buf(), patch: &patch, strategy_name: "SYNTAX_ONLY" };
        let (strategy, _) = registry.resolve("SYNTAX_ONLY");
        let outcome = registry.run_sanity_check(&strategy, &ctx);
        assert!(outcome.pass);
    }
}
