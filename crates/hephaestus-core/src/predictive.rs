//! PredictiveFailureEngine: scores objectives for failure risk before
//! dispatch and may prepend recommended context (spec.md §4.3). Weights
//! live in `ParameterStore` so `EvolutionEngine` can tune them without a
//! code change.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::memory::Memory;
use crate::objective::Objective;
use crate::params::{self, ParameterStore};

const RISK_KEYWORDS: &[&str] = &["complexity", "complex", "async", "refactor", "concurrency", "migrate", "rewrite"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePrediction {
    pub risk_score: f64,
    pub factors: Vec<String>,
    pub recommended_modifications: Option<String>,
}

impl FailurePrediction {
    /// The fail-soft default: zero risk, no modification, objective proceeds unchanged.
    pub fn none() -> Self {
        Self { risk_score: 0.0, factors: Vec::new(), recommended_modifications: None }
    }
}

/// Per-pattern accuracy counters fed back after each cycle terminates
/// (spec.md §4.3 step 4). Kept coarse: one hit/miss tally per recognized
/// factor name, enough to report accuracy without a full online learner.
#[derive(Default)]
struct AccuracyCounters {
    correct: AtomicU64,
    total: AtomicU64,
}

pub struct PredictiveFailureEngine {
    counters: AccuracyCounters,
}

impl PredictiveFailureEngine {
    pub fn new() -> Self {
        Self { counters: AccuracyCounters::default() }
    }

    /// Scores `objective`, consulting `memory` for cluster risk and `params`
    /// for factor weights. Every input here is an in-memory snapshot, so
    /// scoring itself cannot fail; callers that wrap this with a real
    /// embedding service or external scorer should catch errors there and
    /// fall back to `FailurePrediction::none()` per spec.md §4.3.
    pub fn predict(&self, objective: &Objective, memory: &Memory, params: &ParameterStore) -> FailurePrediction {
        let mut factors = Vec::new();

        let keyword_hits = RISK_KEYWORDS.iter().filter(|kw| objective.text.to_lowercase().contains(*kw)).count();
        let keyword_risk = (keyword_hits as f64 / 3.0).min(1.0);
        if keyword_hits > 0 {
            factors.push("keyword".to_string());
        }

        let nested_clauses = objective.text.matches(',').count() + objective.text.matches(" and ").count();
        let length_risk = ((objective.text.len() as f64 / 200.0) + (nested_clauses as f64 / 5.0)).min(1.0);
        if length_risk > 0.3 {
            factors.push("complexity".to_string());
        }

        let similar = memory.similar_failures(&objective.text, 5);
        let cluster_risk = (similar.len() as f64 / 5.0).min(1.0);
        if !similar.is_empty() {
            factors.push("historical_cluster".to_string());
        }

        let keyword_weight = params.get(params::KEYWORD_RISK_WEIGHT, 0.35);
        let complexity_weight = params.get(params::COMPLEXITY_RISK_WEIGHT, 0.25);
        let cluster_weight = params.get(params::CLUSTER_RISK_WEIGHT, 0.4);

        let risk_score = (keyword_risk * keyword_weight + length_risk * complexity_weight + cluster_risk * cluster_weight)
            .clamp(0.0, 1.0);

        let threshold = params.get(params::HIGH_RISK_THRESHOLD, 0.7);
        let recommended_modifications = if risk_score >= threshold {
            Some(build_recommendation(&factors, &similar))
        } else {
            None
        };

        FailurePrediction { risk_score, factors, recommended_modifications }
    }

    /// Feeds the cycle's actual outcome back so prediction accuracy can be
    /// reported; `predicted_high_risk` is whether this prediction crossed
    /// the threshold, `actually_failed` is the cycle's real outcome.
    pub fn record_outcome(&self, predicted_high_risk: bool, actually_failed: bool) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if predicted_high_risk == actually_failed {
            self.counters.correct.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.counters.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.counters.correct.load(Ordering::Relaxed) as f64 / total as f64
    }
}

impl Default for PredictiveFailureEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn build_recommendation(factors: &[String], similar: &[crate::memory::MemoryRecord]) -> String {
    let mut note = String::from("[high-risk] proceed carefully");
    if factors.iter().any(|f| f == "complexity") {
        note.push_str("; consider splitting into smaller steps");
    }
    if let Some(example) = similar.first() {
        note.push_str(&format!("; similar past failure: {:?}", example.failure_reason));
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRecord, Outcome};
    use crate::objective::Origin;

    #[test]
    fn low_risk_objective_yields_no_recommendation() {
        let engine = PredictiveFailureEngine::new();
        let memory = Memory::in_memory();
        let params = ParameterStore::new();
        let objective = Objective::new("add a getter", 1, Origin::User);

        let prediction = engine.predict(&objective, &memory, &params);
        assert!(prediction.risk_score < 0.7);
        assert!(prediction.recommended_modifications.is_none());
    }

    #[test]
    fn risky_objective_with_cluster_history_crosses_threshold() {
        let engine = PredictiveFailureEngine::new();
        let memory = Memory::in_memory();
        let params = ParameterStore::new();
        for _ in 0..5 {
            memory
                .record(MemoryRecord::new("refactor async scheduler internals", Outcome::Failure))
                .unwrap();
        }
        let objective = Objective::new("refactor the async scheduler, handle complexity and concurrency", 5, Origin::User);

        let prediction = engine.predict(&objective, &memory, &params);
        assert!(prediction.risk_score >= 0.7, "expected high risk, got {}", prediction.risk_score);
        assert!(prediction.recommended_modifications.is_some());
    }

    #[test]
    fn record_outcome_tracks_accuracy() {
        let engine = PredictiveFailureEngine::new();
        engine.record_outcome(true, true);
        engine.record_outcome(false, false);
        engine.record_outcome(true, false);
        assert!((engine.accuracy() - (2.0 / 3.0)).abs() < 1e-9);
    }
}
