//! ParameterStore: named tunable parameters (risk weights, acceptance
//! thresholds, rollback margins, ...) mutated only by `EvolutionEngine`
//! through the same snapshot-swap discipline as `AgentRegistry` and
//! `ValidationRegistry` (spec.md §4.3, §4.10, §4.12).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Default tunables. Names match what `PredictiveFailureEngine` and
/// `EvolutionEngine` look up; unknown names fall back to `default`.
pub const KEYWORD_RISK_WEIGHT: &str = "keyword_risk_weight";
pub const COMPLEXITY_RISK_WEIGHT: &str = "complexity_risk_weight";
pub const CLUSTER_RISK_WEIGHT: &str = "cluster_risk_weight";
pub const HIGH_RISK_THRESHOLD: &str = "high_risk_threshold";
pub const EVOLUTION_ACCEPTANCE_THRESHOLD: &str = "evolution_acceptance_threshold";
pub const EVOLUTION_ROLLBACK_MARGIN: &str = "evolution_rollback_margin";
pub const EVOLUTION_CANARY_SIZE: &str = "evolution_canary_size";

pub struct ParameterStore {
    values: RwLock<Arc<HashMap<String, f64>>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(KEYWORD_RISK_WEIGHT.to_string(), 0.35);
        defaults.insert(COMPLEXITY_RISK_WEIGHT.to_string(), 0.25);
        defaults.insert(CLUSTER_RISK_WEIGHT.to_string(), 0.4);
        defaults.insert(HIGH_RISK_THRESHOLD.to_string(), 0.7);
        defaults.insert(EVOLUTION_ACCEPTANCE_THRESHOLD.to_string(), 0.05);
        defaults.insert(EVOLUTION_ROLLBACK_MARGIN.to_string(), 0.1);
        defaults.insert(EVOLUTION_CANARY_SIZE.to_string(), 5.0);
        Self { values: RwLock::new(Arc::new(defaults)) }
    }

    pub fn get(&self, name: &str, default: f64) -> f64 {
        self.values.read().expect("lock poisoned").get(name).copied().unwrap_or(default)
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, f64>> {
        self.values.read().expect("lock poisoned").clone()
    }

    /// Publishes a new value for `name`, copy-on-write over the whole map so
    /// in-flight readers keep seeing their snapshot (spec.md §4.12).
    pub fn set(&self, name: &str, value: f64) {
        let mut guard = self.values.write().expect("lock poisoned");
        let mut next = (**guard).clone();
        next.insert(name.to_string(), value);
        *guard = Arc::new(next);
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_parameter_falls_back_to_default() {
        let store = ParameterStore::new();
        assert_eq!(store.get("does_not_exist", 42.0), 42.0);
    }

    #[test]
    fn set_publishes_new_value_without_disturbing_others() {
        let store = ParameterStore::new();
        let before = store.snapshot();
        store.set(HIGH_RISK_THRESHOLD, 0.9);
        assert_eq!(before.get(HIGH_RISK_THRESHOLD), Some(&0.7));
        assert_eq!(store.get(HIGH_RISK_THRESHOLD, 0.0), 0.9);
        assert_eq!(store.get(KEYWORD_RISK_WEIGHT, 0.0), 0.35);
    }
}
