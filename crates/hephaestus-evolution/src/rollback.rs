//! Genetic memory and deploy rollback (spec.md §4.10 steps 5-6). Grounded
//! on the teacher's `RollbackManager`/`GeneticMemory`, adapted from
//! versioned-skill-file/symlink swapping (not applicable here — mutations
//! land directly in live registries) down to its two load-bearing ideas:
//! every applied mutation is hashed and remembered as "DNA", and a mutation
//! whose hash was previously rejected or rolled back is self-censored as
//! an evolutionary dead-end.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::mutation::Mutation;

#[derive(Debug, Clone)]
pub struct DeadEnd {
    pub reason: String,
    pub occurrence_count: u32,
    pub marked_at: DateTime<Utc>,
}

/// Tracks the DNA (content hash) of every mutation the engine has proposed,
/// so a dead-end is recognized even if phrased as a differently-worded but
/// semantically identical candidate next tick.
#[derive(Default)]
struct DnaRegistry {
    dead_ends: HashMap<String, DeadEnd>,
    known: HashMap<String, MutationKindLabel>,
}

type MutationKindLabel = String;

impl DnaRegistry {
    fn register(&mut self, hash: &str, label: &str) {
        self.known.insert(hash.to_string(), label.to_string());
    }

    fn mark_dead_end(&mut self, hash: &str, reason: &str) {
        let entry = self.dead_ends.entry(hash.to_string()).or_insert_with(|| DeadEnd {
            reason: reason.to_string(),
            occurrence_count: 0,
            marked_at: Utc::now(),
        });
        entry.occurrence_count += 1;
        entry.reason = reason.to_string();
        entry.marked_at = Utc::now();
    }

    fn is_dead_end(&self, hash: &str) -> Option<&DeadEnd> {
        self.dead_ends.get(hash)
    }
}

/// One mutation currently live in a registry, tracked so `Monitor` can
/// detect and undo a success-rate regression (spec.md §4.10 step 6).
#[derive(Debug, Clone)]
pub struct Deployment {
    pub mutation: Mutation,
    pub baseline_success_rate: f64,
    pub deployed_at: DateTime<Utc>,
}

/// Deploy ledger plus genetic memory, guarding the live registries against
/// repeating mutations already proven bad and against a deployed mutation
/// that quietly degrades success rate.
pub struct RollbackLedger {
    dna: Mutex<DnaRegistry>,
    active: Mutex<Vec<Deployment>>,
}

impl RollbackLedger {
    pub fn new() -> Self {
        Self { dna: Mutex::new(DnaRegistry::default()), active: Mutex::new(Vec::new()) }
    }

    /// SHA-256 of the mutation's kind/target/after, hex-encoded — this
    /// mutation's "DNA". Two proposals with the same kind, target, and
    /// resulting value hash identically regardless of `id` or rationale.
    pub fn compute_dna(mutation: &Mutation) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}\0{}\0{}", mutation.kind, mutation.target, mutation.after).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn is_dead_end(&self, mutation: &Mutation) -> Option<DeadEnd> {
        let hash = Self::compute_dna(mutation);
        self.dna.lock().expect("lock poisoned").is_dead_end(&hash).cloned()
    }

    pub fn mark_dead_end(&self, mutation: &Mutation, reason: &str) {
        let hash = Self::compute_dna(mutation);
        let mut dna = self.dna.lock().expect("lock poisoned");
        dna.mark_dead_end(&hash, reason);
        info!(target: "hephaestus::evolution::rollback", hash = &hash[..12], target = %mutation.target, reason, "marked evolutionary dead-end");
    }

    /// Records a mutation as deployed, registering its DNA and the
    /// pre-deploy success rate `Monitor` will compare against.
    pub fn record_deployment(&self, mutation: Mutation, baseline_success_rate: f64) {
        let hash = Self::compute_dna(&mutation);
        self.dna.lock().expect("lock poisoned").register(&hash, &format!("{:?}", mutation.kind));
        self.active.lock().expect("lock poisoned").push(Deployment {
            mutation,
            baseline_success_rate,
            deployed_at: Utc::now(),
        });
    }

    /// Compares `current_success_rate` against each active deployment's
    /// baseline; any deployment that dropped by more than `margin` is
    /// removed from the active set, marked as a dead-end, and returned for
    /// the caller to revert (spec.md §4.10 step 6).
    pub fn check_rollbacks(&self, current_success_rate: f64, margin: f64) -> Vec<Deployment> {
        let mut active = self.active.lock().expect("lock poisoned");
        let (to_revert, keep): (Vec<_>, Vec<_>) = active
            .drain(..)
            .partition(|deployment| deployment.baseline_success_rate - current_success_rate > margin);
        *active = keep;
        drop(active);

        for deployment in &to_revert {
            warn!(
                target: "hephaestus::evolution::rollback",
                target = %deployment.mutation.target,
                baseline = deployment.baseline_success_rate,
                current = current_success_rate,
                "rolling back mutation: success rate regressed past margin"
            );
            self.mark_dead_end(&deployment.mutation, "auto-rolled-back: post-deploy success rate regression");
        }
        to_revert
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("lock poisoned").len()
    }
}

impl Default for RollbackLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationKind;

    #[test]
    fn compute_dna_is_stable_and_distinguishes_candidates() {
        let a = Mutation::new(MutationKind::Parameter, "high_risk_threshold", "0.7", "0.6");
        let b = Mutation::new(MutationKind::Parameter, "high_risk_threshold", "0.7", "0.6");
        let c = Mutation::new(MutationKind::Parameter, "high_risk_threshold", "0.7", "0.65");
        assert_eq!(RollbackLedger::compute_dna(&a), RollbackLedger::compute_dna(&b));
        assert_ne!(RollbackLedger::compute_dna(&a), RollbackLedger::compute_dna(&c));
    }

    #[test]
    fn dead_end_blocks_identical_future_candidate() {
        let ledger = RollbackLedger::new();
        let mutation = Mutation::new(MutationKind::Prompt, "architect", "old", "new");
        assert!(ledger.is_dead_end(&mutation).is_none());

        ledger.mark_dead_end(&mutation, "rejected: regressed canary");
        let repeated = Mutation::new(MutationKind::Prompt, "architect", "old", "new");
        let dead_end = ledger.is_dead_end(&repeated).unwrap();
        assert_eq!(dead_end.occurrence_count, 1);
        assert!(dead_end.reason.contains("regressed canary"));
    }

    #[test]
    fn check_rollbacks_reverts_only_past_margin() {
        let ledger = RollbackLedger::new();
        let stable = Mutation::new(MutationKind::Parameter, "a", "1", "2");
        let regressed = Mutation::new(MutationKind::Parameter, "b", "1", "2");
        ledger.record_deployment(stable, 0.8);
        ledger.record_deployment(regressed, 0.9);

        let reverted = ledger.check_rollbacks(0.83, 0.05);
        assert_eq!(reverted.len(), 1);
        assert_eq!(reverted[0].mutation.target, "b");
        assert_eq!(ledger.active_count(), 1);
    }
}
