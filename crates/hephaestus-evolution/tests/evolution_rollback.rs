//! Scenario 6 (spec.md §8): a deployed mutation that looks fine at deploy
//! time gets reverted once the rolling success rate regresses past the
//! configured margin. Exercises the same public building blocks
//! `EvolutionEngine::deploy`/`monitor` compose internally: `RollbackLedger`
//! records the pre-deploy baseline, `Memory::rolling_success_rate` reports
//! the post-deploy reality, and the mutation's `reversed()` form is
//! reapplied to the live `AgentRegistry`.

use std::sync::Arc;

use hephaestus_core::{AgentRegistry, Memory, MemoryRecord, Outcome};
use hephaestus_evolution::{Mutation, MutationKind, RollbackLedger};

fn fill_success_rate(memory: &Memory, successes: usize, failures: usize) {
    for _ in 0..successes {
        memory.record(MemoryRecord::new("routine objective", Outcome::Success)).unwrap();
    }
    for _ in 0..failures {
        memory.record(MemoryRecord::new("routine objective", Outcome::Failure)).unwrap();
    }
}

#[test]
fn regressed_mutation_is_reverted_after_success_rate_drop() {
    let agents = AgentRegistry::new();
    let original_prompt = agents.spec("architect").unwrap().prompt_template;
    let ledger = RollbackLedger::new();
    let memory = Memory::in_memory();

    // Pre-deploy: 14 of 20 recent cycles succeeded (0.7).
    fill_success_rate(&memory, 14, 6);
    let baseline = memory.rolling_success_rate(20);
    assert!((baseline - 0.7).abs() < 1e-9);

    let mutation = Mutation::new(MutationKind::Prompt, "architect", original_prompt.clone(), format!("{original_prompt} Be bolder."));
    let mut spec = agents.spec("architect").unwrap();
    spec.prompt_template = mutation.after.clone();
    agents.register_spec("architect", spec);
    ledger.record_deployment(mutation, baseline);

    assert_eq!(agents.spec("architect").unwrap().prompt_template, format!("{original_prompt} Be bolder."));
    assert_eq!(ledger.active_count(), 1);

    // Post-deploy: over the next 20 cycles the rate drops to 9/20 = 0.45,
    // a 0.25 regression against the 0.1 margin.
    let memory2 = Memory::in_memory();
    fill_success_rate(&memory2, 9, 11);
    let current = memory2.rolling_success_rate(20);
    assert!((current - 0.45).abs() < 1e-9);

    let reverted = ledger.check_rollbacks(current, 0.1);
    assert_eq!(reverted.len(), 1);
    assert_eq!(ledger.active_count(), 0, "reverted deployment is removed from the active set");

    for deployment in &reverted {
        let reverse = deployment.mutation.reversed();
        let mut spec = agents.spec(&reverse.target).unwrap();
        spec.prompt_template = reverse.after.clone();
        agents.register_spec(&reverse.target, spec);
    }

    assert_eq!(agents.spec("architect").unwrap().prompt_template, original_prompt, "prompt reverted to its pre-deploy value");
    assert!(ledger.is_dead_end(&reverted[0].mutation).is_some(), "rolled-back mutation is remembered as a dead end");
}

#[test]
fn mutation_within_margin_is_not_reverted() {
    let ledger = RollbackLedger::new();
    let mutation = Mutation::new(MutationKind::Parameter, "high_risk_threshold", "0.7", "0.68");
    ledger.record_deployment(mutation, 0.7);

    // Only a 0.05 drop, inside the default 0.1 margin.
    let reverted = ledger.check_rollbacks(0.65, 0.1);
    assert!(reverted.is_empty());
    assert_eq!(ledger.active_count(), 1);
}
