//! Hephaestus evolution: the EvolutionEngine (spec.md §4.10) that proposes,
//! replay-tests, deploys, and rolls back mutations to the live agent,
//! validation, and parameter registries in `hephaestus-core`.

pub mod engine;
pub mod fitness;
pub mod mutation;
pub mod replay;
pub mod rollback;

pub use engine::EvolutionEngine;
pub use fitness::{score, FitnessReport, ReplaySummary};
pub use mutation::{Mutation, MutationKind, MutationStatus};
pub use replay::{ReplayRunner, ReplaySet};
pub use rollback::{DeadEnd, Deployment, RollbackLedger};
