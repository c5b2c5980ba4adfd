//! Mutation data model (spec.md §3): a proposed change to a prompt,
//! strategy, parameter, workflow, or agent behavior, tracked from
//! candidate through test to deploy or rejection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which live registry/field a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// An agent's `prompt_template` (`AgentRegistry`).
    Prompt,
    /// A `ValidationStrategy`'s step list (`ValidationRegistry`).
    Strategy,
    /// A named tunable in `ParameterStore`.
    Parameter,
    /// A `ValidationStrategy`'s `sanity_check` step.
    Workflow,
    /// An agent's non-prompt spec fields (currently: `temperature`).
    AgentBehavior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Candidate,
    Testing,
    Accepted,
    Rejected,
    Deployed,
}

/// A proposed change, generated → tested in isolation → accepted (deployed
/// atomically) or rejected (archived with rationale). `before`/`after` are
/// plain strings so the same shape covers every kind without a union type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub id: Uuid,
    pub kind: MutationKind,
    pub target: String,
    pub before: String,
    pub after: String,
    pub fitness: Option<f64>,
    pub status: MutationStatus,
}

impl Mutation {
    pub fn new(kind: MutationKind, target: impl Into<String>, before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.into(),
            before: before.into(),
            after: after.into(),
            fitness: None,
            status: MutationStatus::Candidate,
        }
    }

    /// The mutation that would undo this one, for rollback (spec.md §4.10
    /// step 6: "the previous value is retained for rollback").
    pub fn reversed(&self) -> Self {
        Self::new(self.kind, self.target.clone(), self.after.clone(), self.before.clone())
    }
}
