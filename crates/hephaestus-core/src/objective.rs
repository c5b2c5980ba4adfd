//! Objective: a directive the system attempts to fulfill in one cycle (spec.md §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque unique identifier for an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectiveId(pub Uuid);

impl ObjectiveId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectiveId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an objective came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Generator,
    Corrective,
    MetaAnalysis,
}

/// A directive the system attempts to fulfill in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: ObjectiveId,
    pub text: String,
    pub priority: i64,
    pub origin: Origin,
    pub parent_id: Option<ObjectiveId>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    /// Number of corrective hops from the root objective of this chain (spec.md §4.9).
    #[serde(default)]
    pub corrective_depth: u32,
}

impl Objective {
    pub fn new(text: impl Into<String>, priority: i64, origin: Origin) -> Self {
        Self {
            id: ObjectiveId::new(),
            text: text.into(),
            priority,
            origin,
            parent_id: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            corrective_depth: 0,
        }
    }

    /// Builds a corrective objective chained to `self` via `parent_id`,
    /// incrementing the corrective depth (spec.md §4.9, §9 bounded cycles).
    pub fn corrective(&self, text: impl Into<String>, priority: i64) -> Self {
        Self {
            id: ObjectiveId::new(),
            text: text.into(),
            priority,
            origin: Origin::Corrective,
            parent_id: Some(self.id),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            corrective_depth: self.corrective_depth + 1,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrective_chain_increments_depth() {
        let root = Objective::new("refactor scheduler", 5, Origin::User);
        let child = root.corrective("fix failing test", 5);
        assert_eq!(child.parent_id, Some(root.id));
        assert_eq!(child.corrective_depth, 1);
        assert_eq!(child.origin, Origin::Corrective);

        let grandchild = child.corrective("retry", 5);
        assert_eq!(grandchild.corrective_depth, 2);
    }
}
