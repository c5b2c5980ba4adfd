//! Error taxonomy (spec.md §7). Every cycle failure maps to one of these
//! reasons; the name is what gets written to `evolution_log.csv` and
//! `MemoryRecord::failure_reason`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical failure reason, recorded verbatim in Memory and the evolution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    QueueFull,
    PlanningFailed,
    SchemaFailure,
    ReviewRejected,
    StrategyUnknown,
    SyntaxFailed,
    JsonFailed,
    TestFailed,
    BenchmarkFailed,
    FileMissing,
    AmbiguousBlock,
    PatchApplyFailed,
    SanityFailed,
    ApplyFailed,
    AgentTimeout,
    ProviderError,
    SandboxError,
    Timeout,
}

impl FailureReason {
    /// The string form stored in `evolution_log.csv` / `MemoryRecord`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::QueueFull => "QUEUE_FULL",
            FailureReason::PlanningFailed => "PLANNING_FAILED",
            FailureReason::SchemaFailure => "SCHEMA_FAILURE",
            FailureReason::ReviewRejected => "REVIEW_REJECTED",
            FailureReason::StrategyUnknown => "STRATEGY_UNKNOWN",
            FailureReason::SyntaxFailed => "SYNTAX_FAILED",
            FailureReason::JsonFailed => "JSON_FAILED",
            FailureReason::TestFailed => "TEST_FAILED",
            FailureReason::BenchmarkFailed => "BENCHMARK_FAILED",
            FailureReason::FileMissing => "FILE_MISSING",
            FailureReason::AmbiguousBlock => "AMBIGUOUS_BLOCK",
            FailureReason::PatchApplyFailed => "PATCH_APPLY_FAILED",
            FailureReason::SanityFailed => "SANITY_FAILED",
            FailureReason::ApplyFailed => "APPLY_FAILED",
            FailureReason::AgentTimeout => "AGENT_TIMEOUT",
            FailureReason::ProviderError => "PROVIDER_ERROR",
            FailureReason::SandboxError => "SANDBOX_ERROR",
            FailureReason::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the patch data model and `PatchApplicator` (spec.md §3, §4.7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("path escapes workspace root or contains a `..` component: {0}")]
    UnsafePath(String),
    #[error("block_to_replace matched {matches} times in {file}, expected exactly 1")]
    AmbiguousBlock { file: String, matches: usize },
    #[error("file already exists: {0}")]
    FileExists(String),
    #[error("insert line {line} is out of range for {file} ({len} lines)")]
    LineOutOfRange { file: String, line: usize, len: usize },
    #[error("io error applying patch to {file}: {source}")]
    Io { file: String, source: String },
}

impl PatchError {
    pub fn to_failure_reason(&self) -> FailureReason {
        match self {
            PatchError::AmbiguousBlock { .. } => FailureReason::AmbiguousBlock,
            _ => FailureReason::PatchApplyFailed,
        }
    }
}

/// Errors from sandbox acquisition/teardown (spec.md §4.6).
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to materialize sandbox workspace: {0}")]
    Open(String),
    #[error("failed to remove sandbox workspace: {0}")]
    Close(String),
    #[error("step `{step}` exceeded its deadline")]
    Timeout { step: String },
}

/// Errors surfaced by an `Agent::invoke` call (spec.md §4.4).
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("planning failed after retries: {0}")]
    PlanningFailed(String),
    #[error("agent response failed schema validation: {0}")]
    SchemaFailure(String),
    #[error("agent invocation exceeded its deadline")]
    Timeout,
    #[error("completion provider error: {0}")]
    ProviderError(String),
}

impl AgentError {
    pub fn to_failure_reason(&self) -> FailureReason {
        match self {
            AgentError::PlanningFailed(_) => FailureReason::PlanningFailed,
            AgentError::SchemaFailure(_) => FailureReason::SchemaFailure,
            AgentError::Timeout => FailureReason::AgentTimeout,
            AgentError::ProviderError(_) => FailureReason::ProviderError,
        }
    }
}

/// Invariant violations. Per spec.md §7, only these propagate out of a
/// cycle; everything else is captured and mapped to a `FailureReason`.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("queue is full")]
    QueueFull,
}
