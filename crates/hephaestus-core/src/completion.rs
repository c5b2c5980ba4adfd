//! CompletionService: the capability trait agents call into for reasoning
//! (spec.md §6). Real providers (OpenRouter, local models, ...) are out of
//! scope; `StaticCompletionService` is the shipped test/dev double, grounded
//! on the teacher's `OpenRouterBridge` (same request/response shape, minus
//! the HTTP client).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::AgentError;

/// A single request to a completion provider: a system prompt plus the
/// concrete user content to reason over.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AgentError>;
}

/// Test/dev double that returns pre-configured canned responses in order,
/// falling back to a fixed default once exhausted. Never makes a network
/// call, so agents running against it are deterministic (spec.md's
/// explicit non-goal of deterministic LLM replay applies only to real
/// providers; a canned double has no replay problem to begin with).
pub struct StaticCompletionService {
    responses: Mutex<VecDeque<String>>,
    default: String,
}

impl StaticCompletionService {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            default: "{}".to_string(),
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    /// Always fails with `ProviderError`, for exercising the fail-soft paths
    /// in `ObjectiveGenerator`/`PredictiveFailureEngine` callers.
    pub fn failing() -> FailingCompletionService {
        FailingCompletionService
    }
}

#[async_trait]
impl CompletionService for StaticCompletionService {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, AgentError> {
        let mut queue = self.responses.lock().expect("lock poisoned");
        Ok(queue.pop_front().unwrap_or_else(|| self.default.clone()))
    }
}

/// Always-errors double used to exercise fail-soft / corrective paths.
pub struct FailingCompletionService;

#[async_trait]
impl CompletionService for FailingCompletionService {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, AgentError> {
        Err(AgentError::ProviderError("static failing completion service".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_responses_in_order_then_default() {
        let service = StaticCompletionService::new(vec!["first".to_string(), "second".to_string()])
            .with_default("fallback");
        let req = CompletionRequest { system: "s".into(), user: "u".into() };
        assert_eq!(service.complete(req.clone()).await.unwrap(), "first");
        assert_eq!(service.complete(req.clone()).await.unwrap(), "second");
        assert_eq!(service.complete(req).await.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn failing_service_always_errors() {
        let service = StaticCompletionService::failing();
        let req = CompletionRequest { system: "s".into(), user: "u".into() };
        assert!(service.complete(req).await.is_err());
    }
}
