//! AgentRegistry and the `Agent` contract (spec.md §4.4). Grounded on the
//! teacher's `LiveSkillRegistry`: a name-addressable registry of trait
//! objects, minus the dynamic-library loading — "evolution" of agent
//! behavior happens at the prompt/parameter level (§4.10), not by compiling
//! new Rust.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::completion::{CompletionRequest, CompletionService};
use crate::error::AgentError;
use crate::patch::Patch;

/// Per-agent metadata the registry holds alongside the implementation:
/// the prompt template (mutable, §4.12), model-selection policy, and
/// sampling temperature. `EvolutionEngine` mutates these by publishing a
/// new `AgentSpec` through `register_spec`, never by touching the `Agent`
/// impl itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub prompt_template: String,
    pub model: String,
    pub temperature: f32,
    pub max_retries: u32,
    pub deadline: Duration,
}

impl AgentSpec {
    fn new(prompt_template: impl Into<String>) -> Self {
        Self {
            prompt_template: prompt_template.into(),
            model: "default".to_string(),
            temperature: 0.2,
            max_retries: 3,
            deadline: Duration::from_secs(30),
        }
    }
}

/// A named agent capability. The trait itself only knows how to turn a
/// template plus structured input into prompt text; retrying, deadlines,
/// and JSON-schema repair are uniform across every agent and live in the
/// registry (spec.md §4.4: "All agents share...").
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    fn build_user_content(&self, template: &str, input: &Value) -> String {
        format!("{}\n\nInput (JSON):\n{}", template, input)
    }
}

pub struct Architect;
#[async_trait]
impl Agent for Architect {
    fn name(&self) -> &str {
        "architect"
    }
}

pub struct CodeReviewer;
#[async_trait]
impl Agent for CodeReviewer {
    fn name(&self) -> &str {
        "code_reviewer"
    }
}

pub struct Maestro;
#[async_trait]
impl Agent for Maestro {
    fn name(&self) -> &str {
        "maestro"
    }
}

pub struct ErrorAnalyzer;
#[async_trait]
impl Agent for ErrorAnalyzer {
    fn name(&self) -> &str {
        "error_analyzer"
    }
}

// ---------------------------------------------------------------------
// Typed input/output shapes for the four core agents.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchitectInput {
    pub objective_text: String,
    pub file_excerpts: Vec<FileExcerpt>,
    pub code_skeleton: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectOutput {
    pub patch: Patch,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeReviewerInput {
    pub patch: Patch,
    pub file_contexts: Vec<FileExcerpt>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approve,
    ApproveWithEdits { patch: Patch },
    Reject { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct MaestroInput {
    pub objective_text: String,
    pub patch_summary: String,
    pub failure_history: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroOutput {
    pub strategy_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalyzerInput {
    pub failure_reason: String,
    pub context: String,
    pub recent_steps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum ErrorAnalyzerDirective {
    RegeneratePatch,
    NewObjective { text: String },
    MetaAnalysis { text: String },
    Abandon,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorAnalyzerOutput {
    #[serde(flatten)]
    pub directive: ErrorAnalyzerDirective,
    #[serde(default)]
    pub summary: String,
}

// ---------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------

const DEFAULT_ARCHITECT_PROMPT: &str =
    "You are the Architect. Given an objective and file context, respond with JSON: \
     {\"patch\": {\"operations\": [...]}, \"rationale\": \"...\"}.";
const DEFAULT_REVIEWER_PROMPT: &str =
    "You are the CodeReviewer. Respond with JSON: {\"verdict\": \"approve\"} or \
     {\"verdict\": \"approve_with_edits\", \"patch\": {...}} or \
     {\"verdict\": \"reject\", \"reason\": \"...\"}.";
const DEFAULT_MAESTRO_PROMPT: &str =
    "You are Maestro. Choose a validation strategy by name. Respond with JSON: \
     {\"strategy_name\": \"...\"}.";
const DEFAULT_ERROR_ANALYZER_PROMPT: &str =
    "You are the ErrorAnalyzer. Respond with JSON: \
     {\"directive\": \"regenerate_patch\"} or {\"directive\": \"new_objective\", \"text\": \"...\"} or \
     {\"directive\": \"meta_analysis\", \"text\": \"...\"} or {\"directive\": \"abandon\"}, plus \"summary\".";

/// Name-addressable registry of agent implementations and their mutable
/// specs, each independently snapshot-swapped (spec.md §4.12).
pub struct AgentRegistry {
    agents: RwLock<Arc<HashMap<String, Arc<dyn Agent>>>>,
    specs: RwLock<Arc<HashMap<String, AgentSpec>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        let registry = Self {
            agents: RwLock::new(Arc::new(HashMap::new())),
            specs: RwLock::new(Arc::new(HashMap::new())),
        };
        registry.register_agent(Arc::new(Architect), AgentSpec::new(DEFAULT_ARCHITECT_PROMPT));
        registry.register_agent(Arc::new(CodeReviewer), AgentSpec::new(DEFAULT_REVIEWER_PROMPT));
        registry.register_agent(Arc::new(Maestro), AgentSpec::new(DEFAULT_MAESTRO_PROMPT));
        registry.register_agent(Arc::new(ErrorAnalyzer), AgentSpec::new(DEFAULT_ERROR_ANALYZER_PROMPT));
        registry
    }

    pub fn register_agent(&self, agent: Arc<dyn Agent>, spec: AgentSpec) {
        let name = agent.name().to_string();
        {
            let mut guard = self.agents.write().expect("lock poisoned");
            let mut next = (**guard).clone();
            next.insert(name.clone(), agent);
            *guard = Arc::new(next);
        }
        self.register_spec(&name, spec);
    }

    /// Publishes a new spec for an already-registered agent. This is the
    /// hook `EvolutionEngine` uses to deploy a mutated prompt template.
    pub fn register_spec(&self, name: &str, spec: AgentSpec) {
        let mut guard = self.specs.write().expect("lock poisoned");
        let mut next = (**guard).clone();
        next.insert(name.to_string(), spec);
        *guard = Arc::new(next);
    }

    pub fn spec(&self, name: &str) -> Option<AgentSpec> {
        self.specs.read().expect("lock poisoned").get(name).cloned()
    }

    fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().expect("lock poisoned").get(name).cloned()
    }

    /// Invokes the named agent: builds the prompt from its current spec
    /// snapshot, retries transient provider failures with backoff up to
    /// the deadline, and repairs/parses the JSON response, retrying once
    /// with a stricter instruction before escalating to `PLANNING_FAILED`
    /// (spec.md §4.4, §7).
    pub async fn invoke(&self, name: &str, input: Value, completion: &dyn CompletionService) -> Result<Value, AgentError> {
        let agent = self.agent(name).ok_or_else(|| AgentError::ProviderError(format!("unknown agent: {}", name)))?;
        let spec = self.spec(name).ok_or_else(|| AgentError::ProviderError(format!("no spec for agent: {}", name)))?;

        let content = agent.build_user_content(&spec.prompt_template, &input);
        let raw = self.complete_with_retry(&spec, &content, completion).await?;

        if let Some(value) = repair_json(&raw) {
            return Ok(value);
        }

        warn!(target: "hephaestus::agent", agent = name, "schema repair failed, retrying with stricter prompt");
        let stricter = format!("{}\n\nRespond with ONLY valid JSON. No prose, no markdown fences, no trailing commas.", content);
        let raw2 = self.complete_with_retry(&spec, &stricter, completion).await?;

        match repair_json(&raw2) {
            Some(value) => Ok(value),
            None => Err(AgentError::PlanningFailed(format!("{}: schema failure after stricter retry", name))),
        }
    }

    async fn complete_with_retry(&self, spec: &AgentSpec, user: &str, completion: &dyn CompletionService) -> Result<String, AgentError> {
        let mut attempt = 0;
        loop {
            let request = CompletionRequest { system: spec.model.clone(), user: user.to_string() };
            let outcome = tokio::time::timeout(spec.deadline, completion.complete(request)).await;
            match outcome {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) if attempt + 1 < spec.max_retries => {
                    debug!(target: "hephaestus::agent", attempt, error = %e, "transient agent failure, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(AgentError::Timeout),
            }
        }
    }

    pub async fn invoke_architect(&self, input: &ArchitectInput, completion: &dyn CompletionService) -> Result<ArchitectOutput, AgentError> {
        let value = serde_json::to_value(input).expect("ArchitectInput always serializes");
        let response = self.invoke("architect", value, completion).await?;
        serde_json::from_value(response).map_err(|e| AgentError::SchemaFailure(e.to_string()))
    }

    pub async fn invoke_code_reviewer(&self, input: &CodeReviewerInput, completion: &dyn CompletionService) -> Result<ReviewVerdict, AgentError> {
        let value = serde_json::to_value(input).expect("CodeReviewerInput always serializes");
        let response = self.invoke("code_reviewer", value, completion).await?;
        serde_json::from_value(response).map_err(|e| AgentError::SchemaFailure(e.to_string()))
    }

    pub async fn invoke_maestro(&self, input: &MaestroInput, completion: &dyn CompletionService) -> Result<MaestroOutput, AgentError> {
        let value = serde_json::to_value(input).expect("MaestroInput always serializes");
        let response = self.invoke("maestro", value, completion).await?;
        serde_json::from_value(response).map_err(|e| AgentError::SchemaFailure(e.to_string()))
    }

    pub async fn invoke_error_analyzer(&self, input: &ErrorAnalyzerInput, completion: &dyn CompletionService) -> Result<ErrorAnalyzerOutput, AgentError> {
        let value = serde_json::to_value(input).expect("ErrorAnalyzerInput always serializes");
        let response = self.invoke("error_analyzer", value, completion).await?;
        serde_json::from_value(response).map_err(|e| AgentError::SchemaFailure(e.to_string()))
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort JSON extraction from a raw completion: a direct parse, then
/// a fenced ```json block, then balanced-brace extraction of the first
/// top-level object, with trailing commas stripped before each attempt
/// (spec.md §4.4: "deterministic JSON response parsing with repair
/// heuristics"). Grounded on the teacher's `extract_rust_code` fenced-block
/// search in `orchestrator::maintenance`.
fn repair_json(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(raw) {
        return Some(v);
    }
    if let Ok(v) = serde_json::from_str(&strip_trailing_commas(raw)) {
        return Some(v);
    }
    for marker in ["```json", "```"] {
        if let Some(start) = raw.find(marker) {
            let body_start = start + marker.len();
            if let Some(end) = raw[body_start..].find("```") {
                let candidate = raw[body_start..body_start + end].trim();
                if let Ok(v) = serde_json::from_str(candidate) {
                    return Some(v);
                }
                if let Ok(v) = serde_json::from_str(&strip_trailing_commas(candidate)) {
                    return Some(v);
                }
            }
        }
    }
    if let Some(block) = extract_balanced_braces(raw) {
        if let Ok(v) = serde_json::from_str(&block) {
            return Some(v);
        }
        if let Ok(v) = serde_json::from_str(&strip_trailing_commas(&block)) {
            return Some(v);
        }
    }
    None
}

fn strip_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn extract_balanced_braces(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0i32;
    for (idx, c) in raw[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + idx + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::StaticCompletionService;
    use crate::patch::PatchOperation;

    #[test]
    fn repair_json_parses_direct_json() {
        let v = repair_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn repair_json_strips_trailing_comma() {
        let v = repair_json(r#"{"a": 1,}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn repair_json_extracts_fenced_block() {
        let raw = "Here is the patch:\n```json\n{\"a\": 2}\n```\nDone.";
        let v = repair_json(raw).unwrap();
        assert_eq!(v["a"], 2);
    }

    #[test]
    fn repair_json_extracts_balanced_braces_without_fence() {
        let raw = "Sure, here you go: {\"a\": 3} - hope that helps";
        let v = repair_json(raw).unwrap();
        assert_eq!(v["a"], 3);
    }

    #[test]
    fn repair_json_fails_on_prose() {
        assert!(repair_json("I cannot help with that.").is_none());
    }

    #[tokio::test]
    async fn invoke_architect_round_trips_through_registry() {
        let registry = AgentRegistry::new();
        let output = ArchitectOutput {
            patch: Patch { operations: vec![PatchOperation::CreateFile { file: "a.rs".into(), content: "x".into() }] },
            rationale: "add a file".to_string(),
        };
        let raw = serde_json::to_string(&serde_json::json!({
            "patch": output.patch,
            "rationale": output.rationale,
        }))
        .unwrap();
        let completion = StaticCompletionService::new(vec![raw]);

        let input = ArchitectInput { objective_text: "add foo".into(), file_excerpts: vec![], code_skeleton: String::new() };
        let result = registry.invoke_architect(&input, &completion).await.unwrap();
        assert_eq!(result.rationale, "add a file");
        assert_eq!(result.patch.operations.len(), 1);
    }

    #[tokio::test]
    async fn invoke_escalates_to_planning_failed_on_unparsable_response() {
        let registry = AgentRegistry::new();
        let completion = StaticCompletionService::new(vec!["not json".to_string(), "still not json".to_string()]);
        let input = MaestroInput { objective_text: "x".into(), patch_summary: "y".into(), failure_history: vec![] };
        let result = registry.invoke_maestro(&input, &completion).await;
        assert!(matches!(result, Err(AgentError::PlanningFailed(_))));
    }

    #[tokio::test]
    async fn unknown_agent_name_is_a_provider_error() {
        let registry = AgentRegistry::new();
        let completion = StaticCompletionService::new(vec![]);
        let result = registry.invoke("nonexistent", serde_json::json!({}), &completion).await;
        assert!(matches!(result, Err(AgentError::ProviderError(_))));
    }
}
