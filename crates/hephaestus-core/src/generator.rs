//! ObjectiveGenerator: produces the next objective when the queue is empty
//! at cycle start (spec.md §4.2).

use serde::Serialize;
use tracing::warn;

use crate::completion::{CompletionRequest, CompletionService};
use crate::memory::{Memory, Summary};
use crate::objective::{Objective, Origin};

const GENERATOR_SYSTEM_PROMPT: &str =
    "You are the ObjectiveGenerator. Given a project scan, a roadmap, recent memory, and a \
     performance summary, respond with a single directive line describing the next objective to pursue. \
     Recognize meta-analysis markers such as [META-ANALYSIS] and persistent failure clusters.";

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorInputs {
    pub project_scan_summary: String,
    pub roadmap: String,
}

fn render_memory_context(memory: &Memory) -> String {
    let recent = memory.recent(20);
    if recent.is_empty() {
        return "no prior cycles recorded".to_string();
    }
    recent
        .iter()
        .map(|r| format!("- [{:?}] {} (cluster {})", r.outcome, r.objective_text, r.cluster_id))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_performance_summary(summary: &Summary) -> String {
    format!(
        "total={} success_rate={:.2} failing_clusters={}",
        summary.total,
        summary.success_rate,
        summary.per_cluster_failures.iter().filter(|(_, n)| **n > 0).count()
    )
}

/// Produces one `Objective` with `origin=generator` when the queue is empty.
/// On LLM failure it never raises — it fabricates a low-priority
/// "analyze recent failures" objective instead (spec.md §4.2).
pub struct ObjectiveGenerator;

impl ObjectiveGenerator {
    pub fn new() -> Self {
        Self
    }

    pub async fn generate(
        &self,
        inputs: &GeneratorInputs,
        memory: &Memory,
        completion: &dyn CompletionService,
    ) -> Objective {
        let memory_context = render_memory_context(memory);
        let performance = render_performance_summary(&memory.summary());

        let user = format!(
            "## Project scan\n{}\n\n## Roadmap\n{}\n\n## Recent memory\n{}\n\n## Performance\n{}",
            inputs.project_scan_summary, inputs.roadmap, memory_context, performance
        );
        let request = CompletionRequest { system: GENERATOR_SYSTEM_PROMPT.to_string(), user };

        match completion.complete(request).await {
            Ok(text) => {
                let directive = text.lines().find(|l| !l.trim().is_empty()).unwrap_or(&text).trim().to_string();
                if directive.is_empty() {
                    fallback_objective()
                } else {
                    Objective::new(directive, 0, Origin::Generator)
                }
            }
            Err(e) => {
                warn!(target: "hephaestus::generator", error = %e, "generator LLM call failed, fabricating fallback objective");
                fallback_objective()
            }
        }
    }
}

impl Default for ObjectiveGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn fallback_objective() -> Objective {
    Objective::new("analyze recent failures", -10, Origin::Generator)
}
