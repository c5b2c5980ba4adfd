//! Memory: the append-only record of cycle outcomes (spec.md §4.8). Durable
//! storage is a single JSON document, persisted via write-temp-then-rename
//! the same way the teacher's `save_patch` avoids partial writes, and every
//! public operation is serialized by one internal lock (spec.md §5:
//! "`Memory` is the only mutable long-lived structure...").

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub objective_text: String,
    pub outcome: Outcome,
    pub failure_reason: Option<FailureReason>,
    pub strategy_used: Option<String>,
    pub duration: std::time::Duration,
    pub patch_summary: String,
    pub cluster_id: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(objective_text: impl Into<String>, outcome: Outcome) -> Self {
        let text = objective_text.into();
        Self {
            id: Uuid::new_v4(),
            cluster_id: cluster_id_for(&text),
            objective_text: text,
            outcome,
            failure_reason: None,
            strategy_used: None,
            duration: std::time::Duration::default(),
            patch_summary: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_failure_reason(mut self, reason: FailureReason) -> Self {
        self.failure_reason = Some(reason);
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy_used = Some(strategy.into());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_patch_summary(mut self, summary: impl Into<String>) -> Self {
        self.patch_summary = summary.into();
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClusterStats {
    success: u64,
    failure: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    completed: Vec<MemoryRecord>,
    failed: Vec<MemoryRecord>,
    clusters: HashMap<String, ClusterStats>,
    version: u32,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub total: u64,
    pub success_rate: f64,
    pub per_strategy_success: HashMap<String, (u64, u64)>,
    pub per_cluster_failures: HashMap<String, u64>,
}

/// Append-only cycle history with lazily-hashed semantic clusters
/// (spec.md §4.8). `path` is `None` for a pure in-memory instance (tests,
/// or a deliberately ephemeral run); `Some` enables at-least-once
/// persistence via write-temp + rename.
pub struct Memory {
    path: Option<PathBuf>,
    doc: Mutex<Document>,
}

impl Memory {
    pub fn in_memory() -> Self {
        Self { path: None, doc: Mutex::new(Document::default()) }
    }

    /// Loads `memory.json` from `path` if it exists, otherwise starts empty.
    /// Every subsequent `record` call persists back to the same path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Document::default()
        };
        Ok(Self { path: Some(path), doc: Mutex::new(doc) })
    }

    /// Appends `record`, updates the cluster's success/failure tally, and
    /// (if opened against a path) flushes to disk before returning — the
    /// cycle must not report terminal status until this completes.
    pub fn record(&self, record: MemoryRecord) -> std::io::Result<()> {
        let mut doc = self.doc.lock().expect("lock poisoned");
        let stats = doc.clusters.entry(record.cluster_id.clone()).or_default();
        match record.outcome {
            Outcome::Success => stats.success += 1,
            Outcome::Failure => stats.failure += 1,
        }
        match record.outcome {
            Outcome::Success => doc.completed.push(record),
            Outcome::Failure => doc.failed.push(record),
        }
        doc.version += 1;
        self.flush(&doc)
    }

    fn flush(&self, doc: &Document) -> std::io::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let serialized = serde_json::to_string_pretty(doc).expect("Document always serializes");
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)?;
        std::fs::rename(&tmp, path)?;
        debug!(target: "hephaestus::memory", path = %path.display(), "memory flushed");
        Ok(())
    }

    pub fn summary(&self) -> Summary {
        let doc = self.doc.lock().expect("lock poisoned");
        let total = (doc.completed.len() + doc.failed.len()) as u64;
        let success_rate = if total == 0 { 0.0 } else { doc.completed.len() as f64 / total as f64 };

        let mut per_strategy_success: HashMap<String, (u64, u64)> = HashMap::new();
        for record in doc.completed.iter().chain(doc.failed.iter()) {
            if let Some(strategy) = &record.strategy_used {
                let entry = per_strategy_success.entry(strategy.clone()).or_insert((0, 0));
                match record.outcome {
                    Outcome::Success => entry.0 += 1,
                    Outcome::Failure => entry.1 += 1,
                }
            }
        }

        let per_cluster_failures = doc
            .clusters
            .iter()
            .map(|(cluster, stats)| (cluster.clone(), stats.failure))
            .collect();

        Summary { total, success_rate, per_strategy_success, per_cluster_failures }
    }

    /// Returns up to `k` past records whose lexical similarity to
    /// `objective_text` exceeds a fixed threshold — cluster match first,
    /// then shared-token overlap as a tiebreaker, no external vector store.
    pub fn similar_failures(&self, objective_text: &str, k: usize) -> Vec<MemoryRecord> {
        let doc = self.doc.lock().expect("lock poisoned");
        let target_cluster = cluster_id_for(objective_text);
        let target_tokens = key_tokens(objective_text);

        let mut scored: Vec<(f64, &MemoryRecord)> = doc
            .failed
            .iter()
            .map(|record| (similarity(&target_cluster, &target_tokens, record), record))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, record)| record.clone()).collect()
    }

    pub fn recent(&self, limit: usize) -> Vec<MemoryRecord> {
        let doc = self.doc.lock().expect("lock poisoned");
        let mut all: Vec<MemoryRecord> = doc.completed.iter().chain(doc.failed.iter()).cloned().collect();
        all.sort_by_key(|r| r.timestamp);
        all.reverse();
        all.truncate(limit);
        all
    }

    /// The 20-cycle rolling success rate `EvolutionEngine` compares against
    /// its pre-deploy baseline (spec.md §4.10, "Monitor").
    pub fn rolling_success_rate(&self, window: usize) -> f64 {
        let doc = self.doc.lock().expect("lock poisoned");
        let mut all: Vec<&MemoryRecord> = doc.completed.iter().chain(doc.failed.iter()).collect();
        all.sort_by_key(|r| r.timestamp);
        let recent: Vec<&MemoryRecord> = all.into_iter().rev().take(window).collect();
        if recent.is_empty() {
            return 0.0;
        }
        let successes = recent.iter().filter(|r| r.outcome == Outcome::Success).count();
        successes as f64 / recent.len() as f64
    }
}

fn similarity(target_cluster: &str, target_tokens: &[String], record: &MemoryRecord) -> f64 {
    let cluster_bonus = if record.cluster_id == target_cluster { 0.5 } else { 0.0 };
    let record_tokens = key_tokens(&record.objective_text);
    let overlap = target_tokens.iter().filter(|t| record_tokens.contains(t)).count();
    let denom = target_tokens.len().max(record_tokens.len()).max(1);
    cluster_bonus + 0.5 * (overlap as f64 / denom as f64)
}

const STOPWORDS: &[&str] = &["the", "a", "an", "to", "of", "and", "in", "for", "on", "is", "with"];

fn key_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(stem)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Crude suffix-stripping stemmer: enough to merge "refactor"/"refactoring"
/// style variants into one key phrase without pulling in a real NLP crate.
fn stem(word: &str) -> String {
    for suffix in ["ing", "ions", "ion", "ed", "es", "s"] {
        if word.len() > suffix.len() + 2 {
            if let Some(stripped) = word.strip_suffix(suffix) {
                return stripped.to_string();
            }
        }
    }
    word.to_string()
}

fn cluster_id_for(text: &str) -> String {
    let tokens = key_tokens(text);
    let mut hasher = DefaultHasher::new();
    tokens.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[allow(dead_code)]
fn memory_path(home: &Path) -> PathBuf {
    home.join("memory.json")
}
