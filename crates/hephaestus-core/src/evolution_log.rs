//! `evolution_log.csv`: append-only row per cycle (spec.md §6:
//! "(timestamp, objective_id, outcome, reason, strategy, duration,
//! prediction_score)"). Grounded on `Memory`'s own write-temp-then-rename
//! discipline, simplified to a plain append since CSV rows, unlike
//! `memory.json`, are never rewritten in place.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::cycle::{CycleState, Phase};
use crate::error::FailureReason;
use crate::objective::ObjectiveId;

const HEADER: &str = "timestamp,objective_id,outcome,reason,strategy,duration_secs,prediction_score\n";

/// One row of the evolution log, derived from a terminal `CycleState`.
pub struct EvolutionLogRow {
    pub timestamp: DateTime<Utc>,
    pub objective_id: ObjectiveId,
    pub outcome: &'static str,
    pub reason: Option<FailureReason>,
    pub strategy: Option<String>,
    pub duration_secs: f64,
    pub prediction_score: f64,
}

impl EvolutionLogRow {
    pub fn from_state(state: &CycleState) -> Self {
        let (outcome, reason) = match &state.phase {
            Phase::Committed => ("success", None),
            Phase::Failed { reason } => ("failure", Some(*reason)),
            other => {
                tracing::warn!(target: "hephaestus::evolution_log", phase = ?other, "logging non-terminal cycle state");
                ("incomplete", None)
            }
        };
        Self {
            timestamp: state.last_transition_at,
            objective_id: state.objective.id,
            outcome,
            reason,
            strategy: state.strategy_name.clone(),
            duration_secs: (state.last_transition_at - state.started_at).num_milliseconds() as f64 / 1000.0,
            prediction_score: state.risk_score,
        }
    }
}

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl EvolutionLogRow {
    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{:.3},{:.4}\n",
            self.timestamp.to_rfc3339(),
            self.objective_id,
            self.outcome,
            escape(&self.reason.map(|r| r.to_string()).unwrap_or_default()),
            escape(&self.strategy.clone().unwrap_or_default()),
            self.duration_secs,
            self.prediction_score,
        )
    }
}

/// Append-only writer, serialized by an internal lock the same way
/// `Memory` serializes its own writes.
pub struct EvolutionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EvolutionLog {
    /// Opens (creating if needed) the CSV file at `path`, writing the
    /// header row if the file is new or empty.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let needs_header = !path.exists() || std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0) == 0;
        if needs_header {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(HEADER.as_bytes())?;
        }
        Ok(Self { path, lock: Mutex::new(()) })
    }

    pub fn append(&self, row: &EvolutionLogRow) -> std::io::Result<()> {
        let _guard = self.lock.lock().expect("lock poisoned");
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(row.to_csv_line().as_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::Objective;

    fn committed_state() -> CycleState {
        let mut state = CycleState::new(Objective::new("do a thing", 0, crate::objective::Origin::User));
        state.phase = Phase::Committed;
        state.strategy_name = Some("SYNTAX_ONLY".to_string());
        state.risk_score = 0.42;
        state
    }

    #[test]
    fn open_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evolution_log.csv");
        let log = EvolutionLog::open(&path).unwrap();
        log.append(&EvolutionLogRow::from_state(&committed_state())).unwrap();
        drop(log);

        let log2 = EvolutionLog::open(&path).unwrap();
        log2.append(&EvolutionLogRow::from_state(&committed_state())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().filter(|l| l.starts_with("timestamp,")).count(), 1);
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn row_escapes_commas_in_strategy_name() {
        let mut state = committed_state();
        state.strategy_name = Some("A,B".to_string());
        let row = EvolutionLogRow::from_state(&state);
        assert_eq!(row.to_csv_line().matches("\"A,B\"").count(), 1);
    }

    #[test]
    fn failed_state_records_reason() {
        let mut state = committed_state();
        state.phase = Phase::Failed { reason: FailureReason::SanityFailed };
        let row = EvolutionLogRow::from_state(&state);
        assert_eq!(row.outcome, "failure");
        assert_eq!(row.reason, Some(FailureReason::SanityFailed));
    }
}
