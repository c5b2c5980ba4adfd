//! Fitness scoring for a replayed candidate (spec.md §4.10 step 3:
//! "Fitness combines success rate delta, duration delta, and regression
//! count").

use std::time::Duration;

/// Outcome of replaying one candidate (or the unmutated baseline) over a
/// held-out set of objectives.
#[derive(Debug, Clone, Default)]
pub struct ReplaySummary {
    pub attempted: usize,
    pub successes: usize,
    pub total_duration: Duration,
    /// Per-case pass/fail, same order as the replay set, for regression diffing.
    pub case_results: Vec<bool>,
}

impl ReplaySummary {
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempted as f64
        }
    }

    pub fn mean_duration_secs(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.total_duration.as_secs_f64() / self.attempted as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitnessReport {
    pub success_rate_delta: f64,
    /// Positive means the candidate is faster than the baseline.
    pub duration_delta_secs: f64,
    pub regression_count: u32,
    pub score: f64,
}

/// Combines the three factors spec.md §4.10 names into one scalar: success
/// rate delta dominates, duration delta is a small bonus/penalty capped at
/// ±0.2, and each regressed case (passed under baseline, failed under the
/// candidate) subtracts a fixed penalty.
pub fn score(baseline: &ReplaySummary, candidate: &ReplaySummary, regression_count: u32) -> FitnessReport {
    let success_rate_delta = candidate.success_rate() - baseline.success_rate();
    let duration_delta_secs = baseline.mean_duration_secs() - candidate.mean_duration_secs();
    let duration_term = (duration_delta_secs / 10.0).clamp(-0.2, 0.2);
    let score = success_rate_delta + duration_term - (regression_count as f64 * 0.1);
    FitnessReport { success_rate_delta, duration_delta_secs, regression_count, score }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(successes: usize, attempted: usize, secs: f64) -> ReplaySummary {
        ReplaySummary {
            attempted,
            successes,
            total_duration: Duration::from_secs_f64(secs * attempted as f64),
            case_results: vec![true; successes].into_iter().chain(vec![false; attempted - successes]).collect(),
        }
    }

    #[test]
    fn equal_success_rate_and_speed_scores_near_zero() {
        let baseline = summary(8, 10, 1.0);
        let candidate = summary(8, 10, 1.0);
        let report = score(&baseline, &candidate, 0);
        assert!(report.score.abs() < 1e-9);
    }

    #[test]
    fn higher_success_rate_raises_score() {
        let baseline = summary(5, 10, 1.0);
        let candidate = summary(9, 10, 1.0);
        let report = score(&baseline, &candidate, 0);
        assert!(report.success_rate_delta > 0.0);
        assert!(report.score > 0.0);
    }

    #[test]
    fn regressions_penalize_score() {
        let baseline = summary(10, 10, 1.0);
        let candidate = summary(10, 10, 1.0);
        let report_clean = score(&baseline, &candidate, 0);
        let report_regressed = score(&baseline, &candidate, 2);
        assert!(report_regressed.score < report_clean.score);
    }
}
