//! Concrete `ValidationStep` implementations (spec.md §4.5).

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::FailureReason;

use super::{StepOutcome, ValidationContext, ValidationStep};

/// Bound on captured subprocess output, to keep reports small.
const MAX_CAPTURED_BYTES: usize = 8 * 1024;

fn truncate(s: &str) -> String {
    if s.len() <= MAX_CAPTURED_BYTES {
        s.to_string()
    } else {
        format!("{}... (truncated)", &s[..MAX_CAPTURED_BYTES])
    }
}

/// Language-agnostic structural check: every file touched by the patch must
/// exist and have balanced brackets/braces/parens. A full per-language
/// grammar is out of scope for the core (spec.md §1: peripheral agents and
/// heavier tooling are contracted capabilities, not core responsibilities);
/// this is the cheap, dependency-free proxy the core itself can run.
pub struct SyntaxCheck;

impl ValidationStep for SyntaxCheck {
    fn name(&self) -> &str {
        "syntax_check"
    }

    fn run(&self, ctx: &ValidationContext) -> StepOutcome {
        for file in ctx.patch.touched_files() {
            let path = ctx.workspace_root.join(&file);
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => return StepOutcome::fail(format!("{}: cannot read file: {}", file, e)),
            };
            if let Some(err) = first_unbalanced(&content) {
                return StepOutcome::fail(format!("{}: {}", file, err));
            }
        }
        StepOutcome::ok("all touched files have balanced brackets")
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::SyntaxFailed
    }
}

fn first_unbalanced(content: &str) -> Option<String> {
    let mut stack = Vec::new();
    for (idx, c) in content.chars().enumerate() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some(open) if open == expected => {}
                    _ => return Some(format!("unbalanced `{}` at byte offset {}", c, idx)),
                }
            }
            _ => {}
        }
    }
    if let Some(unclosed) = stack.last() {
        return Some(format!("unclosed `{}`", unclosed));
    }
    None
}

/// Validates every `.json` file touched by the patch.
pub struct JsonCheck;

impl ValidationStep for JsonCheck {
    fn name(&self) -> &str {
        "json_check"
    }

    fn run(&self, ctx: &ValidationContext) -> StepOutcome {
        for file in ctx.patch.touched_files() {
            if !file.ends_with(".json") {
                continue;
            }
            let path = ctx.workspace_root.join(&file);
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => return StepOutcome::fail(format!("{}: cannot read file: {}", file, e)),
            };
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&content) {
                return StepOutcome::fail(format!("{}: invalid JSON: {}", file, e));
            }
        }
        StepOutcome::ok("all touched JSON files parse")
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::JsonFailed
    }
}

/// Applies the patch to the workspace. On any operation failure, the
/// `PatchApplicator` itself guarantees no partial write occurred.
pub struct PatchApplicatorStep;

impl ValidationStep for PatchApplicatorStep {
    fn name(&self) -> &str {
        "patch_applicator"
    }

    fn run(&self, ctx: &ValidationContext) -> StepOutcome {
        match crate::patch_apply::PatchApplicator::new(&ctx.workspace_root).apply(ctx.patch) {
            Ok(()) => StepOutcome::ok("patch applied"),
            Err(e) => StepOutcome::fail(e.to_string()),
        }
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::PatchApplyFailed
    }
}

/// Invokes the project's test runner as a subprocess. The command is
/// configurable (default: `cargo test`); nonzero exit fails the step.
pub struct TestRunner {
    pub command: String,
    pub args: Vec<String>,
    pub deadline: Duration,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self {
            command: std::env::var("HEPHAESTUS_TEST_COMMAND").unwrap_or_else(|_| "cargo".to_string()),
            args: std::env::var("HEPHAESTUS_TEST_ARGS")
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_else(|_| vec!["test".to_string()]),
            deadline: Duration::from_secs(300),
        }
    }
}

impl TestRunner {
    fn run_command(&self, workspace_root: &Path) -> StepOutcome {
        run_subprocess(&self.command, &self.args, workspace_root, self.deadline, "test run")
    }
}

impl ValidationStep for TestRunner {
    fn name(&self) -> &str {
        "test_runner"
    }

    fn run(&self, ctx: &ValidationContext) -> StepOutcome {
        self.run_command(&ctx.workspace_root)
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::TestFailed
    }
}

/// Restricts the test runner to newly created test files only (spec.md §4.5).
pub struct NewFileTestRunner;

impl ValidationStep for NewFileTestRunner {
    fn name(&self) -> &str {
        "new_file_test_runner"
    }

    fn run(&self, ctx: &ValidationContext) -> StepOutcome {
        let new_test_files: Vec<&str> = ctx
            .patch
            .operations
            .iter()
            .filter_map(|op| match op {
                crate::patch::PatchOperation::CreateFile { file, .. } if is_test_file(file) => Some(file.as_str()),
                _ => None,
            })
            .collect();
        if new_test_files.is_empty() {
            return StepOutcome::ok("no newly created test files to run");
        }
        let runner = TestRunner::default();
        let mut args = runner.args.clone();
        args.extend(new_test_files.iter().map(|f| f.to_string()));
        run_subprocess(&runner.command, &args, &ctx.workspace_root, runner.deadline, "new-file test run")
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::TestFailed
    }
}

fn is_test_file(path: &str) -> bool {
    path.contains("/tests/") || path.starts_with("tests/") || path.ends_with("_test.rs") || path.ends_with("test.rs")
}

/// Asserts that a configured set of files exist in the workspace.
pub struct FileExistence {
    pub required: RwLock<Vec<String>>,
}

impl Default for FileExistence {
    fn default() -> Self {
        Self { required: RwLock::new(Vec::new()) }
    }
}

impl FileExistence {
    pub fn require(&self, file: impl Into<String>) {
        self.required.write().expect("lock poisoned").push(file.into());
    }
}

impl ValidationStep for FileExistence {
    fn name(&self) -> &str {
        "file_existence"
    }

    fn run(&self, ctx: &ValidationContext) -> StepOutcome {
        let required = self.required.read().expect("lock poisoned");
        for file in required.iter() {
            if !ctx.workspace_root.join(file).exists() {
                return StepOutcome::fail(format!("required file missing: {}", file));
            }
        }
        StepOutcome::ok("all required files present")
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::FileMissing
    }
}

/// Executes a configured benchmark script; fails if it regresses beyond a
/// threshold. The script must print a single numeric score to stdout.
pub struct Benchmark {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub baseline: Option<f64>,
    pub regression_threshold: f64,
    pub deadline: Duration,
}

impl Default for Benchmark {
    fn default() -> Self {
        Self {
            command: std::env::var("HEPHAESTUS_BENCHMARK_COMMAND").ok(),
            args: Vec::new(),
            baseline: None,
            regression_threshold: 0.10,
            deadline: Duration::from_secs(120),
        }
    }
}

impl ValidationStep for Benchmark {
    fn name(&self) -> &str {
        "benchmark"
    }

    fn run(&self, ctx: &ValidationContext) -> StepOutcome {
        let Some(command) = &self.command else {
            return StepOutcome::ok("no benchmark configured, skipping");
        };
        let outcome = run_subprocess(command, &self.args, &ctx.workspace_root, self.deadline, "benchmark");
        if !outcome.pass {
            return outcome;
        }
        let Some(baseline) = self.baseline else {
            return StepOutcome::ok("benchmark ran, no baseline configured");
        };
        let score: f64 = match outcome.report.trim().parse() {
            Ok(v) => v,
            Err(_) => return StepOutcome::fail("benchmark did not print a numeric score".to_string()),
        };
        let regression = (baseline - score) / baseline.max(f64::EPSILON);
        if regression > self.regression_threshold {
            StepOutcome::fail(format!(
                "benchmark regressed {:.1}% (threshold {:.1}%): {} -> {}",
                regression * 100.0,
                self.regression_threshold * 100.0,
                baseline,
                score
            ))
        } else {
            StepOutcome::ok(format!("benchmark within threshold: {} -> {}", baseline, score))
        }
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::BenchmarkFailed
    }
}

/// No-op sanity check that always passes (spec.md §4.5).
pub struct SkipSanityCheck;

impl ValidationStep for SkipSanityCheck {
    fn name(&self) -> &str {
        "skip_sanity_check"
    }

    fn run(&self, _ctx: &ValidationContext) -> StepOutcome {
        StepOutcome::ok("sanity check skipped")
    }

    fn failure_reason(&self) -> FailureReason {
        FailureReason::SanityFailed
    }
}

/// How often we poll a running child for completion while watching the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Spawns `command` and waits for it, killing it if it outlives `deadline`
/// instead of blocking on it indefinitely (spec.md §5, §7: a step that
/// exceeds its deadline fails with `TIMEOUT`, not the step's own reason).
fn run_subprocess(command: &str, args: &[String], cwd: &Path, deadline: Duration, label: &str) -> StepOutcome {
    let mut child = match Command::new(command).args(args).current_dir(cwd).stdout(Stdio::piped()).stderr(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(e) => return StepOutcome::fail(format!("failed to spawn {} for {}: {}", command, label, e)),
    };

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stdout = String::new();
                let mut stderr = String::new();
                if let Some(mut out) = child.stdout.take() {
                    let _ = out.read_to_string(&mut stdout);
                }
                if let Some(mut err) = child.stderr.take() {
                    let _ = err.read_to_string(&mut stderr);
                }
                let stdout = truncate(&stdout);
                let stderr = truncate(&stderr);
                return if status.success() {
                    StepOutcome::ok(if stdout.is_empty() { stderr } else { stdout })
                } else {
                    StepOutcome::fail(format!("{} exited with {}\nstdout: {}\nstderr: {}", label, status, stdout, stderr))
                };
            }
            Ok(None) => {
                let elapsed = start.elapsed();
                if elapsed > deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return StepOutcome::timeout(format!("{} exceeded deadline of {:?}", label, deadline));
                }
                std::thread::sleep(POLL_INTERVAL.min(deadline - elapsed));
            }
            Err(e) => return StepOutcome::fail(format!("failed to wait on {} for {}: {}", command, label, e)),
        }
    }
}
