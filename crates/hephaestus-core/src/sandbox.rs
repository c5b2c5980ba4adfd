//! Sandbox: an ephemeral copy of the workspace a cycle can mutate freely
//! (spec.md §4.6). Grounded on the teacher's `Compiler::compile_from_string`
//! tempdir discipline: materialize into `tempfile::tempdir()`, do the work,
//! and guarantee cleanup regardless of how the step ends.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::patch::Patch;
use crate::patch_apply::PatchApplicator;

/// RAII-guarded copy of a workspace. Dropping it removes the underlying
/// temp directory; `close()` does the same thing explicitly so callers can
/// observe and log a cleanup failure instead of having it silently ignored
/// in `Drop`.
pub struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    /// Copies every file under `source_root` into a fresh temp directory.
    pub fn open(source_root: &Path) -> Result<Self, SandboxError> {
        let dir = tempfile::tempdir().map_err(|e| SandboxError::Open(e.to_string()))?;
        copy_tree(source_root, dir.path()).map_err(|e| SandboxError::Open(e.to_string()))?;
        debug!(target: "hephaestus::sandbox", root = %dir.path().display(), "sandbox opened");
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Applies `patch` to the sandbox copy. The caller's original workspace
    /// is never touched.
    pub fn apply(&self, patch: &Patch) -> Result<(), crate::error::PatchError> {
        PatchApplicator::new(self.root()).apply(patch)
    }

    /// Explicit teardown. Logs (rather than panics) if removal fails, since
    /// by this point validation has already run and the cycle's outcome is
    /// decided; a stray temp directory should not turn a successful cycle
    /// into a failed one.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(target: "hephaestus::sandbox", root = %path.display(), error = %e, "failed to remove sandbox directory");
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = to.join(entry.file_name());
        if is_excluded(&entry.file_name()) {
            continue;
        }
        if file_type.is_dir() {
            std::fs::create_dir_all(&dest)?;
            copy_tree(&entry.path(), &dest)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Directories never worth copying into a sandbox: VCS metadata, build
/// caches, and the dependency trees of every language this agent touches
/// (spec.md §4.6: "VCS metadata, caches, virtualenvs, node_modules").
fn is_excluded(name: &std::ffi::OsStr) -> bool {
    matches!(
        name.to_str(),
        Some("target") | Some(".git") | Some("node_modules") | Some(".venv") | Some("venv") | Some("__pycache__")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchOperation;
    use tempfile::tempdir;

    #[test]
    fn open_copies_files_and_close_removes_them() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.rs"), "fn f() {}").unwrap();

        let sandbox = Sandbox::open(source.path()).unwrap();
        let sandbox_root = sandbox.root().to_path_buf();
        assert_eq!(std::fs::read_to_string(sandbox_root.join("a.rs")).unwrap(), "fn f() {}");

        sandbox.close();
        assert!(!sandbox_root.exists());
    }

    #[test]
    fn apply_mutates_sandbox_not_source() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.rs"), "line1").unwrap();

        let sandbox = Sandbox::open(source.path()).unwrap();
        let patch = Patch {
            operations: vec![PatchOperation::Insert { file: "a.rs".into(), line: 0, content: "line0".into() }],
        };
        sandbox.apply(&patch).unwrap();

        assert_eq!(std::fs::read_to_string(sandbox.root().join("a.rs")).unwrap(), "line0\nline1");
        assert_eq!(std::fs::read_to_string(source.path().join("a.rs")).unwrap(), "line1");
    }

    #[test]
    fn excludes_target_and_git_directories() {
        let source = tempdir().unwrap();
        std::fs::create_dir(source.path().join("target")).unwrap();
        std::fs::write(source.path().join("target").join("big.bin"), "x").unwrap();
        std::fs::write(source.path().join("keep.rs"), "y").unwrap();

        let sandbox = Sandbox::open(source.path()).unwrap();
        assert!(!sandbox.root().join("target").exists());
        assert!(sandbox.root().join("keep.rs").exists());
    }

    #[test]
    fn excludes_node_modules_and_python_env_directories() {
        let source = tempdir().unwrap();
        for dir in ["node_modules", ".venv", "venv", "__pycache__"] {
            std::fs::create_dir(source.path().join(dir)).unwrap();
            std::fs::write(source.path().join(dir).join("big.bin"), "x").unwrap();
        }
        std::fs::write(source.path().join("keep.py"), "y").unwrap();

        let sandbox = Sandbox::open(source.path()).unwrap();
        for dir in ["node_modules", ".venv", "venv", "__pycache__"] {
            assert!(!sandbox.root().join(dir).exists(), "{dir} should be excluded from the sandbox copy");
        }
        assert!(sandbox.root().join("keep.py").exists());
    }
}
