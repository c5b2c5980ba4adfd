//! VersionControl: the capability trait `CycleRunner` commits through
//! (spec.md §6). Real `git` invocation is out of scope; `InMemoryVersionControl`
//! keeps a linear list of whole-tree snapshots, enough to satisfy `commit`/
//! `reset_to`/`current_head` for tests and local runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Opaque commit identifier. Monotonically increasing index into the
/// in-memory history; a real implementation would use a git SHA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(pub u64);

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "commit-{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("no commit found for id {0}")]
    UnknownCommit(CommitId),
    #[error("io error: {0}")]
    Io(String),
}

/// Capability trait for committing and reverting changes to a workspace
/// root. `CycleRunner` and `EvolutionEngine` both commit through this so
/// neither depends on the shape of real version control.
pub trait VersionControl: Send + Sync {
    /// Snapshots every file currently under `workspace_root` and returns
    /// the new head.
    fn commit(&self, workspace_root: &Path, message: &str) -> Result<CommitId, VcsError>;

    /// Restores `workspace_root` to exactly the state recorded at `commit`.
    fn reset_to(&self, workspace_root: &Path, commit: CommitId) -> Result<(), VcsError>;

    fn current_head(&self) -> Option<CommitId>;
}

struct Snapshot {
    message: String,
    files: HashMap<PathBuf, Vec<u8>>,
}

struct Inner {
    history: Vec<Snapshot>,
}

/// In-memory stand-in for a real VCS. Keeps a full copy of the tree at
/// every commit; fine for tests and local single-machine runs, not for
/// production scale (spec.md's non-goal of distributed operation applies
/// here too).
pub struct InMemoryVersionControl {
    inner: Mutex<Inner>,
}

impl InMemoryVersionControl {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { history: Vec::new() }) }
    }
}

impl Default for InMemoryVersionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionControl for InMemoryVersionControl {
    fn commit(&self, workspace_root: &Path, message: &str) -> Result<CommitId, VcsError> {
        let files = snapshot_tree(workspace_root).map_err(|e| VcsError::Io(e.to_string()))?;
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.history.push(Snapshot { message: message.to_string(), files });
        Ok(CommitId((inner.history.len() - 1) as u64))
    }

    fn reset_to(&self, workspace_root: &Path, commit: CommitId) -> Result<(), VcsError> {
        let inner = self.inner.lock().expect("lock poisoned");
        let snapshot = inner.history.get(commit.0 as usize).ok_or(VcsError::UnknownCommit(commit))?;
        restore_tree(workspace_root, &snapshot.files).map_err(|e| VcsError::Io(e.to_string()))
    }

    fn current_head(&self) -> Option<CommitId> {
        let inner = self.inner.lock().expect("lock poisoned");
        if inner.history.is_empty() {
            None
        } else {
            Some(CommitId((inner.history.len() - 1) as u64))
        }
    }
}

fn snapshot_tree(root: &Path) -> std::io::Result<HashMap<PathBuf, Vec<u8>>> {
    let mut files = HashMap::new();
    collect_files(root, root, &mut files)?;
    Ok(files)
}

fn collect_files(root: &Path, dir: &Path, out: &mut HashMap<PathBuf, Vec<u8>>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if matches!(path.file_name().and_then(|n| n.to_str()), Some("target") | Some(".git")) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).expect("path under root").to_path_buf();
            out.insert(rel, std::fs::read(&path)?);
        }
    }
    Ok(())
}

/// Replaces the entire contents of `root` with `files`: removes files not
/// present in the snapshot, writes/overwrites the rest.
fn restore_tree(root: &Path, files: &HashMap<PathBuf, Vec<u8>>) -> std::io::Result<()> {
    let current = snapshot_tree(root)?;
    for rel in current.keys() {
        if !files.contains_key(rel) {
            std::fs::remove_file(root.join(rel))?;
        }
    }
    for (rel, content) in files {
        let abs = root.join(rel);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(abs, content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn commit_then_reset_restores_exact_contents() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "v1").unwrap();
        let vcs = InMemoryVersionControl::new();
        let c1 = vcs.commit(dir.path(), "first").unwrap();

        std::fs::write(dir.path().join("a.txt"), "v2").unwrap();
        std::fs::write(dir.path().join("b.txt"), "new file").unwrap();
        vcs.commit(dir.path(), "second").unwrap();

        vcs.reset_to(dir.path(), c1).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v1");
        assert!(!dir.path().join("b.txt").exists());
    }

    #[test]
    fn current_head_tracks_latest_commit() {
        let dir = tempdir().unwrap();
        let vcs = InMemoryVersionControl::new();
        assert!(vcs.current_head().is_none());
        let c1 = vcs.commit(dir.path(), "first").unwrap();
        assert_eq!(vcs.current_head(), Some(c1));
    }

    #[test]
    fn reset_to_unknown_commit_fails() {
        let dir = tempdir().unwrap();
        let vcs = InMemoryVersionControl::new();
        let result = vcs.reset_to(dir.path(), CommitId(42));
        assert!(matches!(result, Err(VcsError::UnknownCommit(_))));
    }
}
