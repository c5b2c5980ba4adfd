//! Patch: the data model for file edits produced by the Architect (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::error::PatchError;

/// A single file-edit operation. Tagged by `op` in JSON so Architect output
/// round-trips exactly (spec.md §8: "parsing an Architect JSON patch and
/// re-serializing it yields a semantically equal patch").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchOperation {
    /// `line` is 1-based; 0 or beyond-EOF appends.
    Insert { file: String, line: usize, content: String },
    /// `block_to_replace` matches verbatim (newline-normalized); must match
    /// exactly one occurrence.
    Replace {
        file: String,
        block_to_replace: String,
        new_content: String,
    },
    DeleteBlock { file: String, block_to_delete: String },
    /// Fails if `file` already exists.
    CreateFile { file: String, content: String },
}

impl PatchOperation {
    pub fn file(&self) -> &str {
        match self {
            PatchOperation::Insert { file, .. } => file,
            PatchOperation::Replace { file, .. } => file,
            PatchOperation::DeleteBlock { file, .. } => file,
            PatchOperation::CreateFile { file, .. } => file,
        }
    }

    /// Validates the invariants shared by every operation: the path is
    /// relative, normalized, and contains no `..` component (spec.md §3).
    pub fn validate_path(&self) -> Result<(), PatchError> {
        validate_relative_path(self.file())
    }
}

/// Ordered list of file-edit operations produced by the Architect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub operations: Vec<PatchOperation>,
}

impl Patch {
    pub fn empty() -> Self {
        Self { operations: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn validate(&self) -> Result<(), PatchError> {
        for op in &self.operations {
            op.validate_path()?;
        }
        Ok(())
    }

    /// Files touched by this patch, in operation order, without duplicates.
    pub fn touched_files(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for op in &self.operations {
            let f = op.file().to_string();
            if !seen.contains(&f) {
                seen.push(f);
            }
        }
        seen
    }

    /// Short human-readable summary, used as `MemoryRecord::patch_summary`
    /// and in generated commit messages.
    pub fn summary(&self) -> String {
        if self.operations.is_empty() {
            return "no-op".to_string();
        }
        let files = self.touched_files();
        format!("{} operation(s) across {} file(s): {}", self.operations.len(), files.len(), files.join(", "))
    }
}

fn validate_relative_path(path: &str) -> Result<(), PatchError> {
    let p = std::path::Path::new(path);
    if p.is_absolute() {
        return Err(PatchError::UnsafePath(path.to_string()));
    }
    for component in p.components() {
        match component {
            std::path::Component::ParentDir => {
                return Err(PatchError::UnsafePath(path.to_string()));
            }
            std::path::Component::Normal(_) | std::path::Component::CurDir => {}
            _ => return Err(PatchError::UnsafePath(path.to_string())),
        }
    }
    if path.trim().is_empty() {
        return Err(PatchError::UnsafePath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_component() {
        let op = PatchOperation::CreateFile {
            file: "../escape.rs".to_string(),
            content: String::new(),
        };
        assert!(matches!(op.validate_path(), Err(PatchError::UnsafePath(_))));
    }

    #[test]
    fn rejects_absolute_path() {
        let op = PatchOperation::CreateFile {
            file: "/etc/passwd".to_string(),
            content: String::new(),
        };
        assert!(op.validate_path().is_err());
    }

    #[test]
    fn accepts_normalized_relative_path() {
        let op = PatchOperation::CreateFile {
            file: "src/helpers.rs".to_string(),
            content: String::new(),
        };
        assert!(op.validate_path().is_ok());
    }

    #[test]
    fn round_trips_through_json() {
        let patch = Patch {
            operations: vec![
                PatchOperation::Insert { file: "a.rs".into(), line: 0, content: "// x".into() },
                PatchOperation::Replace {
                    file: "b.rs".into(),
                    block_to_replace: "return 0".into(),
                    new_content: "return 1".into(),
                },
            ],
        };
        let json = serde_json::to_string(&patch).unwrap();
        let back: Patch = serde_json::from_str(&json).unwrap();
        assert_eq!(patch, back);
    }

    #[test]
    fn empty_patch_has_no_touched_files() {
        assert!(Patch::empty().touched_files().is_empty());
        assert_eq!(Patch::empty().summary(), "no-op");
    }
}
