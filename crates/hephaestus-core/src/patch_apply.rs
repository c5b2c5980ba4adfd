//! PatchApplicator: applies patch operations atomically, per file (spec.md §4.7).
//!
//! Operations are resolved against a workspace root and buffered in memory
//! per file; a file is written to disk only once every operation touching it
//! has succeeded. If any operation in the batch fails, nothing is written,
//! mirroring the versioned-write-then-swap discipline the evolution engine
//! uses for mutation rollouts: nothing observable changes until the whole
//! unit of work is known-good.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::PatchError;
use crate::patch::{Patch, PatchOperation};

/// Normalizes line endings and trailing whitespace per line before a
/// block-match comparison. This is the one explicit rule chosen for the
/// open question in spec.md §9 ("exact semantics of REPLACE whitespace
/// normalization"): CRLF -> LF, and trailing whitespace on each line is
/// stripped before comparison. Leading whitespace and blank lines are
/// significant.
fn normalize_block(s: &str) -> String {
    s.replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-file buffer: either unread-yet, or a loaded line vector pending
/// operations, or a brand-new file being created.
enum FileBuffer {
    Lines(Vec<String>),
    New(String),
}

pub struct PatchApplicator<'a> {
    root: &'a Path,
}

impl<'a> PatchApplicator<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self { root }
    }

    /// Applies every operation in `patch`. On any failure, no file under
    /// `root` is modified.
    pub fn apply(&self, patch: &Patch) -> Result<(), PatchError> {
        patch.validate()?;

        let mut buffers: HashMap<String, FileBuffer> = HashMap::new();

        for op in &patch.operations {
            self.apply_one(op, &mut buffers)?;
        }

        for (file, buffer) in buffers {
            let abs = self.resolve(&file)?;
            if let Some(parent) = abs.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PatchError::Io { file: file.clone(), source: e.to_string() })?;
            }
            let content = match buffer {
                FileBuffer::Lines(lines) => lines.join("\n"),
                FileBuffer::New(content) => content,
            };
            std::fs::write(&abs, content)
                .map_err(|e| PatchError::Io { file, source: e.to_string() })?;
        }

        Ok(())
    }

    fn resolve(&self, file: &str) -> Result<PathBuf, PatchError> {
        let joined = self.root.join(file);
        // Paths were already validated to contain no `..` components, so a
        // lexical join is sufficient; we still guard against an absolute
        // `file` escaping the root entirely.
        if !joined.starts_with(self.root) {
            return Err(PatchError::UnsafePath(file.to_string()));
        }
        Ok(joined)
    }

    fn load_lines(&self, file: &str) -> Result<Vec<String>, PatchError> {
        let abs = self.resolve(file)?;
        let content = std::fs::read_to_string(&abs)
            .map_err(|e| PatchError::Io { file: file.to_string(), source: e.to_string() })?;
        Ok(content.replace("\r\n", "\n").split('\n').map(|s| s.to_string()).collect())
    }

    fn apply_one(&self, op: &PatchOperation, buffers: &mut HashMap<String, FileBuffer>) -> Result<(), PatchError> {
        match op {
            PatchOperation::CreateFile { file, content } => {
                if buffers.contains_key(file) || self.resolve(file)?.exists() {
                    return Err(PatchError::FileExists(file.clone()));
                }
                buffers.insert(file.clone(), FileBuffer::New(content.clone()));
                Ok(())
            }
            PatchOperation::Insert { file, line, content } => {
                let lines = self.lines_for(file, buffers)?;
                let len = lines.len();
                // line=0 prepends; line=len+1 appends; beyond that fails.
                let insert_at = if *line == 0 {
                    0
                } else if *line <= len + 1 {
                    *line - 1
                } else {
                    return Err(PatchError::LineOutOfRange { file: file.clone(), line: *line, len });
                };
                let insert_at = insert_at.min(lines.len());
                lines.splice(insert_at..insert_at, content.split('\n').map(|s| s.to_string()));
                Ok(())
            }
            PatchOperation::Replace { file, block_to_replace, new_content } => {
                let lines = self.lines_for(file, buffers)?;
                let (start, end) = find_unique_block(lines, block_to_replace, file)?;
                lines.splice(start..end, new_content.split('\n').map(|s| s.to_string()));
                Ok(())
            }
            PatchOperation::DeleteBlock { file, block_to_delete } => {
                let lines = self.lines_for(file, buffers)?;
                let (start, end) = find_unique_block(lines, block_to_delete, file)?;
                lines.splice(start..end, std::iter::empty());
                Ok(())
            }
        }
    }

    fn lines_for<'b>(&self, file: &str, buffers: &'b mut HashMap<String, FileBuffer>) -> Result<&'b mut Vec<String>, PatchError> {
        if !buffers.contains_key(file) {
            let lines = self.load_lines(file)?;
            buffers.insert(file.to_string(), FileBuffer::Lines(lines));
        }
        match buffers.get_mut(file).expect("just inserted") {
            FileBuffer::Lines(lines) => Ok(lines),
            FileBuffer::New(_) => {
                warn!(target: "hephaestus::patch_apply", file, "operation targets a file created earlier in this patch");
                Err(PatchError::Io { file: file.to_string(), source: "cannot edit a file created in the same patch".to_string() })
            }
        }
    }
}

/// Finds the unique contiguous span of `lines` whose normalized text equals
/// normalized `block`. Fails if there are zero or more than one match
/// (spec.md §3, §8: `AMBIGUOUS_BLOCK`).
fn find_unique_block(lines: &[String], block: &str, file: &str) -> Result<(usize, usize), PatchError> {
    let block_lines: Vec<String> = normalize_block(block).split('\n').map(|s| s.to_string()).collect();
    if block_lines.is_empty() {
        return Err(PatchError::AmbiguousBlock { file: file.to_string(), matches: 0 });
    }
    let window = block_lines.len();
    let mut matches = Vec::new();
    if lines.len() >= window {
        for start in 0..=(lines.len() - window) {
            let candidate = &lines[start..start + window];
            let normalized: Vec<String> = candidate.iter().map(|l| l.trim_end().to_string()).collect();
            if normalized == block_lines {
                matches.push(start);
            }
        }
    }
    debug!(target: "hephaestus::patch_apply", file, matches = matches.len(), "block search");
    if matches.len() != 1 {
        return Err(PatchError::AmbiguousBlock { file: file.to_string(), matches: matches.len() });
    }
    let start = matches[0];
    Ok((start, start + window))
}
