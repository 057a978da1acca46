//! Reversible textual patches.
//!
//! A [`FilePatch`] is a set of non-overlapping hunks against one file. Each
//! hunk records the exact bytes it replaces, so the patch can be verified
//! against the current content before application and inverted afterwards.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors from patch application.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("hunk span {start}..{end} out of bounds for content of length {len}")]
    SpanOutOfBounds { start: usize, end: usize, len: usize },

    #[error("content at {start}..{end} does not match expected text")]
    ContentMismatch { start: usize, end: usize },

    #[error("hunks overlap within one patch")]
    OverlappingHunks,
}

/// One contiguous byte-range replacement. Insertions use `start == end`
/// with empty `before`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hunk {
    pub start: usize,
    pub end: usize,
    pub before: String,
    pub after: String,
}

impl Hunk {
    pub fn replace(start: usize, end: usize, before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            start,
            end,
            before: before.into(),
            after: after.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            before: String::new(),
            after: text.into(),
        }
    }

    fn overlaps(&self, other: &Hunk) -> bool {
        // Two insertions at the same offset conflict; an insertion at a
        // replacement boundary does not.
        if self.start == self.end && other.start == other.end {
            return self.start == other.start;
        }
        self.start < other.end && other.start < self.end
    }
}

/// A reversible multi-hunk diff against a single file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePatch {
    /// Relative to the project root.
    pub file: PathBuf,
    pub hunks: Vec<Hunk>,
    /// True when the patch creates `file` from nothing.
    pub creates_file: bool,
}

impl FilePatch {
    pub fn new(file: impl Into<PathBuf>, hunks: Vec<Hunk>) -> Self {
        Self {
            file: file.into(),
            hunks,
            creates_file: false,
        }
    }

    /// A patch that writes a brand-new file.
    pub fn create(file: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            hunks: vec![Hunk::insert(0, content)],
            creates_file: true,
        }
    }

    /// Lowest byte offset this patch touches, for deterministic ordering.
    pub fn first_offset(&self) -> usize {
        self.hunks.iter().map(|h| h.start).min().unwrap_or(0)
    }

    /// Whether any hunk of this patch touches a byte range another patch
    /// against the same file also touches.
    pub fn overlaps(&self, other: &FilePatch) -> bool {
        if self.file != other.file {
            return false;
        }
        if self.creates_file || other.creates_file {
            // Two patches creating or editing the same new file always collide.
            return true;
        }
        self.hunks
            .iter()
            .any(|a| other.hunks.iter().any(|b| a.overlaps(b)))
    }

    /// Apply to `content`, verifying every hunk's `before` text first.
    pub fn apply(&self, content: &str) -> Result<String, PatchError> {
        let mut hunks: Vec<&Hunk> = self.hunks.iter().collect();
        hunks.sort_by_key(|h| h.start);
        for pair in hunks.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(PatchError::OverlappingHunks);
            }
        }

        for hunk in &hunks {
            if hunk.end > content.len() || hunk.start > hunk.end {
                return Err(PatchError::SpanOutOfBounds {
                    start: hunk.start,
                    end: hunk.end,
                    len: content.len(),
                });
            }
            if &content[hunk.start..hunk.end] != hunk.before {
                return Err(PatchError::ContentMismatch {
                    start: hunk.start,
                    end: hunk.end,
                });
            }
        }

        // Apply back-to-front so earlier offsets stay valid.
        let mut out = content.to_string();
        for hunk in hunks.iter().rev() {
            out.replace_range(hunk.start..hunk.end, &hunk.after);
        }
        Ok(out)
    }

    /// The inverse patch, valid against the patched content.
    pub fn invert(&self) -> FilePatch {
        let mut hunks: Vec<&Hunk> = self.hunks.iter().collect();
        hunks.sort_by_key(|h| h.start);

        let mut shift: i64 = 0;
        let mut inverted = Vec::with_capacity(hunks.len());
        for hunk in hunks {
            let start = (hunk.start as i64 + shift) as usize;
            let end = start + hunk.after.len();
            inverted.push(Hunk {
                start,
                end,
                before: hunk.after.clone(),
                after: hunk.before.clone(),
            });
            shift += hunk.after.len() as i64 - (hunk.end - hunk.start) as i64;
        }
        FilePatch {
            file: self.file.clone(),
            hunks: inverted,
            creates_file: false,
        }
    }

    /// Compact human-readable rendering for the run report.
    pub fn render(&self) -> String {
        let mut out = format!("--- {}\n", self.file.display());
        for hunk in &self.hunks {
            out.push_str(&format!("@@ bytes {}..{} @@\n", hunk.start, hunk.end));
            for line in hunk.before.lines() {
                out.push_str(&format!("-{line}\n"));
            }
            for line in hunk.after.lines() {
                out.push_str(&format!("+{line}\n"));
            }
        }
        out
    }
}
