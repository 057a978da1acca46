//! Fix: a reversible patch addressing exactly one Issue.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::issue::{IssueId, Severity};
use crate::patch::FilePatch;

/// Pointer to a content-addressed pre-fix backup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRef {
    pub issue_id: IssueId,
    /// Relative to the project root.
    pub file: PathBuf,
    /// Hex SHA-256 of the pre-fix file content; also the content address.
    pub file_hash: String,
    /// False when the fix created the file, so rollback removes it.
    pub existed: bool,
}

/// A fix proposed by a corrector but not yet applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedFix {
    pub issue_id: IssueId,
    /// Severity of the issue being fixed; ties collision resolution.
    pub severity: Severity,
    pub patch: FilePatch,
    pub description: String,
}

/// An applied (or failed) fix with its audit trail.
///
/// Invariants: references exactly one Issue; `applied` is never true
/// without a successful backup (`backup.is_some()` or a created file's
/// empty pre-image record).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fix {
    pub issue_id: IssueId,
    pub patch: FilePatch,
    pub backup: Option<BackupRef>,
    pub applied: bool,
    pub verified: bool,
    pub description: String,
}

impl Fix {
    pub fn from_planned(planned: PlannedFix, backup: BackupRef) -> Self {
        Self {
            issue_id: planned.issue_id,
            patch: planned.patch,
            backup: Some(backup),
            applied: true,
            verified: false,
            description: planned.description,
        }
    }
}
