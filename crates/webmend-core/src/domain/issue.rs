//! Issue: a single detected defect with stable identity and lifecycle status.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};

/// Severity of a finding. Ordering matters: `Info < Warning < Error < Critical`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Subsystem a finding belongs to.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Routing,
    Templating,
    Persistence,
    Performance,
    Code,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Routing => "routing",
            Category::Templating => "templating",
            Category::Persistence => "persistence",
            Category::Performance => "performance",
            Category::Code => "code",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an issue in the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Detected,
    Planned,
    Applied,
    Verified,
    Failed,
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueStatus::Detected => "detected",
            IssueStatus::Planned => "planned",
            IssueStatus::Applied => "applied",
            IssueStatus::Verified => "verified",
            IssueStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Stable issue identity: first 16 hex chars of
/// `SHA-256("category|file|line_start|line_end|signature|subject")`.
///
/// Re-scanning an unchanged file region always yields the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IssueId(String);

impl IssueId {
    pub fn compute(category: Category, location: &Location, signature: &str, subject: &str) -> Self {
        let (start, end) = location.lines.unwrap_or((0, 0));
        let material = format!(
            "{}|{}|{}|{}|{}|{}",
            category,
            location.file.display(),
            start,
            end,
            signature,
            subject,
        );
        let hash = Sha256::digest(material.as_bytes());
        Self(hex::encode(&hash[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where in the project a finding points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// File path relative to the project root.
    pub file: PathBuf,
    /// 1-indexed inclusive line range, when known.
    pub lines: Option<(u32, u32)>,
}

impl Location {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            file: path.as_ref().to_path_buf(),
            lines: None,
        }
    }

    pub fn line(path: impl AsRef<Path>, line: u32) -> Self {
        Self {
            file: path.as_ref().to_path_buf(),
            lines: Some((line, line)),
        }
    }

    pub fn span(path: impl AsRef<Path>, start: u32, end: u32) -> Self {
        Self {
            file: path.as_ref().to_path_buf(),
            lines: Some((start, end)),
        }
    }
}

/// One entry in an issue's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub status: IssueStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// A single detected defect. Never deleted; resolved issues stay in the
/// ledger marked `Verified` to preserve audit history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: IssueId,
    pub category: Category,
    pub severity: Severity,
    pub location: Location,
    /// Rule key that produced this finding (e.g. `templating.missing_template`).
    pub signature: String,
    /// Machine-usable subject of the finding (template name, handler name,
    /// `Model.field`, ...), consumed by correctors.
    pub subject: String,
    pub description: String,
    pub status: IssueStatus,
    pub history: Vec<StatusChange>,
    /// Set when a healed issue regressed at a different location.
    pub regression_of: Option<IssueId>,
}

impl Issue {
    pub fn new(
        category: Category,
        severity: Severity,
        location: Location,
        signature: impl Into<String>,
        subject: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let signature = signature.into();
        let subject = subject.into();
        let id = IssueId::compute(category, &location, &signature, &subject);
        Self {
            id,
            category,
            severity,
            location,
            signature,
            subject,
            description: description.into(),
            status: IssueStatus::Detected,
            history: vec![StatusChange {
                status: IssueStatus::Detected,
                at: Utc::now(),
                note: None,
            }],
            regression_of: None,
        }
    }

    pub fn with_regression_of(mut self, original: IssueId) -> Self {
        self.regression_of = Some(original);
        self
    }

    /// An issue is open until it reaches `Verified`. `Failed` fixes keep the
    /// issue open so the next healing pass retries it.
    pub fn is_open(&self) -> bool {
        self.status != IssueStatus::Verified
    }
}
