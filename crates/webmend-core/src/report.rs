//! The run report: everything a run did, persisted with an integrity sidecar.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::backup::ContentHash;
use crate::domain::error::{HealError, Result};
use crate::domain::fix::{BackupRef, Fix};
use crate::domain::issue::{Issue, IssueId, Severity};
use crate::events::{RunState, TransitionEvent};

/// One fix as it appears in the report, with its rendered diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecord {
    pub issue_id: IssueId,
    pub file: PathBuf,
    pub diff: String,
    pub applied: bool,
    pub verified: bool,
    pub description: String,
    pub backup: Option<BackupRef>,
}

impl From<&Fix> for FixRecord {
    fn from(fix: &Fix) -> Self {
        Self {
            issue_id: fix.issue_id.clone(),
            file: fix.patch.file.clone(),
            diff: fix.patch.render(),
            applied: fix.applied,
            verified: fix.verified,
            description: fix.description.clone(),
            backup: fix.backup.clone(),
        }
    }
}

/// Full account of one healing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub terminal_state: RunState,
    pub iterations_used: u32,
    pub issues: Vec<Issue>,
    pub fixes: Vec<FixRecord>,
    pub open_by_severity: BTreeMap<Severity, usize>,
    pub events: Vec<TransitionEvent>,
}

impl RunReport {
    pub fn file_name(&self) -> String {
        format!("run-{}.json", self.run_id)
    }
}

/// Persist a report atomically, with a `.sha256` digest sidecar so a later
/// read can detect tampering or truncation.
pub fn write_report_artifact(dir: &Path, report: &RunReport) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_vec_pretty(report)?;
    let digest = ContentHash::compute(&json);

    let path = dir.join(report.file_name());
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(&path).map_err(|e| HealError::Io(e.error))?;

    let sidecar = sidecar_path(&path);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(digest.to_hex().as_bytes())?;
    tmp.persist(&sidecar).map_err(|e| HealError::Io(e.error))?;

    info!(path = %path.display(), "run report written");
    Ok(path)
}

/// Read a report back, verifying it against its digest sidecar.
pub fn read_report_artifact(path: &Path) -> Result<RunReport> {
    let json = fs::read(path)?;
    let actual = ContentHash::compute(&json).to_hex();
    let expected = fs::read_to_string(sidecar_path(path))?;
    let expected = expected.trim();
    if expected != actual {
        return Err(HealError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".sha256");
    PathBuf::from(s)
}
