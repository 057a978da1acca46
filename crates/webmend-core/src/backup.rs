//! Content-addressed backup store for pre-fix file snapshots.
//!
//! Blobs live under `objects/<aa>/<rest-of-hash>` (first two hex chars shard
//! the directory), records under `records/<issue-id>-<hash8>.json`. Blobs are
//! write-once: identical pre-images across fixes share one object. Restores
//! verify the digest before touching the working tree.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::fix::BackupRef;
use crate::domain::issue::IssueId;

/// SHA-256 digest of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| BackupError::InvalidHash(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BackupError::InvalidHash(s.to_string()))?;
        Ok(Self(arr))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("no backup found for {0}")]
    NotFound(String),

    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    #[error("backup blob corrupt: expected {expected}, got {actual}")]
    CorruptBackup { expected: String, actual: String },

    #[error("backup serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// On-disk record tying an issue to the pre-image it can roll back to.
#[derive(Debug, Serialize, Deserialize)]
struct BackupRecord {
    issue_id: IssueId,
    file: PathBuf,
    file_hash: String,
    existed: bool,
}

/// File-backed backup store rooted in the project's state directory.
#[derive(Debug, Clone)]
pub struct BackupStore {
    project_root: PathBuf,
    objects_dir: PathBuf,
    records_dir: PathBuf,
}

impl BackupStore {
    /// Open (creating if needed) the store under `state_dir/backups`.
    pub fn open(project_root: &Path, state_dir: &Path) -> Result<Self, BackupError> {
        let base = state_dir.join("backups");
        let objects_dir = base.join("objects");
        let records_dir = base.join("records");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&records_dir)?;
        Ok(Self {
            project_root: project_root.to_path_buf(),
            objects_dir,
            records_dir,
        })
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        let hx = hash.to_hex();
        self.objects_dir.join(&hx[..2]).join(&hx[2..])
    }

    /// Snapshot `file` (relative to the project root) before a fix touches it.
    /// A file that does not exist yet is recorded as an empty pre-image with
    /// `existed = false`, so rollback deletes it.
    pub fn backup(&self, issue_id: &IssueId, file: &Path) -> Result<BackupRef, BackupError> {
        let abs = self.project_root.join(file);
        let (content, existed) = match fs::read(&abs) {
            Ok(bytes) => (bytes, true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), false),
            Err(e) => return Err(e.into()),
        };
        let hash = ContentHash::compute(&content);
        let object = self.object_path(&hash);
        if !object.exists() {
            if let Some(parent) = object.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut tmp = NamedTempFile::new_in(&self.objects_dir)?;
            tmp.write_all(&content)?;
            tmp.persist(&object).map_err(|e| e.error)?;
        }
        let record = BackupRecord {
            issue_id: issue_id.clone(),
            file: file.to_path_buf(),
            file_hash: hash.to_hex(),
            existed,
        };
        let record_path = self.record_path(issue_id, &hash);
        let json = serde_json::to_vec_pretty(&record)?;
        let mut tmp = NamedTempFile::new_in(&self.records_dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&record_path).map_err(|e| e.error)?;
        debug!(issue = %issue_id, file = %file.display(), hash = %hash, existed, "backed up pre-image");
        Ok(BackupRef {
            issue_id: issue_id.clone(),
            file: file.to_path_buf(),
            file_hash: hash.to_hex(),
            existed,
        })
    }

    fn record_path(&self, issue_id: &IssueId, hash: &ContentHash) -> PathBuf {
        self.records_dir
            .join(format!("{issue_id}-{}.json", &hash.to_hex()[..8]))
    }

    /// Read a backed-up pre-image, verifying its digest.
    pub fn read(&self, backup: &BackupRef) -> Result<Vec<u8>, BackupError> {
        let hash = ContentHash::from_str(&backup.file_hash)?;
        let object = self.object_path(&hash);
        let content = match fs::read(&object) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(backup.file_hash.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let actual = ContentHash::compute(&content);
        if actual != hash {
            return Err(BackupError::CorruptBackup {
                expected: hash.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(content)
    }

    /// Restore the working tree to the pre-fix state for this backup.
    /// A fix that created the file is rolled back by deleting it.
    pub fn rollback(&self, backup: &BackupRef) -> Result<(), BackupError> {
        let abs = self.project_root.join(&backup.file);
        if !backup.existed {
            match fs::remove_file(&abs) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        let content = self.read(backup)?;
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let dir = abs.parent().unwrap_or(&self.project_root);
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.persist(&abs).map_err(|e| e.error)?;
        debug!(issue = %backup.issue_id, file = %backup.file.display(), "rolled back to pre-image");
        Ok(())
    }
}
