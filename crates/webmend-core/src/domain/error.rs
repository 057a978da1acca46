//! Domain-level error taxonomy for Webmend.
//!
//! Only two variants abort a run: [`HealError::DetectionFailure`] (no
//! ProjectModel, nothing downstream is meaningful) and
//! [`HealError::UnrecoverableCorruption`] (a backup failed to restore during
//! rollback). Everything else degrades to an Issue inside the bounded loop.

use std::path::PathBuf;

use crate::backup::BackupError;
use crate::presets::PresetError;
use crate::registry::RegistryError;

/// Webmend domain errors.
#[derive(Debug, thiserror::Error)]
pub enum HealError {
    #[error("no plausible entry point under {root}: {reason}")]
    DetectionFailure { root: PathBuf, reason: String },

    #[error("backup for issue {issue_id} cannot be restored: {detail}")]
    UnrecoverableCorruption { issue_id: String, detail: String },

    #[error("preset error: {0}")]
    Preset(#[from] PresetError),

    #[error("backup store error: {0}")]
    Backup(#[from] BackupError),

    #[error("issue registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("report digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HealError {
    /// Whether this error must halt the run outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HealError::DetectionFailure { .. } | HealError::UnrecoverableCorruption { .. }
        )
    }
}

/// Result type for Webmend domain operations.
pub type Result<T> = std::result::Result<T, HealError>;
