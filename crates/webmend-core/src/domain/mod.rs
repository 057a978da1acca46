//! Core domain types shared across the pipeline.

pub mod error;
pub mod fix;
pub mod issue;
pub mod model;

pub use error::{HealError, Result};
pub use fix::{BackupRef, Fix, PlannedFix};
pub use issue::{Category, Issue, IssueId, IssueStatus, Location, Severity, StatusChange};
pub use model::{
    ArchitecturePattern, AuthMechanism, ConfidenceMap, EntryPoint, EntryPointKind, ProjectModel,
};
