//! Webmend Core Library
//!
//! Re-exports the detection, diagnosis, healing, and validation pipeline for
//! programmatic access to webmend functionality.

pub mod analyzers;
pub mod backup;
pub mod config;
pub mod correctors;
pub mod detector;
pub mod domain;
pub mod events;
pub mod obs;
pub mod orchestrator;
pub mod patch;
pub mod presets;
pub mod registry;
pub mod report;
pub mod rules;
pub mod telemetry;
pub mod validation;

pub use domain::error::{HealError, Result};
pub use domain::fix::{BackupRef, Fix, PlannedFix};
pub use domain::issue::{
    Category, Issue, IssueId, IssueStatus, Location, Severity, StatusChange,
};
pub use domain::model::{AuthMechanism, ConfidenceMap, EntryPoint, ProjectModel};

pub use analyzers::{default_analyzers, Analyzer};
pub use backup::{BackupError, BackupStore, ContentHash};
pub use config::HealConfig;
pub use correctors::{
    apply_fixes, default_correctors, plan_fixes, rollback_fixes, Corrector, HealOutcome,
};
pub use detector::Detector;
pub use events::{EventSink, RunState, TransitionEvent, VecSink};
pub use orchestrator::Orchestrator;
pub use patch::{FilePatch, Hunk, PatchError};
pub use presets::{Preset, PresetError, PresetManager};
pub use registry::{IssueRegistry, ObserveOutcome, RegistryError};
pub use report::{read_report_artifact, write_report_artifact, FixRecord, RunReport};
pub use rules::{Expectations, RuleConfig, RuleOverride, RuleSet};
pub use telemetry::init_tracing;
pub use validation::{
    probe_targets, ProbeFailure, ProbeTarget, SandboxValidator, ValidationOutcome,
    ValidationReport, Validator,
};
