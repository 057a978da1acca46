//! Diagnosis: read-only analyzers that turn the project model into issues.
//!
//! Analyzers never touch the filesystem beyond reads. An unreadable source is
//! itself a finding (`code.analysis_error`), not a run failure, so one bad
//! file cannot take down a whole diagnosis pass.

pub mod code_quality;
pub mod performance;
pub mod persistence;
pub mod routing;
pub mod scan;
pub mod templating;

use std::fs;
use std::path::Path;

use crate::domain::issue::{Category, Issue, Location};
use crate::domain::model::ProjectModel;
use crate::rules::{keys, RuleSet};

pub use code_quality::CodeQualityAnalyzer;
pub use performance::PerformanceAnalyzer;
pub use persistence::PersistenceAnalyzer;
pub use routing::RoutingAnalyzer;
pub use templating::TemplatingAnalyzer;

/// A read-only check pass over one concern of the project.
pub trait Analyzer: Send + Sync {
    fn category(&self) -> Category;

    /// Produce findings. Must not mutate the project tree.
    fn analyze(&self, model: &ProjectModel, rules: &RuleSet) -> Vec<Issue>;
}

/// The full default analyzer chain, in diagnosis order.
pub fn default_analyzers() -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(RoutingAnalyzer),
        Box::new(TemplatingAnalyzer),
        Box::new(PersistenceAnalyzer),
        Box::new(PerformanceAnalyzer),
        Box::new(CodeQualityAnalyzer),
    ]
}

/// Read a root-relative source file, degrading failures to an
/// `analysis_error` finding instead of aborting the pass.
pub(crate) fn read_source(
    model: &ProjectModel,
    rel: &Path,
    rules: &RuleSet,
    issues: &mut Vec<Issue>,
) -> Option<String> {
    match fs::read_to_string(model.resolve(rel)) {
        Ok(content) => Some(content),
        Err(e) => {
            if let Some(severity) = rules.severity(keys::CODE_ANALYSIS_ERROR) {
                issues.push(Issue::new(
                    Category::Code,
                    severity,
                    Location::file(rel),
                    keys::CODE_ANALYSIS_ERROR,
                    &rel.display().to_string(),
                    &format!("source could not be read: {e}"),
                ));
            }
            None
        }
    }
}
