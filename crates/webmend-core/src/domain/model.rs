//! The structural model of a scanned project.
//!
//! Built once per run by the detector, immutable afterwards, owned
//! exclusively by the orchestrator for that run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Overall layout the project follows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchitecturePattern {
    Monolithic,
    Factory,
    Blueprint,
    Unknown,
}

/// How the application object comes into existence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryPointKind {
    /// `def create_app(): ... return app`
    FactoryFunction,
    /// `app = Flask(__name__)` at module scope
    AppInstance,
}

/// The file and symbol that produce the application object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryPoint {
    /// Relative to the project root.
    pub file: PathBuf,
    pub kind: EntryPointKind,
    pub symbol: String,
    pub line: u32,
}

/// Login mechanism observed in the sources, used for the authenticated
/// validation replay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    FlaskLogin,
    Jwt,
    Session,
}

/// Confidence scores per model field, in `[0, 1]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceMap(BTreeMap<String, f64>);

/// Field names used in the confidence map.
pub mod confidence {
    pub const ENTRY_POINT: &str = "entry_point";
    pub const ROUTE_MODULES: &str = "route_modules";
    pub const TEMPLATE_DIRS: &str = "template_dirs";
    pub const MODEL_MODULES: &str = "model_modules";
    pub const AUTH_MECHANISM: &str = "auth_mechanism";
}

impl ConfidenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a score for `field`, keeping the highest seen so far.
    pub fn raise(&mut self, field: &str, score: f64) {
        let score = score.clamp(0.0, 1.0);
        let entry = self.0.entry(field.to_string()).or_insert(0.0);
        if score > *entry {
            *entry = score;
        }
    }

    /// Score for `field`; unobserved fields score 0.
    pub fn get(&self, field: &str) -> f64 {
        self.0.get(field).copied().unwrap_or(0.0)
    }
}

/// Structural model of the project under analysis. All paths are relative
/// to `root` except `root` itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectModel {
    pub root: PathBuf,
    pub entry_point: EntryPoint,
    pub architecture_pattern: ArchitecturePattern,
    pub route_modules: BTreeSet<PathBuf>,
    pub template_dirs: BTreeSet<PathBuf>,
    pub static_dirs: BTreeSet<PathBuf>,
    pub model_modules: BTreeSet<PathBuf>,
    pub migration_dir: Option<PathBuf>,
    pub auth_mechanism: Option<AuthMechanism>,
    pub confidence: ConfidenceMap,
}

impl ProjectModel {
    /// Absolute path for a root-relative model path.
    pub fn resolve(&self, relative: &std::path::Path) -> PathBuf {
        self.root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_keeps_highest_score() {
        let mut map = ConfidenceMap::new();
        map.raise(confidence::ENTRY_POINT, 0.5);
        map.raise(confidence::ENTRY_POINT, 0.9);
        map.raise(confidence::ENTRY_POINT, 0.3);
        assert_eq!(map.get(confidence::ENTRY_POINT), 0.9);
    }

    #[test]
    fn confidence_clamps_to_unit_interval() {
        let mut map = ConfidenceMap::new();
        map.raise(confidence::ROUTE_MODULES, 1.7);
        assert_eq!(map.get(confidence::ROUTE_MODULES), 1.0);
    }

    #[test]
    fn unobserved_field_scores_zero() {
        let map = ConfidenceMap::new();
        assert_eq!(map.get(confidence::MODEL_MODULES), 0.0);
    }
}
