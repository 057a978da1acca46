//! Run configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rules::RuleOverride;

fn default_max_iterations() -> u32 {
    3
}

fn default_sandbox_timeout_secs() -> u64 {
    30
}

fn default_min_route_confidence() -> f64 {
    0.3
}

/// Everything a healing run needs to know up front. Deserializes from a JSON
/// config file; the CLI layers flag values on top after parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealConfig {
    /// Project root to analyze and heal.
    pub root_path: PathBuf,

    /// Built-in preset name or path to a preset file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    /// Upper bound on detect/heal/validate iterations before escalating.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Replay a login before probing when an auth mechanism was detected.
    #[serde(default)]
    pub simulate_auth: bool,

    /// Wall-clock budget for one validation pass, including app startup.
    #[serde(default = "default_sandbox_timeout_secs")]
    pub sandbox_timeout_secs: u64,

    /// Per-rule user overrides, highest-precedence layer.
    #[serde(default)]
    pub rule_overrides: BTreeMap<String, RuleOverride>,

    /// Entry-point candidates scoring below this are ignored.
    #[serde(default = "default_min_route_confidence")]
    pub min_route_confidence: f64,

    /// Where backups and reports land. Defaults to `<root>/.webmend`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Detect and diagnose only; plan no fixes.
    #[serde(default)]
    pub check_only: bool,
}

impl HealConfig {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            preset: None,
            max_iterations: default_max_iterations(),
            simulate_auth: false,
            sandbox_timeout_secs: default_sandbox_timeout_secs(),
            rule_overrides: BTreeMap::new(),
            min_route_confidence: default_min_route_confidence(),
            state_dir: None,
            check_only: false,
        }
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.root_path.join(".webmend"))
    }
}
