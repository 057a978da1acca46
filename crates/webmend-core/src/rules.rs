//! Rule configuration: which checks run and at what severity.
//!
//! Precedence is override-wins: the base table is adjusted by a preset's
//! overrides, then by user overrides from the config file. Later layers only
//! touch the fields they set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::issue::Severity;

/// Rule keys, one per check. Analyzers look these up by string key so the
/// config file can address them directly.
pub mod keys {
    pub const ROUTING_MISSING_RETURN: &str = "routing.missing_return";
    pub const ROUTING_DUPLICATE_ENDPOINT: &str = "routing.duplicate_endpoint";
    pub const ROUTING_ORPHANED_BLUEPRINT: &str = "routing.orphaned_blueprint";
    pub const ROUTING_UNSPECIFIED_METHODS: &str = "routing.unspecified_methods";
    pub const ROUTING_REQUIRED_ROUTE: &str = "routing.required_route";
    pub const ROUTING_RECOMMENDED_ROUTE: &str = "routing.recommended_route";
    pub const ROUTING_LOW_CONFIDENCE: &str = "routing.low_confidence";

    pub const TEMPLATING_MISSING_TEMPLATE: &str = "templating.missing_template";
    pub const TEMPLATING_UNRESOLVED_VARIABLE: &str = "templating.unresolved_variable";
    pub const TEMPLATING_UNCLOSED_BLOCK: &str = "templating.unclosed_block";
    pub const TEMPLATING_INVALID_URL_FOR: &str = "templating.invalid_url_for";
    pub const TEMPLATING_UNUSED_TEMPLATE: &str = "templating.unused_template";
    pub const TEMPLATING_REQUIRED_TEMPLATE: &str = "templating.required_template";
    pub const TEMPLATING_RECOMMENDED_TEMPLATE: &str = "templating.recommended_template";

    pub const PERSISTENCE_MISSING_MIGRATION: &str = "persistence.missing_migration";
    pub const PERSISTENCE_UNPAIRED_RELATIONSHIP: &str = "persistence.unpaired_relationship";
    pub const PERSISTENCE_EMPTY_MODEL: &str = "persistence.empty_model";
    pub const PERSISTENCE_USER_WITHOUT_PASSWORD: &str = "persistence.user_model_without_password";
    pub const PERSISTENCE_REQUIRED_FIELD: &str = "persistence.required_field";
    pub const PERSISTENCE_REQUIRED_MODEL: &str = "persistence.required_model";
    pub const PERSISTENCE_NO_DATABASE: &str = "persistence.no_database";

    pub const PERF_N_PLUS_ONE_QUERY: &str = "performance.n_plus_1_query";
    pub const PERF_MISSING_EAGER_LOADING: &str = "performance.missing_eager_loading";

    pub const CODE_UNUSED_IMPORT: &str = "code.unused_import";
    pub const CODE_UNUSED_VARIABLE: &str = "code.unused_variable";
    pub const CODE_HARDCODED_SECRET: &str = "code.hardcoded_secret";
    pub const CODE_INSECURE_CONFIG: &str = "code.insecure_config";
    pub const CODE_ANALYSIS_ERROR: &str = "code.analysis_error";
}

/// Resolved configuration for one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub enabled: bool,
    pub severity: Severity,
}

impl RuleConfig {
    fn on(severity: Severity) -> Self {
        Self {
            enabled: true,
            severity,
        }
    }
}

/// A partial adjustment to one rule. Unset fields keep the lower layer's value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl RuleOverride {
    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            severity: None,
        }
    }

    pub fn severity(severity: Severity) -> Self {
        Self {
            enabled: None,
            severity: Some(severity),
        }
    }
}

/// Structural expectations contributed by a preset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectations {
    #[serde(default)]
    pub required_routes: BTreeSet<String>,
    #[serde(default)]
    pub recommended_routes: BTreeSet<String>,
    #[serde(default)]
    pub required_templates: BTreeSet<String>,
    #[serde(default)]
    pub recommended_templates: BTreeSet<String>,
    /// Model name -> field names that must be present.
    #[serde(default)]
    pub required_model_fields: BTreeMap<String, BTreeSet<String>>,
}

impl Expectations {
    /// Layer `other` on top of self; sets union, field maps merge per model.
    pub fn merge(&mut self, other: &Expectations) {
        self.required_routes.extend(other.required_routes.iter().cloned());
        self.recommended_routes
            .extend(other.recommended_routes.iter().cloned());
        self.required_templates
            .extend(other.required_templates.iter().cloned());
        self.recommended_templates
            .extend(other.recommended_templates.iter().cloned());
        for (model, fields) in &other.required_model_fields {
            self.required_model_fields
                .entry(model.clone())
                .or_default()
                .extend(fields.iter().cloned());
        }
    }
}

/// The effective rule table an analysis run operates under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: BTreeMap<String, RuleConfig>,
    pub expectations: Expectations,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::base()
    }
}

impl RuleSet {
    /// The built-in table: every rule enabled at its default severity.
    pub fn base() -> Self {
        use keys::*;
        let mut rules = BTreeMap::new();
        let mut set = |key: &str, sev: Severity| {
            rules.insert(key.to_string(), RuleConfig::on(sev));
        };

        set(ROUTING_MISSING_RETURN, Severity::Error);
        set(ROUTING_DUPLICATE_ENDPOINT, Severity::Error);
        set(ROUTING_ORPHANED_BLUEPRINT, Severity::Error);
        set(ROUTING_UNSPECIFIED_METHODS, Severity::Warning);
        set(ROUTING_REQUIRED_ROUTE, Severity::Error);
        set(ROUTING_RECOMMENDED_ROUTE, Severity::Warning);
        set(ROUTING_LOW_CONFIDENCE, Severity::Warning);

        set(TEMPLATING_MISSING_TEMPLATE, Severity::Error);
        set(TEMPLATING_UNRESOLVED_VARIABLE, Severity::Warning);
        set(TEMPLATING_UNCLOSED_BLOCK, Severity::Error);
        set(TEMPLATING_INVALID_URL_FOR, Severity::Error);
        set(TEMPLATING_UNUSED_TEMPLATE, Severity::Info);
        set(TEMPLATING_REQUIRED_TEMPLATE, Severity::Error);
        set(TEMPLATING_RECOMMENDED_TEMPLATE, Severity::Warning);

        set(PERSISTENCE_MISSING_MIGRATION, Severity::Critical);
        set(PERSISTENCE_UNPAIRED_RELATIONSHIP, Severity::Error);
        set(PERSISTENCE_EMPTY_MODEL, Severity::Warning);
        set(PERSISTENCE_USER_WITHOUT_PASSWORD, Severity::Warning);
        set(PERSISTENCE_REQUIRED_FIELD, Severity::Error);
        set(PERSISTENCE_REQUIRED_MODEL, Severity::Error);
        set(PERSISTENCE_NO_DATABASE, Severity::Warning);

        set(PERF_N_PLUS_ONE_QUERY, Severity::Warning);
        set(PERF_MISSING_EAGER_LOADING, Severity::Info);

        set(CODE_UNUSED_IMPORT, Severity::Warning);
        set(CODE_UNUSED_VARIABLE, Severity::Warning);
        set(CODE_HARDCODED_SECRET, Severity::Warning);
        set(CODE_INSECURE_CONFIG, Severity::Warning);
        set(CODE_ANALYSIS_ERROR, Severity::Warning);

        Self {
            rules,
            expectations: Expectations::default(),
        }
    }

    /// Apply one layer of overrides. Unknown keys create a rule entry so user
    /// config can pre-seed severities for rules added later.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, RuleOverride>) {
        for (key, ov) in overrides {
            let entry = self
                .rules
                .entry(key.clone())
                .or_insert_with(|| RuleConfig::on(Severity::Warning));
            if let Some(enabled) = ov.enabled {
                entry.enabled = enabled;
            }
            if let Some(severity) = ov.severity {
                entry.severity = severity;
            }
        }
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.rules.get(key).map(|r| r.enabled).unwrap_or(false)
    }

    /// Effective severity for an enabled rule, `None` when disabled/unknown.
    /// Analyzers call this once per finding; a `None` suppresses the issue.
    pub fn severity(&self, key: &str) -> Option<Severity> {
        self.rules
            .get(key)
            .filter(|r| r.enabled)
            .map(|r| r.severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_severities() {
        let rules = RuleSet::base();
        assert_eq!(
            rules.severity(keys::PERSISTENCE_MISSING_MIGRATION),
            Some(Severity::Critical)
        );
        assert_eq!(
            rules.severity(keys::TEMPLATING_UNUSED_TEMPLATE),
            Some(Severity::Info)
        );
        assert_eq!(rules.severity("nope.unknown"), None);
    }

    #[test]
    fn override_wins_per_field() {
        let mut rules = RuleSet::base();
        let mut layer = BTreeMap::new();
        layer.insert(
            keys::CODE_UNUSED_IMPORT.to_string(),
            RuleOverride::severity(Severity::Error),
        );
        layer.insert(
            keys::TEMPLATING_UNUSED_TEMPLATE.to_string(),
            RuleOverride::disabled(),
        );
        rules.apply_overrides(&layer);

        assert_eq!(rules.severity(keys::CODE_UNUSED_IMPORT), Some(Severity::Error));
        assert!(!rules.is_enabled(keys::TEMPLATING_UNUSED_TEMPLATE));
        assert_eq!(rules.severity(keys::TEMPLATING_UNUSED_TEMPLATE), None);
    }

    #[test]
    fn later_layer_beats_earlier() {
        let mut rules = RuleSet::base();
        let mut preset = BTreeMap::new();
        preset.insert(
            keys::ROUTING_MISSING_RETURN.to_string(),
            RuleOverride::severity(Severity::Critical),
        );
        rules.apply_overrides(&preset);

        let mut user = BTreeMap::new();
        user.insert(
            keys::ROUTING_MISSING_RETURN.to_string(),
            RuleOverride::severity(Severity::Warning),
        );
        rules.apply_overrides(&user);

        assert_eq!(
            rules.severity(keys::ROUTING_MISSING_RETURN),
            Some(Severity::Warning)
        );
    }

    #[test]
    fn expectations_merge_unions() {
        let mut base = Expectations::default();
        base.required_routes.insert("/".to_string());
        base.required_model_fields
            .entry("Post".to_string())
            .or_default()
            .insert("title".to_string());

        let mut layer = Expectations::default();
        layer.required_routes.insert("/login".to_string());
        layer
            .required_model_fields
            .entry("Post".to_string())
            .or_default()
            .insert("content".to_string());

        base.merge(&layer);
        assert_eq!(base.required_routes.len(), 2);
        assert_eq!(base.required_model_fields["Post"].len(), 2);
    }
}
