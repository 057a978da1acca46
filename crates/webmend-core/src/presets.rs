//! Presets: project-archetype expectation bundles.
//!
//! A preset layers rule overrides and structural expectations on top of the
//! base rule table. Three archetypes are built in (`blog`, `ecommerce`,
//! `admin-panel`); anything else is resolved as a path to a JSON preset file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rules::{Expectations, RuleOverride, RuleSet};

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("unknown preset: {0} (not a built-in and no such file)")]
    UnknownPreset(String),

    #[error("failed to parse preset file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An expectation bundle for one project archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rule_overrides: BTreeMap<String, RuleOverride>,
    #[serde(default)]
    pub expectations: Expectations,
}

/// Resolves preset names to bundles and folds them into rule sets.
pub struct PresetManager;

impl PresetManager {
    pub const BUILTIN: [&'static str; 3] = ["blog", "ecommerce", "admin-panel"];

    /// Resolve a name: built-in first, then a JSON file path.
    pub fn resolve(name: &str) -> Result<Preset, PresetError> {
        match name {
            "blog" => Ok(blog()),
            "ecommerce" => Ok(ecommerce()),
            "admin-panel" => Ok(admin_panel()),
            other => {
                let path = Path::new(other);
                if path.is_file() {
                    Self::load_file(path)
                } else {
                    Err(PresetError::UnknownPreset(other.to_string()))
                }
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<Preset, PresetError> {
        let content = fs::read_to_string(path)?;
        let preset: Preset = serde_json::from_str(&content).map_err(|source| PresetError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!(preset = %preset.name, path = %path.display(), "loaded preset from file");
        Ok(preset)
    }

    /// Build the effective rule set: base <- preset <- user overrides.
    pub fn effective_ruleset(
        preset: Option<&Preset>,
        user_overrides: &BTreeMap<String, RuleOverride>,
    ) -> RuleSet {
        let mut rules = RuleSet::base();
        if let Some(preset) = preset {
            rules.apply_overrides(&preset.rule_overrides);
            rules.expectations.merge(&preset.expectations);
        }
        rules.apply_overrides(user_overrides);
        rules
    }
}

fn routes(items: &[&str]) -> std::collections::BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn fields(items: &[(&str, &[&str])]) -> BTreeMap<String, std::collections::BTreeSet<String>> {
    items
        .iter()
        .map(|(model, fs)| (model.to_string(), fs.iter().map(|s| s.to_string()).collect()))
        .collect()
}

fn blog() -> Preset {
    Preset {
        name: "blog".to_string(),
        description: "Content site with posts, categories, and authors".to_string(),
        rule_overrides: BTreeMap::new(),
        expectations: Expectations {
            required_routes: routes(&["index", "post", "category", "author"]),
            recommended_routes: routes(&["tag", "search", "archive"]),
            required_templates: routes(&["index.html", "post.html", "category.html"]),
            recommended_templates: routes(&["tag.html", "author.html", "search.html"]),
            required_model_fields: fields(&[
                ("Post", &["title", "content", "author", "date", "slug"]),
                ("User", &["username", "email", "password", "name"]),
                ("Comment", &["content", "author", "post", "date"]),
            ]),
        },
    }
}

fn ecommerce() -> Preset {
    Preset {
        name: "ecommerce".to_string(),
        description: "Storefront with catalog, cart, and checkout".to_string(),
        rule_overrides: BTreeMap::new(),
        expectations: Expectations {
            required_routes: routes(&[
                "index", "product", "category", "cart", "checkout", "order", "account",
            ]),
            recommended_routes: routes(&["search", "wishlist", "payment"]),
            required_templates: routes(&[
                "index.html",
                "product.html",
                "category.html",
                "cart.html",
                "checkout.html",
                "order.html",
                "account.html",
            ]),
            recommended_templates: routes(&["search.html", "wishlist.html", "payment.html"]),
            required_model_fields: fields(&[
                (
                    "Product",
                    &["name", "description", "price", "stock", "category", "image", "slug"],
                ),
                ("User", &["username", "email", "password", "name", "addresses"]),
                (
                    "Order",
                    &["user", "items", "total", "status", "date", "address", "payment"],
                ),
                ("Cart", &["user", "items", "total"]),
            ]),
        },
    }
}

fn admin_panel() -> Preset {
    Preset {
        name: "admin-panel".to_string(),
        description: "Back-office panel with users, roles, and audit logs".to_string(),
        rule_overrides: BTreeMap::new(),
        expectations: Expectations {
            required_routes: routes(&["index", "login", "logout", "dashboard", "users"]),
            recommended_routes: routes(&["roles", "permissions", "logs", "settings"]),
            required_templates: routes(&["index.html", "login.html", "dashboard.html", "users.html"]),
            recommended_templates: routes(&[
                "roles.html",
                "permissions.html",
                "logs.html",
                "settings.html",
            ]),
            required_model_fields: fields(&[
                ("User", &["username", "email", "password", "name", "role", "active"]),
                ("Role", &["name", "permissions"]),
                ("Permission", &["name", "description"]),
            ]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::issue::Severity;
    use crate::rules::keys;
    use std::io::Write;

    #[test]
    fn builtins_resolve() {
        for name in PresetManager::BUILTIN {
            let preset = PresetManager::resolve(name).unwrap();
            assert_eq!(preset.name, name);
            assert!(!preset.expectations.required_routes.is_empty());
        }
    }

    #[test]
    fn unknown_preset_errors() {
        let err = PresetManager::resolve("does-not-exist").unwrap_err();
        assert!(matches!(err, PresetError::UnknownPreset(_)));
    }

    #[test]
    fn file_preset_round_trips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::json!({
            "name": "custom",
            "description": "house rules",
            "rule_overrides": {
                "code.unused_import": { "enabled": false }
            },
            "expectations": {
                "required_routes": ["health"]
            }
        });
        file.write_all(json.to_string().as_bytes()).unwrap();

        let preset = PresetManager::resolve(&file.path().display().to_string()).unwrap();
        assert_eq!(preset.name, "custom");
        assert!(preset.expectations.required_routes.contains("health"));
    }

    #[test]
    fn user_overrides_beat_preset_overrides() {
        let mut preset = blog();
        preset.rule_overrides.insert(
            keys::CODE_UNUSED_IMPORT.to_string(),
            RuleOverride::severity(Severity::Error),
        );

        let mut user = BTreeMap::new();
        user.insert(
            keys::CODE_UNUSED_IMPORT.to_string(),
            RuleOverride::severity(Severity::Info),
        );

        let rules = PresetManager::effective_ruleset(Some(&preset), &user);
        assert_eq!(rules.severity(keys::CODE_UNUSED_IMPORT), Some(Severity::Info));
        assert!(rules.expectations.required_routes.contains("index"));
    }
}
