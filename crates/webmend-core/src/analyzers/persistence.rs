//! Persistence checks: models, relationships, migration coverage.

use std::fs;

use tracing::debug;

use crate::analyzers::{read_source, scan, Analyzer};
use crate::domain::issue::{Category, Issue, Location};
use crate::domain::model::ProjectModel;
use crate::rules::{keys, RuleSet};

pub struct PersistenceAnalyzer;

impl Analyzer for PersistenceAnalyzer {
    fn category(&self) -> Category {
        Category::Persistence
    }

    fn analyze(&self, model: &ProjectModel, rules: &RuleSet) -> Vec<Issue> {
        let mut issues = Vec::new();

        let mut models = Vec::new();
        for rel in &model.model_modules {
            let Some(content) = read_source(model, rel, rules, &mut issues) else {
                continue;
            };
            models.extend(scan::parse_models(rel, &content));
        }
        debug!(models = models.len(), "persistence scan");

        if let Some(severity) = rules.severity(keys::PERSISTENCE_NO_DATABASE) {
            if model.model_modules.is_empty() && !entry_mentions_database(model) {
                issues.push(Issue::new(
                    Category::Persistence,
                    severity,
                    Location::file(&model.entry_point.file),
                    keys::PERSISTENCE_NO_DATABASE,
                    "database",
                    "no database layer detected; schema checks cannot run",
                ));
            }
        }

        // Projects without a migrations directory manage their schema some
        // other way (db.create_all, external tooling); coverage is only
        // checked against an actual migration history.
        if let (Some(severity), Some(dir)) = (
            rules.severity(keys::PERSISTENCE_MISSING_MIGRATION),
            model.migration_dir.as_ref(),
        ) {
            let history = migration_text(model, dir);
            for decl in &models {
                for field in &decl.fields {
                    if !history.contains(field.as_str()) {
                        issues.push(Issue::new(
                            Category::Persistence,
                            severity,
                            Location::line(&decl.file, decl.line),
                            keys::PERSISTENCE_MISSING_MIGRATION,
                            &format!("{}.{field}", decl.name),
                            &format!(
                                "column '{}.{field}' appears in no migration; the schema \
                                 and the models have diverged",
                                decl.name
                            ),
                        ));
                    }
                }
            }
        }

        if let Some(severity) = rules.severity(keys::PERSISTENCE_UNPAIRED_RELATIONSHIP) {
            for decl in &models {
                for rel in &decl.relationships {
                    let Some(back) = &rel.back_populates else {
                        continue;
                    };
                    let paired = models.iter().any(|m| {
                        m.name == rel.target
                            && m.relationships.iter().any(|r| {
                                r.field == *back
                                    && r.back_populates.as_deref() == Some(rel.field.as_str())
                            })
                    });
                    if !paired {
                        issues.push(Issue::new(
                            Category::Persistence,
                            severity,
                            Location::line(&decl.file, rel.line),
                            keys::PERSISTENCE_UNPAIRED_RELATIONSHIP,
                            &format!("{}.{}", decl.name, rel.field),
                            &format!(
                                "relationship '{}.{}' sets back_populates='{back}' but \
                                 '{}' has no mirroring relationship",
                                decl.name, rel.field, rel.target
                            ),
                        ));
                    }
                }
            }
        }

        if let Some(severity) = rules.severity(keys::PERSISTENCE_EMPTY_MODEL) {
            for decl in &models {
                if decl.fields.is_empty() && decl.relationships.is_empty() {
                    issues.push(Issue::new(
                        Category::Persistence,
                        severity,
                        Location::line(&decl.file, decl.line),
                        keys::PERSISTENCE_EMPTY_MODEL,
                        &decl.name,
                        &format!("model '{}' declares no columns", decl.name),
                    ));
                }
            }
        }

        if let Some(severity) = rules.severity(keys::PERSISTENCE_USER_WITHOUT_PASSWORD) {
            for decl in &models {
                if decl.name == "User"
                    && !decl.fields.is_empty()
                    && !decl.fields.iter().any(|f| f.contains("password"))
                {
                    issues.push(Issue::new(
                        Category::Persistence,
                        severity,
                        Location::line(&decl.file, decl.line),
                        keys::PERSISTENCE_USER_WITHOUT_PASSWORD,
                        &decl.name,
                        "User model has no password field; authentication cannot work",
                    ));
                }
            }
        }

        let anchor = model
            .model_modules
            .iter()
            .next()
            .map(|p| Location::file(p))
            .unwrap_or_else(|| Location::file(&model.entry_point.file));
        if let Some(severity) = rules.severity(keys::PERSISTENCE_REQUIRED_MODEL) {
            for (expected, _) in &rules.expectations.required_model_fields {
                if !models.iter().any(|m| &m.name == expected) {
                    issues.push(Issue::new(
                        Category::Persistence,
                        severity,
                        anchor.clone(),
                        keys::PERSISTENCE_REQUIRED_MODEL,
                        expected,
                        &format!("required model '{expected}' not found"),
                    ));
                }
            }
        }
        if let Some(severity) = rules.severity(keys::PERSISTENCE_REQUIRED_FIELD) {
            for (expected, fields) in &rules.expectations.required_model_fields {
                let Some(decl) = models.iter().find(|m| &m.name == expected) else {
                    continue;
                };
                for field in fields {
                    let present = decl.fields.contains(field)
                        || decl.relationships.iter().any(|r| &r.field == field);
                    if !present {
                        issues.push(Issue::new(
                            Category::Persistence,
                            severity,
                            Location::line(&decl.file, decl.line),
                            keys::PERSISTENCE_REQUIRED_FIELD,
                            &format!("{expected}.{field}"),
                            &format!("model '{expected}' is missing required field '{field}'"),
                        ));
                    }
                }
            }
        }

        issues
    }
}

fn entry_mentions_database(model: &ProjectModel) -> bool {
    let content = fs::read_to_string(model.resolve(&model.entry_point.file)).unwrap_or_default();
    content.contains("SQLAlchemy") || content.contains("SQLALCHEMY_DATABASE_URI")
}

/// Concatenated text of every migration script under the migrations dir.
fn migration_text(model: &ProjectModel, dir: &std::path::Path) -> String {
    let mut text = String::new();
    let abs = model.resolve(dir);
    for candidate in [abs.join("versions"), abs] {
        let Ok(entries) = fs::read_dir(&candidate) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "py") {
                if let Ok(content) = fs::read_to_string(&path) {
                    text.push_str(&content);
                    text.push('\n');
                }
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        ArchitecturePattern, ConfidenceMap, EntryPoint, EntryPointKind,
    };
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn model_for(root: &TempDir, migration_dir: Option<&str>) -> ProjectModel {
        ProjectModel {
            root: root.path().to_path_buf(),
            entry_point: EntryPoint {
                file: "app.py".into(),
                kind: EntryPointKind::AppInstance,
                symbol: "app".to_string(),
                line: 2,
            },
            architecture_pattern: ArchitecturePattern::Monolithic,
            route_modules: BTreeSet::new(),
            template_dirs: BTreeSet::new(),
            static_dirs: BTreeSet::new(),
            model_modules: ["models.py".into()].into_iter().collect(),
            migration_dir: migration_dir.map(PathBuf::from),
            auth_mechanism: None,
            confidence: ConfidenceMap::new(),
        }
    }

    fn write(root: &TempDir, rel: &str, content: &str) {
        let path = root.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn unmigrated_column_is_critical() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "models.py",
            "class User(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n    age = db.Column(db.Integer)\n",
        );
        write(
            &root,
            "migrations/versions/0001_init.py",
            "def upgrade():\n    op.add_column('user', sa.Column('id', sa.Integer))\n",
        );
        let issues = PersistenceAnalyzer.analyze(&model_for(&root, Some("migrations")), &RuleSet::base());
        let missing: Vec<_> = issues
            .iter()
            .filter(|i| i.signature == keys::PERSISTENCE_MISSING_MIGRATION)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].subject, "User.age");
        assert_eq!(missing[0].severity, crate::domain::issue::Severity::Critical);
    }

    #[test]
    fn no_migration_dir_means_no_migration_findings() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "models.py",
            "class User(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n",
        );
        let issues = PersistenceAnalyzer.analyze(&model_for(&root, None), &RuleSet::base());
        assert!(!issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_MISSING_MIGRATION));
    }

    #[test]
    fn model_free_project_reports_no_database() {
        let root = TempDir::new().unwrap();
        write(&root, "app.py", "from flask import Flask\n\napp = Flask(__name__)\n");
        let mut model = model_for(&root, None);
        model.model_modules.clear();
        let issues = PersistenceAnalyzer.analyze(&model, &RuleSet::base());
        assert!(issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_NO_DATABASE));
    }

    #[test]
    fn sqlalchemy_in_the_entry_point_counts_as_a_database() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask_sqlalchemy import SQLAlchemy\n\ndb = SQLAlchemy()\n",
        );
        let mut model = model_for(&root, None);
        model.model_modules.clear();
        let issues = PersistenceAnalyzer.analyze(&model, &RuleSet::base());
        assert!(!issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_NO_DATABASE));
    }

    #[test]
    fn unpaired_relationship_flagged() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "models.py",
            "class Post(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n    author = db.relationship('User', back_populates='posts')\n\nclass User(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n    password_hash = db.Column(db.String(128))\n",
        );
        let issues = PersistenceAnalyzer.analyze(&model_for(&root, None), &RuleSet::base());
        assert!(issues.iter().any(|i| {
            i.signature == keys::PERSISTENCE_UNPAIRED_RELATIONSHIP && i.subject == "Post.author"
        }));
    }

    #[test]
    fn paired_relationship_clean() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "models.py",
            "class Post(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n    author = db.relationship('User', back_populates='posts')\n\nclass User(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n    password_hash = db.Column(db.String(128))\n    posts = db.relationship('Post', back_populates='author')\n",
        );
        let issues = PersistenceAnalyzer.analyze(&model_for(&root, None), &RuleSet::base());
        assert!(!issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_UNPAIRED_RELATIONSHIP));
    }

    #[test]
    fn empty_model_and_passwordless_user() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "models.py",
            "class Ghost(db.Model):\n    pass\n\nclass User(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n    username = db.Column(db.String(80))\n",
        );
        let issues = PersistenceAnalyzer.analyze(&model_for(&root, None), &RuleSet::base());
        assert!(issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_EMPTY_MODEL && i.subject == "Ghost"));
        assert!(issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_USER_WITHOUT_PASSWORD));
    }

    #[test]
    fn preset_required_models_and_fields() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "models.py",
            "class Post(db.Model):\n    id = db.Column(db.Integer, primary_key=True)\n    title = db.Column(db.String(200))\n",
        );
        let mut rules = RuleSet::base();
        rules
            .expectations
            .required_model_fields
            .insert("Post".to_string(), ["title".to_string(), "slug".to_string()].into());
        rules
            .expectations
            .required_model_fields
            .insert("Comment".to_string(), ["content".to_string()].into());

        let issues = PersistenceAnalyzer.analyze(&model_for(&root, None), &rules);
        assert!(issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_REQUIRED_MODEL && i.subject == "Comment"));
        assert!(issues
            .iter()
            .any(|i| i.signature == keys::PERSISTENCE_REQUIRED_FIELD && i.subject == "Post.slug"));
    }
}
