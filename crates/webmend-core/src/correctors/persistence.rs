//! Fixes for persistence findings: migration stubs, missing columns,
//! relationship pairing.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;

use crate::analyzers::scan::{self, ModelDecl};
use crate::correctors::Corrector;
use crate::domain::fix::PlannedFix;
use crate::domain::issue::{Category, Issue};
use crate::domain::model::ProjectModel;
use crate::patch::{FilePatch, Hunk};
use crate::rules::keys;

pub struct PersistenceCorrector;

impl Corrector for PersistenceCorrector {
    fn category(&self) -> Category {
        Category::Persistence
    }

    fn plan(&self, issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
        match issue.signature.as_str() {
            keys::PERSISTENCE_MISSING_MIGRATION => plan_migration_stub(issue, model),
            keys::PERSISTENCE_USER_WITHOUT_PASSWORD => plan_add_column(
                issue,
                model,
                &issue.subject,
                "password_hash",
                "db.Column(db.String(128))",
            ),
            keys::PERSISTENCE_EMPTY_MODEL => plan_add_column(
                issue,
                model,
                &issue.subject,
                "id",
                "db.Column(db.Integer, primary_key=True)",
            ),
            keys::PERSISTENCE_REQUIRED_FIELD => {
                let (model_name, field) = issue.subject.split_once('.')?;
                plan_add_column(issue, model, model_name, field, "db.Column(db.String(255))")
            }
            keys::PERSISTENCE_UNPAIRED_RELATIONSHIP => plan_pair_relationship(issue, model),
            // A whole missing model is designed by a person, not a template.
            _ => None,
        }
    }
}

fn find_model(project: &ProjectModel, name: &str) -> Option<(PathBuf, String, ModelDecl)> {
    for rel in &project.model_modules {
        let Ok(content) = fs::read_to_string(project.resolve(rel)) else {
            continue;
        };
        if let Some(decl) = scan::parse_models(rel, &content).into_iter().find(|m| m.name == name) {
            return Some((rel.clone(), content, decl));
        }
    }
    None
}

/// Indent of the first statement in a class body, default four spaces.
fn body_indent(content: &str, decl: &ModelDecl) -> String {
    content[decl.body_start..decl.body_end]
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l[..l.len() - l.trim_start().len()].to_string())
        .unwrap_or_else(|| "    ".to_string())
}

/// Insertion offset just after the class header line.
fn insertion_at(content: &str, decl: &ModelDecl) -> usize {
    content[decl.body_start..]
        .find('\n')
        .map(|i| decl.body_start + i + 1)
        .unwrap_or(content.len())
        .min(decl.body_end)
}

fn plan_add_column(
    issue: &Issue,
    project: &ProjectModel,
    model_name: &str,
    field: &str,
    column: &str,
) -> Option<PlannedFix> {
    let (file, content, decl) = find_model(project, model_name)?;
    if decl.fields.contains(field) {
        return None;
    }
    let indent = body_indent(&content, &decl);
    // The class header line ends at body_start; insert directly after it so
    // the new column leads the body.
    let at = if content[decl.body_start..].starts_with('\n') {
        decl.body_start + 1
    } else {
        insertion_at(&content, &decl)
    };
    let line = format!("{indent}{field} = {column}\n");

    debug!(model = model_name, field, "planned column insertion");
    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(file, vec![Hunk::insert(at, line)]),
        description: format!("add column '{field}' to model '{model_name}'"),
    })
}

fn plan_pair_relationship(issue: &Issue, project: &ProjectModel) -> Option<PlannedFix> {
    let (model_name, field) = issue.subject.split_once('.')?;
    let (_, _, decl) = find_model(project, model_name)?;
    let rel = decl.relationships.iter().find(|r| r.field == field)?;
    let back = rel.back_populates.as_deref()?;

    let (target_file, target_content, target_decl) = find_model(project, &rel.target)?;
    if target_decl.relationships.iter().any(|r| r.field == back) {
        return None;
    }
    let indent = body_indent(&target_content, &target_decl);
    let at = if target_content[target_decl.body_start..].starts_with('\n') {
        target_decl.body_start + 1
    } else {
        insertion_at(&target_content, &target_decl)
    };
    let line = format!(
        "{indent}{back} = db.relationship('{model_name}', back_populates='{field}')\n"
    );

    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(target_file, vec![Hunk::insert(at, line)]),
        description: format!(
            "add relationship '{}.{back}' mirroring '{model_name}.{field}'",
            rel.target
        ),
    })
}

fn plan_migration_stub(issue: &Issue, project: &ProjectModel) -> Option<PlannedFix> {
    let (model_name, field) = issue.subject.split_once('.')?;
    let dir = project.migration_dir.as_ref()?;
    let versions = if project.resolve(&dir.join("versions")).is_dir() {
        dir.join("versions")
    } else {
        dir.clone()
    };

    let id8 = &issue.id.as_str()[..8.min(issue.id.as_str().len())];
    let table = model_name.to_lowercase();
    let file = versions.join(format!(
        "webmend_{id8}_add_{table}_{field}.py"
    ));
    if project.resolve(&file).exists() {
        return None;
    }

    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let content = format!(
        "\"\"\"add {table}.{field}\n\nRevision ID: webmend_{id8}\nCreate Date: {stamp}\n\"\"\"\n\
         import sqlalchemy as sa\nfrom alembic import op\n\n\
         revision = 'webmend_{id8}'\ndown_revision = None\n\n\n\
         def upgrade():\n    op.add_column('{table}', sa.Column('{field}', sa.String(length=255), nullable=True))\n\n\n\
         def downgrade():\n    op.drop_column('{table}', '{field}')\n"
    );

    debug!(model = model_name, field, file = %file.display(), "planned migration stub");
    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::create(file, content),
        description: format!("write migration stub for '{model_name}.{field}'"),
    })
}
