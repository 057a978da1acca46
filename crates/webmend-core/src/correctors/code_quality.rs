//! Fixes for code hygiene findings: dead imports and variables, secrets,
//! unsafe flags.

use std::fs;

use crate::correctors::{routing::line_span, Corrector};
use crate::domain::fix::PlannedFix;
use crate::domain::issue::{Category, Issue};
use crate::domain::model::ProjectModel;
use crate::patch::{FilePatch, Hunk};
use crate::rules::keys;

pub struct CodeQualityCorrector;

impl Corrector for CodeQualityCorrector {
    fn category(&self) -> Category {
        Category::Code
    }

    fn plan(&self, issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
        match issue.signature.as_str() {
            keys::CODE_UNUSED_IMPORT => plan_remove_import(issue, model),
            keys::CODE_UNUSED_VARIABLE => plan_remove_line(issue, model),
            keys::CODE_HARDCODED_SECRET => plan_env_secret(issue, model),
            keys::CODE_INSECURE_CONFIG => plan_flip_flag(issue, model),
            _ => None,
        }
    }
}

fn read_at(issue: &Issue, model: &ProjectModel) -> Option<(String, usize, usize, String)> {
    let content = fs::read_to_string(model.resolve(&issue.location.file)).ok()?;
    let (line, _) = issue.location.lines?;
    let (start, end, text) = line_span(&content, line)?;
    Some((content, start, end, text))
}

fn single_hunk(issue: &Issue, hunk: Hunk, description: String) -> PlannedFix {
    PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(issue.location.file.clone(), vec![hunk]),
        description,
    }
}

/// Span of the line including its trailing newline, so deleting it leaves
/// no blank residue.
fn line_with_newline(content: &str, start: usize, end: usize) -> (usize, usize, String) {
    let end = if content[end..].starts_with('\n') { end + 1 } else { end };
    (start, end, content[start..end].to_string())
}

fn plan_remove_import(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let name = issue.subject.as_str();
    let (content, start, end, text) = read_at(issue, model)?;

    // Multi-name from-import: strip only the unused binding.
    if text.trim_start().starts_with("from ") && text.contains(',') {
        let (head, names) = text.split_once(" import ")?;
        let kept: Vec<&str> = names
            .split(',')
            .map(str::trim)
            .filter(|n| *n != name && !n.ends_with(&format!(" as {name}")))
            .collect();
        if kept.is_empty() {
            let (start, end, before) = line_with_newline(&content, start, end);
            return Some(single_hunk(
                issue,
                Hunk::replace(start, end, before, ""),
                format!("remove unused import '{name}'"),
            ));
        }
        let amended = format!("{head} import {}", kept.join(", "));
        return Some(single_hunk(
            issue,
            Hunk::replace(start, end, text, amended),
            format!("drop unused '{name}' from import"),
        ));
    }

    let (start, end, before) = line_with_newline(&content, start, end);
    Some(single_hunk(
        issue,
        Hunk::replace(start, end, before, ""),
        format!("remove unused import '{name}'"),
    ))
}

fn plan_remove_line(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let (content, start, end, text) = read_at(issue, model)?;
    if !text.contains('=') {
        return None;
    }
    let (start, end, before) = line_with_newline(&content, start, end);
    Some(single_hunk(
        issue,
        Hunk::replace(start, end, before, ""),
        format!("remove unused variable '{}'", issue.subject),
    ))
}

fn plan_env_secret(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let name = issue.subject.as_str();
    let (content, start, _, text) = read_at(issue, model)?;

    let eq = text.find('=')?;
    let value = text[eq + 1..].trim();
    if !(value.starts_with('\'') || value.starts_with('"')) {
        return None;
    }
    let value_start = start + eq + 1 + (text[eq + 1..].len() - text[eq + 1..].trim_start().len());
    let value_end = value_start + value.len();
    let replacement = format!("os.environ.get('{name}', 'change-me')");
    let mut hunks = vec![Hunk::replace(value_start, value_end, value, replacement)];

    if !content.lines().any(|l| l.trim() == "import os" || l.starts_with("import os,")) {
        hunks.push(Hunk::insert(0, "import os\n"));
    }

    Some(single_hunk_multi(
        issue,
        hunks,
        format!("read '{name}' from the environment instead of a literal"),
    ))
}

fn single_hunk_multi(issue: &Issue, hunks: Vec<Hunk>, description: String) -> PlannedFix {
    PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(issue.location.file.clone(), hunks),
        description,
    }
}

fn plan_flip_flag(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let (_, start, _, text) = read_at(issue, model)?;
    let (needle, replacement) = if text.contains("True") {
        ("True", "False")
    } else if text.contains("False") {
        ("False", "True")
    } else {
        return None;
    };
    let offset = text.find(needle)?;
    Some(single_hunk(
        issue,
        Hunk::replace(
            start + offset,
            start + offset + needle.len(),
            needle,
            replacement,
        ),
        format!("harden insecure configuration: {}", issue.subject),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::issue::{Location, Severity};
    use crate::domain::model::{
        ArchitecturePattern, ConfidenceMap, EntryPoint, EntryPointKind,
    };
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn model_for(root: &TempDir) -> ProjectModel {
        ProjectModel {
            root: root.path().to_path_buf(),
            entry_point: EntryPoint {
                file: "app.py".into(),
                kind: EntryPointKind::AppInstance,
                symbol: "app".to_string(),
                line: 2,
            },
            architecture_pattern: ArchitecturePattern::Monolithic,
            route_modules: ["app.py".into()].into_iter().collect(),
            template_dirs: BTreeSet::new(),
            static_dirs: BTreeSet::new(),
            model_modules: BTreeSet::new(),
            migration_dir: None,
            auth_mechanism: None,
            confidence: ConfidenceMap::new(),
        }
    }

    fn issue_at(signature: &str, subject: &str, line: u32) -> Issue {
        Issue::new(
            Category::Code,
            Severity::Warning,
            Location::line("app.py", line),
            signature,
            subject,
            "finding",
        )
    }

    #[test]
    fn whole_import_line_removed() {
        let root = TempDir::new().unwrap();
        let src = "import json\nfrom flask import Flask\napp = Flask(__name__)\n";
        fs::write(root.path().join("app.py"), src).unwrap();

        let fix = CodeQualityCorrector
            .plan(&issue_at(keys::CODE_UNUSED_IMPORT, "json", 1), &model_for(&root))
            .unwrap();
        assert_eq!(
            fix.patch.apply(src).unwrap(),
            "from flask import Flask\napp = Flask(__name__)\n"
        );
    }

    #[test]
    fn single_name_stripped_from_from_import() {
        let root = TempDir::new().unwrap();
        let src = "from flask import Flask, render_template, request\napp = Flask(__name__)\nprint(request)\n";
        fs::write(root.path().join("app.py"), src).unwrap();

        let fix = CodeQualityCorrector
            .plan(
                &issue_at(keys::CODE_UNUSED_IMPORT, "render_template", 1),
                &model_for(&root),
            )
            .unwrap();
        let patched = fix.patch.apply(src).unwrap();
        assert!(patched.starts_with("from flask import Flask, request\n"));
    }

    #[test]
    fn unused_variable_line_removed() {
        let root = TempDir::new().unwrap();
        let src = "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    leftover = 3\n    return 'ok'\n";
        fs::write(root.path().join("app.py"), src).unwrap();

        let fix = CodeQualityCorrector
            .plan(
                &issue_at(keys::CODE_UNUSED_VARIABLE, "leftover", 6),
                &model_for(&root),
            )
            .unwrap();
        let patched = fix.patch.apply(src).unwrap();
        assert!(!patched.contains("leftover"));
        assert!(patched.contains("    return 'ok'\n"));
    }

    #[test]
    fn secret_rewritten_to_environ() {
        let root = TempDir::new().unwrap();
        let src = "from flask import Flask\napp = Flask(__name__)\napp.config['SECRET_KEY'] = 'hunter2'\n";
        fs::write(root.path().join("app.py"), src).unwrap();

        let fix = CodeQualityCorrector
            .plan(
                &issue_at(keys::CODE_HARDCODED_SECRET, "SECRET_KEY", 3),
                &model_for(&root),
            )
            .unwrap();
        let patched = fix.patch.apply(src).unwrap();
        assert!(patched.starts_with("import os\n"));
        assert!(patched.contains("app.config['SECRET_KEY'] = os.environ.get('SECRET_KEY', 'change-me')"));
        assert!(!patched.contains("hunter2"));
    }

    #[test]
    fn debug_flag_flipped() {
        let root = TempDir::new().unwrap();
        let src = "from flask import Flask\napp = Flask(__name__)\napp.run(debug=True)\n";
        fs::write(root.path().join("app.py"), src).unwrap();

        let fix = CodeQualityCorrector
            .plan(
                &issue_at(keys::CODE_INSECURE_CONFIG, "debug mode enabled", 3),
                &model_for(&root),
            )
            .unwrap();
        let patched = fix.patch.apply(src).unwrap();
        assert!(patched.contains("app.run(debug=False)"));
    }
}
