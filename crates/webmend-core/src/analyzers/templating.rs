//! Template checks: references, variables, block balance, url_for targets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::debug;

use crate::analyzers::{read_source, scan, Analyzer};
use crate::domain::issue::{Category, Issue, Location};
use crate::domain::model::ProjectModel;
use crate::rules::{keys, RuleSet};

/// Names Jinja resolves without the view passing them in.
const TEMPLATE_GLOBALS: &[&str] = &[
    "url_for",
    "request",
    "session",
    "config",
    "g",
    "current_user",
    "loop",
    "super",
    "self",
    "csrf_token",
    "get_flashed_messages",
];

pub struct TemplatingAnalyzer;

impl Analyzer for TemplatingAnalyzer {
    fn category(&self) -> Category {
        Category::Templating
    }

    fn analyze(&self, model: &ProjectModel, rules: &RuleSet) -> Vec<Issue> {
        let mut issues = Vec::new();

        let mut py_files: BTreeSet<PathBuf> = model.route_modules.iter().cloned().collect();
        py_files.insert(model.entry_point.file.clone());

        let mut refs = Vec::new();
        let mut url_fors = Vec::new();
        let mut endpoints = BTreeSet::new();
        for rel in &py_files {
            let Some(content) = read_source(model, rel, rules, &mut issues) else {
                continue;
            };
            refs.extend(scan::parse_template_refs(rel, &content));
            url_fors.extend(scan::parse_url_for(rel, &content));
            for route in scan::parse_routes(rel, &content) {
                endpoints.insert(route.handler);
            }
        }

        let on_disk = scan::list_templates(model);
        debug!(refs = refs.len(), templates = on_disk.len(), "templating scan");

        // Template name -> union of context keys across every render site,
        // so a variable supplied by any caller counts as resolved.
        let mut context_by_template: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for r in &refs {
            context_by_template
                .entry(r.template.as_str())
                .or_default()
                .extend(r.context_keys.iter().map(String::as_str));
        }

        if let Some(severity) = rules.severity(keys::TEMPLATING_MISSING_TEMPLATE) {
            let mut reported = BTreeSet::new();
            for r in &refs {
                if !on_disk.contains_key(&r.template) && reported.insert(r.template.as_str()) {
                    issues.push(Issue::new(
                        Category::Templating,
                        severity,
                        Location::line(&r.file, r.line),
                        keys::TEMPLATING_MISSING_TEMPLATE,
                        &r.template,
                        &format!("rendered template '{}' does not exist", r.template),
                    ));
                }
            }
        }

        let mut referenced: BTreeSet<String> = refs.iter().map(|r| r.template.clone()).collect();

        for (name, rel_path) in &on_disk {
            let Some(content) = read_source(model, rel_path, rules, &mut issues) else {
                continue;
            };

            referenced.extend(scan::template_includes(&content));
            url_fors.extend(scan::parse_url_for(rel_path, &content));

            if let Some(severity) = rules.severity(keys::TEMPLATING_UNCLOSED_BLOCK) {
                let depth = scan::unclosed_blocks(&content);
                if depth > 0 {
                    issues.push(Issue::new(
                        Category::Templating,
                        severity,
                        Location::file(rel_path),
                        keys::TEMPLATING_UNCLOSED_BLOCK,
                        name,
                        &format!("template '{name}' leaves {depth} block(s) unclosed"),
                    ));
                }
            }

            if let Some(severity) = rules.severity(keys::TEMPLATING_UNRESOLVED_VARIABLE) {
                let supplied = context_by_template.get(name.as_str());
                // Only check templates that are actually rendered; a purely
                // included partial inherits its parent's context.
                if let Some(supplied) = supplied {
                    for var in scan::template_variables(&content) {
                        if TEMPLATE_GLOBALS.contains(&var.as_str()) || supplied.contains(var.as_str())
                        {
                            continue;
                        }
                        issues.push(Issue::new(
                            Category::Templating,
                            severity,
                            Location::file(rel_path),
                            keys::TEMPLATING_UNRESOLVED_VARIABLE,
                            &format!("{name}:{var}"),
                            &format!("template '{name}' uses '{var}' but no render site supplies it"),
                        ));
                    }
                }
            }
        }

        if let Some(severity) = rules.severity(keys::TEMPLATING_INVALID_URL_FOR) {
            let mut reported = BTreeSet::new();
            for site in &url_fors {
                let target = site.endpoint.rsplit('.').next().unwrap_or(&site.endpoint);
                if target == "static" {
                    continue;
                }
                if !endpoints.contains(target)
                    && reported.insert((site.file.clone(), site.endpoint.clone()))
                {
                    issues.push(Issue::new(
                        Category::Templating,
                        severity,
                        Location::line(&site.file, site.line),
                        keys::TEMPLATING_INVALID_URL_FOR,
                        &site.endpoint,
                        &format!("url_for target '{}' matches no route handler", site.endpoint),
                    ));
                }
            }
        }

        if let Some(severity) = rules.severity(keys::TEMPLATING_UNUSED_TEMPLATE) {
            for (name, rel_path) in &on_disk {
                if !referenced.contains(name) {
                    issues.push(Issue::new(
                        Category::Templating,
                        severity,
                        Location::file(rel_path),
                        keys::TEMPLATING_UNUSED_TEMPLATE,
                        name,
                        &format!("template '{name}' is never rendered or included"),
                    ));
                }
            }
        }

        let anchor = model
            .template_dirs
            .iter()
            .next()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("templates"));
        if let Some(severity) = rules.severity(keys::TEMPLATING_REQUIRED_TEMPLATE) {
            for required in &rules.expectations.required_templates {
                if !on_disk.contains_key(required) {
                    issues.push(Issue::new(
                        Category::Templating,
                        severity,
                        Location::file(&anchor),
                        keys::TEMPLATING_REQUIRED_TEMPLATE,
                        required,
                        &format!("required template '{required}' not found"),
                    ));
                }
            }
        }
        if let Some(severity) = rules.severity(keys::TEMPLATING_RECOMMENDED_TEMPLATE) {
            for recommended in &rules.expectations.recommended_templates {
                if !on_disk.contains_key(recommended) {
                    issues.push(Issue::new(
                        Category::Templating,
                        severity,
                        Location::file(&anchor),
                        keys::TEMPLATING_RECOMMENDED_TEMPLATE,
                        recommended,
                        &format!("recommended template '{recommended}' not found"),
                    ));
                }
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        ArchitecturePattern, ConfidenceMap, EntryPoint, EntryPointKind,
    };
    use std::fs;
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
            template_dirs: ["templates".into()].into_iter().collect(),
            static_dirs: BTreeSet::new(),
            model_modules: BTreeSet::new(),
            migration_dir: None,
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
    fn missing_template_flagged() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask import Flask, render_template\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return render_template('index.html')\n",
        );
        fs::create_dir_all(root.path().join("templates")).unwrap();
        let issues = TemplatingAnalyzer.analyze(&model_for(&root), &RuleSet::base());
        assert!(issues
            .iter()
            .any(|i| i.signature == keys::TEMPLATING_MISSING_TEMPLATE && i.subject == "index.html"));
    }

    #[test]
    fn unresolved_variable_flagged() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask import Flask, render_template\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return render_template('index.html', title='home')\n",
        );
        write(&root, "templates/index.html", "<h1>{{ title }}</h1><p>{{ body }}</p>\n");
        let issues = TemplatingAnalyzer.analyze(&model_for(&root), &RuleSet::base());
        let unresolved: Vec<_> = issues
            .iter()
            .filter(|i| i.signature == keys::TEMPLATING_UNRESOLVED_VARIABLE)
            .collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].subject, "index.html:body");
    }

    #[test]
    fn unclosed_block_flagged() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask import Flask, render_template\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return render_template('index.html')\n",
        );
        write(&root, "templates/index.html", "{% block content %}\n<h1>hi</h1>\n");
        let issues = TemplatingAnalyzer.analyze(&model_for(&root), &RuleSet::base());
        assert!(issues
            .iter()
            .any(|i| i.signature == keys::TEMPLATING_UNCLOSED_BLOCK));
    }

    #[test]
    fn invalid_url_for_flagged_but_static_allowed() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask import Flask, render_template\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return render_template('index.html')\n",
        );
        write(
            &root,
            "templates/index.html",
            "<a href=\"{{ url_for('indx') }}\">x</a><img src=\"{{ url_for('static', filename='a.png') }}\">\n",
        );
        let issues = TemplatingAnalyzer.analyze(&model_for(&root), &RuleSet::base());
        let bad: Vec<_> = issues
            .iter()
            .filter(|i| i.signature == keys::TEMPLATING_INVALID_URL_FOR)
            .collect();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].subject, "indx");
    }

    #[test]
    fn base_template_not_flagged_unused() {
        let root = TempDir::new().unwrap();
        write(
            &root,
            "app.py",
            "from flask import Flask, render_template\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return render_template('index.html')\n",
        );
        write(&root, "templates/base.html", "<html>{% block content %}{% endblock %}</html>\n");
        write(&root, "templates/index.html", "{% extends 'base.html' %}\n");
        write(&root, "templates/orphan.html", "<p>nobody renders me</p>\n");
        let issues = TemplatingAnalyzer.analyze(&model_for(&root), &RuleSet::base());
        let unused: Vec<_> = issues
            .iter()
            .filter(|i| i.signature == keys::TEMPLATING_UNUSED_TEMPLATE)
            .collect();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].subject, "orphan.html");
    }
}
