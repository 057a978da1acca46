//! Fixes for template findings: stub creation, block closing, endpoint repair.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::analyzers::scan;
use crate::correctors::{closest_match, routing::line_span, Corrector};
use crate::domain::fix::PlannedFix;
use crate::domain::issue::{Category, Issue};
use crate::domain::model::ProjectModel;
use crate::patch::{FilePatch, Hunk};
use crate::rules::keys;

pub struct TemplatingCorrector;

impl Corrector for TemplatingCorrector {
    fn category(&self) -> Category {
        Category::Templating
    }

    fn plan(&self, issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
        match issue.signature.as_str() {
            keys::TEMPLATING_MISSING_TEMPLATE
            | keys::TEMPLATING_REQUIRED_TEMPLATE
            | keys::TEMPLATING_RECOMMENDED_TEMPLATE => plan_create_stub(issue, model),
            keys::TEMPLATING_UNCLOSED_BLOCK => plan_close_blocks(issue, model),
            keys::TEMPLATING_INVALID_URL_FOR => plan_repair_url_for(issue, model),
            // Unused templates and unresolved variables are reported only;
            // deleting files or inventing context is not safe to automate.
            _ => None,
        }
    }
}

fn template_dir(model: &ProjectModel) -> PathBuf {
    model
        .template_dirs
        .iter()
        .next()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("templates"))
}

fn plan_create_stub(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let name = issue.subject.as_str();
    let dir = template_dir(model);
    let target = dir.join(name);
    if model.resolve(&target).exists() {
        return None;
    }

    let title = name.trim_end_matches(".html").replace(['/', '_'], " ");
    let content = if name != "base.html" && scan::list_templates(model).contains_key("base.html") {
        format!(
            "{{% extends 'base.html' %}}\n\n{{% block content %}}\n<h1>{title}</h1>\n{{% endblock %}}\n"
        )
    } else {
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n    <title>{title}</title>\n</head>\n<body>\n    <h1>{title}</h1>\n</body>\n</html>\n"
        )
    };

    debug!(template = name, "planned template stub");
    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::create(target, content),
        description: format!("create stub template '{name}'"),
    })
}

fn plan_close_blocks(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let content = fs::read_to_string(model.resolve(&issue.location.file)).ok()?;
    let open = open_tag_stack(&content);
    if open.is_empty() {
        return None;
    }

    let mut closing = String::new();
    if !content.is_empty() && !content.ends_with('\n') {
        closing.push('\n');
    }
    for tag in open.iter().rev() {
        closing.push_str(&format!("{{% end{tag} %}}\n"));
    }

    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(
            issue.location.file.clone(),
            vec![Hunk::insert(content.len(), closing)],
        ),
        description: format!(
            "close {} open block(s) in '{}'",
            open.len(),
            issue.subject
        ),
    })
}

/// Open `block`/`if`/`for` tags in order, unmatched by an end tag.
fn open_tag_stack(content: &str) -> Vec<&'static str> {
    fn tag_is(tag: &str, word: &str) -> bool {
        tag.strip_prefix(word)
            .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
    }

    let mut stack = Vec::new();
    let mut rest = content;
    while let Some(pos) = rest.find("{%") {
        rest = &rest[pos + 2..];
        let tag = rest.trim_start_matches(['-', ' ']);
        for name in ["block", "if", "for"] {
            if tag_is(tag, name) {
                stack.push(name);
                break;
            }
            if tag_is(tag, &format!("end{name}")) {
                if let Some(last) = stack.iter().rposition(|t| *t == name) {
                    stack.remove(last);
                }
                break;
            }
        }
    }
    stack
}

fn plan_repair_url_for(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let bad = issue.subject.as_str();
    let content = fs::read_to_string(model.resolve(&issue.location.file)).ok()?;

    let mut endpoints = Vec::new();
    let mut files: Vec<_> = model.route_modules.iter().cloned().collect();
    files.push(model.entry_point.file.clone());
    for rel in files {
        let Ok(source) = fs::read_to_string(model.resolve(&rel)) else {
            continue;
        };
        for route in scan::parse_routes(&rel, &source) {
            endpoints.push(route.handler);
        }
    }
    let replacement = closest_match(bad, endpoints.iter().map(String::as_str))?.to_string();

    let (line, _) = issue.location.lines?;
    let (line_start, _, text) = line_span(&content, line)?;
    let needle = format!("url_for('{bad}'");
    let alt_needle = format!("url_for(\"{bad}\"");
    let offset_in_line = text.find(&needle).or_else(|| text.find(&alt_needle))?;
    let bad_start = line_start + offset_in_line + "url_for(".len() + 1;
    let bad_end = bad_start + bad.len();

    debug!(from = bad, to = %replacement, "planned url_for repair");
    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(
            issue.location.file.clone(),
            vec![Hunk::replace(bad_start, bad_end, bad, replacement.clone())],
        ),
        description: format!("rewrite url_for('{bad}') to url_for('{replacement}')"),
    })
}
