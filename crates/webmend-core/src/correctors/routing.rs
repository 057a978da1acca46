//! Fixes for routing findings: missing returns, missing POST methods.

use std::fs;

use tracing::debug;

use crate::correctors::Corrector;
use crate::domain::fix::PlannedFix;
use crate::domain::issue::{Category, Issue};
use crate::domain::model::ProjectModel;
use crate::patch::{FilePatch, Hunk};
use crate::rules::keys;

pub struct RoutingCorrector;

impl Corrector for RoutingCorrector {
    fn category(&self) -> Category {
        Category::Routing
    }

    fn plan(&self, issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
        match issue.signature.as_str() {
            keys::ROUTING_MISSING_RETURN => plan_missing_return(issue, model),
            keys::ROUTING_UNSPECIFIED_METHODS => plan_add_post_method(issue, model),
            // Duplicate endpoints, orphaned blueprints and missing expected
            // routes need a human decision about intent.
            _ => None,
        }
    }
}

fn plan_missing_return(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let handler = issue.subject.as_str();
    let content = fs::read_to_string(model.resolve(&issue.location.file)).ok()?;
    let (body_start, body_end, body_indent) = handler_span(&content, handler)?;

    let template = infer_template(handler, &issue.location.file);
    let mut return_stmt = format!("{body_indent}return render_template('{template}')\n");
    if body_end > body_start && !content[..body_end].ends_with('\n') {
        return_stmt.insert(0, '\n');
    }
    let mut hunks = vec![Hunk::insert(body_end, return_stmt)];

    if !content.contains("render_template") {
        hunks.push(import_hunk(&content)?);
    }

    debug!(handler, template, "planned return insertion");
    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(issue.location.file.clone(), hunks),
        description: format!("append `return render_template('{template}')` to '{handler}'"),
    })
}

fn plan_add_post_method(issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
    let content = fs::read_to_string(model.resolve(&issue.location.file)).ok()?;
    let (line, _) = issue.location.lines?;
    let (start, end, text) = line_span(&content, line)?;
    if !text.contains(".route(") || text.contains("methods") {
        return None;
    }
    let close = text.rfind(')')?;
    let amended = format!(
        "{}, methods=['GET', 'POST']{}",
        &text[..close],
        &text[close..]
    );
    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(
            issue.location.file.clone(),
            vec![Hunk::replace(start, end, text, amended)],
        ),
        description: format!("allow POST on route handler '{}'", issue.subject),
    })
}

/// Byte span of the indented body of `def <name>(...)` plus the body indent.
fn handler_span(content: &str, name: &str) -> Option<(usize, usize, String)> {
    let needle = format!("def {name}(");
    let def_offset = content.find(&needle)?;
    let def_line_start = content[..def_offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let def_indent = def_offset - def_line_start;

    let body_start = content[def_offset..].find('\n').map(|i| def_offset + i + 1)?;
    let mut body_end = content.len();
    let mut body_indent = None;
    let mut offset = body_start;
    for line in content[body_start..].split_inclusive('\n') {
        if !line.trim().is_empty() {
            let indent = line.len() - line.trim_start().len();
            if indent <= def_indent {
                body_end = offset;
                break;
            }
            if body_indent.is_none() {
                body_indent = Some(line[..indent].to_string());
            }
        }
        offset += line.len();
    }
    let indent = body_indent.unwrap_or_else(|| " ".repeat(def_indent + 4));
    Some((body_start, body_end, indent))
}

/// Byte span and text of a 1-indexed line, excluding its newline.
pub(crate) fn line_span(content: &str, line: u32) -> Option<(usize, usize, String)> {
    let mut offset = 0;
    for (i, l) in content.split_inclusive('\n').enumerate() {
        if i as u32 + 1 == line {
            let text = l.strip_suffix('\n').unwrap_or(l);
            return Some((offset, offset + text.len(), text.to_string()));
        }
        offset += l.len();
    }
    None
}

/// Add `render_template` to the flask import, or add the import line.
fn import_hunk(content: &str) -> Option<Hunk> {
    if let Some(offset) = content.find("from flask import") {
        let line_end = content[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or(content.len());
        let line = &content[offset..line_end];
        return Some(Hunk::replace(
            offset,
            line_end,
            line,
            format!("{line}, render_template"),
        ));
    }
    // Insert after the last top-level import, or at the top of the file.
    let mut insert_at = 0;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.starts_with("import ") || line.starts_with("from ") {
            insert_at = offset + line.len();
        }
        offset += line.len();
    }
    Some(Hunk::insert(insert_at, "from flask import render_template\n"))
}

/// Template a handler would conventionally render, mirroring CRUD naming.
fn infer_template(handler: &str, file: &std::path::Path) -> String {
    let dir = file
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty() && n != "routes");
    let prefix = dir.map(|d| format!("{d}/")).unwrap_or_default();

    if handler == "index" || handler == "home" {
        return format!("{prefix}index.html");
    }
    for action in ["list", "show", "create", "edit", "delete"] {
        if handler.starts_with(action) || handler.ends_with(action) {
            let resource = handler
                .trim_start_matches(&format!("{action}_"))
                .trim_end_matches(&format!("_{action}"));
            if resource != handler && !resource.is_empty() {
                return format!("{prefix}{resource}/{action}.html");
            }
            return format!("{prefix}{action}.html");
        }
    }
    format!("{prefix}{handler}.html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::issue::{Location, Severity};
    use crate::domain::model::{
        ArchitecturePattern, ConfidenceMap, EntryPoint, EntryPointKind,
    };
    use std::collections::BTreeSet;
    use std::path::Path;
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

    #[test]
    fn missing_return_fix_appends_render_and_import() {
        let root = TempDir::new().unwrap();
        let source = "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    x = 1\n";
        std::fs::write(root.path().join("app.py"), source).unwrap();

        let issue = Issue::new(
            Category::Routing,
            Severity::Error,
            Location::line("app.py", 4),
            keys::ROUTING_MISSING_RETURN,
            "index",
            "no return",
        );
        let fix = RoutingCorrector.plan(&issue, &model_for(&root)).unwrap();
        let patched = fix.patch.apply(source).unwrap();
        assert!(patched.contains("    return render_template('index.html')\n"));
        assert!(patched.contains("from flask import Flask, render_template"));

        // Reversibility: inverting the patch restores the original bytes.
        assert_eq!(fix.patch.invert().apply(&patched).unwrap(), source);
    }

    #[test]
    fn missing_return_no_import_hunk_when_already_imported() {
        let root = TempDir::new().unwrap();
        let source = "from flask import Flask, render_template\napp = Flask(__name__)\n\n@app.route('/about')\ndef about():\n    x = 1\n\n@app.route('/')\ndef index():\n    return render_template('index.html')\n";
        std::fs::write(root.path().join("app.py"), source).unwrap();

        let issue = Issue::new(
            Category::Routing,
            Severity::Error,
            Location::line("app.py", 4),
            keys::ROUTING_MISSING_RETURN,
            "about",
            "no return",
        );
        let fix = RoutingCorrector.plan(&issue, &model_for(&root)).unwrap();
        assert_eq!(fix.patch.hunks.len(), 1);
        let patched = fix.patch.apply(source).unwrap();
        assert!(patched.contains("    return render_template('about.html')\n"));
    }

    #[test]
    fn post_method_added_to_decorator() {
        let root = TempDir::new().unwrap();
        let source = "from flask import Flask, request\napp = Flask(__name__)\n\n@app.route('/submit')\ndef submit():\n    name = request.form['name']\n    return name\n";
        std::fs::write(root.path().join("app.py"), source).unwrap();

        let issue = Issue::new(
            Category::Routing,
            Severity::Warning,
            Location::line("app.py", 4),
            keys::ROUTING_UNSPECIFIED_METHODS,
            "submit",
            "form without POST",
        );
        let fix = RoutingCorrector.plan(&issue, &model_for(&root)).unwrap();
        let patched = fix.patch.apply(source).unwrap();
        assert!(patched.contains("@app.route('/submit', methods=['GET', 'POST'])"));
    }

    #[test]
    fn duplicate_endpoint_not_auto_fixed() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("app.py"), "x = 1\n").unwrap();
        let issue = Issue::new(
            Category::Routing,
            Severity::Error,
            Location::line("app.py", 1),
            keys::ROUTING_DUPLICATE_ENDPOINT,
            "index",
            "dup",
        );
        assert!(RoutingCorrector.plan(&issue, &model_for(&root)).is_none());
    }

    #[test]
    fn template_inference() {
        assert_eq!(infer_template("index", Path::new("app.py")), "index.html");
        assert_eq!(
            infer_template("list_users", Path::new("app.py")),
            "users/list.html"
        );
        assert_eq!(
            infer_template("dashboard", Path::new("admin/views.py")),
            "admin/dashboard.html"
        );
        assert_eq!(infer_template("post", Path::new("routes/blog.py")), "post.html");
    }
}
