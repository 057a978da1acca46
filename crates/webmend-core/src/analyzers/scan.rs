//! Lightweight convention-based source scanning shared by the analyzers.
//!
//! These parsers are regex-and-indentation heuristics over Python and Jinja
//! sources, not real grammars. They only need to be precise enough to anchor
//! issues to lines; anything a heuristic cannot see simply goes unreported.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::model::ProjectModel;

static ROUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(\w+)\.route\(\s*['"]([^'"]*)['"]([^)]*)\)"#).expect("valid route pattern")
});

static ROUTE_SHORTHAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(\w+)\.(get|post|put|delete|patch)\(\s*['"]([^'"]*)['"]"#)
        .expect("valid route shorthand pattern")
});

static METHODS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"methods\s*=\s*\[([^\]]*)\]"#).expect("valid methods pattern")
});

static DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*def\s+(\w+)\s*\(").expect("valid def pattern"));

static BLUEPRINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\w+)\s*=\s*Blueprint\(\s*['"](\w+)['"]"#).expect("valid blueprint pattern")
});

static REGISTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"register_blueprint\(\s*([\w.]+)").expect("valid register pattern")
});

static RENDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"render_template\(\s*['"]([^'"]+)['"]([^)]*)\)"#).expect("valid render pattern")
});

static KWARG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*=").expect("valid kwarg pattern"));

static URL_FOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url_for\(\s*['"]([^'"]+)['"]"#).expect("valid url_for pattern")
});

static MODEL_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^class\s+(\w+)\s*\(([^)]*)\)\s*:").expect("valid class pattern")
});

static COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s+(\w+)\s*=\s*db\.Column\(").expect("valid column pattern")
});

static RELATIONSHIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s+(\w+)\s*=\s*db\.relationship\(\s*['"](\w+)['"]([^)]*)\)"#)
        .expect("valid relationship pattern")
});

static BACK_POPULATES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"back_populates\s*=\s*['"](\w+)['"]"#).expect("valid back_populates pattern")
});

static JINJA_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_]\w*)").expect("valid jinja var pattern")
});

static JINJA_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%-?\s*(\w+)").expect("valid jinja tag pattern")
});

static JINJA_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*(?:extends|include)\s+['"]([^'"]+)['"]"#)
        .expect("valid jinja ref pattern")
});

pub fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

/// One route decorator and the handler it decorates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecl {
    pub file: PathBuf,
    pub line: u32,
    /// Decorated object: `app` or a blueprint variable.
    pub owner: String,
    pub path: String,
    /// Empty when the decorator left methods unspecified (implicit GET).
    pub methods: Vec<String>,
    pub handler: String,
}

impl RouteDecl {
    /// Endpoint name as Flask derives it: handler, blueprint-qualified
    /// endpoints keep only the handler half for matching purposes.
    pub fn endpoint(&self) -> &str {
        &self.handler
    }
}

fn handler_after(content: &str, offset: usize) -> Option<(String, u32)> {
    DEF_RE
        .captures_iter(&content[offset..])
        .next()
        .and_then(|c| {
            let m = c.get(0)?;
            Some((
                c.get(1)?.as_str().to_string(),
                line_of(content, offset + m.start()),
            ))
        })
}

pub fn parse_routes(file: &Path, content: &str) -> Vec<RouteDecl> {
    let mut routes = Vec::new();
    for caps in ROUTE_RE.captures_iter(content) {
        let (Some(whole), Some(owner), Some(path)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let rest = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let methods = METHODS_RE
            .captures(rest)
            .and_then(|m| m.get(1))
            .map(|inner| {
                inner
                    .as_str()
                    .split(',')
                    .map(|s| s.trim().trim_matches(|c| c == '\'' || c == '"').to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let Some((handler, _)) = handler_after(content, whole.end()) else {
            continue;
        };
        routes.push(RouteDecl {
            file: file.to_path_buf(),
            line: line_of(content, whole.start()),
            owner: owner.as_str().to_string(),
            path: path.as_str().to_string(),
            methods,
            handler,
        });
    }
    for caps in ROUTE_SHORTHAND_RE.captures_iter(content) {
        let (Some(whole), Some(owner), Some(verb), Some(path)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let Some((handler, _)) = handler_after(content, whole.end()) else {
            continue;
        };
        routes.push(RouteDecl {
            file: file.to_path_buf(),
            line: line_of(content, whole.start()),
            owner: owner.as_str().to_string(),
            path: path.as_str().to_string(),
            methods: vec![verb.as_str().to_uppercase()],
            handler,
        });
    }
    routes.sort_by_key(|r| r.line);
    routes
}

/// A `bp = Blueprint('name', ...)` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintDecl {
    pub file: PathBuf,
    pub line: u32,
    pub var: String,
    pub name: String,
}

pub fn parse_blueprints(file: &Path, content: &str) -> Vec<BlueprintDecl> {
    BLUEPRINT_RE
        .captures_iter(content)
        .filter_map(|caps| {
            Some(BlueprintDecl {
                file: file.to_path_buf(),
                line: line_of(content, caps.get(0)?.start()),
                var: caps.get(1)?.as_str().to_string(),
                name: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Variable names passed to `register_blueprint(...)` anywhere in `content`.
/// A dotted argument like `views.bp` matches the blueprint var on its last
/// segment.
pub fn registered_blueprints(content: &str) -> BTreeSet<String> {
    REGISTER_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let arg = caps.get(1)?.as_str();
            Some(arg.rsplit('.').next().unwrap_or(arg).to_string())
        })
        .collect()
}

/// One `render_template('name.html', key=..)` call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub file: PathBuf,
    pub line: u32,
    pub template: String,
    pub context_keys: BTreeSet<String>,
}

pub fn parse_template_refs(file: &Path, content: &str) -> Vec<TemplateRef> {
    RENDER_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let rest = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let context_keys = KWARG_RE
                .captures_iter(rest)
                .filter_map(|k| Some(k.get(1)?.as_str().to_string()))
                .collect();
            Some(TemplateRef {
                file: file.to_path_buf(),
                line: line_of(content, whole.start()),
                template: caps.get(1)?.as_str().to_string(),
                context_keys,
            })
        })
        .collect()
}

/// One `url_for('endpoint')` call site, Python or template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlForRef {
    pub file: PathBuf,
    pub line: u32,
    pub endpoint: String,
}

pub fn parse_url_for(file: &Path, content: &str) -> Vec<UrlForRef> {
    URL_FOR_RE
        .captures_iter(content)
        .filter_map(|caps| {
            Some(UrlForRef {
                file: file.to_path_buf(),
                line: line_of(content, caps.get(0)?.start()),
                endpoint: caps.get(1)?.as_str().to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDecl {
    pub field: String,
    pub target: String,
    pub back_populates: Option<String>,
    pub line: u32,
}

/// A `class X(db.Model)` declaration with its columns and relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDecl {
    pub file: PathBuf,
    pub line: u32,
    pub name: String,
    pub fields: BTreeSet<String>,
    pub relationships: Vec<RelationshipDecl>,
    /// Byte offsets of the class body within the source, for patching.
    pub body_start: usize,
    pub body_end: usize,
}

pub fn parse_models(file: &Path, content: &str) -> Vec<ModelDecl> {
    let mut models = Vec::new();
    let classes: Vec<_> = MODEL_CLASS_RE.captures_iter(content).collect();
    for (i, caps) in classes.iter().enumerate() {
        let (Some(whole), Some(name), Some(bases)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if !bases.as_str().contains("db.Model") {
            continue;
        }
        let body_start = whole.end();
        let body_end = classes
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(content.len());
        let body = &content[body_start..body_end];

        let fields = COLUMN_RE
            .captures_iter(body)
            .filter_map(|c| Some(c.get(1)?.as_str().to_string()))
            .collect();
        let relationships = RELATIONSHIP_RE
            .captures_iter(body)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let rest = c.get(3).map(|m| m.as_str()).unwrap_or("");
                Some(RelationshipDecl {
                    field: c.get(1)?.as_str().to_string(),
                    target: c.get(2)?.as_str().to_string(),
                    back_populates: BACK_POPULATES_RE
                        .captures(rest)
                        .and_then(|b| Some(b.get(1)?.as_str().to_string())),
                    line: line_of(content, body_start + whole.start()),
                })
            })
            .collect();

        models.push(ModelDecl {
            file: file.to_path_buf(),
            line: line_of(content, whole.start()),
            name: name.as_str().to_string(),
            fields,
            relationships,
            body_start,
            body_end,
        });
    }
    models
}

/// Templates on disk, keyed by the name `render_template` would use
/// (path relative to the template directory, forward slashes).
pub fn list_templates(model: &ProjectModel) -> BTreeMap<String, PathBuf> {
    let mut templates = BTreeMap::new();
    for dir in &model.template_dirs {
        let abs_dir = model.resolve(dir);
        collect_templates(&abs_dir, &abs_dir, dir, &mut templates);
    }
    templates
}

fn collect_templates(
    base: &Path,
    dir: &Path,
    rel_dir: &Path,
    out: &mut BTreeMap<String, PathBuf>,
) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_templates(base, &path, rel_dir, out);
        } else if path.extension().is_some_and(|e| e == "html" || e == "jinja2" || e == "j2") {
            if let Ok(rel) = path.strip_prefix(base) {
                let name = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.insert(name, rel_dir.join(rel));
            }
        }
    }
}

/// Bare `{{ identifier }}` names used in a template.
pub fn template_variables(content: &str) -> BTreeSet<String> {
    JINJA_VAR_RE
        .captures_iter(content)
        .filter_map(|c| Some(c.get(1)?.as_str().to_string()))
        .collect()
}

/// Net open-block count: positive means unclosed `block`/`if`/`for` tags.
pub fn unclosed_blocks(content: &str) -> i32 {
    let mut depth = 0;
    for caps in JINJA_TAG_RE.captures_iter(content) {
        let Some(tag) = caps.get(1) else { continue };
        match tag.as_str() {
            "block" | "if" | "for" => depth += 1,
            "endblock" | "endif" | "endfor" => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Templates referenced via `{% extends %}` / `{% include %}`.
pub fn template_includes(content: &str) -> BTreeSet<String> {
    JINJA_REF_RE
        .captures_iter(content)
        .filter_map(|c| Some(c.get(1)?.as_str().to_string()))
        .collect()
}
