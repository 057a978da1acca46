//! Routing checks: handlers, endpoints, blueprints, preset route coverage.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::analyzers::{read_source, scan, Analyzer};
use crate::domain::issue::{Category, Issue, Location};
use crate::domain::model::{confidence, ProjectModel};
use crate::rules::{keys, RuleSet};

/// Entry-point confidence below this is worth flagging to the user.
const LOW_CONFIDENCE_FLOOR: f64 = 0.7;

pub struct RoutingAnalyzer;

impl Analyzer for RoutingAnalyzer {
    fn category(&self) -> Category {
        Category::Routing
    }

    fn analyze(&self, model: &ProjectModel, rules: &RuleSet) -> Vec<Issue> {
        let mut issues = Vec::new();

        if let Some(severity) = rules.severity(keys::ROUTING_LOW_CONFIDENCE) {
            let score = model.confidence.get(confidence::ENTRY_POINT);
            if score < LOW_CONFIDENCE_FLOOR {
                issues.push(Issue::new(
                    Category::Routing,
                    severity,
                    Location::file(&model.entry_point.file),
                    keys::ROUTING_LOW_CONFIDENCE,
                    &model.entry_point.symbol,
                    &format!(
                        "entry point '{}' detected with low confidence ({score:.2}); \
                         structural findings may be incomplete",
                        model.entry_point.symbol
                    ),
                ));
            }
        }

        let mut all_routes = Vec::new();
        let mut all_blueprints = Vec::new();
        let mut registered = BTreeSet::new();
        let mut sources = BTreeMap::new();

        let mut files: BTreeSet<_> = model.route_modules.iter().cloned().collect();
        files.insert(model.entry_point.file.clone());

        for rel in &files {
            let Some(content) = read_source(model, rel, rules, &mut issues) else {
                continue;
            };
            all_routes.extend(scan::parse_routes(rel, &content));
            all_blueprints.extend(scan::parse_blueprints(rel, &content));
            registered.extend(scan::registered_blueprints(&content));
            sources.insert(rel.clone(), content);
        }
        debug!(routes = all_routes.len(), blueprints = all_blueprints.len(), "routing scan");

        if let Some(severity) = rules.severity(keys::ROUTING_MISSING_RETURN) {
            for route in &all_routes {
                let Some(content) = sources.get(&route.file) else {
                    continue;
                };
                if !handler_returns(content, &route.handler) {
                    issues.push(Issue::new(
                        Category::Routing,
                        severity,
                        Location::line(&route.file, route.line),
                        keys::ROUTING_MISSING_RETURN,
                        &route.handler,
                        &format!("route handler '{}' never returns a response", route.handler),
                    ));
                }
            }
        }

        if let Some(severity) = rules.severity(keys::ROUTING_DUPLICATE_ENDPOINT) {
            let mut seen: BTreeMap<&str, &scan::RouteDecl> = BTreeMap::new();
            for route in &all_routes {
                match seen.get(route.endpoint()) {
                    Some(first) if (first.file != route.file || first.line != route.line) => {
                        issues.push(Issue::new(
                            Category::Routing,
                            severity,
                            Location::line(&route.file, route.line),
                            keys::ROUTING_DUPLICATE_ENDPOINT,
                            route.endpoint(),
                            &format!(
                                "endpoint '{}' already defined at {}:{}",
                                route.endpoint(),
                                first.file.display(),
                                first.line
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        seen.insert(route.endpoint(), route);
                    }
                }
            }
        }

        if let Some(severity) = rules.severity(keys::ROUTING_ORPHANED_BLUEPRINT) {
            for bp in &all_blueprints {
                if !registered.contains(&bp.var) {
                    issues.push(Issue::new(
                        Category::Routing,
                        severity,
                        Location::line(&bp.file, bp.line),
                        keys::ROUTING_ORPHANED_BLUEPRINT,
                        &bp.name,
                        &format!(
                            "blueprint '{}' is declared but never registered on the app",
                            bp.name
                        ),
                    ));
                }
            }
        }

        if let Some(severity) = rules.severity(keys::ROUTING_UNSPECIFIED_METHODS) {
            for route in &all_routes {
                if route.methods.iter().any(|m| m == "POST") {
                    continue;
                }
                let Some(content) = sources.get(&route.file) else {
                    continue;
                };
                if handler_body(content, &route.handler)
                    .is_some_and(|body| body.contains("request.form") || body.contains("request.files"))
                {
                    issues.push(Issue::new(
                        Category::Routing,
                        severity,
                        Location::line(&route.file, route.line),
                        keys::ROUTING_UNSPECIFIED_METHODS,
                        &route.handler,
                        &format!(
                            "handler '{}' reads form data but its route does not accept POST",
                            route.handler
                        ),
                    ));
                }
            }
        }

        let endpoints: BTreeSet<&str> = all_routes.iter().map(|r| r.endpoint()).collect();
        let expectation_anchor = Location::file(&model.entry_point.file);
        if let Some(severity) = rules.severity(keys::ROUTING_REQUIRED_ROUTE) {
            for required in &rules.expectations.required_routes {
                if !endpoints.contains(required.as_str()) {
                    issues.push(Issue::new(
                        Category::Routing,
                        severity,
                        expectation_anchor.clone(),
                        keys::ROUTING_REQUIRED_ROUTE,
                        required,
                        &format!("required route '{required}' not found"),
                    ));
                }
            }
        }
        if let Some(severity) = rules.severity(keys::ROUTING_RECOMMENDED_ROUTE) {
            for recommended in &rules.expectations.recommended_routes {
                if !endpoints.contains(recommended.as_str()) {
                    issues.push(Issue::new(
                        Category::Routing,
                        severity,
                        expectation_anchor.clone(),
                        keys::ROUTING_RECOMMENDED_ROUTE,
                        recommended,
                        &format!("recommended route '{recommended}' not found"),
                    ));
                }
            }
        }

        issues
    }
}

/// Extract the indented body of `def <name>(...)`, excluding nested defs'
/// trailing content only by dedent.
pub(crate) fn handler_body<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("def {name}(");
    let def_offset = content.find(&needle)?;
    let def_line_start = content[..def_offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let def_indent = content[def_line_start..def_offset].len();

    let body_start = content[def_offset..].find('\n').map(|i| def_offset + i + 1)?;
    let mut end = content.len();
    for (offset, line) in line_offsets(&content[body_start..]) {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        if indent <= def_indent {
            end = body_start + offset;
            break;
        }
    }
    Some(&content[body_start..end])
}

fn line_offsets(s: &str) -> impl Iterator<Item = (usize, &str)> {
    s.split_inclusive('\n').scan(0usize, |offset, line| {
        let current = *offset;
        *offset += line.len();
        Some((current, line))
    })
}

/// True when any statement in the handler's body produces a response.
fn handler_returns(content: &str, name: &str) -> bool {
    match handler_body(content, name) {
        Some(body) => body.lines().any(|line| {
            let t = line.trim_start();
            t.starts_with("return ")
                || t == "return"
                || t.starts_with("yield ")
                || t.starts_with("abort(")
        }),
        // Handler not found in this file; do not guess.
        None => true,
    }
}
