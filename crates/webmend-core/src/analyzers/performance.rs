//! Query-efficiency checks: N+1 patterns and eager-loading coverage.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::analyzers::{read_source, Analyzer};
use crate::domain::issue::{Category, Issue, Location};
use crate::domain::model::ProjectModel;
use crate::rules::{keys, RuleSet};

static LOOP_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*)for\s+\w+\s+in\s+(\w+)(?:\.query)?\.(?:all|filter)")
        .expect("valid loop query pattern")
});

/// Advisory appended to a query found inside a loop body. Its presence also
/// marks the line as already handled on later passes.
pub(crate) const LOOP_QUERY_ADVICE: &str =
    "# TODO: query inside a loop; load the rows up front with joinedload or selectinload";

/// Advisory appended to the first query of a file with no eager loading.
pub(crate) const EAGER_LOADING_ADVICE: &str =
    "# TODO: consider joinedload or selectinload for relationship-heavy queries";

pub struct PerformanceAnalyzer;

impl Analyzer for PerformanceAnalyzer {
    fn category(&self) -> Category {
        Category::Performance
    }

    fn analyze(&self, model: &ProjectModel, rules: &RuleSet) -> Vec<Issue> {
        let mut issues = Vec::new();

        let mut py_files: BTreeSet<PathBuf> = model.route_modules.iter().cloned().collect();
        py_files.insert(model.entry_point.file.clone());

        for rel in &py_files {
            let Some(content) = read_source(model, rel, rules, &mut issues) else {
                continue;
            };

            if let Some(severity) = rules.severity(keys::PERF_N_PLUS_ONE_QUERY) {
                for m in LOOP_QUERY_RE.captures_iter(&content) {
                    let whole = m.get(0).map_or(0, |g| g.start());
                    let header_indent = m.get(1).map_or(0, |g| g.as_str().len());
                    let source = m.get(2).map_or("", |g| g.as_str());
                    let header_line = content[..whole].matches('\n').count() as u32 + 1;

                    for (offset, line) in content
                        .lines()
                        .skip(header_line as usize)
                        .enumerate()
                        .take_while(|(_, l)| {
                            l.trim().is_empty() || l.len() - l.trim_start().len() > header_indent
                        })
                    {
                        if !line.contains(".query") && !line.contains(".filter(") && !line.contains(".get(")
                        {
                            continue;
                        }
                        if line.contains("joinedload") || line.contains("selectinload") {
                            continue;
                        }
                        let at = header_line + offset as u32 + 1;
                        issues.push(Issue::new(
                            Category::Performance,
                            severity,
                            Location::line(rel, at),
                            keys::PERF_N_PLUS_ONE_QUERY,
                            source,
                            &format!(
                                "query inside a loop over '{source}' issues one statement per row"
                            ),
                        ));
                        break;
                    }
                }
            }

            if let Some(severity) = rules.severity(keys::PERF_MISSING_EAGER_LOADING) {
                let eager = content.contains(".options(")
                    || content.contains(".join(")
                    || content.contains("joinedload")
                    || content.contains("selectinload");
                if !eager {
                    if let Some(line) = first_query_line(&content) {
                        issues.push(Issue::new(
                            Category::Performance,
                            severity,
                            Location::line(rel, line),
                            keys::PERF_MISSING_EAGER_LOADING,
                            &rel.display().to_string(),
                            "queries here never eager-load relationships",
                        ));
                    }
                }
            }
        }

        debug!(issues = issues.len(), "performance scan");
        issues
    }
}

fn first_query_line(content: &str) -> Option<u32> {
    content
        .lines()
        .position(|l| l.contains(".query."))
        .map(|i| i as u32 + 1)
}
