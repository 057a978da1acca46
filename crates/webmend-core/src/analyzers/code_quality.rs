//! Code hygiene checks over the Python sources: dead names, leaked secrets,
//! unsafe configuration. Everything here is advisory, so findings stay at
//! whatever the rule table says (warnings by default).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::analyzers::{read_source, Analyzer};
use crate::domain::issue::{Category, Issue, Location};
use crate::domain::model::ProjectModel;
use crate::rules::{keys, RuleSet};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^import\s+([\w.]+)(?:\s+as\s+(\w+))?\s*$").expect("valid import pattern")
});

static FROM_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^from\s+([\w.]+)\s+import\s+(.+)$").expect("valid from-import pattern")
});

static ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\s*)([a-z]\w*)\s*=\s*[^=]").expect("valid assignment pattern")
});

static SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?im)^\s*(?:app\.config\[\s*['"])?(\w*(?:SECRET_KEY|API_KEY|PASSWORD|TOKEN)\w*)(?:['"]\s*\])?\s*=\s*['"]([^'"]+)['"]"#)
        .expect("valid secret pattern")
});

static INSECURE_RES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let patterns: &[(&str, &str)] = &[
        (r"debug\s*=\s*True", "debug mode enabled"),
        (r#"(?:DEBUG['"]\s*\]|DEBUG)\s*=\s*True"#, "debug flag set in config"),
        (
            r#"SESSION_COOKIE_SECURE['"]?\s*\]?\s*=\s*False"#,
            "session cookies sent over plain HTTP",
        ),
        (
            r#"WTF_CSRF_ENABLED['"]?\s*\]?\s*=\s*False"#,
            "CSRF protection disabled",
        ),
    ];
    patterns
        .iter()
        .map(|(p, label)| (Regex::new(p).expect("valid insecure pattern"), *label))
        .collect()
});

fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

fn occurrences(content: &str, name: &str) -> usize {
    // Word-boundary count; regex metacharacters cannot appear in identifiers.
    match Regex::new(&format!(r"\b{name}\b")) {
        Ok(re) => re.find_iter(content).count(),
        Err(_) => usize::MAX,
    }
}

pub struct CodeQualityAnalyzer;

impl Analyzer for CodeQualityAnalyzer {
    fn category(&self) -> Category {
        Category::Code
    }

    fn analyze(&self, model: &ProjectModel, rules: &RuleSet) -> Vec<Issue> {
        let mut issues = Vec::new();

        let mut files: BTreeSet<PathBuf> = model.route_modules.iter().cloned().collect();
        files.extend(model.model_modules.iter().cloned());
        files.insert(model.entry_point.file.clone());

        for rel in &files {
            let Some(content) = read_source(model, rel, rules, &mut issues) else {
                continue;
            };
            self.check_imports(rel, &content, rules, &mut issues);
            self.check_variables(rel, &content, rules, &mut issues);
            self.check_secrets(rel, &content, rules, &mut issues);
            self.check_insecure(rel, &content, rules, &mut issues);
        }

        issues
    }
}

impl CodeQualityAnalyzer {
    fn check_imports(
        &self,
        rel: &PathBuf,
        content: &str,
        rules: &RuleSet,
        issues: &mut Vec<Issue>,
    ) {
        let Some(severity) = rules.severity(keys::CODE_UNUSED_IMPORT) else {
            return;
        };
        let mut report = |name: &str, offset: usize| {
            if name.starts_with('_') || occurrences(content, name) > 1 {
                return;
            }
            issues.push(Issue::new(
                Category::Code,
                severity,
                Location::line(rel, line_of(content, offset)),
                keys::CODE_UNUSED_IMPORT,
                name,
                &format!("'{name}' is imported but never used"),
            ));
        };

        for caps in IMPORT_RE.captures_iter(content) {
            let (Some(whole), Some(module)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            // `import a.b` binds `a`; `import a.b as c` binds `c`.
            let bound = caps
                .get(2)
                .map(|m| m.as_str())
                .unwrap_or_else(|| module.as_str().split('.').next().unwrap_or(module.as_str()));
            report(bound, whole.start());
        }
        for caps in FROM_IMPORT_RE.captures_iter(content) {
            let (Some(whole), Some(module), Some(names)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if module.as_str() == "__future__" || names.as_str().trim() == "*" {
                continue;
            }
            for part in names.as_str().split(',') {
                let part = part.trim().trim_matches(|c| c == '(' || c == ')');
                let bound = match part.split_once(" as ") {
                    Some((_, alias)) => alias.trim(),
                    None => part,
                };
                if bound.is_empty() {
                    continue;
                }
                report(bound, whole.start());
            }
        }
    }

    fn check_variables(
        &self,
        rel: &PathBuf,
        content: &str,
        rules: &RuleSet,
        issues: &mut Vec<Issue>,
    ) {
        let Some(severity) = rules.severity(keys::CODE_UNUSED_VARIABLE) else {
            return;
        };
        for caps in ASSIGN_RE.captures_iter(content) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let name = name.as_str();
            if name.starts_with('_') || occurrences(content, name) > 1 {
                continue;
            }
            // Declarative ORM attributes are read by the framework, not the
            // module; deleting them would drop schema.
            let line = content[whole.start()..].lines().next().unwrap_or("");
            if line.contains("db.Column") || line.contains("db.relationship") {
                continue;
            }
            issues.push(Issue::new(
                Category::Code,
                severity,
                Location::line(rel, line_of(content, whole.start())),
                keys::CODE_UNUSED_VARIABLE,
                name,
                &format!("'{name}' is assigned but never used"),
            ));
        }
    }

    fn check_secrets(&self, rel: &PathBuf, content: &str, rules: &RuleSet, issues: &mut Vec<Issue>) {
        let Some(severity) = rules.severity(keys::CODE_HARDCODED_SECRET) else {
            return;
        };
        for caps in SECRET_RE.captures_iter(content) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.as_str().contains("environ") {
                continue;
            }
            issues.push(Issue::new(
                Category::Code,
                severity,
                Location::line(rel, line_of(content, whole.start())),
                keys::CODE_HARDCODED_SECRET,
                name.as_str(),
                &format!("'{}' holds a literal secret; read it from the environment", name.as_str()),
            ));
        }
    }

    fn check_insecure(&self, rel: &PathBuf, content: &str, rules: &RuleSet, issues: &mut Vec<Issue>) {
        let Some(severity) = rules.severity(keys::CODE_INSECURE_CONFIG) else {
            return;
        };
        for (re, label) in INSECURE_RES.iter() {
            if let Some(m) = re.find(content) {
                issues.push(Issue::new(
                    Category::Code,
                    severity,
                    Location::line(rel, line_of(content, m.start())),
                    keys::CODE_INSECURE_CONFIG,
                    *label,
                    &format!("insecure configuration: {label}"),
                ));
            }
        }
    }
}
