//! Advisory fixes for query-efficiency findings.
//!
//! Restructuring a query is a human decision; healing here appends a
//! marker comment at the offending line so the finding converges instead
//! of being re-detected every pass.

use std::fs;

use tracing::debug;

use crate::analyzers::performance::{EAGER_LOADING_ADVICE, LOOP_QUERY_ADVICE};
use crate::correctors::{routing::line_span, Corrector};
use crate::domain::fix::PlannedFix;
use crate::domain::issue::{Category, Issue};
use crate::domain::model::ProjectModel;
use crate::patch::{FilePatch, Hunk};
use crate::rules::keys;

pub struct PerformanceCorrector;

impl Corrector for PerformanceCorrector {
    fn category(&self) -> Category {
        Category::Performance
    }

    fn plan(&self, issue: &Issue, model: &ProjectModel) -> Option<PlannedFix> {
        let advice = match issue.signature.as_str() {
            keys::PERF_N_PLUS_ONE_QUERY => LOOP_QUERY_ADVICE,
            keys::PERF_MISSING_EAGER_LOADING => EAGER_LOADING_ADVICE,
            _ => return None,
        };
        plan_advisory_comment(issue, model, advice)
    }
}

fn plan_advisory_comment(
    issue: &Issue,
    model: &ProjectModel,
    advice: &str,
) -> Option<PlannedFix> {
    let content = fs::read_to_string(model.resolve(&issue.location.file)).ok()?;
    let (line, _) = issue.location.lines?;
    let (_, end, text) = line_span(&content, line)?;
    if text.contains(advice) {
        return None;
    }

    debug!(file = %issue.location.file.display(), line, "planned advisory comment");
    Some(PlannedFix {
        issue_id: issue.id.clone(),
        severity: issue.severity,
        patch: FilePatch::new(
            issue.location.file.clone(),
            vec![Hunk::insert(end, format!("  {advice}"))],
        ),
        description: format!(
            "annotate {}:{line} with a query-efficiency advisory",
            issue.location.file.display()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::performance::PerformanceAnalyzer;
    use crate::analyzers::Analyzer;
    use crate::domain::model::{
        ArchitecturePattern, ConfidenceMap, EntryPoint, EntryPointKind,
    };
    use crate::rules::RuleSet;
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
            route_modules: BTreeSet::new(),
            template_dirs: BTreeSet::new(),
            static_dirs: BTreeSet::new(),
            model_modules: BTreeSet::new(),
            migration_dir: None,
            auth_mechanism: None,
            confidence: ConfidenceMap::new(),
        }
    }

    #[test]
    fn loop_query_gets_a_marker_comment_and_converges() {
        let root = TempDir::new().unwrap();
        let source = "for post in Post.query.all():\n    author = User.query.get(post.author_id)\n";
        fs::write(root.path().join("app.py"), source).unwrap();
        let model = model_for(&root);
        let rules = RuleSet::base();

        let issue = PerformanceAnalyzer
            .analyze(&model, &rules)
            .into_iter()
            .find(|i| i.signature == keys::PERF_N_PLUS_ONE_QUERY)
            .expect("loop query finding");
        let fix = PerformanceCorrector.plan(&issue, &model).expect("a plan");
        let healed = fix.patch.apply(source).unwrap();
        assert!(healed.lines().nth(1).unwrap().ends_with(LOOP_QUERY_ADVICE));

        fs::write(root.path().join("app.py"), &healed).unwrap();
        assert!(PerformanceAnalyzer
            .analyze(&model, &rules)
            .iter()
            .all(|i| i.signature != keys::PERF_N_PLUS_ONE_QUERY));
    }

    #[test]
    fn eager_loading_advisory_lands_on_the_query_line() {
        let root = TempDir::new().unwrap();
        let source = "posts = Post.query.all()\nprint(posts)\n";
        fs::write(root.path().join("app.py"), source).unwrap();
        let model = model_for(&root);

        let issue = PerformanceAnalyzer
            .analyze(&model, &RuleSet::base())
            .into_iter()
            .find(|i| i.signature == keys::PERF_MISSING_EAGER_LOADING)
            .expect("eager loading finding");
        let fix = PerformanceCorrector.plan(&issue, &model).expect("a plan");
        let healed = fix.patch.apply(source).unwrap();
        assert!(healed.lines().next().unwrap().ends_with(EAGER_LOADING_ADVICE));
        assert_eq!(healed.lines().nth(1).unwrap(), "print(posts)");
    }
}
