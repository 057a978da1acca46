//! Healing: correctors plan reversible patches, the engine applies them.
//!
//! Collision safety: at most one fix lands per file per pass. When several
//! planned fixes target the same file, the highest-severity one wins; losers
//! whose hunks overlap the winner fail with a conflict, losers elsewhere in
//! the file stay planned and get their turn on the next iteration.

pub mod code_quality;
pub mod performance;
pub mod persistence;
pub mod routing;
pub mod templating;

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::backup::{BackupError, BackupStore};
use crate::domain::error::{HealError, Result};
use crate::domain::fix::{Fix, PlannedFix};
use crate::domain::issue::{Category, Issue, IssueId};
use crate::domain::model::ProjectModel;
use crate::report::FixRecord;

pub use code_quality::CodeQualityCorrector;
pub use performance::PerformanceCorrector;
pub use persistence::PersistenceCorrector;
pub use routing::RoutingCorrector;
pub use templating::TemplatingCorrector;

/// Plans a reversible fix for one issue, or declines.
pub trait Corrector: Send + Sync {
    fn category(&self) -> Category;

    /// Plan a patch for `issue`. `None` means this corrector has no safe
    /// automated remedy; the issue stays open for the report.
    fn plan(&self, issue: &Issue, model: &ProjectModel) -> Option<PlannedFix>;
}

pub fn default_correctors() -> Vec<Box<dyn Corrector>> {
    vec![
        Box::new(RoutingCorrector),
        Box::new(TemplatingCorrector),
        Box::new(PersistenceCorrector),
        Box::new(PerformanceCorrector),
        Box::new(CodeQualityCorrector),
    ]
}

/// Plan fixes for every issue the matching corrector accepts.
pub fn plan_fixes(
    issues: &[Issue],
    model: &ProjectModel,
    correctors: &[Box<dyn Corrector>],
) -> Vec<PlannedFix> {
    let mut planned = Vec::new();
    for issue in issues {
        let Some(corrector) = correctors.iter().find(|c| c.category() == issue.category) else {
            continue;
        };
        if let Some(fix) = corrector.plan(issue, model) {
            planned.push(fix);
        }
    }
    planned
}

/// What one healing pass did.
#[derive(Debug, Default)]
pub struct HealOutcome {
    pub applied: Vec<Fix>,
    /// Fixes that could not land this pass and must be replanned, with why.
    pub conflicted: Vec<(IssueId, String)>,
    /// Fixes skipped only because another fix touched their file first.
    pub deferred: Vec<IssueId>,
}

/// Apply one pass of planned fixes under the collision rule.
pub fn apply_fixes(
    planned: Vec<PlannedFix>,
    store: &BackupStore,
    project_root: &Path,
) -> Result<HealOutcome> {
    let mut outcome = HealOutcome::default();

    // Group per target file, order groups deterministically.
    let mut by_file: Vec<(std::path::PathBuf, Vec<PlannedFix>)> = Vec::new();
    for fix in planned {
        match by_file.iter_mut().find(|(f, _)| *f == fix.patch.file) {
            Some((_, group)) => group.push(fix),
            None => by_file.push((fix.patch.file.clone(), vec![fix])),
        }
    }
    by_file.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (file, mut group) in by_file {
        group.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.patch.first_offset().cmp(&b.patch.first_offset()))
                .then_with(|| a.issue_id.cmp(&b.issue_id))
        });
        let winner = group.remove(0);

        for loser in group {
            if loser.patch.overlaps(&winner.patch) {
                outcome.conflicted.push((
                    loser.issue_id.clone(),
                    format!(
                        "fix conflicts with the fix for issue {} in {}",
                        winner.issue_id,
                        file.display()
                    ),
                ));
            } else {
                outcome.deferred.push(loser.issue_id);
            }
        }

        let backup = store.backup(&winner.issue_id, &file)?;
        let abs = project_root.join(&file);
        let current = if backup.existed {
            fs::read_to_string(&abs)?
        } else {
            String::new()
        };

        match winner.patch.apply(&current) {
            Ok(patched) => {
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent)?;
                }
                let dir = abs.parent().unwrap_or(project_root);
                let mut tmp = NamedTempFile::new_in(dir)?;
                tmp.write_all(patched.as_bytes())?;
                tmp.persist(&abs).map_err(|e| e.error)?;
                info!(
                    issue = %winner.issue_id,
                    file = %file.display(),
                    "applied fix: {}",
                    winner.description
                );
                outcome.applied.push(Fix::from_planned(winner, backup));
            }
            Err(e) => {
                // The file changed under us since diagnosis; replan next pass.
                warn!(issue = %winner.issue_id, file = %file.display(), error = %e, "fix did not apply");
                outcome
                    .conflicted
                    .push((winner.issue_id, format!("patch rejected: {e}")));
            }
        }
    }

    Ok(outcome)
}

/// Undo the applied fixes of a run, newest first, from their pre-image
/// backups. Returns how many files were restored. A backup that fails its
/// digest check aborts the rollback with
/// [`HealError::UnrecoverableCorruption`]; everything restored before the
/// corrupt entry stays restored, and the remaining backups are untouched on
/// disk for manual recovery.
pub fn rollback_fixes(store: &BackupStore, fixes: &[FixRecord]) -> Result<usize> {
    let mut restored = 0;
    for record in fixes.iter().rev().filter(|f| f.applied) {
        let Some(backup) = &record.backup else {
            continue;
        };
        match store.rollback(backup) {
            Ok(()) => {
                info!(issue = %record.issue_id, file = %record.file.display(), "rolled back fix");
                restored += 1;
            }
            Err(BackupError::CorruptBackup { expected, actual }) => {
                return Err(HealError::UnrecoverableCorruption {
                    issue_id: record.issue_id.to_string(),
                    detail: format!(
                        "backup digest mismatch for {}: expected {expected}, found {actual}",
                        record.file.display()
                    ),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(restored)
}

/// Edit distance, used to repair near-miss endpoint names.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (prev[j + 1] + 1).min(current[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Closest candidate within a 0.6 normalized-similarity cutoff.
pub(crate) fn closest_match<'a>(
    target: &str,
    candidates: impl Iterator<Item = &'a str>,
) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let longest = target.chars().count().max(candidate.chars().count());
        if longest == 0 {
            continue;
        }
        let similarity = 1.0 - levenshtein(target, candidate) as f64 / longest as f64;
        if similarity >= 0.6 && best.map_or(true, |(_, s)| similarity > s) {
            best = Some((candidate, similarity));
        }
    }
    best.map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::issue::Severity;
    use crate::patch::{FilePatch, Hunk};
    use tempfile::TempDir;

    fn planned(id_seed: &str, severity: Severity, patch: FilePatch) -> PlannedFix {
        let issue = Issue::new(
            Category::Code,
            severity,
            crate::domain::issue::Location::file(&patch.file),
            "code.unused_import",
            id_seed,
            "test",
        );
        PlannedFix {
            issue_id: issue.id,
            severity,
            patch,
            description: format!("fix {id_seed}"),
        }
    }

    #[test]
    fn one_fix_per_file_highest_severity_wins() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("app.py"), "import json\nimport os\n").unwrap();
        let store = BackupStore::open(root.path(), &root.path().join(".webmend")).unwrap();

        let low = planned(
            "low",
            Severity::Warning,
            FilePatch::new("app.py", vec![Hunk::replace(0, 12, "import json\n", "")]),
        );
        let high = planned(
            "high",
            Severity::Error,
            FilePatch::new("app.py", vec![Hunk::replace(12, 22, "import os\n", "")]),
        );

        let outcome = apply_fixes(vec![low.clone(), high], &store, root.path()).unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.deferred, vec![low.issue_id]);
        assert!(outcome.conflicted.is_empty());
        assert_eq!(
            fs::read_to_string(root.path().join("app.py")).unwrap(),
            "import json\n"
        );
    }

    #[test]
    fn overlapping_loser_conflicts() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("app.py"), "import json\n").unwrap();
        let store = BackupStore::open(root.path(), &root.path().join(".webmend")).unwrap();

        let a = planned(
            "a",
            Severity::Error,
            FilePatch::new("app.py", vec![Hunk::replace(0, 12, "import json\n", "")]),
        );
        let b = planned(
            "b",
            Severity::Warning,
            FilePatch::new("app.py", vec![Hunk::replace(0, 12, "import json\n", "# gone\n")]),
        );

        let outcome = apply_fixes(vec![a, b.clone()], &store, root.path()).unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.conflicted.len(), 1);
        assert_eq!(outcome.conflicted[0].0, b.issue_id);
    }

    #[test]
    fn stale_patch_is_rejected_not_applied() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("app.py"), "changed content\n").unwrap();
        let store = BackupStore::open(root.path(), &root.path().join(".webmend")).unwrap();

        let stale = planned(
            "stale",
            Severity::Error,
            FilePatch::new("app.py", vec![Hunk::replace(0, 12, "import json\n", "")]),
        );
        let outcome = apply_fixes(vec![stale], &store, root.path()).unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.conflicted.len(), 1);
        assert_eq!(
            fs::read_to_string(root.path().join("app.py")).unwrap(),
            "changed content\n"
        );
    }

    #[test]
    fn rollback_restores_applied_fixes_in_reverse() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("app.py"), "import json\nimport os\n").unwrap();
        let store = BackupStore::open(root.path(), &root.path().join(".webmend")).unwrap();

        let fix = planned(
            "drop-json",
            Severity::Warning,
            FilePatch::new("app.py", vec![Hunk::replace(0, 12, "import json\n", "")]),
        );
        let outcome = apply_fixes(vec![fix], &store, root.path()).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("app.py")).unwrap(),
            "import os\n"
        );

        let records: Vec<FixRecord> = outcome.applied.iter().map(FixRecord::from).collect();
        let restored = rollback_fixes(&store, &records).unwrap();
        assert_eq!(restored, 1);
        assert_eq!(
            fs::read_to_string(root.path().join("app.py")).unwrap(),
            "import json\nimport os\n"
        );
    }

    #[test]
    fn corrupt_backup_aborts_rollback_fatally() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("app.py"), "import json\n").unwrap();
        let store = BackupStore::open(root.path(), &root.path().join(".webmend")).unwrap();

        let fix = planned(
            "drop-json",
            Severity::Warning,
            FilePatch::new("app.py", vec![Hunk::replace(0, 12, "import json\n", "")]),
        );
        let outcome = apply_fixes(vec![fix], &store, root.path()).unwrap();
        let records: Vec<FixRecord> = outcome.applied.iter().map(FixRecord::from).collect();

        let objects = root.path().join(".webmend/backups/objects");
        for shard in fs::read_dir(&objects).unwrap() {
            for object in fs::read_dir(shard.unwrap().path()).unwrap() {
                fs::write(object.unwrap().path(), b"tampered").unwrap();
            }
        }

        let err = rollback_fixes(&store, &records).unwrap_err();
        assert!(matches!(err, HealError::UnrecoverableCorruption { .. }));
    }

    #[test]
    fn levenshtein_and_closest_match() {
        assert_eq!(levenshtein("index", "indx"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        let endpoints = ["index", "login", "dashboard"];
        assert_eq!(
            closest_match("indx", endpoints.iter().copied()),
            Some("index")
        );
        assert_eq!(closest_match("zzzzzz", endpoints.iter().copied()), None);
    }
}
