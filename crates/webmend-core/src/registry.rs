//! The issue ledger: append-or-transition only, single source of truth.
//!
//! The registry is deliberately a plain owned structure. The orchestrator is
//! its single writer; analyzers return findings which the orchestrator feeds
//! in serially, preserving the deterministic-id invariant without locks.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::issue::{Issue, IssueId, IssueStatus, Severity, StatusChange};

/// Errors from registry mutation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown issue: {0}")]
    UnknownIssue(IssueId),

    #[error("illegal transition {from} -> {to} for issue {id}")]
    IllegalTransition {
        id: IssueId,
        from: IssueStatus,
        to: IssueStatus,
    },
}

/// Outcome of observing a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserveOutcome {
    /// First time this id was seen.
    Inserted,
    /// A previously `Verified` issue was re-detected: regression, reopened.
    Reopened,
    /// Already in the ledger and still open; nothing changed.
    AlreadyOpen,
}

fn transition_allowed(from: IssueStatus, to: IssueStatus) -> bool {
    use IssueStatus::*;
    matches!(
        (from, to),
        (Detected, Planned)
            | (Planned, Applied)
            | (Planned, Failed)
            | (Applied, Verified)
            | (Applied, Failed)
            | (Failed, Planned)
            // Resolution observed through re-diagnosis, without a fix landing.
            | (Detected, Verified)
            | (Planned, Verified)
            | (Failed, Verified)
            // Regression reopen.
            | (Verified, Detected)
    )
}

/// Append-only, status-tracked ledger of findings.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IssueRegistry {
    issues: BTreeMap<IssueId, Issue>,
    /// Insertion order, for stable iteration and reporting.
    order: Vec<IssueId>,
}

impl IssueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finding. Re-observing an open issue is a no-op; re-observing
    /// a `Verified` issue reopens it as a regression at the same location.
    pub fn observe(&mut self, issue: Issue) -> ObserveOutcome {
        match self.issues.get_mut(&issue.id) {
            None => {
                self.order.push(issue.id.clone());
                self.issues.insert(issue.id.clone(), issue);
                ObserveOutcome::Inserted
            }
            Some(existing) if existing.status == IssueStatus::Verified => {
                existing.status = IssueStatus::Detected;
                existing.history.push(StatusChange {
                    status: IssueStatus::Detected,
                    at: Utc::now(),
                    note: Some("regression: re-detected after verification".to_string()),
                });
                ObserveOutcome::Reopened
            }
            Some(_) => ObserveOutcome::AlreadyOpen,
        }
    }

    /// Transition an issue's status, enforcing the lifecycle matrix.
    pub fn transition(
        &mut self,
        id: &IssueId,
        to: IssueStatus,
        note: Option<String>,
    ) -> Result<(), RegistryError> {
        let issue = self
            .issues
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownIssue(id.clone()))?;
        if !transition_allowed(issue.status, to) {
            return Err(RegistryError::IllegalTransition {
                id: id.clone(),
                from: issue.status,
                to,
            });
        }
        issue.status = to;
        issue.history.push(StatusChange {
            status: to,
            at: Utc::now(),
            note,
        });
        Ok(())
    }

    pub fn get(&self, id: &IssueId) -> Option<&Issue> {
        self.issues.get(id)
    }

    pub fn contains(&self, id: &IssueId) -> bool {
        self.issues.contains_key(id)
    }

    /// All issues in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.order.iter().filter_map(|id| self.issues.get(id))
    }

    pub fn open_issues(&self) -> impl Iterator<Item = &Issue> {
        self.iter().filter(|i| i.is_open())
    }

    pub fn issues_in_status(&self, status: IssueStatus) -> Vec<&Issue> {
        self.iter().filter(|i| i.status == status).collect()
    }

    /// Whether any open issue exceeds `severity`.
    pub fn has_open_above(&self, severity: Severity) -> bool {
        self.open_issues().any(|i| i.severity > severity)
    }

    pub fn open_count(&self) -> usize {
        self.open_issues().count()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Full snapshot in insertion order, for the run report.
    pub fn snapshot(&self) -> Vec<Issue> {
        self.iter().cloned().collect()
    }

    /// Open issue counts keyed by severity, for the report summary.
    pub fn open_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for issue in self.open_issues() {
            *counts.entry(issue.severity).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::issue::{Category, Location};

    fn issue(signature: &str, subject: &str, severity: Severity) -> Issue {
        Issue::new(
            Category::Routing,
            severity,
            Location::line("routes.py", 10),
            signature,
            subject,
            "test issue",
        )
    }

    #[test]
    fn observe_dedupes_by_id() {
        let mut reg = IssueRegistry::new();
        let a = issue("routing.missing_return", "index", Severity::Error);
        let b = issue("routing.missing_return", "index", Severity::Error);
        assert_eq!(reg.observe(a), ObserveOutcome::Inserted);
        assert_eq!(reg.observe(b), ObserveOutcome::AlreadyOpen);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn verified_issue_reopens_on_reobservation() {
        let mut reg = IssueRegistry::new();
        let a = issue("routing.missing_return", "index", Severity::Error);
        let id = a.id.clone();
        reg.observe(a.clone());
        reg.transition(&id, IssueStatus::Planned, None).unwrap();
        reg.transition(&id, IssueStatus::Applied, None).unwrap();
        reg.transition(&id, IssueStatus::Verified, None).unwrap();

        assert_eq!(reg.observe(a), ObserveOutcome::Reopened);
        let reopened = reg.get(&id).unwrap();
        assert_eq!(reopened.status, IssueStatus::Detected);
        assert!(reopened.history.len() >= 5);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut reg = IssueRegistry::new();
        let a = issue("routing.missing_return", "index", Severity::Error);
        let id = a.id.clone();
        reg.observe(a);
        let err = reg.transition(&id, IssueStatus::Applied, None).unwrap_err();
        assert!(matches!(err, RegistryError::IllegalTransition { .. }));
    }

    #[test]
    fn failed_fix_can_be_replanned() {
        let mut reg = IssueRegistry::new();
        let a = issue("routing.missing_return", "index", Severity::Error);
        let id = a.id.clone();
        reg.observe(a);
        reg.transition(&id, IssueStatus::Planned, None).unwrap();
        reg.transition(&id, IssueStatus::Failed, Some("fix conflict".into()))
            .unwrap();
        reg.transition(&id, IssueStatus::Planned, None).unwrap();
        assert_eq!(reg.get(&id).unwrap().status, IssueStatus::Planned);
    }

    #[test]
    fn unknown_issue_transition_errors() {
        let mut reg = IssueRegistry::new();
        let ghost = issue("routing.missing_return", "ghost", Severity::Error);
        let err = reg
            .transition(&ghost.id, IssueStatus::Planned, None)
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownIssue(ghost.id));
    }

    #[test]
    fn open_above_severity_threshold() {
        let mut reg = IssueRegistry::new();
        reg.observe(issue("code.unused_import", "os", Severity::Warning));
        assert!(!reg.has_open_above(Severity::Warning));
        reg.observe(issue("persistence.missing_migration", "User.age", Severity::Critical));
        assert!(reg.has_open_above(Severity::Warning));
    }

    #[test]
    fn verified_issues_are_not_open_but_stay_in_ledger() {
        let mut reg = IssueRegistry::new();
        let a = issue("routing.missing_return", "index", Severity::Error);
        let id = a.id.clone();
        reg.observe(a);
        reg.transition(&id, IssueStatus::Verified, Some("not re-detected".into()))
            .unwrap();
        assert_eq!(reg.open_count(), 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let mut reg = IssueRegistry::new();
        let a = issue("a.rule", "one", Severity::Info);
        let b = issue("b.rule", "two", Severity::Info);
        let (ida, idb) = (a.id.clone(), b.id.clone());
        reg.observe(a);
        reg.observe(b);
        let snap = reg.snapshot();
        assert_eq!(snap[0].id, ida);
        assert_eq!(snap[1].id, idb);
    }
}
