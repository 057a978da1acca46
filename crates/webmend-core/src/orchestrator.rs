//! The healing-run state machine.
//!
//! Detection runs once; diagnosis, healing and validation loop until the
//! project is clean, progress stalls, or the iteration bound is hit. The
//! registry is the single source of truth for issue state; the orchestrator
//! is its only writer.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyzers::{default_analyzers, Analyzer};
use crate::backup::BackupStore;
use crate::config::HealConfig;
use crate::correctors::{apply_fixes, default_correctors, plan_fixes, Corrector};
use crate::detector::Detector;
use crate::domain::error::Result;
use crate::domain::fix::Fix;
use crate::domain::issue::{Issue, IssueStatus, Severity};
use crate::domain::model::ProjectModel;
use crate::events::{EventSink, RunState, TransitionEvent};
use crate::obs;
use crate::presets::{Preset, PresetManager};
use crate::registry::{IssueRegistry, ObserveOutcome};
use crate::report::{write_report_artifact, FixRecord, RunReport};
use crate::rules::RuleSet;
use crate::validation::{
    failure_issues, probe_targets, SandboxValidator, ValidationOutcome, ValidationReport, Validator,
};

/// Drives one healing run from detection to report.
pub struct Orchestrator {
    config: HealConfig,
    rules: RuleSet,
    run_id: Uuid,
    validator: Box<dyn Validator>,
    correctors: Vec<Box<dyn Corrector>>,
}

impl Orchestrator {
    pub fn new(config: HealConfig) -> Result<Self> {
        let preset: Option<Preset> = match &config.preset {
            Some(name) => Some(PresetManager::resolve(name)?),
            None => None,
        };
        let rules = PresetManager::effective_ruleset(preset.as_ref(), &config.rule_overrides);
        let validator = Box::new(SandboxValidator::new(
            config.sandbox_timeout(),
            config.simulate_auth,
        ));
        Ok(Self {
            config,
            rules,
            run_id: Uuid::new_v4(),
            validator,
            correctors: default_correctors(),
        })
    }

    /// Swap in a different validator (tests use an in-memory fake).
    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute the run. Every state transition is delivered to `sink`
    /// exactly once, in order.
    pub async fn run(&self, sink: &mut dyn EventSink) -> Result<RunReport> {
        let run_id = self.run_id.to_string();
        let _span = obs::RunSpan::enter(&run_id);
        let started_at = Utc::now();
        obs::emit_run_started(
            &run_id,
            &self.config.root_path.display().to_string(),
            self.config.preset.as_deref(),
        );

        let mut seq = 0u64;
        let mut trail: Vec<TransitionEvent> = Vec::new();
        let mut emit = |trail: &mut Vec<TransitionEvent>,
                        sink: &mut dyn EventSink,
                        state: RunState,
                        detail: Option<String>| {
            obs::emit_state_transition(&run_id, &state.to_string(), seq);
            let event = TransitionEvent {
                run_id: self.run_id,
                seq,
                state,
                at: Utc::now(),
                detail,
            };
            trail.push(event.clone());
            sink.emit(event);
            seq += 1;
        };

        emit(&mut trail, sink, RunState::Idle, None);

        emit(&mut trail, sink, RunState::Detecting, None);
        let model = Arc::new(
            Detector::new(&self.config.root_path, self.config.min_route_confidence).detect()?,
        );
        let store = BackupStore::open(&self.config.root_path, &self.config.state_dir())?;

        let mut registry = IssueRegistry::new();
        let mut fixes: Vec<Fix> = Vec::new();
        let mut iterations_used = 0u32;

        let terminal = loop {
            iterations_used += 1;

            emit(
                &mut trail,
                sink,
                RunState::Diagnosing,
                Some(format!("iteration {iterations_used}")),
            );
            let findings = self.diagnose(&model).await;
            let mut newly_observed = 0usize;
            let found_ids: Vec<_> = findings.iter().map(|i| i.id.clone()).collect();
            for issue in findings {
                let outcome = registry.observe(issue.clone());
                if matches!(outcome, ObserveOutcome::Inserted | ObserveOutcome::Reopened) {
                    newly_observed += 1;
                    obs::emit_issue_observed(
                        &run_id,
                        issue.id.as_str(),
                        &issue.signature,
                        &issue.severity.to_string(),
                    );
                }
            }
            // Open static findings that diagnosis no longer sees were fixed
            // outside the loop or by an earlier pass; close them out.
            let vanished: Vec<_> = registry
                .open_issues()
                .filter(|i| {
                    !i.signature.starts_with("validation.")
                        && !found_ids.contains(&i.id)
                        && matches!(
                            i.status,
                            IssueStatus::Detected | IssueStatus::Planned | IssueStatus::Failed
                        )
                })
                .map(|i| i.id.clone())
                .collect();
            for id in vanished {
                registry.transition(&id, IssueStatus::Verified, Some("not re-detected".into()))?;
            }

            if self.config.check_only {
                break if registry.has_open_above(Severity::Warning) {
                    RunState::PartialFailure
                } else {
                    RunState::Resolved
                };
            }

            emit(&mut trail, sink, RunState::Healing, None);
            let open: Vec<Issue> = registry
                .issues_in_status(IssueStatus::Detected)
                .into_iter()
                .chain(registry.issues_in_status(IssueStatus::Failed))
                .cloned()
                .collect();
            let planned = plan_fixes(&open, &model, &self.correctors);
            for fix in &planned {
                // Failed fixes re-enter planning before application.
                if registry
                    .get(&fix.issue_id)
                    .is_some_and(|i| i.status == IssueStatus::Failed)
                {
                    registry.transition(&fix.issue_id, IssueStatus::Planned, Some("replanned".into()))?;
                } else {
                    registry.transition(&fix.issue_id, IssueStatus::Planned, None)?;
                }
            }
            let planned_count = planned.len();
            let outcome = apply_fixes(planned, &store, &self.config.root_path)?;
            for fix in &outcome.applied {
                registry.transition(&fix.issue_id, IssueStatus::Applied, Some(fix.description.clone()))?;
                obs::emit_fix_applied(&run_id, fix.issue_id.as_str(), &fix.patch.file.display().to_string());
            }
            for (id, reason) in &outcome.conflicted {
                registry.transition(id, IssueStatus::Failed, Some(reason.clone()))?;
            }
            let applied_count = outcome.applied.len();
            fixes.extend(outcome.applied);

            emit(&mut trail, sink, RunState::Validating, None);
            let targets = probe_targets(&model);
            let report = self.validator.validate(&model, &targets).await;
            obs::emit_validation_finished(
                &run_id,
                &format!("{:?}", report.outcome),
                report.failures.len(),
                report.crashed,
            );
            let runtime_findings = failure_issues(&model, &report);
            for issue in runtime_findings {
                if matches!(
                    registry.observe(issue.clone()),
                    ObserveOutcome::Inserted | ObserveOutcome::Reopened
                ) {
                    newly_observed += 1;
                    obs::emit_issue_observed(
                        &run_id,
                        issue.id.as_str(),
                        &issue.signature,
                        &issue.severity.to_string(),
                    );
                }
            }
            self.settle_applied(&mut registry, &mut fixes, &report)?;

            if report.healthy() && !registry.has_open_above(Severity::Warning) {
                break RunState::Resolved;
            }
            if iterations_used >= self.config.max_iterations {
                info!(iterations = iterations_used, "iteration bound reached");
                break RunState::Escalated;
            }
            if newly_observed == 0 && applied_count == 0 && planned_count == 0 {
                // No progress is possible; hand the remainder to a human.
                break RunState::PartialFailure;
            }
        };

        emit(&mut trail, sink, terminal, None);

        let report = RunReport {
            run_id: self.run_id,
            root: self.config.root_path.clone(),
            started_at,
            finished_at: Utc::now(),
            terminal_state: terminal,
            iterations_used,
            issues: registry.snapshot(),
            fixes: fixes.iter().map(FixRecord::from).collect(),
            open_by_severity: registry.open_by_severity(),
            events: trail.clone(),
        };
        write_report_artifact(&self.config.state_dir().join("reports"), &report)?;
        emit(&mut trail, sink, RunState::Reported, None);
        obs::emit_run_finished(
            &run_id,
            &terminal.to_string(),
            iterations_used,
            registry.open_count(),
        );
        Ok(report)
    }

    /// Run the analyzer chain concurrently on the blocking pool.
    async fn diagnose(&self, model: &Arc<ProjectModel>) -> Vec<Issue> {
        let rules = Arc::new(self.rules.clone());
        let handles: Vec<_> = default_analyzers()
            .into_iter()
            .map(|analyzer: Box<dyn Analyzer>| {
                let model = Arc::clone(model);
                let rules = Arc::clone(&rules);
                tokio::task::spawn_blocking(move || analyzer.analyze(&model, &rules))
            })
            .collect();

        let mut issues = Vec::new();
        for result in join_all(handles).await {
            match result {
                Ok(found) => issues.extend(found),
                Err(e) => warn!(error = %e, "analyzer task failed"),
            }
        }
        issues
    }

    /// Decide the fate of `Applied` issues after a validation pass: a clean
    /// run verifies them; a run whose failures do not mention them verifies
    /// them too.
    fn settle_applied(
        &self,
        registry: &mut IssueRegistry,
        fixes: &mut [Fix],
        report: &ValidationReport,
    ) -> Result<()> {
        if report.outcome != ValidationOutcome::Completed {
            return Ok(());
        }
        let applied: Vec<Issue> = registry
            .issues_in_status(IssueStatus::Applied)
            .into_iter()
            .cloned()
            .collect();
        for issue in applied {
            let implicated = report.crashed
                || report.failures.iter().any(|f| {
                    f.endpoint == issue.subject
                        || f.signature.contains(issue.subject.as_str())
                        || issue.subject.contains(&f.endpoint)
                });
            if !implicated {
                registry.transition(
                    &issue.id,
                    IssueStatus::Verified,
                    Some("validated".into()),
                )?;
                for fix in fixes.iter_mut().filter(|f| f.issue_id == issue.id) {
                    fix.verified = true;
                }
            }
        }
        // Runtime findings from earlier passes clear once a pass is clean.
        if report.failures.is_empty() && !report.crashed {
            let stale: Vec<_> = registry
                .open_issues()
                .filter(|i| i.signature.starts_with("validation."))
                .map(|i| i.id.clone())
                .collect();
            for id in stale {
                registry.transition(&id, IssueStatus::Verified, Some("runtime clean".into()))?;
            }
        }
        Ok(())
    }
}
