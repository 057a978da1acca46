//! Structured observability hooks for healing-run lifecycle events.
//!
//! Events are emitted at `info!` level under the subscriber configured by
//! [`crate::telemetry::init_tracing`].

use tracing::info;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("webmend.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: healing run started against a project root.
pub fn emit_run_started(run_id: &str, root: &str, preset: Option<&str>) {
    info!(event = "run.started", run_id = %run_id, root = %root, preset = preset.unwrap_or("none"));
}

/// Emit event: the orchestrator moved to a new state.
pub fn emit_state_transition(run_id: &str, state: &str, seq: u64) {
    info!(event = "run.state", run_id = %run_id, state = %state, seq = seq);
}

/// Emit event: a finding entered or re-entered the ledger.
pub fn emit_issue_observed(run_id: &str, issue_id: &str, signature: &str, severity: &str) {
    info!(
        event = "issue.observed",
        run_id = %run_id,
        issue_id = %issue_id,
        signature = %signature,
        severity = %severity,
    );
}

/// Emit event: a fix landed on disk.
pub fn emit_fix_applied(run_id: &str, issue_id: &str, file: &str) {
    info!(event = "fix.applied", run_id = %run_id, issue_id = %issue_id, file = %file);
}

/// Emit event: a validation pass finished.
pub fn emit_validation_finished(run_id: &str, outcome: &str, failures: usize, crashed: bool) {
    info!(
        event = "validation.finished",
        run_id = %run_id,
        outcome = %outcome,
        failures = failures,
        crashed = crashed,
    );
}

/// Emit event: run finished on a terminal state.
pub fn emit_run_finished(run_id: &str, terminal: &str, iterations: u32, open_issues: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        terminal = %terminal,
        iterations = iterations,
        open_issues = open_issues,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_enters_without_panic() {
        let _span = RunSpan::enter("test-run-id");
    }
}
