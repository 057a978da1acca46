//! Validation: boot the healed application in a sandboxed child process and
//! probe its routes over HTTP.
//!
//! The whole pass runs under one wall-clock budget. A timeout is not a run
//! failure; it surfaces as a finding so the orchestrator can escalate.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::analyzers::scan;
use crate::domain::issue::{Category, Issue, Location, Severity};
use crate::domain::model::ProjectModel;

const PROBE_PORT: u16 = 5000;
const READINESS_POLL: Duration = Duration::from_millis(200);

/// One route to hit during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub path: String,
    pub endpoint: String,
}

/// Build probe targets from the current route surface. Dynamic path segments
/// get a placeholder value, so `/post/<int:post_id>` is probed as `/post/1`.
pub fn probe_targets(model: &ProjectModel) -> Vec<ProbeTarget> {
    let mut targets = Vec::new();
    let mut seen = BTreeSet::new();
    let mut files: Vec<PathBuf> = model.route_modules.iter().cloned().collect();
    files.push(model.entry_point.file.clone());
    for rel in files {
        let Ok(content) = std::fs::read_to_string(model.resolve(&rel)) else {
            continue;
        };
        for route in scan::parse_routes(&rel, &content) {
            if !seen.insert(route.handler.clone()) {
                continue;
            }
            targets.push(ProbeTarget {
                path: substitute_segments(&route.path),
                endpoint: route.handler,
            });
        }
    }
    targets
}

/// Replace each `<converter:name>` segment with a synthetic value.
fn substitute_segments(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => {
                let spec = &rest[open + 1..open + close];
                out.push_str(if spec.starts_with("int:") || spec.starts_with("float:") {
                    "1"
                } else {
                    "test"
                });
                rest = &rest[open + close + 1..];
            }
            None => {
                rest = &rest[open..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body_excerpt: String,
}

/// HTTP access used by the runner; faked in tests.
#[async_trait]
pub trait RequestClient: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<ProbeResponse>;
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> anyhow::Result<ProbeResponse>;
}

/// reqwest-backed client with a cookie store, so a login replay carries its
/// session into subsequent probes.
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { inner })
    }
}

async fn to_probe_response(resp: reqwest::Response) -> anyhow::Result<ProbeResponse> {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let body_excerpt = body.chars().take(400).collect();
    Ok(ProbeResponse {
        status,
        body_excerpt,
    })
}

#[async_trait]
impl RequestClient for HttpClient {
    async fn get(&self, url: &str) -> anyhow::Result<ProbeResponse> {
        to_probe_response(self.inner.get(url).send().await?).await
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> anyhow::Result<ProbeResponse> {
        to_probe_response(self.inner.post(url).form(form).send().await?).await
    }
}

/// What the application process left behind when it stopped.
#[derive(Debug, Default, Clone)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub crashed: bool,
}

/// A Flask app booted as a disposable child process.
pub struct ProcessSandbox {
    root: PathBuf,
    entry: PathBuf,
    child: Option<Child>,
}

impl ProcessSandbox {
    pub fn new(model: &ProjectModel) -> Self {
        Self {
            root: model.root.clone(),
            entry: model.entry_point.file.clone(),
            child: None,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{PROBE_PORT}")
    }

    /// Spawn the app and wait until its port accepts connections.
    pub async fn start(&mut self, budget: Duration) -> anyhow::Result<()> {
        let child = Command::new("python3")
            .arg(&self.entry)
            .current_dir(&self.root)
            .env("FLASK_RUN_PORT", PROBE_PORT.to_string())
            .env("FLASK_ENV", "production")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        self.child = Some(child);

        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if TcpStream::connect(("127.0.0.1", PROBE_PORT)).await.is_ok() {
                debug!(entry = %self.entry.display(), "sandboxed app is accepting connections");
                return Ok(());
            }
            if let Some(child) = &mut self.child {
                if let Some(status) = child.try_wait()? {
                    anyhow::bail!("application exited during startup with {status}");
                }
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("application did not open port {PROBE_PORT} in time");
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
    }

    /// Kill the app and collect its output.
    pub async fn stop(&mut self) -> SandboxOutput {
        let Some(mut child) = self.child.take() else {
            return SandboxOutput::default();
        };
        let crashed = matches!(child.try_wait(), Ok(Some(status)) if !status.success());
        let _ = child.kill().await;

        let mut out = SandboxOutput {
            crashed,
            ..SandboxOutput::default()
        };
        if let Some(mut stdout) = child.stdout.take() {
            let _ = stdout.read_to_string(&mut out.stdout).await;
        }
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_string(&mut out.stderr).await;
        }
        if let Ok(Some(status)) = child.try_wait() {
            out.exit_code = status.code();
        }
        out
    }
}

/// One probe that did not come back healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub endpoint: String,
    pub path: String,
    pub status: Option<u16>,
    /// Short text identifying the failure mode, fed to classification.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Completed,
    TimedOut,
    LaunchFailed,
}

/// Result of one validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub failures: Vec<ProbeFailure>,
    pub crashed: bool,
    /// Combined process output, excerpted for the run report.
    pub output: String,
}

impl ValidationReport {
    pub fn healthy(&self) -> bool {
        self.outcome == ValidationOutcome::Completed && self.failures.is_empty() && !self.crashed
    }
}

/// Map a runtime failure back to the subsystem that owns it.
pub fn classify_failure(signature: &str) -> Category {
    let lower = signature.to_lowercase();
    if lower.contains("templatenotfound") || lower.contains("template") || lower.contains("jinja") {
        Category::Templating
    } else if lower.contains("sqlalchemy")
        || lower.contains("operationalerror")
        || lower.contains("no such table")
        || lower.contains("no such column")
    {
        Category::Persistence
    } else if lower.contains("http_404") || lower.contains("http_500") || lower.contains("http_405")
    {
        Category::Routing
    } else {
        Category::Code
    }
}

/// Turn a validation report into registry findings.
pub fn failure_issues(model: &ProjectModel, report: &ValidationReport) -> Vec<Issue> {
    let anchor = Location::file(&model.entry_point.file);
    let mut issues = Vec::new();
    match report.outcome {
        ValidationOutcome::TimedOut => {
            issues.push(Issue::new(
                Category::Code,
                Severity::Error,
                anchor.clone(),
                "validation.timeout",
                "sandbox",
                "validation pass exceeded its time budget",
            ));
        }
        ValidationOutcome::LaunchFailed => {
            issues.push(Issue::new(
                Category::Code,
                Severity::Critical,
                anchor.clone(),
                "validation.launch_failed",
                "sandbox",
                &format!("application failed to start: {}", excerpt(&report.output)),
            ));
        }
        ValidationOutcome::Completed => {}
    }
    for failure in &report.failures {
        issues.push(Issue::new(
            classify_failure(&failure.signature),
            Severity::Error,
            anchor.clone(),
            &format!("validation.{}", failure.signature),
            &failure.endpoint,
            &format!(
                "probe of '{}' ({}) failed: {}",
                failure.endpoint, failure.path, failure.signature
            ),
        ));
    }
    issues
}

fn excerpt(s: &str) -> String {
    s.chars().take(200).collect()
}

/// Pluggable validation seam so the healing loop can be tested without a
/// Python runtime.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, model: &ProjectModel, targets: &[ProbeTarget]) -> ValidationReport;
}

/// Live validator: process sandbox plus HTTP probes.
pub struct SandboxValidator {
    timeout: Duration,
    simulate_auth: bool,
}

impl SandboxValidator {
    pub fn new(timeout: Duration, simulate_auth: bool) -> Self {
        Self {
            timeout,
            simulate_auth,
        }
    }

    async fn run_pass(
        &self,
        sandbox: &mut ProcessSandbox,
        model: &ProjectModel,
        targets: &[ProbeTarget],
    ) -> ValidationReport {
        // Half the budget may go to startup, the rest to probing.
        if let Err(e) = sandbox.start(self.timeout / 2).await {
            warn!(error = %e, "sandbox launch failed");
            let output = sandbox.stop().await;
            return ValidationReport {
                outcome: ValidationOutcome::LaunchFailed,
                failures: Vec::new(),
                crashed: true,
                output: format!("{e}\n{}{}", output.stdout, output.stderr),
            };
        }

        let client = match HttpClient::new() {
            Ok(c) => c,
            Err(e) => {
                let output = sandbox.stop().await;
                return ValidationReport {
                    outcome: ValidationOutcome::LaunchFailed,
                    failures: Vec::new(),
                    crashed: output.crashed,
                    output: format!("{e}"),
                };
            }
        };

        let base = sandbox.base_url();
        if self.simulate_auth && model.auth_mechanism.is_some() {
            login_replay(&client, &base, targets).await;
        }

        let mut failures = Vec::new();
        for target in targets {
            let url = format!("{base}{}", target.path);
            match client.get(&url).await {
                Ok(resp) if resp.status < 400 => {
                    debug!(endpoint = %target.endpoint, status = resp.status, "probe ok");
                }
                Ok(resp) => {
                    failures.push(ProbeFailure {
                        endpoint: target.endpoint.clone(),
                        path: target.path.clone(),
                        status: Some(resp.status),
                        signature: body_signature(resp.status, &resp.body_excerpt),
                    });
                }
                Err(e) => {
                    failures.push(ProbeFailure {
                        endpoint: target.endpoint.clone(),
                        path: target.path.clone(),
                        status: None,
                        signature: format!("connection_error: {e}"),
                    });
                }
            }
        }

        let output = sandbox.stop().await;
        info!(
            probes = targets.len(),
            failures = failures.len(),
            crashed = output.crashed,
            "validation pass finished"
        );
        ValidationReport {
            outcome: ValidationOutcome::Completed,
            failures,
            crashed: output.crashed,
            output: format!("{}{}", output.stdout, output.stderr),
        }
    }
}

/// Prefer the error text over the bare status when the body names a cause.
fn body_signature(status: u16, body: &str) -> String {
    for marker in ["TemplateNotFound", "OperationalError", "sqlalchemy", "jinja2"] {
        if body.contains(marker) {
            return format!("http_{status}: {marker}");
        }
    }
    format!("http_{status}")
}

async fn login_replay(client: &dyn RequestClient, base: &str, targets: &[ProbeTarget]) {
    let Some(login) = targets.iter().find(|t| t.endpoint == "login") else {
        return;
    };
    let form = vec![
        ("username".to_string(), "webmend".to_string()),
        ("password".to_string(), "webmend".to_string()),
    ];
    match client.post_form(&format!("{base}{}", login.path), &form).await {
        Ok(resp) => debug!(status = resp.status, "login replay sent"),
        Err(e) => debug!(error = %e, "login replay failed"),
    }
}

/// Report for a pass that blew its budget, keeping whatever the process
/// wrote. That output is often the only diagnostic evidence (an app that
/// hangs after printing a traceback, for example).
fn timed_out_report(output: SandboxOutput) -> ValidationReport {
    ValidationReport {
        outcome: ValidationOutcome::TimedOut,
        failures: Vec::new(),
        crashed: output.crashed,
        output: format!("{}{}", output.stdout, output.stderr),
    }
}

#[async_trait]
impl Validator for SandboxValidator {
    async fn validate(&self, model: &ProjectModel, targets: &[ProbeTarget]) -> ValidationReport {
        // The sandbox lives outside the timed future: cancelling the pass
        // must still let us kill the child and drain its pipes.
        let mut sandbox = ProcessSandbox::new(model);
        match tokio::time::timeout(self.timeout, self.run_pass(&mut sandbox, model, targets)).await
        {
            Ok(report) => report,
            Err(_) => {
                warn!("validation pass exceeded its budget");
                timed_out_report(sandbox.stop().await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_subsystems() {
        assert_eq!(
            classify_failure("http_500: TemplateNotFound"),
            Category::Templating
        );
        assert_eq!(
            classify_failure("http_500: OperationalError"),
            Category::Persistence
        );
        assert_eq!(classify_failure("http_404"), Category::Routing);
        assert_eq!(classify_failure("connection_error: reset"), Category::Code);
    }

    #[test]
    fn dynamic_segments_get_placeholder_values() {
        assert_eq!(substitute_segments("/"), "/");
        assert_eq!(substitute_segments("/post/<int:post_id>"), "/post/1");
        assert_eq!(substitute_segments("/user/<username>/edit"), "/user/test/edit");
        assert_eq!(
            substitute_segments("/a/<int:x>/b/<slug:y>"),
            "/a/1/b/test"
        );
    }

    #[test]
    fn healthy_report_requires_completed_and_clean() {
        let report = ValidationReport {
            outcome: ValidationOutcome::Completed,
            failures: Vec::new(),
            crashed: false,
            output: String::new(),
        };
        assert!(report.healthy());

        let crashed = ValidationReport {
            crashed: true,
            ..report.clone()
        };
        assert!(!crashed.healthy());
    }

    #[test]
    fn timeout_becomes_a_finding() {
        let model = test_model();
        let report = ValidationReport {
            outcome: ValidationOutcome::TimedOut,
            failures: Vec::new(),
            crashed: false,
            output: String::new(),
        };
        let issues = failure_issues(&model, &report);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].signature, "validation.timeout");
    }

    #[test]
    fn timed_out_report_keeps_process_output() {
        let report = timed_out_report(SandboxOutput {
            stdout: "Serving Flask app\n".to_string(),
            stderr: "Traceback (most recent call last):\n  OperationalError\n".to_string(),
            exit_code: None,
            crashed: true,
        });
        assert_eq!(report.outcome, ValidationOutcome::TimedOut);
        assert!(report.crashed);
        assert!(report.output.contains("Serving Flask app"));
        assert!(report.output.contains("OperationalError"));
    }

    #[test]
    fn probe_failures_classified_into_issues() {
        let model = test_model();
        let report = ValidationReport {
            outcome: ValidationOutcome::Completed,
            failures: vec![ProbeFailure {
                endpoint: "index".to_string(),
                path: "/".to_string(),
                status: Some(500),
                signature: "http_500: TemplateNotFound".to_string(),
            }],
            crashed: false,
            output: String::new(),
        };
        let issues = failure_issues(&model, &report);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, Category::Templating);
        assert_eq!(issues[0].subject, "index");
    }

    fn test_model() -> ProjectModel {
        use crate::domain::model::*;
        ProjectModel {
            root: "/tmp/app".into(),
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
}
