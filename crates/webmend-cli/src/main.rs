//! Webmend - self-healing static analysis for convention-driven web projects.
//!
//! ## Commands
//!
//! - `run`: Detect, diagnose, heal, and validate a project
//! - `presets`: List built-in rule presets
//! - `report`: Print a previously written run report, verifying its digest

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use webmend_core::{
    read_report_artifact, rollback_fixes, BackupStore, HealConfig, Orchestrator, PresetManager,
    RuleOverride, RunReport, VecSink,
};

#[derive(Parser)]
#[command(name = "webmend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Self-healing static analysis for Flask-convention projects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full heal loop against a project
    Run {
        /// Project root to analyze
        #[arg(default_value = ".")]
        project_path: PathBuf,

        /// Built-in preset name or path to a preset JSON file
        #[arg(short, long)]
        preset: Option<String>,

        /// Upper bound on diagnose/heal/validate iterations
        #[arg(long, default_value_t = 3)]
        max_iterations: u32,

        /// Replay a login before probing when the project uses auth
        #[arg(long)]
        simulate_auth: bool,

        /// Sandbox validation budget, in seconds
        #[arg(long, default_value_t = 30)]
        sandbox_timeout: u64,

        /// Diagnose only; plan and apply no fixes
        #[arg(long)]
        check_only: bool,

        /// Disable a rule by key (repeatable)
        #[arg(long = "disable-rule", value_name = "KEY")]
        disabled_rules: Vec<String>,

        /// Minimum entry-point confidence accepted during detection
        #[arg(long, default_value_t = 0.3)]
        min_confidence: f64,

        /// State directory for backups and reports (default: PROJECT/.webmend)
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Print the full run report as JSON instead of a summary
        #[arg(long)]
        report_json: bool,
    },

    /// List built-in presets
    Presets,

    /// Print a stored run report after verifying its digest sidecar
    Report {
        /// Path to a run-<id>.json artifact
        path: PathBuf,
    },

    /// Undo every fix a run applied, restoring files from their backups
    Rollback {
        /// Path to the run-<id>.json artifact of the run to undo
        report: PathBuf,

        /// Project root the run healed
        #[arg(default_value = ".")]
        project_path: PathBuf,

        /// State directory used by the run (default: PROJECT/.webmend)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    webmend_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            project_path,
            preset,
            max_iterations,
            simulate_auth,
            sandbox_timeout,
            check_only,
            disabled_rules,
            min_confidence,
            state_dir,
            report_json,
        } => {
            cmd_run(RunArgs {
                project_path,
                preset,
                max_iterations,
                simulate_auth,
                sandbox_timeout,
                check_only,
                disabled_rules,
                min_confidence,
                state_dir,
                report_json,
            })
            .await
        }
        Commands::Presets => cmd_presets(),
        Commands::Report { path } => cmd_report(&path),
        Commands::Rollback {
            report,
            project_path,
            state_dir,
        } => cmd_rollback(&report, &project_path, state_dir),
    }
}

struct RunArgs {
    project_path: PathBuf,
    preset: Option<String>,
    max_iterations: u32,
    simulate_auth: bool,
    sandbox_timeout: u64,
    check_only: bool,
    disabled_rules: Vec<String>,
    min_confidence: f64,
    state_dir: Option<PathBuf>,
    report_json: bool,
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let mut overrides = BTreeMap::new();
    for key in args.disabled_rules {
        overrides.insert(key, RuleOverride::disabled());
    }

    let mut config = HealConfig::new(&args.project_path);
    config.preset = args.preset;
    config.max_iterations = args.max_iterations;
    config.simulate_auth = args.simulate_auth;
    config.sandbox_timeout_secs = args.sandbox_timeout;
    config.check_only = args.check_only;
    config.rule_overrides = overrides;
    config.min_route_confidence = args.min_confidence;
    config.state_dir = args.state_dir;

    let orchestrator = Orchestrator::new(config).context("Failed to build heal configuration")?;
    let mut sink = VecSink::default();
    let report = orchestrator
        .run(&mut sink)
        .await
        .context("Heal run failed")?;

    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("run:        {}", report.run_id);
    println!("terminal:   {}", report.terminal_state);
    println!("iterations: {}", report.iterations_used);
    let applied = report.fixes.iter().filter(|f| f.applied).count();
    let verified = report.fixes.iter().filter(|f| f.verified).count();
    println!("fixes:      {applied} applied, {verified} verified");
    if report.open_by_severity.is_empty() {
        println!("open:       none");
    } else {
        for (severity, count) in &report.open_by_severity {
            println!("open:       {count} {severity}");
        }
    }
    for issue in report.issues.iter().filter(|i| i.is_open()) {
        println!(
            "  [{}] {} {} ({}:{})",
            issue.severity,
            issue.signature,
            issue.subject,
            issue.location.file.display(),
            issue.location.lines.map(|(s, _)| s).unwrap_or(0),
        );
    }
}

fn cmd_presets() -> Result<()> {
    for name in PresetManager::BUILTIN {
        let preset = PresetManager::resolve(name)?;
        println!("{:<12} {}", preset.name, preset.description);
    }
    Ok(())
}

fn cmd_report(path: &PathBuf) -> Result<()> {
    let report = read_report_artifact(path)
        .with_context(|| format!("Failed to read report at {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_rollback(
    report_path: &PathBuf,
    project_path: &PathBuf,
    state_dir: Option<PathBuf>,
) -> Result<()> {
    let report = read_report_artifact(report_path)
        .with_context(|| format!("Failed to read report at {}", report_path.display()))?;
    let state_dir = state_dir.unwrap_or_else(|| project_path.join(".webmend"));
    let store = BackupStore::open(project_path, &state_dir)?;
    let restored = rollback_fixes(&store, &report.fixes)?;
    println!("Rolled back {restored} fixes from run {}", report.run_id);
    Ok(())
}
