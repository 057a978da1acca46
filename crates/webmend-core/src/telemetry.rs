//! Tracing setup for healer binaries.
//!
//! Validation probes an app over HTTP, so the client stack would flood a
//! `debug` run with connection chatter. The default filter caps those
//! targets at `warn` and leaves webmend's own `run.*`, `issue.*`, and
//! `fix.*` events at the requested level. `RUST_LOG` overrides everything.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets whose chatter would drown healing-run events during probing.
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "rustls"];

fn default_directives(level: Level) -> String {
    let mut directives = level.as_str().to_ascii_lowercase();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=warn"));
    }
    directives
}

/// Install the global subscriber for a healing run.
///
/// `json` switches to newline-delimited JSON log lines. The global
/// subscriber can only be set once per process; later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).compact())
            .try_init()
            .ok();
    }
}
