//! Log output for `xkcd-deploy`.
//!
//! Logs always go to stderr: with `--json` the binary prints its command
//! result (endpoints, check report, doctor table) as a JSON document on
//! stdout, and that stream has to stay parseable even when log lines are JSON
//! too.
//!
//! Without `RUST_LOG` only the deploy crates log at the requested level;
//! everything else is held to warnings.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_TARGETS: &[&str] = &["xkcd_deploy", "xkcd_deploy_core", "cloud_bridge"];

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(LOG_TARGETS.iter().map(|target| format!("{}={}", target, level)));
    directives.join(",")
}

/// Install the global subscriber; later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
