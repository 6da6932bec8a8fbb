//! Structured lifecycle events for pipeline runs.
//!
//! Every run gets a span tagged with its `run_id`; stage boundaries are
//! emitted as `stage.started`, `stage.finished` and `stage.failed` events
//! inside it so a JSON log can be grouped per run.

use tracing::{error, info, Span};

use crate::error::DeployError;
use crate::stage::Stage;

/// Span for one run of `command`. Attach with `Instrument::instrument`.
pub fn run_span(run_id: &str, command: &str) -> Span {
    tracing::info_span!("xkcd_deploy.run", run_id = %run_id, command = %command)
}

pub fn emit_run_started(run_id: &str, command: &str) {
    info!(event = "run.started", run_id = %run_id, command = %command);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_stage_started(stage: Stage) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: Stage, duration_ms: u64) {
    info!(event = "stage.finished", stage = %stage, duration_ms = duration_ms);
}

/// Failure with its category and exit code; the error chain is the message.
pub fn emit_stage_failed(stage: Stage, err: &DeployError) {
    error!(
        event = "stage.failed",
        stage = %stage,
        category = err.category(),
        exit_code = err.exit_code(),
        error = %err,
    );
}
