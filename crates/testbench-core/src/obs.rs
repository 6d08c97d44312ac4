//! Structured lifecycle events for a single test run.
//!
//! Every event is an `info!` (or `warn!`) record with an `event` field so
//! JSON log consumers can filter on it:
//! - `run.started`
//! - `run.stage`
//! - `run.failed`
//! - `run.finished`

use tracing::info;

/// Run-scoped span; attach it to the run future with
/// [`tracing::Instrument::instrument`].
pub fn run_span(run_id: &str, repo_url: &str) -> tracing::Span {
    tracing::info_span!("testbench.run", run_id = %run_id, repo_url = %repo_url)
}

pub fn emit_run_started(run_id: &str, repo_url: &str, container_id: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        repo_url = %repo_url,
        container_id = %container_id,
    );
}

/// A stage transition inside the run state machine.
pub fn emit_stage(run_id: &str, stage: &str) {
    info!(event = "run.stage", run_id = %run_id, stage = %stage);
}

/// The run moved to the absorbing error state.
pub fn emit_run_failed(run_id: &str, stage: &str, cause: &str) {
    tracing::warn!(event = "run.failed", run_id = %run_id, stage = %stage, cause = %cause);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, return_code: i64, passed: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        return_code = return_code,
        passed = passed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_and_events_do_not_panic() {
        let _guard = run_span("run-1", "https://github.com/acme/widgets").entered();
        emit_run_started("run-1", "https://github.com/acme/widgets", "c0ffee");
        emit_stage("run-1", "analyze");
        emit_run_failed("run-1", "install", "Failed to install dependencies");
        emit_run_finished("run-1", 12, 1, false);
    }
}
