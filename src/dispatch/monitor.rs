//! Run monitoring.
//!
//! Once correlation has pinned down the run a dispatch created, the monitor
//! polls that run until GitHub reports a terminal status. A run that stays
//! unfinished past the window is handed back as [`RunOutcome::TimedOut`] so
//! the caller can report it; the run itself keeps going on GitHub's side.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::github::{
    retry_with_backoff, GitHubApi, GitHubApiError, RetryConfig, RetryResult, RunConclusion,
    WorkflowRun,
};
use crate::types::{RepoId, RunId};

/// Timing for the monitoring poll loop.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// How often the run is polled.
    pub poll_interval: Duration,

    /// How long to wait for the run to finish before giving up.
    pub timeout: Duration,

    /// Retry behavior for each individual status call.
    pub retry: RetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            timeout: Duration::from_secs(1800),
            retry: RetryConfig::POLLING,
        }
    }
}

/// How a monitored run ended, from the router's point of view.
#[derive(Debug)]
pub enum RunOutcome {
    /// The run completed with a `success` conclusion.
    Succeeded(WorkflowRun),

    /// The run completed with any other conclusion.
    Failed {
        run: WorkflowRun,
        conclusion: RunConclusion,
    },

    /// The run was still going when the monitoring window closed.
    TimedOut,
}

/// Errors ending a monitoring attempt.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A status call failed permanently.
    #[error(transparent)]
    Api(#[from] GitHubApiError),

    /// Shutdown was requested while waiting.
    #[error("monitoring cancelled")]
    Cancelled,
}

/// Polls `run_id` until it reaches a terminal status or the window closes.
///
/// Transient status-call failures are tolerated like in correlation; only a
/// permanent failure ends the attempt early.
#[instrument(skip_all, fields(run_id = %run_id, repo = %repo))]
pub async fn await_completion<G: GitHubApi>(
    api: &G,
    repo: &RepoId,
    run_id: RunId,
    config: &MonitorConfig,
    cancel: &CancellationToken,
) -> Result<RunOutcome, MonitorError> {
    let deadline = Instant::now() + config.timeout;

    loop {
        let status = retry_with_backoff(config.retry, || api.get_workflow_run(repo, run_id)).await;

        match status {
            RetryResult::Success(run) => {
                if run.status.is_terminal() {
                    // Completed runs normally carry a conclusion; a missing
                    // one maps to Unknown, which is not success.
                    let conclusion = run.conclusion.unwrap_or(RunConclusion::Unknown);
                    debug!(conclusion = %conclusion, "run reached terminal status");

                    return Ok(if conclusion == RunConclusion::Success {
                        RunOutcome::Succeeded(run)
                    } else {
                        RunOutcome::Failed { run, conclusion }
                    });
                }
            }
            RetryResult::ExhaustedRetries {
                last_error,
                attempts,
            } => {
                warn!(attempts, error = %last_error, "run status check failed, polling again");
            }
            RetryResult::PermanentError(e) => return Err(MonitorError::Api(e)),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(RunOutcome::TimedOut);
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            _ = tokio::time::sleep(remaining.min(config.poll_interval)) => {}
        }
    }
}
