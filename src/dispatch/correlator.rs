//! Run correlation.
//!
//! The `workflow_dispatch` API returns 204 with no run handle, so the only
//! way to find the run a dispatch created is to plant a fresh UUID in the
//! workflow's inputs and poll the run listing until a run whose display
//! title contains that UUID appears. Workflows cooperate by echoing the
//! `dispatch_id` input into their `run-name`.
//!
//! A run that never appears (workflow deleted between validation and
//! dispatch, run-name not wired up, GitHub backlog) ends correlation with a
//! timeout rather than waiting forever.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::github::{
    retry_with_backoff, GitHubApi, GitHubApiError, RetryConfig, RetryResult, WorkflowRun,
};
use crate::types::{DispatchId, RepoId};

/// Timing for the correlation poll loop.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationConfig {
    /// How often the run listing is polled.
    pub poll_interval: Duration,

    /// How long to wait for the run to appear before giving up.
    pub timeout: Duration,

    /// Retry behavior for each individual listing call.
    pub retry: RetryConfig,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
            retry: RetryConfig::POLLING,
        }
    }
}

/// Errors ending a correlation attempt.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// No run carrying the dispatch id appeared in time.
    #[error("no run matching dispatch {dispatch_id} appeared within {waited:?}")]
    Timeout {
        dispatch_id: DispatchId,
        waited: Duration,
    },

    /// A listing call failed permanently.
    #[error(transparent)]
    Api(#[from] GitHubApiError),

    /// Shutdown was requested while waiting.
    #[error("correlation cancelled")]
    Cancelled,
}

/// Polls the run listing until a run carrying `dispatch_id` appears.
///
/// Only runs created at or after `since` are considered; the caller derives
/// that cutoff from the dispatch record so clock skew cannot hide the run.
/// Transient listing failures are tolerated for the whole window, since the
/// next tick repeats the query anyway. Permanent failures end the attempt.
#[instrument(skip_all, fields(dispatch_id = %dispatch_id, repo = %repo, workflow_file))]
pub async fn await_run<G: GitHubApi>(
    api: &G,
    repo: &RepoId,
    workflow_file: &str,
    dispatch_id: DispatchId,
    since: DateTime<Utc>,
    config: &CorrelationConfig,
    cancel: &CancellationToken,
) -> Result<WorkflowRun, CorrelationError> {
    let deadline = Instant::now() + config.timeout;
    let marker = dispatch_id.to_string();

    loop {
        let listing = retry_with_backoff(config.retry, || {
            api.list_workflow_runs(repo, workflow_file, since)
        })
        .await;

        match listing {
            RetryResult::Success(runs) => {
                if let Some(run) = runs.into_iter().find(|run| run.name.contains(&marker)) {
                    debug!(run_id = %run.id, run_name = %run.name, "correlated dispatch to run");
                    return Ok(run);
                }
            }
            RetryResult::ExhaustedRetries {
                last_error,
                attempts,
            } => {
                warn!(attempts, error = %last_error, "run listing failed, polling again");
            }
            RetryResult::PermanentError(e) => return Err(CorrelationError::Api(e)),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CorrelationError::Timeout {
                dispatch_id,
                waited: config.timeout,
            });
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(CorrelationError::Cancelled),
            _ = tokio::time::sleep(remaining.min(config.poll_interval)) => {}
        }
    }
}
