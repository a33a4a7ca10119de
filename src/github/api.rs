//! The GitHub API surface used by the dispatch pipeline.
//!
//! `GitHubApi` is the seam between the worker and the real GitHub client.
//! The production implementation is `WorkflowClient`; tests substitute mocks
//! that script run appearance and completion.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};

use super::error::GitHubApiError;
use crate::types::{CheckRunId, RepoId, RunId, Sha};

/// The execution status of a workflow run, as reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The run is waiting for a runner (includes `waiting`, `requested`
    /// and `pending` in GitHub's vocabulary).
    Queued,

    /// The run is executing.
    InProgress,

    /// The run has finished; the conclusion says how.
    Completed,

    /// A status string this code does not recognize.
    Unknown,
}

impl RunStatus {
    /// Parses GitHub's status string.
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" | "waiting" | "requested" | "pending" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Unknown,
        }
    }

    /// Returns true if the run has finished executing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// The conclusion of a completed workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    ActionRequired,
    Neutral,
    Skipped,
    Stale,
    StartupFailure,
    /// A conclusion string this code does not recognize.
    Unknown,
}

impl RunConclusion {
    /// Parses GitHub's conclusion string.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => RunConclusion::Success,
            "failure" => RunConclusion::Failure,
            "cancelled" => RunConclusion::Cancelled,
            "timed_out" => RunConclusion::TimedOut,
            "action_required" => RunConclusion::ActionRequired,
            "neutral" => RunConclusion::Neutral,
            "skipped" => RunConclusion::Skipped,
            "stale" => RunConclusion::Stale,
            "startup_failure" => RunConclusion::StartupFailure,
            _ => RunConclusion::Unknown,
        }
    }

    /// The string GitHub uses for this conclusion.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::TimedOut => "timed_out",
            RunConclusion::ActionRequired => "action_required",
            RunConclusion::Neutral => "neutral",
            RunConclusion::Skipped => "skipped",
            RunConclusion::Stale => "stale",
            RunConclusion::StartupFailure => "startup_failure",
            RunConclusion::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow run as returned by the runs API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRun {
    /// GitHub's run id.
    pub id: RunId,

    /// The run's display title. Workflows that echo their `dispatch_id`
    /// input into `run-name` make themselves correlatable through this field.
    pub name: String,

    /// The branch the run executes on, absent for runs on tags.
    pub head_branch: Option<String>,

    /// Current execution status.
    pub status: RunStatus,

    /// Conclusion, present once `status` is `Completed`.
    pub conclusion: Option<RunConclusion>,

    /// Link to the run, used in check run output.
    pub html_url: String,

    /// When GitHub created the run.
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Returns true if the run completed with a `success` conclusion.
    pub fn succeeded(&self) -> bool {
        self.status.is_terminal() && self.conclusion == Some(RunConclusion::Success)
    }
}

/// The status of a check run we publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

impl CheckStatus {
    /// The string GitHub expects for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Queued => "queued",
            CheckStatus::InProgress => "in_progress",
            CheckStatus::Completed => "completed",
        }
    }
}

/// The conclusion of a check run we publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
}

impl CheckConclusion {
    /// The string GitHub expects for this conclusion.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckConclusion::Success => "success",
            CheckConclusion::Failure => "failure",
            CheckConclusion::Neutral => "neutral",
        }
    }
}

/// The content of a check run create or update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRunUpdate {
    /// Check run status.
    pub status: CheckStatus,

    /// Conclusion, required when `status` is `Completed`.
    pub conclusion: Option<CheckConclusion>,

    /// Title shown in the check run header.
    pub title: String,

    /// Markdown body shown under the title.
    pub summary: String,

    /// Link to the external run, when one is known.
    pub details_url: Option<String>,
}

/// Operations the dispatch pipeline needs from GitHub.
///
/// Implementations are expected to be cheap to clone or shared behind `Arc`,
/// since the worker pool executes jobs concurrently.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct ScriptedGitHub {
///     runs: Mutex<Vec<WorkflowRun>>,
/// }
///
/// impl GitHubApi for ScriptedGitHub {
///     async fn dispatch_workflow(&self, ...) -> Result<(), GitHubApiError> {
///         Ok(())
///     }
///     // ...
/// }
/// ```
pub trait GitHubApi: Send + Sync {
    /// Triggers a `workflow_dispatch` event for the given workflow file.
    ///
    /// GitHub returns no identifier for the run this creates; correlation
    /// happens afterwards via `list_workflow_runs`.
    fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow_file: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;

    /// Lists recent `workflow_dispatch` runs of a workflow file, newest first.
    ///
    /// Only runs created at or after `created_after` are returned.
    fn list_workflow_runs(
        &self,
        repo: &RepoId,
        workflow_file: &str,
        created_after: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<WorkflowRun>, GitHubApiError>> + Send;

    /// Fetches a single workflow run by id.
    fn get_workflow_run(
        &self,
        repo: &RepoId,
        run_id: RunId,
    ) -> impl Future<Output = Result<WorkflowRun, GitHubApiError>> + Send;

    /// Creates a check run on the given commit and returns its id.
    fn create_check_run(
        &self,
        repo: &RepoId,
        name: &str,
        head_sha: &Sha,
        check: &CheckRunUpdate,
    ) -> impl Future<Output = Result<CheckRunId, GitHubApiError>> + Send;

    /// Updates a previously created check run.
    fn update_check_run(
        &self,
        repo: &RepoId,
        check_run_id: CheckRunId,
        check: &CheckRunUpdate,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;
}
