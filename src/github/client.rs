//! Octocrab-backed implementation of `GitHubApi`.
//!
//! All calls authenticate with installation tokens from `AppAuthenticator`.
//! The octocrab instance is rebuilt whenever the token rotates, which happens
//! about once an hour.
//!
//! The runs and check run endpoints are called through octocrab's generic
//! REST methods with our own request/response structs; the typed octocrab
//! API does not cover the `created` filter on run listings or dispatching
//! with arbitrary string inputs.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::api::{CheckRunUpdate, GitHubApi, RunConclusion, RunStatus, WorkflowRun};
use super::auth::AppAuthenticator;
use super::error::GitHubApiError;
use crate::types::{CheckRunId, RepoId, RunId, Sha};

/// Page size for run correlation queries. One dispatch window never produces
/// anywhere near this many runs of a single workflow file.
const RUNS_PER_PAGE: u32 = 50;

/// Request body for `POST .../actions/workflows/{file}/dispatches`.
#[derive(Serialize)]
struct DispatchRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    inputs: &'a BTreeMap<String, String>,
}

/// Response page for `GET .../actions/workflows/{file}/runs`.
#[derive(Deserialize)]
struct RunsPage {
    workflow_runs: Vec<RawRun>,
}

/// A workflow run as GitHub serializes it.
#[derive(Deserialize)]
struct RawRun {
    id: u64,
    name: Option<String>,
    display_title: Option<String>,
    head_branch: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl RawRun {
    fn into_run(self) -> WorkflowRun {
        WorkflowRun {
            id: RunId(self.id),
            // display_title carries the rendered run-name; name falls back
            // to the workflow's static name
            name: self.display_title.or(self.name).unwrap_or_default(),
            head_branch: self.head_branch,
            status: self
                .status
                .as_deref()
                .map(RunStatus::parse)
                .unwrap_or(RunStatus::Unknown),
            conclusion: self.conclusion.as_deref().map(RunConclusion::parse),
            html_url: self.html_url.unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

/// Request body for check run creation.
#[derive(Serialize)]
struct CreateCheckRunRequest<'a> {
    name: &'a str,
    head_sha: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details_url: Option<&'a str>,
    output: CheckOutput<'a>,
}

/// Request body for check run updates.
#[derive(Serialize)]
struct UpdateCheckRunRequest<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details_url: Option<&'a str>,
    output: CheckOutput<'a>,
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    title: &'a str,
    summary: &'a str,
}

/// Response body for check run creation; only the id matters here.
#[derive(Deserialize)]
struct CheckRunCreated {
    id: u64,
}

/// A `GitHubApi` implementation backed by octocrab and App authentication.
pub struct WorkflowClient {
    auth: AppAuthenticator,

    /// Octocrab built for the current installation token, rebuilt on rotation.
    client_cache: Mutex<Option<(String, Octocrab)>>,
}

impl WorkflowClient {
    /// Creates a client that authenticates through the given authenticator.
    pub fn new(auth: AppAuthenticator) -> Self {
        Self {
            auth,
            client_cache: Mutex::new(None),
        }
    }

    /// Returns an octocrab instance carrying a currently valid token.
    async fn client(&self) -> Result<Octocrab, GitHubApiError> {
        let token = self.auth.installation_token().await?;

        let mut cache = self.client_cache.lock().await;
        if let Some((cached_token, client)) = cache.as_ref() {
            if *cached_token == token {
                return Ok(client.clone());
            }
        }

        let client = match Octocrab::builder().personal_token(token.clone()).build() {
            Ok(client) => client,
            Err(e) => return Err(GitHubApiError::from_octocrab(e)),
        };
        *cache = Some((token, client.clone()));
        Ok(client)
    }
}

impl GitHubApi for WorkflowClient {
    fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow_file: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send {
        async move {
            let client = self.client().await?;
            let route = format!(
                "/repos/{}/{}/actions/workflows/{}/dispatches",
                repo.owner, repo.repo, workflow_file
            );
            let request = DispatchRequest { git_ref, inputs };

            // The dispatch endpoint answers 204 with an empty body, so this
            // goes through the raw call plus explicit error mapping instead
            // of the deserializing wrapper.
            match client._post(route, Some(&request)).await {
                Ok(response) => match octocrab::map_github_error(response).await {
                    Ok(_) => Ok(()),
                    Err(e) => Err(GitHubApiError::from_octocrab(e)),
                },
                Err(e) => Err(GitHubApiError::from_octocrab(e)),
            }
        }
    }

    fn list_workflow_runs(
        &self,
        repo: &RepoId,
        workflow_file: &str,
        created_after: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<WorkflowRun>, GitHubApiError>> + Send {
        async move {
            let client = self.client().await?;
            let route = format!(
                "/repos/{}/{}/actions/workflows/{}/runs?event=workflow_dispatch&created=%3E%3D{}&per_page={}",
                repo.owner,
                repo.repo,
                workflow_file,
                created_after.to_rfc3339_opts(SecondsFormat::Secs, true),
                RUNS_PER_PAGE,
            );

            let result: Result<RunsPage, _> = client.get(&route, None::<&()>).await;
            match result {
                Ok(page) => Ok(page
                    .workflow_runs
                    .into_iter()
                    .map(RawRun::into_run)
                    .filter(|run| run.created_at >= created_after)
                    .collect()),
                Err(e) => Err(GitHubApiError::from_octocrab(e)),
            }
        }
    }

    fn get_workflow_run(
        &self,
        repo: &RepoId,
        run_id: RunId,
    ) -> impl Future<Output = Result<WorkflowRun, GitHubApiError>> + Send {
        async move {
            let client = self.client().await?;
            let route = format!(
                "/repos/{}/{}/actions/runs/{}",
                repo.owner, repo.repo, run_id
            );

            let result: Result<RawRun, _> = client.get(&route, None::<&()>).await;
            match result {
                Ok(raw) => Ok(raw.into_run()),
                Err(e) => Err(GitHubApiError::from_octocrab(e)),
            }
        }
    }

    fn create_check_run(
        &self,
        repo: &RepoId,
        name: &str,
        head_sha: &Sha,
        check: &CheckRunUpdate,
    ) -> impl Future<Output = Result<CheckRunId, GitHubApiError>> + Send {
        async move {
            let client = self.client().await?;
            let route = format!("/repos/{}/{}/check-runs", repo.owner, repo.repo);
            let request = CreateCheckRunRequest {
                name,
                head_sha: head_sha.as_str(),
                status: check.status.as_str(),
                conclusion: check.conclusion.map(|c| c.as_str()),
                details_url: check.details_url.as_deref(),
                output: CheckOutput {
                    title: &check.title,
                    summary: &check.summary,
                },
            };

            let result: Result<CheckRunCreated, _> = client.post(&route, Some(&request)).await;
            match result {
                Ok(created) => Ok(CheckRunId(created.id)),
                Err(e) => Err(GitHubApiError::from_octocrab(e)),
            }
        }
    }

    fn update_check_run(
        &self,
        repo: &RepoId,
        check_run_id: CheckRunId,
        check: &CheckRunUpdate,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send {
        async move {
            let client = self.client().await?;
            let route = format!(
                "/repos/{}/{}/check-runs/{}",
                repo.owner, repo.repo, check_run_id
            );
            let request = UpdateCheckRunRequest {
                status: check.status.as_str(),
                conclusion: check.conclusion.map(|c| c.as_str()),
                details_url: check.details_url.as_deref(),
                output: CheckOutput {
                    title: &check.title,
                    summary: &check.summary,
                },
            };

            let result: Result<serde_json::Value, _> = client.patch(&route, Some(&request)).await;
            match result {
                Ok(_) => Ok(()),
                Err(e) => Err(GitHubApiError::from_octocrab(e)),
            }
        }
    }
}

impl fmt::Debug for WorkflowClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowClient")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}
