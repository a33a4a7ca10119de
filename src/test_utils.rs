//! Shared test doubles for exercising the dispatch pipeline end to end.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::github::{
    CheckRunUpdate, GitHubApi, GitHubApiError, RunConclusion, RunStatus, WorkflowRun,
};
use crate::types::{CheckRunId, RepoId, RunId, Sha};

/// One `workflow_dispatch` call the mock accepted.
#[derive(Debug, Clone)]
pub struct RecordedDispatch {
    pub repo: RepoId,
    pub workflow_file: String,
    pub git_ref: String,
    pub inputs: BTreeMap<String, String>,
}

/// A scripted GitHub backend.
///
/// Every accepted dispatch is recorded. By default, listing runs fabricates
/// one in-progress run per recorded dispatch of that workflow file, named
/// after its `dispatch_id` input the way a cooperating workflow would name
/// itself, and fetching a run reports it completed with the configured
/// conclusion. Individual calls can be overridden by queueing results.
pub struct MockGitHub {
    pub dispatches: Mutex<Vec<RecordedDispatch>>,
    dispatch_results: Mutex<VecDeque<Result<(), GitHubApiError>>>,
    list_results: Mutex<VecDeque<Result<Vec<WorkflowRun>, GitHubApiError>>>,
    echo_runs: AtomicBool,
    run_conclusion: Mutex<RunConclusion>,
    created_checks: Mutex<Vec<(RepoId, String, Sha, CheckRunUpdate)>>,
    updated_checks: Mutex<Vec<(RepoId, CheckRunId, CheckRunUpdate)>>,
    next_check_id: AtomicU64,
}

impl Default for MockGitHub {
    fn default() -> Self {
        Self {
            dispatches: Mutex::new(Vec::new()),
            dispatch_results: Mutex::new(VecDeque::new()),
            list_results: Mutex::new(VecDeque::new()),
            echo_runs: AtomicBool::new(true),
            run_conclusion: Mutex::new(RunConclusion::Success),
            created_checks: Mutex::new(Vec::new()),
            updated_checks: Mutex::new(Vec::new()),
            next_check_id: AtomicU64::new(1),
        }
    }
}

impl MockGitHub {
    /// Queues the result of the next `dispatch_workflow` call.
    pub fn script_dispatch(&self, result: Result<(), GitHubApiError>) {
        self.dispatch_results.lock().unwrap().push_back(result);
    }

    /// Queues the result of the next `list_workflow_runs` call.
    pub fn script_listing(&self, result: Result<Vec<WorkflowRun>, GitHubApiError>) {
        self.list_results.lock().unwrap().push_back(result);
    }

    /// Stops fabricating runs from recorded dispatches; unscripted listings
    /// come back empty, as if no dispatched run ever surfaced.
    pub fn disable_run_echo(&self) {
        self.echo_runs.store(false, Ordering::SeqCst);
    }

    /// Sets the conclusion every fetched run completes with.
    pub fn set_run_conclusion(&self, conclusion: RunConclusion) {
        *self.run_conclusion.lock().unwrap() = conclusion;
    }

    pub fn dispatched(&self) -> Vec<RecordedDispatch> {
        self.dispatches.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(RepoId, String, Sha, CheckRunUpdate)> {
        self.created_checks.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<(RepoId, CheckRunId, CheckRunUpdate)> {
        self.updated_checks.lock().unwrap().clone()
    }

    fn fabricate_runs(&self, workflow_file: &str) -> Vec<WorkflowRun> {
        self.dispatches
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.workflow_file == workflow_file)
            .enumerate()
            .map(|(i, d)| {
                let id = 1000 + i as u64;
                WorkflowRun {
                    id: RunId(id),
                    name: format!(
                        "{} [{}]",
                        d.workflow_file,
                        d.inputs.get("dispatch_id").cloned().unwrap_or_default()
                    ),
                    head_branch: Some(d.git_ref.clone()),
                    status: RunStatus::InProgress,
                    conclusion: None,
                    html_url: format!("https://github.com/{}/actions/runs/{}", d.repo, id),
                    created_at: Utc::now(),
                }
            })
            .collect()
    }
}

impl GitHubApi for MockGitHub {
    fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow_file: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send {
        let result = self
            .dispatch_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            self.dispatches.lock().unwrap().push(RecordedDispatch {
                repo: repo.clone(),
                workflow_file: workflow_file.to_string(),
                git_ref: git_ref.to_string(),
                inputs: inputs.clone(),
            });
        }
        async move { result }
    }

    fn list_workflow_runs(
        &self,
        _repo: &RepoId,
        workflow_file: &str,
        _created_after: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<WorkflowRun>, GitHubApiError>> + Send {
        let scripted = self.list_results.lock().unwrap().pop_front();
        let result = match scripted {
            Some(result) => result,
            None if self.echo_runs.load(Ordering::SeqCst) => Ok(self.fabricate_runs(workflow_file)),
            None => Ok(Vec::new()),
        };
        async move { result }
    }

    fn get_workflow_run(
        &self,
        repo: &RepoId,
        run_id: RunId,
    ) -> impl Future<Output = Result<WorkflowRun, GitHubApiError>> + Send {
        let conclusion = *self.run_conclusion.lock().unwrap();
        let run = WorkflowRun {
            id: run_id,
            name: "completed run".to_string(),
            head_branch: Some("main".to_string()),
            status: RunStatus::Completed,
            conclusion: Some(conclusion),
            html_url: format!("https://github.com/{}/actions/runs/{}", repo, run_id),
            created_at: Utc::now(),
        };
        async move { Ok(run) }
    }

    fn create_check_run(
        &self,
        repo: &RepoId,
        name: &str,
        head_sha: &Sha,
        check: &CheckRunUpdate,
    ) -> impl Future<Output = Result<CheckRunId, GitHubApiError>> + Send {
        self.created_checks.lock().unwrap().push((
            repo.clone(),
            name.to_string(),
            head_sha.clone(),
            check.clone(),
        ));
        let id = CheckRunId(self.next_check_id.fetch_add(1, Ordering::SeqCst));
        async move { Ok(id) }
    }

    fn update_check_run(
        &self,
        repo: &RepoId,
        check_run_id: CheckRunId,
        check: &CheckRunUpdate,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send {
        self.updated_checks
            .lock()
            .unwrap()
            .push((repo.clone(), check_run_id, check.clone()));
        async move { Ok(()) }
    }
}
