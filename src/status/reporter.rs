//! Check run publication.
//!
//! The reporter is deliberately infallible from the pipeline's point of
//! view: a job's recorded outcome must never change because the check run
//! could not be written. Publication failures are logged and dropped.

use tracing::warn;

use super::format;
use crate::dispatch::DispatchRecord;
use crate::github::{retry_with_backoff, CheckRunUpdate, GitHubApi, RetryConfig};
use crate::types::{CheckRunId, RepoId, Sha};

/// Publishes one check run on the originating commit, tracking its id so the
/// terminal update lands on the same check the in-progress one created.
///
/// If the create call fails, the id stays unknown and the terminal update
/// falls back to creating the check outright, so a transient failure at
/// dispatch time does not silence the final result.
pub struct CheckReporter<'a, G> {
    api: &'a G,
    repo: RepoId,
    head_sha: Sha,
    check_name: String,
    retry: RetryConfig,
    check_run_id: Option<CheckRunId>,
}

impl<'a, G: GitHubApi> CheckReporter<'a, G> {
    /// A reporter for the check covering `workflow_file` on `head_sha`.
    ///
    /// `repo` is the repository the event came from, not the one hosting the
    /// workflow; the check belongs next to the commit that triggered it.
    pub fn new(
        api: &'a G,
        repo: RepoId,
        head_sha: Sha,
        workflow_file: &str,
        retry: RetryConfig,
    ) -> Self {
        Self {
            api,
            repo,
            head_sha,
            check_name: format::check_name(workflow_file),
            retry,
            check_run_id: None,
        }
    }

    /// Publishes the in-progress check right after a successful dispatch.
    pub async fn started(&mut self, record: &DispatchRecord) {
        self.publish(format::in_progress(record)).await;
    }

    /// Publishes the terminal check for this attempt.
    pub async fn finished(&mut self, update: CheckRunUpdate) {
        self.publish(update).await;
    }

    async fn publish(&mut self, update: CheckRunUpdate) {
        let result = match self.check_run_id {
            Some(id) => retry_with_backoff(self.retry, || {
                self.api.update_check_run(&self.repo, id, &update)
            })
            .await
            .into_result(),
            None => retry_with_backoff(self.retry, || {
                self.api
                    .create_check_run(&self.repo, &self.check_name, &self.head_sha, &update)
            })
            .await
            .into_result()
            .map(|id| {
                self.check_run_id = Some(id);
            }),
        };

        if let Err(e) = result {
            warn!(
                check = %self.check_name,
                repo = %self.repo,
                head_sha = %self.head_sha.short(),
                error = %e,
                "check run publication failed, continuing without it"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use crate::github::{GitHubApiError, WorkflowRun};
    use crate::types::{DeliveryId, DispatchId, RunId};

    /// Records every check call and hands out scripted results (defaulting
    /// to success) per call.
    struct RecordingChecks {
        create_results: Mutex<VecDeque<Result<CheckRunId, GitHubApiError>>>,
        update_results: Mutex<VecDeque<Result<(), GitHubApiError>>>,
        created: Mutex<Vec<(String, CheckRunUpdate)>>,
        updated: Mutex<Vec<(CheckRunId, CheckRunUpdate)>>,
    }

    impl RecordingChecks {
        fn new() -> Self {
            Self {
                create_results: Mutex::new(VecDeque::new()),
                update_results: Mutex::new(VecDeque::new()),
                created: Mutex::new(Vec::new()),
                updated: Mutex::new(Vec::new()),
            }
        }

        fn script_create(self, result: Result<CheckRunId, GitHubApiError>) -> Self {
            self.create_results.lock().unwrap().push_back(result);
            self
        }

        fn script_update(self, result: Result<(), GitHubApiError>) -> Self {
            self.update_results.lock().unwrap().push_back(result);
            self
        }
    }

    impl GitHubApi for RecordingChecks {
        fn dispatch_workflow(
            &self,
            _repo: &RepoId,
            _workflow_file: &str,
            _git_ref: &str,
            _inputs: &BTreeMap<String, String>,
        ) -> impl Future<Output = Result<(), GitHubApiError>> + Send {
            async { panic!("dispatch_workflow not expected here") }
        }

        fn list_workflow_runs(
            &self,
            _repo: &RepoId,
            _workflow_file: &str,
            _created_after: DateTime<Utc>,
        ) -> impl Future<Output = Result<Vec<WorkflowRun>, GitHubApiError>> + Send {
            async { panic!("list_workflow_runs not expected here") }
        }

        fn get_workflow_run(
            &self,
            _repo: &RepoId,
            _run_id: RunId,
        ) -> impl Future<Output = Result<WorkflowRun, GitHubApiError>> + Send {
            async { panic!("get_workflow_run not expected here") }
        }

        fn create_check_run(
            &self,
            _repo: &RepoId,
            name: &str,
            _head_sha: &Sha,
            check: &CheckRunUpdate,
        ) -> impl Future<Output = Result<CheckRunId, GitHubApiError>> + Send {
            self.created
                .lock()
                .unwrap()
                .push((name.to_string(), check.clone()));
            let next = self
                .create_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(CheckRunId(11)));
            async move { next }
        }

        fn update_check_run(
            &self,
            _repo: &RepoId,
            check_run_id: CheckRunId,
            check: &CheckRunUpdate,
        ) -> impl Future<Output = Result<(), GitHubApiError>> + Send {
            self.updated
                .lock()
                .unwrap()
                .push((check_run_id, check.clone()));
            let next = self
                .update_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()));
            async move { next }
        }
    }

    fn record() -> DispatchRecord {
        DispatchRecord::new(
            DispatchId::generate(),
            DeliveryId::new("d-1"),
            RepoId::new("folio-org", "kitfox-ci"),
            "pr-check.yml",
            "master",
        )
    }

    fn sample_run() -> WorkflowRun {
        WorkflowRun {
            id: RunId(900),
            name: "pr-check".to_string(),
            head_branch: Some("master".to_string()),
            status: crate::github::RunStatus::Completed,
            conclusion: Some(crate::github::RunConclusion::Success),
            html_url: "https://github.com/folio-org/kitfox-ci/actions/runs/900".to_string(),
            created_at: Utc::now(),
        }
    }

    fn reporter<'a>(api: &'a RecordingChecks) -> CheckReporter<'a, RecordingChecks> {
        CheckReporter::new(
            api,
            RepoId::new("folio-org", "app-acquisitions"),
            Sha::new("59b01d857097a4196b46e01d4654b48ed2a53858"),
            "pr-check.yml",
            RetryConfig::new(2, Duration::from_millis(1), Duration::from_millis(5), 2.0),
        )
    }

    #[tokio::test]
    async fn terminal_update_lands_on_the_created_check() {
        let api = RecordingChecks::new().script_create(Ok(CheckRunId(42)));
        let mut reporter = reporter(&api);

        reporter.started(&record()).await;
        reporter.finished(format::run_succeeded(&sample_run())).await;

        let created = api.created.lock().unwrap();
        let updated = api.updated.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "workflow-router / pr-check.yml");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].0, CheckRunId(42));
    }

    #[tokio::test]
    async fn failed_create_is_swallowed_and_terminal_recreates() {
        let api = RecordingChecks::new()
            .script_create(Err(GitHubApiError::permanent_without_source("forbidden")));
        let mut reporter = reporter(&api);

        reporter.started(&record()).await;
        reporter.finished(format::run_succeeded(&sample_run())).await;

        // The failed create left no id, so the terminal publish created anew
        let created = api.created.lock().unwrap();
        let updated = api.updated.lock().unwrap();
        assert_eq!(created.len(), 2);
        assert!(updated.is_empty());
    }

    #[tokio::test]
    async fn transient_create_failures_are_retried() {
        let api = RecordingChecks::new()
            .script_create(Err(GitHubApiError::transient_without_source("502")))
            .script_create(Err(GitHubApiError::transient_without_source("502")));
        let mut reporter = reporter(&api);

        reporter.started(&record()).await;

        assert_eq!(api.created.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn update_failure_does_not_propagate() {
        let api = RecordingChecks::new()
            .script_update(Err(GitHubApiError::permanent_without_source("gone")));
        let mut reporter = reporter(&api);

        reporter.started(&record()).await;
        reporter.finished(format::run_succeeded(&sample_run())).await;
        // No panic, no error surfaced; the attempt was recorded
        assert_eq!(api.updated.lock().unwrap().len(), 1);
    }
}
