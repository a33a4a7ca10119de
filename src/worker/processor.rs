//! Delivery processing: from a queued webhook record to dispatched, tracked,
//! and reported workflow runs.
//!
//! A [`Processor`] owns the routing table and a GitHub client and turns one
//! [`QueueMessage`] into a [`Disposition`] for the queue. Matching can fan
//! out to several workflows; each dispatch runs as its own task through
//! dispatch, correlation, monitoring, and check reporting, and the message
//! is acked only if no job asked for a redelivery.
//!
//! The disposition policy follows from at-least-once delivery. Before a
//! dispatch goes out, a redelivery is harmless, so transient trouble nacks
//! the message and lets the queue try again. After a dispatch went out, a
//! redelivery would trigger the workflow a second time, so later failures
//! are reported on the check run and the message is acked.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::{
    self, CorrelationConfig, CorrelationError, DispatchPhase, DispatchRecord, MonitorConfig,
    MonitorError, RunOutcome,
};
use crate::github::{retry_with_backoff, GitHubApi, RetryConfig, RetryResult, RunConclusion};
use crate::queue::QueueMessage;
use crate::rules::{match_event, EventMapping, ResolvedJob};
use crate::status::{format, CheckReporter};
use crate::types::{DispatchId, TriggerEvent};
use crate::webhooks::extract_event;

/// Tuning for one delivery's processing.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    /// How the run correlation window polls.
    pub correlation: CorrelationConfig,
    /// How the run monitoring window polls.
    pub monitor: MonitorConfig,
    /// Retry policy for the `workflow_dispatch` call itself.
    pub dispatch_retry: RetryConfig,
    /// Retry policy for check run creation and updates.
    pub report_retry: RetryConfig,
    /// Upper bound on jobs of one delivery running at the same time.
    pub max_concurrent_jobs: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            correlation: CorrelationConfig::default(),
            monitor: MonitorConfig::default(),
            dispatch_retry: RetryConfig::DEFAULT,
            report_retry: RetryConfig::DEFAULT,
            max_concurrent_jobs: 4,
        }
    }
}

/// What the worker should do with the queue message afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delete the message. Processing is finished, even when the outcome it
    /// reported was a failure.
    Ack,
    /// Hand the message back for redelivery.
    Retry,
}

/// Routes queued deliveries to workflow dispatches.
pub struct Processor<G> {
    api: Arc<G>,
    mappings: Vec<EventMapping>,
    config: ProcessorConfig,
}

impl<G: GitHubApi + 'static> Processor<G> {
    pub fn new(api: Arc<G>, mappings: Vec<EventMapping>, config: ProcessorConfig) -> Self {
        Self {
            api,
            mappings,
            config,
        }
    }

    /// Processes one queued delivery end to end.
    ///
    /// Payloads that cannot be routed are dropped with a warning: the ping a
    /// GitHub App receives on installation has no `repository` block, and a
    /// redelivery cannot make it routable.
    #[instrument(
        skip_all,
        fields(
            delivery_id = %message.delivery_id(),
            event_type = %message.record.event_type,
            receive_count = message.receive_count,
        )
    )]
    pub async fn process(&self, message: &QueueMessage, cancel: &CancellationToken) -> Disposition {
        let payload = match serde_json::to_vec(&message.record.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "stored payload cannot be re-serialized, dropping");
                return Disposition::Ack;
            }
        };

        let event = match extract_event(
            &message.record.event_type,
            message.record.delivery_id.clone(),
            &payload,
        ) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "payload not routable, dropping");
                return Disposition::Ack;
            }
        };

        let outcome = match_event(&event, &self.mappings);
        for skipped in &outcome.skipped {
            warn!(error = %skipped, "job skipped, input template did not resolve");
        }
        if outcome.jobs.is_empty() {
            debug!(repo = %event.repo, "no matching rule for event");
            return Disposition::Ack;
        }

        info!(
            repo = %event.repo,
            jobs = outcome.jobs.len(),
            "event matched, dispatching"
        );

        let max_jobs = self.config.max_concurrent_jobs.max(1);
        let mut set = JoinSet::new();
        let mut disposition = Disposition::Ack;

        for job in outcome.jobs {
            while set.len() >= max_jobs {
                if let Some(result) = set.join_next().await {
                    note_job_end(&mut disposition, result);
                }
            }
            set.spawn(run_job(
                Arc::clone(&self.api),
                event.clone(),
                job,
                self.config,
                cancel.clone(),
            ));
        }
        while let Some(result) = set.join_next().await {
            note_job_end(&mut disposition, result);
        }

        disposition
    }
}

/// Folds one finished job into the message disposition. Any job that wants a
/// redelivery outweighs every ack.
fn note_job_end(disposition: &mut Disposition, result: Result<Disposition, JoinError>) {
    match result {
        Ok(Disposition::Ack) => {}
        Ok(Disposition::Retry) => *disposition = Disposition::Retry,
        Err(e) => {
            error!(error = %e, "dispatch job aborted");
            *disposition = Disposition::Retry;
        }
    }
}

/// Runs one resolved job: dispatch, find the run, watch it, report on the
/// originating commit.
async fn run_job<G: GitHubApi>(
    api: Arc<G>,
    event: TriggerEvent,
    job: ResolvedJob,
    config: ProcessorConfig,
    cancel: CancellationToken,
) -> Disposition {
    let dispatch_id = DispatchId::generate();
    let mut record = DispatchRecord::new(
        dispatch_id,
        event.delivery_id.clone(),
        job.repo.clone(),
        job.workflow_file.clone(),
        job.git_ref.clone(),
    );

    // The planted input: the dispatched workflow is expected to echo it in
    // its run name, which is what correlation greps for.
    let mut inputs = job.inputs.clone();
    inputs.insert("dispatch_id".to_string(), dispatch_id.to_string());

    let mut reporter = match event.head_sha.clone() {
        Some(sha) => Some(CheckReporter::new(
            api.as_ref(),
            event.repo.clone(),
            sha,
            &job.workflow_file,
            config.report_retry,
        )),
        None => {
            debug!(
                dispatch_id = %dispatch_id,
                "event carries no head SHA, check reporting disabled"
            );
            None
        }
    };

    let dispatched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Disposition::Retry,
        result = retry_with_backoff(config.dispatch_retry, || {
            api.dispatch_workflow(&job.repo, &job.workflow_file, &job.git_ref, &inputs)
        }) => result,
    };

    match dispatched {
        RetryResult::Success(()) => {}
        RetryResult::ExhaustedRetries {
            last_error,
            attempts,
        } => {
            warn!(
                attempts,
                error = %last_error,
                repo = %job.repo,
                workflow_file = %job.workflow_file,
                "workflow dispatch did not go through, leaving delivery for redelivery"
            );
            record.advance(DispatchPhase::Failed {
                message: last_error.to_string(),
            });
            return Disposition::Retry;
        }
        RetryResult::PermanentError(e) => {
            let message = e.to_string();
            error!(
                error = %e,
                repo = %job.repo,
                workflow_file = %job.workflow_file,
                "workflow dispatch rejected"
            );
            record.advance(DispatchPhase::Failed {
                message: message.clone(),
            });
            if let Some(reporter) = reporter.as_mut() {
                reporter
                    .finished(format::dispatch_failed(&record, &message))
                    .await;
            }
            return Disposition::Retry;
        }
    }

    record.advance(DispatchPhase::Dispatched);
    info!(
        dispatch_id = %dispatch_id,
        repo = %job.repo,
        workflow_file = %job.workflow_file,
        git_ref = %job.git_ref,
        "workflow dispatched"
    );
    if let Some(reporter) = reporter.as_mut() {
        reporter.started(&record).await;
    }

    let run = match dispatch::await_run(
        api.as_ref(),
        &job.repo,
        &job.workflow_file,
        dispatch_id,
        record.correlation_cutoff(),
        &config.correlation,
        &cancel,
    )
    .await
    {
        Ok(run) => run,
        Err(CorrelationError::Timeout { .. }) => {
            record.advance(DispatchPhase::CorrelationTimedOut);
            warn!(
                dispatch_id = %dispatch_id,
                waited = ?config.correlation.timeout,
                "dispatched run never surfaced, giving up on tracking it"
            );
            if let Some(reporter) = reporter.as_mut() {
                reporter
                    .finished(format::correlation_timed_out(
                        &record,
                        config.correlation.timeout,
                    ))
                    .await;
            }
            return Disposition::Ack;
        }
        Err(CorrelationError::Api(e)) => {
            let message = e.to_string();
            error!(
                error = %e,
                dispatch_id = %dispatch_id,
                "run correlation hit a permanent API error"
            );
            record.advance(DispatchPhase::Failed {
                message: message.clone(),
            });
            if let Some(reporter) = reporter.as_mut() {
                reporter
                    .finished(format::orchestration_failed(&record, &message))
                    .await;
            }
            return Disposition::Ack;
        }
        Err(CorrelationError::Cancelled) => return Disposition::Retry,
    };

    record.advance(DispatchPhase::RunFound {
        run_id: run.id,
        run_url: run.html_url.clone(),
    });
    info!(run_id = %run.id, run_url = %run.html_url, "dispatched run identified");

    match dispatch::await_completion(api.as_ref(), &job.repo, run.id, &config.monitor, &cancel)
        .await
    {
        Ok(RunOutcome::Succeeded(finished)) => {
            record.advance(DispatchPhase::Completed {
                run_id: finished.id,
                conclusion: RunConclusion::Success,
            });
            info!(run_id = %finished.id, "workflow run succeeded");
            if let Some(reporter) = reporter.as_mut() {
                reporter.finished(format::run_succeeded(&finished)).await;
            }
            Disposition::Ack
        }
        Ok(RunOutcome::Failed {
            run: finished,
            conclusion,
        }) => {
            record.advance(DispatchPhase::Completed {
                run_id: finished.id,
                conclusion,
            });
            warn!(
                run_id = %finished.id,
                conclusion = %conclusion,
                "workflow run did not succeed"
            );
            if let Some(reporter) = reporter.as_mut() {
                reporter
                    .finished(format::run_failed(&finished, conclusion))
                    .await;
            }
            Disposition::Ack
        }
        Ok(RunOutcome::TimedOut) => {
            record.advance(DispatchPhase::MonitorTimedOut { run_id: run.id });
            warn!(
                run_id = %run.id,
                waited = ?config.monitor.timeout,
                "stopped watching a run that never finished"
            );
            if let Some(reporter) = reporter.as_mut() {
                reporter
                    .finished(format::monitor_timed_out(&run, config.monitor.timeout))
                    .await;
            }
            Disposition::Ack
        }
        Err(MonitorError::Api(e)) => {
            let message = e.to_string();
            error!(
                error = %e,
                run_id = %run.id,
                "run monitoring hit a permanent API error"
            );
            record.advance(DispatchPhase::Failed {
                message: message.clone(),
            });
            if let Some(reporter) = reporter.as_mut() {
                reporter
                    .finished(format::orchestration_failed(&record, &message))
                    .await;
            }
            Disposition::Ack
        }
        Err(MonitorError::Cancelled) => Disposition::Retry,
    }
}
