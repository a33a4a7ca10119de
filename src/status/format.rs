//! Check run text for each pipeline outcome.
//!
//! The check run is the router's only user-facing signal, so the wording has
//! to carry the distinction the error taxonomy makes: a run that failed is
//! not the same thing as a run the router could not start or observe.
//! Orchestration problems get a retry hint; run failures link to the run,
//! where the real logs live.

use std::time::Duration;

use crate::dispatch::DispatchRecord;
use crate::github::{CheckConclusion, CheckRunUpdate, CheckStatus, RunConclusion, WorkflowRun};

/// GitHub's size limit for check run summaries (65535 characters).
pub const GITHUB_SUMMARY_SIZE_LIMIT: usize = 65535;

/// Attached to failures where re-delivering the webhook is safe and useful.
const RETRY_HINT: &str =
    "Re-deliver the webhook from the GitHub App's advanced settings to retry.";

/// The name under which the router publishes its check for `workflow_file`.
///
/// One event can fan out to several workflows against the same commit; the
/// workflow file in the name keeps their checks apart.
pub fn check_name(workflow_file: &str) -> String {
    format!("workflow-router / {workflow_file}")
}

/// Check content published the moment the dispatch call succeeds.
pub fn in_progress(record: &DispatchRecord) -> CheckRunUpdate {
    CheckRunUpdate {
        status: CheckStatus::InProgress,
        conclusion: None,
        title: format!("Dispatched {}", record.workflow_file),
        summary: truncate_summary(format!(
            "Dispatched `{}` on `{}@{}` (dispatch `{}`). Waiting for the run to appear.",
            record.workflow_file, record.repo, record.git_ref, record.dispatch_id,
        )),
        details_url: None,
    }
}

/// Terminal content for a run that completed with conclusion `success`.
pub fn run_succeeded(run: &WorkflowRun) -> CheckRunUpdate {
    completed(
        CheckConclusion::Success,
        "Run completed successfully".to_string(),
        format!("`{}` completed with conclusion `success`.", run.name),
        Some(run.html_url.clone()),
    )
}

/// Terminal content for a run that completed with any other conclusion.
pub fn run_failed(run: &WorkflowRun, conclusion: RunConclusion) -> CheckRunUpdate {
    completed(
        CheckConclusion::Failure,
        format!("Run concluded: {conclusion}"),
        format!(
            "`{}` finished with conclusion `{conclusion}`. See the run log for details.",
            run.name,
        ),
        Some(run.html_url.clone()),
    )
}

/// Terminal content when no run was ever observed for the dispatch.
pub fn correlation_timed_out(record: &DispatchRecord, waited: Duration) -> CheckRunUpdate {
    completed(
        CheckConclusion::Neutral,
        "Dispatched run never appeared".to_string(),
        format!(
            "`{}` was dispatched (dispatch `{}`), but no run carrying that id appeared \
             within {}. The run may still start late, or the workflow may not echo its \
             `dispatch_id` input into `run-name`. {RETRY_HINT}",
            record.workflow_file,
            record.dispatch_id,
            human_duration(waited),
        ),
        None,
    )
}

/// Terminal content when the run outlived the monitoring window.
pub fn monitor_timed_out(run: &WorkflowRun, waited: Duration) -> CheckRunUpdate {
    completed(
        CheckConclusion::Neutral,
        "Run still in progress when monitoring ended".to_string(),
        format!(
            "`{}` was still executing after {}; its eventual outcome is unknown to this \
             check. Follow the run directly.",
            run.name,
            human_duration(waited),
        ),
        Some(run.html_url.clone()),
    )
}

/// Terminal content when the dispatch call itself was refused.
///
/// No run exists at this point, so re-delivery cannot duplicate anything.
pub fn dispatch_failed(record: &DispatchRecord, error: &str) -> CheckRunUpdate {
    completed(
        CheckConclusion::Failure,
        "Workflow dispatch failed".to_string(),
        format!(
            "GitHub refused the `workflow_dispatch` call for `{}` on `{}@{}`: {error}. \
             {RETRY_HINT}",
            record.workflow_file, record.repo, record.git_ref,
        ),
        None,
    )
}

/// Terminal content when tracking broke down after a successful dispatch.
///
/// The run (if it exists) keeps going on GitHub's side; no retry hint here,
/// since re-delivery would dispatch the workflow a second time.
pub fn orchestration_failed(record: &DispatchRecord, error: &str) -> CheckRunUpdate {
    completed(
        CheckConclusion::Failure,
        "Run tracking failed".to_string(),
        format!(
            "The router dispatched `{}` (dispatch `{}`) but could not track the run: \
             {error}. Check the repository's Actions tab for the run itself.",
            record.workflow_file, record.dispatch_id,
        ),
        None,
    )
}

fn completed(
    conclusion: CheckConclusion,
    title: String,
    summary: String,
    details_url: Option<String>,
) -> CheckRunUpdate {
    CheckRunUpdate {
        status: CheckStatus::Completed,
        conclusion: Some(conclusion),
        title,
        summary: truncate_summary(summary),
        details_url,
    }
}

/// Truncates a summary to GitHub's limit, at a UTF-8 boundary, with a marker.
fn truncate_summary(summary: String) -> String {
    const SUFFIX: &str = "... [truncated]";

    if summary.len() <= GITHUB_SUMMARY_SIZE_LIMIT {
        return summary;
    }

    let content_len = GITHUB_SUMMARY_SIZE_LIMIT - SUFFIX.len();
    let mut end = content_len;
    while end > 0 && !summary.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}", &summary[..end], SUFFIX)
}

fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
