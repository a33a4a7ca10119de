//! Extraction of [`TriggerEvent`]s from raw webhook payloads.
//!
//! Payload shapes vary by event type, so deserialization is deliberately
//! lenient: every field the router might want is an `Option` on one raw
//! struct, and normalization picks whichever source the payload actually
//! carries. Only the `repository` block is mandatory; an event without one
//! cannot be matched against repository patterns and is rejected as
//! malformed.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{DeliveryId, PrNumber, RepoId, Sha, TriggerEvent};

/// Error type for payload extraction failures.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// JSON deserialization failed (includes type mismatches on known fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload carries no `repository` block, so it cannot be routed.
    #[error("payload has no repository block")]
    MissingRepository,
}

// Lenient mirror of the payload shapes we route on. Unknown fields are
// ignored; known blocks are all optional and validated in extract_event.

#[derive(Debug, Deserialize)]
struct RawPayload {
    action: Option<String>,
    repository: Option<RawRepository>,
    sender: Option<RawSender>,
    pull_request: Option<RawPullRequest>,
    check_suite: Option<RawCheckSuite>,
    workflow_run: Option<RawWorkflowRun>,
    /// Push payloads: fully-qualified git ref, e.g. `refs/heads/main`.
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    /// Push payloads: SHA after the push.
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    owner: RawOwner,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawSender {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    head: Option<RawGitRef>,
}

#[derive(Debug, Deserialize)]
struct RawGitRef {
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCheckSuite {
    head_branch: Option<String>,
    head_sha: Option<String>,
    #[serde(default)]
    pull_requests: Vec<RawPrRef>,
}

#[derive(Debug, Deserialize)]
struct RawWorkflowRun {
    head_branch: Option<String>,
    head_sha: Option<String>,
    #[serde(default)]
    pull_requests: Vec<RawPrRef>,
}

#[derive(Debug, Deserialize)]
struct RawPrRef {
    number: u64,
}

/// Normalizes a raw webhook payload into a [`TriggerEvent`].
///
/// * `event_type` is the `X-GitHub-Event` header value.
/// * `delivery_id` is the `X-GitHub-Delivery` header value.
/// * `payload` is the raw JSON body, already signature-verified.
///
/// Events without an `action` field (push, ping) get the empty string so
/// mappings can name them with `actions: [""]` or match them typelessly.
pub fn extract_event(
    event_type: &str,
    delivery_id: DeliveryId,
    payload: &[u8],
) -> Result<TriggerEvent, ExtractError> {
    let raw: RawPayload = serde_json::from_slice(payload)?;

    let repository = raw.repository.ok_or(ExtractError::MissingRepository)?;
    let repo = RepoId::new(repository.owner.login, repository.name);

    let branch = raw
        .pull_request
        .as_ref()
        .and_then(|pr| pr.head.as_ref())
        .and_then(|head| head.ref_name.clone())
        .or_else(|| raw.check_suite.as_ref().and_then(|cs| cs.head_branch.clone()))
        .or_else(|| raw.workflow_run.as_ref().and_then(|wr| wr.head_branch.clone()))
        .or_else(|| {
            raw.git_ref
                .as_ref()
                .and_then(|r| r.strip_prefix("refs/heads/"))
                .map(str::to_string)
        });

    let head_sha = raw
        .pull_request
        .as_ref()
        .and_then(|pr| pr.head.as_ref())
        .and_then(|head| head.sha.clone())
        .or_else(|| raw.check_suite.as_ref().and_then(|cs| cs.head_sha.clone()))
        .or_else(|| raw.workflow_run.as_ref().and_then(|wr| wr.head_sha.clone()))
        .or(raw.after)
        .map(Sha::new);

    let pr_number = raw
        .pull_request
        .as_ref()
        .map(|pr| pr.number)
        .or_else(|| raw.check_suite.as_ref().and_then(|cs| cs.pull_requests.first().map(|p| p.number)))
        .or_else(|| raw.workflow_run.as_ref().and_then(|wr| wr.pull_requests.first().map(|p| p.number)))
        .map(PrNumber);

    Ok(TriggerEvent {
        event_type: event_type.to_string(),
        action: raw.action.unwrap_or_default(),
        repo,
        delivery_id,
        branch,
        pr_number,
        head_sha,
        sender: raw.sender.map(|s| s.login),
    })
}
