//! GitHub API error types.
//!
//! This module defines error types that distinguish between transient and permanent
//! GitHub API failures. The distinction is critical for retry logic:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network timeouts)
//! - **Permanent** errors will not succeed on retry (most 4xx: a missing workflow
//!   file, a bad ref, revoked credentials)
//!
//! The worker uses the same categorization to decide between requeueing a delivery
//! and giving up on it.

use std::fmt;
use thiserror::Error;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Transient error - safe to retry with backoff.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - HTTP 429 (rate limited)
    /// - HTTP 403 with rate limit headers
    /// - Network timeouts
    Transient,

    /// Permanent error - retrying with the same request will fail again.
    ///
    /// Examples:
    /// - Workflow file not found (404)
    /// - Ref does not exist or workflow lacks a `workflow_dispatch` trigger (422)
    /// - Authentication failures (401, 403 non-rate-limit)
    Permanent,
}

impl GitHubErrorKind {
    /// Returns true if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    /// The kind of error (transient or permanent).
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates a transient error from an octocrab error.
    pub fn transient(message: impl Into<String>, source: octocrab::Error) -> Self {
        let status_code = extract_status_code(&source);
        Self {
            kind: GitHubErrorKind::Transient,
            status_code,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a permanent error from an octocrab error.
    pub fn permanent(message: impl Into<String>, source: octocrab::Error) -> Self {
        let status_code = extract_status_code(&source);
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    ///
    /// This function examines the error to determine if it's transient (retriable)
    /// or permanent. The categorization is based on:
    /// - HTTP status codes
    /// - Error message patterns for known GitHub API responses
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = err.to_string();
        let kind = categorize(status_code, &message);

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

/// Decides transient vs permanent from the status code and message.
fn categorize(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    // GitHub sometimes asks for a retry outright, regardless of status
    if is_transient_message(message) {
        return GitHubErrorKind::Transient;
    }

    match status_code {
        Some(429) => GitHubErrorKind::Transient, // Rate limited
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent, // Remaining 4xx
        None => {
            // No status code - check if it's a network error
            if is_network_error(message) {
                GitHubErrorKind::Transient
            } else {
                GitHubErrorKind::Permanent
            }
        }
    }
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// Only API responses carry a status; serialization failures, URI errors and
/// transport errors do not, and those fall through to message-based
/// categorization in `from_octocrab`.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

/// Checks if an error message indicates a transient condition.
fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();

    // Generic "try again" suggestions from GitHub
    if message_lower.contains("try again") {
        return true;
    }

    if message_lower.contains("temporarily unavailable") {
        return true;
    }

    false
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
