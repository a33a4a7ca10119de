//! GitHub App authentication and API client.
//!
//! This module provides everything the pipeline needs from GitHub: App JWT
//! and installation token handling, the `GitHubApi` trait the worker is
//! written against, and the octocrab-backed production implementation.
//!
//! Key features:
//! - Installation token caching with refresh ahead of expiry
//! - Exponential backoff retry for transient failures
//! - Distinguishes transient vs permanent errors

mod api;
mod auth;
mod client;
mod error;
mod retry;

pub use api::{
    CheckConclusion, CheckRunUpdate, CheckStatus, GitHubApi, RunConclusion, RunStatus, WorkflowRun,
};
pub use auth::{AppAuthenticator, AuthError};
pub use client::WorkflowClient;
pub use error::{GitHubApiError, GitHubErrorKind};
pub use retry::{retry_with_backoff, RetryConfig, RetryResult};
