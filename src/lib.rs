//! Workflow router - a GitHub App that routes webhook events to
//! `workflow_dispatch` runs in other repositories and reports the results
//! back as check runs.
//!
//! The pipeline: ingress verifies and durably enqueues each delivery;
//! workers match it against a rule table, dispatch the resolved workflows
//! with a planted correlation id, find the runs that id surfaces in, watch
//! them to completion, and publish check runs on the originating commit.

pub mod config;
pub mod dispatch;
pub mod github;
pub mod queue;
pub mod rules;
pub mod server;
pub mod status;
pub mod types;
pub mod webhooks;
pub mod worker;

#[cfg(test)]
pub mod test_utils;
