//! Resolution of trigger events against the mapping set.
//!
//! Matching is a pure function: the same event and mappings always produce
//! the same jobs in the same order. Every pattern under every qualifying
//! mapping contributes its workflows (fan-out), in declaration order,
//! deduplicated on the fully resolved job so overlapping patterns cannot
//! dispatch the identical run twice from one event.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::glob::glob_match;
use super::mapping::EventMapping;
use super::template::TemplateError;
use crate::types::{RepoId, TriggerEvent};

/// A workflow dispatch with every placeholder substituted.
///
/// The struct itself is the dedupe key: two resolved jobs are the same job
/// exactly when repository, workflow, ref, and the resolved input set all
/// coincide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedJob {
    /// Repository hosting the workflow.
    pub repo: RepoId,
    /// Workflow file to dispatch.
    pub workflow_file: String,
    /// Git ref the workflow runs on.
    pub git_ref: String,
    /// Fully resolved inputs, ordered by key.
    pub inputs: BTreeMap<String, String>,
}

/// The outcome of matching one event: the jobs to run plus any templates
/// that failed resolution (fatal for that template only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub jobs: Vec<ResolvedJob>,
    pub skipped: Vec<TemplateError>,
}

impl MatchOutcome {
    /// True when the event matched nothing at all, the no-op case the
    /// pipeline acks immediately.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.skipped.is_empty()
    }
}

/// Whether a pattern accepts the event's repository and branch.
fn pattern_matches(
    pattern: &super::mapping::RepositoryPattern,
    event: &TriggerEvent,
) -> bool {
    if !glob_match(&pattern.owner, &event.repo.owner) {
        return false;
    }
    if !glob_match(&pattern.repository, &event.repo.repo) {
        return false;
    }
    match (&pattern.branch, &event.branch) {
        (None, _) => true,
        // A branch filter on an event that names no branch never matches.
        (Some(_), None) => false,
        (Some(filter), Some(branch)) => glob_match(filter, branch),
    }
}

/// Resolves the ordered list of jobs to dispatch for `event`.
pub fn match_event(event: &TriggerEvent, mappings: &[EventMapping]) -> MatchOutcome {
    let mut jobs = Vec::new();
    let mut skipped = Vec::new();
    let mut seen: HashSet<ResolvedJob> = HashSet::new();

    for mapping in mappings {
        if mapping.event_type != event.event_type {
            continue;
        }
        if !mapping.actions.iter().any(|a| a == &event.action) {
            continue;
        }
        for pattern in &mapping.repository_patterns {
            if !pattern_matches(pattern, event) {
                continue;
            }
            for workflow in &pattern.workflows {
                let mut inputs = BTreeMap::new();
                let mut failed = None;
                for (key, template) in &workflow.inputs {
                    match template.resolve(event) {
                        Ok(value) => {
                            inputs.insert(key.clone(), value);
                        }
                        Err(err) => {
                            failed = Some(err);
                            break;
                        }
                    }
                }
                if let Some(err) = failed {
                    skipped.push(err);
                    continue;
                }
                let job = ResolvedJob {
                    repo: RepoId::new(&workflow.owner, &workflow.repository),
                    workflow_file: workflow.workflow_file.clone(),
                    git_ref: workflow.git_ref.clone(),
                    inputs,
                };
                if seen.insert(job.clone()) {
                    jobs.push(job);
                }
            }
        }
    }

    MatchOutcome { jobs, skipped }
}
