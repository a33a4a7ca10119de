//! Declarative event-to-workflow mapping configuration.
//!
//! The mapping file is an ordered list of [`EventMapping`]s: an event type,
//! the actions that qualify, and repository patterns that each carry the
//! workflows to dispatch when they match. Mappings are deserialized from
//! YAML at startup and validated immediately, so configuration mistakes
//! (typo'd placeholders, empty action lists) surface as startup errors
//! instead of per-event failures.
//!
//! Events without an `action` payload field (push, ping) normalize to the
//! empty string; a mapping targets them with `actions: [""]`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::template::{InputTemplate, TemplateError};
use crate::types::TriggerEvent;

/// One entry in the mapping file: which events it covers and what to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMapping {
    /// Event type as delivered in the `X-GitHub-Event` header.
    pub event_type: String,
    /// Qualifying values of the payload's `action` field.
    pub actions: Vec<String>,
    /// Patterns tried in order; every matching pattern contributes its
    /// workflows (fan-out, not first-match-only).
    pub repository_patterns: Vec<RepositoryPattern>,
}

/// A repository/branch filter and the workflows it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPattern {
    /// Owner login, literal or glob.
    pub owner: String,
    /// Repository name, literal or glob (e.g. `app-*`).
    pub repository: String,
    /// Branch filter. `None` accepts any branch, including events that do
    /// not name one; when present, events without a branch are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Workflows to dispatch when this pattern matches.
    pub workflows: Vec<JobTemplate>,
}

/// A workflow dispatch target with templated inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Owner of the repository hosting the workflow.
    pub owner: String,
    /// Repository hosting the workflow.
    pub repository: String,
    /// Workflow file name, e.g. `pr-check.yml`.
    pub workflow_file: String,
    /// Git ref the workflow runs on.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Workflow inputs; values may embed `{placeholder}`s resolved from the
    /// triggering event. Keys are ordered so resolved input sets compare
    /// deterministically.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputTemplate>,
}

/// Error type for mapping validation failures.
#[derive(Debug, Error)]
pub enum MappingError {
    /// A mapping with no qualifying actions can never match anything.
    #[error("mapping for {event_type:?} has an empty actions list (use [\"\"] for action-less events)")]
    EmptyActions { event_type: String },

    /// A workflow entry is missing a required field value.
    #[error("workflow entry under {event_type:?} has an empty {field}")]
    EmptyField {
        event_type: String,
        field: &'static str,
    },

    /// An input template references a placeholder the router never provides.
    #[error("workflow {workflow_file:?} under {event_type:?}, input {input:?}: {source}")]
    BadTemplate {
        event_type: String,
        workflow_file: String,
        input: String,
        #[source]
        source: TemplateError,
    },
}

/// Validates a loaded mapping set.
///
/// Checks that every mapping has at least one action, every workflow names
/// its file and ref, and every input placeholder is one the router can
/// resolve. Field *absence* on a given event is a runtime concern; only
/// names that could never resolve fail here.
pub fn validate_mappings(mappings: &[EventMapping]) -> Result<(), MappingError> {
    for mapping in mappings {
        if mapping.actions.is_empty() {
            return Err(MappingError::EmptyActions {
                event_type: mapping.event_type.clone(),
            });
        }
        for pattern in &mapping.repository_patterns {
            for workflow in &pattern.workflows {
                if workflow.workflow_file.is_empty() {
                    return Err(MappingError::EmptyField {
                        event_type: mapping.event_type.clone(),
                        field: "workflow_file",
                    });
                }
                if workflow.git_ref.is_empty() {
                    return Err(MappingError::EmptyField {
                        event_type: mapping.event_type.clone(),
                        field: "ref",
                    });
                }
                for (input, template) in &workflow.inputs {
                    for name in template.placeholders() {
                        if !TriggerEvent::is_known_field(name) {
                            return Err(MappingError::BadTemplate {
                                event_type: mapping.event_type.clone(),
                                workflow_file: workflow.workflow_file.clone(),
                                input: input.clone(),
                                source: TemplateError::UnknownPlaceholder {
                                    name: name.to_string(),
                                },
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
