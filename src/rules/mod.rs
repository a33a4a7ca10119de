//! The rule-matching DSL: mappings, glob patterns, and input templates.
//!
//! An event flows in as a [`crate::types::TriggerEvent`] and comes out as an
//! ordered, deduplicated list of [`ResolvedJob`]s ready for dispatch. The
//! DSL is deliberately small: event type, action membership, anchored `*`
//! globs for owner/repository/branch, and `{placeholder}` substitution in
//! workflow inputs.

pub mod glob;
pub mod mapping;
pub mod matcher;
pub mod template;

pub use glob::glob_match;
pub use mapping::{validate_mappings, EventMapping, JobTemplate, MappingError, RepositoryPattern};
pub use matcher::{match_event, MatchOutcome, ResolvedJob};
pub use template::{InputTemplate, TemplateError};
