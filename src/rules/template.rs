//! Typed input templates with `{placeholder}` substitution.
//!
//! Workflow input values in the mapping file may embed placeholders such as
//! `{pr_number}` or `{head_sha}`. Rather than interpolating strings at
//! dispatch time, each value is parsed once into literal and placeholder
//! segments; resolution is then an explicit field lookup against the
//! triggering event. Unknown placeholder names are caught when the mapping
//! file loads, and a placeholder whose field is absent on a particular event
//! fails resolution for that one template without touching its siblings.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::TriggerEvent;

/// Error type for template parsing and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A `{` without a matching `}` in the raw value.
    #[error("unclosed placeholder in template {raw:?}")]
    UnclosedBrace { raw: String },

    /// An empty `{}` placeholder.
    #[error("empty placeholder in template {raw:?}")]
    EmptyPlaceholder { raw: String },

    /// Placeholder naming a field the router never provides. Caught at
    /// mapping load time.
    #[error("unknown placeholder {{{name}}}")]
    UnknownPlaceholder { name: String },

    /// Placeholder naming a field this particular event does not carry.
    #[error("event has no value for placeholder {{{name}}}")]
    MissingField { name: String },
}

/// One parsed segment of a template value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A workflow input value parsed into literal and placeholder segments.
///
/// Serializes as the raw template string, so mapping files roundtrip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl InputTemplate {
    /// Parses a raw value, e.g. `"pr-{pr_number}-{head_sha}"`.
    ///
    /// A lone `}` is treated as a literal character; only `{` opens a
    /// placeholder. There is no escape syntax, matching the mapping files
    /// this replaces.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => name.push(c),
                    None => {
                        return Err(TemplateError::UnclosedBrace {
                            raw: raw.to_string(),
                        });
                    }
                }
            }
            if name.is_empty() {
                return Err(TemplateError::EmptyPlaceholder {
                    raw: raw.to_string(),
                });
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Placeholder(name));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(InputTemplate {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The raw template string this was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Placeholder names referenced by this template, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Whether the template contains no placeholders at all.
    pub fn is_literal(&self) -> bool {
        self.placeholders().next().is_none()
    }

    /// Resolves the template against a concrete event.
    pub fn resolve(&self, event: &TriggerEvent) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Placeholder(name) => match event.field(name) {
                    Some(value) => out.push_str(&value),
                    None if TriggerEvent::is_known_field(name) => {
                        return Err(TemplateError::MissingField { name: name.clone() });
                    }
                    None => {
                        return Err(TemplateError::UnknownPlaceholder { name: name.clone() });
                    }
                },
            }
        }
        Ok(out)
    }
}

impl fmt::Display for InputTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for InputTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for InputTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        InputTemplate::parse(&raw).map_err(serde::de::Error::custom)
    }
}
