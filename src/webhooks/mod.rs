//! Webhook handling for inbound platform events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Normalization of raw payloads into [`crate::types::TriggerEvent`]s

pub mod event;
pub mod signature;

pub use event::{extract_event, ExtractError};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
