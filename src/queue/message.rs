//! Queue message schema and delivery-id validation.
//!
//! An [`EventRecord`] is what ingress persists: the verified raw payload
//! wrapped with just enough metadata to route it later. Records are
//! immutable once enqueued; the mutable redelivery state (receive count,
//! visibility lease) belongs to the queue adapter, not the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DeliveryId;

/// A verified webhook event as persisted in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event type from the `X-GitHub-Event` header.
    pub event_type: String,
    /// The payload's `action` field, empty for action-less events.
    pub action: String,
    /// Delivery id from the `X-GitHub-Delivery` header. Also the record's
    /// file name, hence the path-safety validation at enqueue.
    pub delivery_id: DeliveryId,
    /// The raw payload, kept opaque until a worker picks the record up.
    pub payload: serde_json::Value,
    /// When ingress accepted the delivery.
    pub received_at: DateTime<Utc>,
}

/// A received message: one borrowed processing attempt of a record.
///
/// The holder owns the visibility lease until it acks, nacks, or lets the
/// lease lapse. Acking deletes the record; anything else leads back to
/// redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub record: EventRecord,
    /// How many times this record has been handed out, this delivery
    /// included.
    pub receive_count: u32,
}

impl QueueMessage {
    pub fn delivery_id(&self) -> &DeliveryId {
        &self.record.delivery_id
    }
}

/// Validates that a delivery ID is safe to use as a file name.
///
/// Rejected:
/// - empty ids
/// - path separators (`/` or `\`) and null bytes
/// - ids starting with a dot (hidden files, `.`/`..` traversal)
pub fn delivery_id_is_safe(delivery_id: &DeliveryId) -> bool {
    let id = delivery_id.as_str();

    if id.is_empty() {
        return false;
    }
    if id.contains('/') || id.contains('\\') || id.contains('\0') {
        return false;
    }
    if id.starts_with('.') {
        return false;
    }
    true
}
