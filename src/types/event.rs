//! The normalized trigger event consumed by the rule matcher.
//!
//! Webhook payloads differ wildly by event type, but the router only ever
//! needs a small, flat set of fields: enough to match repository patterns
//! and to resolve template placeholders. [`TriggerEvent`] is that flat view.
//! Extraction from raw payload JSON lives in [`crate::webhooks::extract_event`].

use serde::{Deserialize, Serialize};

use super::ids::{DeliveryId, PrNumber, RepoId, Sha};

/// Placeholder names resolvable against a [`TriggerEvent`].
///
/// Mapping configuration is validated against this list at load time, so a
/// typo like `{pr_numbr}` fails startup instead of every dispatch.
pub const FIELD_NAMES: &[&str] = &[
    "owner",
    "repository",
    "branch",
    "pr_number",
    "head_sha",
    "action",
    "event_type",
    "delivery_id",
    "sender",
];

/// A webhook event reduced to the fields the router cares about.
///
/// Optional fields are simply absent on event types that do not carry them;
/// a template referencing an absent field fails resolution for that one
/// template only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event type from the `X-GitHub-Event` header (e.g. `check_suite`).
    pub event_type: String,
    /// The payload's `action` field (e.g. `requested`). Empty string for
    /// event types without one (e.g. `push`).
    pub action: String,
    /// Repository the event originated from.
    pub repo: RepoId,
    /// Delivery id of the webhook that carried this event.
    pub delivery_id: DeliveryId,
    /// Branch the event pertains to, when the payload names one.
    pub branch: Option<String>,
    /// Pull request number, for PR-shaped events.
    pub pr_number: Option<PrNumber>,
    /// Head commit SHA, used to anchor the check run.
    pub head_sha: Option<Sha>,
    /// Login of the user who caused the event.
    pub sender: Option<String>,
}

impl TriggerEvent {
    /// Looks up a placeholder field by name.
    ///
    /// Returns `None` both for unknown names and for optional fields absent
    /// on this event; load-time validation rules out the former, so at
    /// dispatch time `None` means "this event does not carry that field".
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "owner" => Some(self.repo.owner.clone()),
            "repository" => Some(self.repo.repo.clone()),
            "branch" => self.branch.clone(),
            "pr_number" => self.pr_number.map(|n| n.0.to_string()),
            "head_sha" => self.head_sha.as_ref().map(|s| s.0.clone()),
            "action" => Some(self.action.clone()),
            "event_type" => Some(self.event_type.clone()),
            "delivery_id" => Some(self.delivery_id.0.clone()),
            "sender" => self.sender.clone(),
            _ => None,
        }
    }

    /// Whether `name` is a placeholder this event type could ever resolve.
    pub fn is_known_field(name: &str) -> bool {
        FIELD_NAMES.contains(&name)
    }
}
