//! Core domain types for the workflow router.
//!
//! This module contains the fundamental types used throughout the
//! application, designed to encode invariants via the type system.

pub mod event;
pub mod ids;

// Re-export commonly used types at the module level
pub use event::{TriggerEvent, FIELD_NAMES};
pub use ids::{CheckRunId, DeliveryId, DispatchId, InstallationId, PrNumber, RepoId, RunId, Sha};
