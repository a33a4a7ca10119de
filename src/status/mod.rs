//! Check run reporting on the originating commit.
//!
//! The check run is the only user-facing signal this service emits. It is
//! created `in_progress` the moment a dispatch succeeds and updated once the
//! pipeline reaches a terminal state for that job. The text builders in
//! [`format`] keep orchestration failures (the router could not start or
//! track the run) visually distinct from the run itself failing.
//!
//! Reporting is best-effort by contract: a failed check write is logged and
//! never changes the job's recorded outcome.

pub mod format;
mod reporter;

pub use format::GITHUB_SUMMARY_SIZE_LIMIT;
pub use reporter::CheckReporter;
