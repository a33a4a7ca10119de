//! Dispatch lifecycle tracking.
//!
//! A `DispatchRecord` follows one resolved job from the moment it is handed
//! to GitHub until its run reaches a terminal state. The phases are linear:
//! a dispatch is sent, the matching run is found, the run completes. Each
//! stage can also fail or time out, which ends the record there.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::github::RunConclusion;
use crate::types::{DeliveryId, DispatchId, RepoId, RunId};

/// Runs created up to this long before the record are still considered ours,
/// covering clock skew between this service and GitHub.
const CORRELATION_SKEW_SECS: i64 = 60;

/// Where a dispatch is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchPhase {
    /// Job resolved, nothing sent to GitHub yet.
    Pending,

    /// GitHub accepted the `workflow_dispatch` call.
    Dispatched,

    /// The run carrying our dispatch id was identified.
    RunFound {
        run_id: RunId,
        /// Link to the run, kept for check run output.
        run_url: String,
    },

    /// The run finished.
    Completed {
        run_id: RunId,
        conclusion: RunConclusion,
    },

    /// No run carrying our dispatch id appeared within the correlation window.
    CorrelationTimedOut,

    /// The run was found but did not finish within the monitoring window.
    MonitorTimedOut { run_id: RunId },

    /// A GitHub call failed permanently or exhausted its retries.
    Failed { message: String },
}

impl DispatchPhase {
    /// Returns the name of this phase for logging/display.
    pub fn name(&self) -> &'static str {
        match self {
            DispatchPhase::Pending => "pending",
            DispatchPhase::Dispatched => "dispatched",
            DispatchPhase::RunFound { .. } => "run_found",
            DispatchPhase::Completed { .. } => "completed",
            DispatchPhase::CorrelationTimedOut => "correlation_timed_out",
            DispatchPhase::MonitorTimedOut { .. } => "monitor_timed_out",
            DispatchPhase::Failed { .. } => "failed",
        }
    }

    /// Returns true if the record can go no further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchPhase::Completed { .. }
                | DispatchPhase::CorrelationTimedOut
                | DispatchPhase::MonitorTimedOut { .. }
                | DispatchPhase::Failed { .. }
        )
    }

    /// Checks if a transition from this phase to the target phase is valid.
    ///
    /// Valid transitions:
    /// - Pending -> Dispatched | Failed
    /// - Dispatched -> RunFound | CorrelationTimedOut | Failed
    /// - RunFound -> Completed | MonitorTimedOut | Failed
    pub fn can_transition_to(&self, target: &DispatchPhase) -> bool {
        matches!(
            (self, target),
            (DispatchPhase::Pending, DispatchPhase::Dispatched)
                | (DispatchPhase::Pending, DispatchPhase::Failed { .. })
                | (DispatchPhase::Dispatched, DispatchPhase::RunFound { .. })
                | (DispatchPhase::Dispatched, DispatchPhase::CorrelationTimedOut)
                | (DispatchPhase::Dispatched, DispatchPhase::Failed { .. })
                | (
                    DispatchPhase::RunFound { .. },
                    DispatchPhase::Completed { .. }
                )
                | (
                    DispatchPhase::RunFound { .. },
                    DispatchPhase::MonitorTimedOut { .. }
                )
                | (DispatchPhase::RunFound { .. }, DispatchPhase::Failed { .. })
        )
    }
}

/// One resolved job's journey through dispatch, correlation and monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    /// The correlation id planted in the workflow's inputs.
    pub dispatch_id: DispatchId,

    /// The webhook delivery this job came from.
    pub delivery_id: DeliveryId,

    /// Target repository.
    pub repo: RepoId,

    /// Workflow file the dispatch targets.
    pub workflow_file: String,

    /// Git ref the workflow runs on.
    pub git_ref: String,

    /// When the record was created, just before the dispatch call.
    pub created_at: DateTime<Utc>,

    /// Current phase.
    pub phase: DispatchPhase,
}

impl DispatchRecord {
    /// Creates a record in the `Pending` phase.
    pub fn new(
        dispatch_id: DispatchId,
        delivery_id: DeliveryId,
        repo: RepoId,
        workflow_file: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            dispatch_id,
            delivery_id,
            repo,
            workflow_file: workflow_file.into(),
            git_ref: git_ref.into(),
            created_at: Utc::now(),
            phase: DispatchPhase::Pending,
        }
    }

    /// The earliest creation time a run may have and still be ours.
    pub fn correlation_cutoff(&self) -> DateTime<Utc> {
        self.created_at - chrono::Duration::seconds(CORRELATION_SKEW_SECS)
    }

    /// Moves the record to the next phase, logging the transition.
    pub fn advance(&mut self, next: DispatchPhase) {
        debug!(
            dispatch_id = %self.dispatch_id,
            delivery_id = %self.delivery_id,
            from = self.phase.name(),
            to = next.name(),
            "dispatch phase transition"
        );
        self.phase = next;
    }
}
