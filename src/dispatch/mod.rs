//! Dispatch orchestration.
//!
//! This module owns the middle of the pipeline: the lifecycle record for a
//! dispatched job, the correlation loop that finds the run a dispatch
//! created, and the monitoring loop that follows that run to completion.

mod correlator;
mod monitor;
mod record;

pub use correlator::{await_run, CorrelationConfig, CorrelationError};
pub use monitor::{await_completion, MonitorConfig, MonitorError, RunOutcome};
pub use record::{DispatchPhase, DispatchRecord};
