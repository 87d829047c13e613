//! API response types.

use serde::Serialize;

use crate::batch::summary::RunSummary;
use crate::batch::types::{AnalysisRun, RunCommand, RunStatus};

/// Run record, staleness finding and summary.
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub run: AnalysisRun,
    /// Set when this request found and cleared a dead execution lease.
    pub stale: Option<String>,
    pub summary: RunSummary,
}

/// Acknowledgement of a pause/stop request.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub run_id: String,
    pub command: RunCommand,
    /// `"applied"` when the status changed now, `"deferred"` when it was
    /// stored for the lease holder to take at its next element boundary.
    pub disposition: &'static str,
    /// New status when applied.
    pub status: Option<RunStatus>,
}

/// Error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
