//! Run, element-record and result types shared by the batch engine and the stores.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::elements::Orientation;

/// Lifecycle state of an [`AnalysisRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed, Stopped and Failed runs accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Whether the state machine allows `self -> next`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bipv_radiation::batch::types::RunStatus;
    ///
    /// assert!(RunStatus::Idle.can_transition_to(RunStatus::Running));
    /// assert!(RunStatus::Paused.can_transition_to(RunStatus::Stopped));
    /// assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
    /// ```
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Stopped)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Stopped)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-element processing state within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementStatus {
    NotStarted,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ElementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive right of one invocation to advance a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLease {
    /// Invocation id of the holder.
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Control request delivered to a running invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCommand {
    Pause,
    Stop,
}

impl RunCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(Self::Pause),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for RunCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted lifecycle record of one batch analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Liveness timestamp, persisted after every element by the lease holder.
    pub last_heartbeat: DateTime<Utc>,
    pub elements_total: usize,
    /// Elements that reached a terminal record state (completed, skipped or failed).
    pub elements_processed: usize,
    /// Position in the ordered element list where the next invocation starts.
    pub next_index: usize,
    pub lease: Option<ExecutionLease>,
    /// Pause/stop request written by another process, taken by the lease
    /// holder at its next element boundary.
    pub pending_command: Option<RunCommand>,
    pub status_reason: Option<String>,
}

impl AnalysisRun {
    /// Creates an idle run with no lease.
    pub fn new(run_id: &str, elements_total: usize, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Idle,
            started_at: now,
            last_heartbeat: now,
            elements_total,
            elements_processed: 0,
            next_index: 0,
            lease: None,
            pending_command: None,
            status_reason: None,
        }
    }

    /// Fraction of elements processed, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.elements_total == 0 {
            return 1.0;
        }
        (self.elements_processed as f64 / self.elements_total as f64).min(1.0)
    }
}

/// Lease, status and heartbeat written together by
/// [`PersistenceGateway::swap_lease`](crate::store::PersistenceGateway::swap_lease).
///
/// Progress columns are never part of a lease change.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseChange {
    pub lease: Option<ExecutionLease>,
    pub status: RunStatus,
    pub status_reason: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
}

impl LeaseChange {
    /// The lease-related fields of `run` as they are in memory.
    pub fn of(run: &AnalysisRun) -> Self {
        Self {
            lease: run.lease.clone(),
            status: run.status,
            status_reason: run.status_reason.clone(),
            last_heartbeat: run.last_heartbeat,
        }
    }
}

/// One registry row per (run, element).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementProcessingRecord {
    pub run_id: String,
    pub element_id: String,
    pub status: ElementStatus,
    /// Key of the stored [`RadiationResult`] when completed.
    pub result_reference: Option<String>,
    /// Exclusion or failure reason.
    pub reason: Option<String>,
    /// Invocation that holds (or last held) the claim.
    pub claimed_by: Option<String>,
}

/// Builds the key under which a run's result for `element_id` is stored.
pub fn result_reference(run_id: &str, element_id: &str) -> String {
    format!("{run_id}/{element_id}")
}

/// Calculation diagnostics attached to every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDiagnostics {
    pub sampled_timesteps: usize,
    pub daylight_samples: usize,
    /// False when no wall data was supplied.
    pub shading_modeled: bool,
    /// Full-year timestep count divided by sampled timestep count.
    pub scale_factor: f64,
}

/// Annual radiation metrics for one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiationResult {
    pub element_id: String,
    pub orientation: Orientation,
    pub area_m2: f64,
    pub tilt_deg: f64,
    pub azimuth_deg: f64,
    /// kWh/m²/yr, >= 0.
    pub annual_irradiation_kwh_m2: f64,
    /// W/m², >= 0.
    pub peak_irradiance_w_m2: f64,
    pub monthly_irradiation_kwh_m2: [f64; 12],
    /// `annual_irradiation_kwh_m2 * area_m2`.
    pub annual_energy_potential_kwh: f64,
    pub diagnostics: ResultDiagnostics,
}

/// A buffered registry transition, written together with its result.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementCommit {
    pub element_id: String,
    pub status: ElementStatus,
    pub result: Option<RadiationResult>,
    pub reason: Option<String>,
}
