//! Error taxonomy for input validation, element computation, persistence and run control.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::batch::types::RunStatus;

/// Missing or malformed input data. Fails a run before any element is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputDataError {
    #[error("weather series is empty")]
    EmptyWeather,
    #[error("weather point {index}: {field} = {value} is not a finite non-negative irradiance")]
    InvalidIrradiance {
        index: usize,
        field: &'static str,
        value: f64,
    },
    #[error("weather point {index}: day_of_year {day} outside 1..=366")]
    DayOutOfRange { index: usize, day: u32 },
    #[error("weather point {index}: hour {hour} outside 0..=23")]
    HourOutOfRange { index: usize, hour: u32 },
    #[error("weather point {index}: series is not ordered by (day, hour)")]
    Unordered { index: usize },
    #[error("no building elements supplied")]
    NoElements,
    #[error("element row {index}: missing element_id")]
    MissingElementId { index: usize },
    #[error("element {element_id}: {field} {message}")]
    InvalidElement {
        element_id: String,
        field: &'static str,
        message: String,
    },
    #[error("{source_name} row {row}: {message}")]
    Malformed {
        source_name: String,
        row: usize,
        message: String,
    },
    #[error("cannot read \"{path}\": {message}")]
    Unreadable { path: String, message: String },
}

/// Numeric failure confined to a single element; the batch continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElementComputationError {
    #[error("degenerate orientation vector {0:?}")]
    DegenerateOrientation([f64; 3]),
    #[error("non-finite {quantity} at day {day} hour {hour}")]
    NonFinite {
        quantity: &'static str,
        day: u32,
        hour: u32,
    },
}

/// Failure reported by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} already exists")]
    RunExists(String),
    #[error("run {0} not found")]
    RunNotFound(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("run {run_id}: execution lease is not held by {holder}")]
    LeaseLost { run_id: String, holder: String },
}

impl StoreError {
    /// Whether retrying the same call can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::Unavailable(_))
    }
}

/// Errors that end a run invocation.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Input(#[from] InputDataError),
    #[error("persistence failed after {attempts} attempt(s) during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        attempts: u32,
        source: StoreError,
    },
    #[error("run {0} not found")]
    UnknownRun(String),
    #[error("run {run_id} is locked by invocation {holder} until {expires_at}")]
    RunLocked {
        run_id: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },
    #[error("run {run_id}: invocation {holder} lost the execution lease")]
    LeaseLost { run_id: String, holder: String },
    #[error("run {run_id} is {status} and cannot be resumed; start a new run to reprocess")]
    Terminal { run_id: String, status: RunStatus },
    #[error("run {run_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
}
