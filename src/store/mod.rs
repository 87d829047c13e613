//! Persistence gateway for run, registry and result records.
//!
//! The run layer talks to storage only through [`PersistenceGateway`].
//! Every call is made through a [`RetryPolicy`] so transient backend
//! failures are retried with exponential backoff before a run is failed.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::batch::types::{
    AnalysisRun, ElementCommit, ElementProcessingRecord, ElementStatus, LeaseChange, RadiationResult, RunCommand,
};
use crate::config::{RunConfig, StoreConfig};
use crate::error::{RunError, StoreError};

/// Storage for runs, element records and results.
///
/// Implementations must make [`try_claim`](Self::try_claim) an atomic
/// compare-and-set on the (run, element) key and apply a whole
/// [`commit`](Self::commit) batch in one transaction.
///
/// Every write made on behalf of an invocation is fenced by the run's lease:
/// it succeeds only while the stored lease holder is the caller, and fails
/// with [`StoreError::LeaseLost`] otherwise. A superseded invocation can
/// therefore never overwrite progress or records of the holder that replaced it.
pub trait PersistenceGateway: Send + Sync {
    /// Inserts a new run.
    ///
    /// # Errors
    ///
    /// [`StoreError::RunExists`] if the id is taken.
    fn create_run(&self, run: &AnalysisRun) -> Result<(), StoreError>;

    fn load_run(&self, run_id: &str) -> Result<Option<AnalysisRun>, StoreError>;

    /// Replaces lease, status, status reason and heartbeat of `run_id` if the
    /// stored lease holder is `expected_holder` (`None`: no lease).
    ///
    /// Progress columns and `pending_command` are left alone.
    ///
    /// # Errors
    ///
    /// [`StoreError::LeaseLost`] if the lease changed since it was read.
    fn swap_lease(&self, run_id: &str, expected_holder: Option<&str>, change: &LeaseChange) -> Result<(), StoreError>;

    /// Refreshes the heartbeat and lease expiry of `holder`'s lease and takes
    /// any persisted pause/stop request in the same step.
    ///
    /// # Errors
    ///
    /// [`StoreError::LeaseLost`] if `holder` no longer holds the lease.
    fn heartbeat(
        &self,
        run_id: &str,
        holder: &str,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<RunCommand>, StoreError>;

    /// Sets or clears the persisted pause/stop request.
    fn set_pending_command(&self, run_id: &str, command: Option<RunCommand>) -> Result<(), StoreError>;

    fn load_records(&self, run_id: &str) -> Result<Vec<ElementProcessingRecord>, StoreError>;

    /// Moves `element_id` from not_started (or absent) to processing for `holder`.
    ///
    /// Returns `false` when the record exists in any other state.
    ///
    /// # Errors
    ///
    /// [`StoreError::LeaseLost`] if `holder` does not hold the run's lease.
    fn try_claim(&self, run_id: &str, element_id: &str, holder: &str) -> Result<bool, StoreError>;

    /// Writes record transitions, their results and the run's progress atomically.
    ///
    /// Every record in `commits` must still be claimed by `holder`. Does not
    /// modify `pending_command`.
    ///
    /// # Errors
    ///
    /// [`StoreError::LeaseLost`] if `holder` lost the lease or a claim; nothing
    /// is written in that case.
    fn commit(&self, run: &AnalysisRun, holder: &str, commits: &[ElementCommit]) -> Result<(), StoreError>;

    /// Resets every record of `run_id` in state `from` to not_started.
    ///
    /// Returns the number of records reset.
    fn reset_records(&self, run_id: &str, from: ElementStatus) -> Result<usize, StoreError>;

    /// Results of `run_id`, ordered by element id.
    fn load_results(&self, run_id: &str) -> Result<Vec<RadiationResult>, StoreError>;
}

/// Error for a fenced write whose expected lease holder was not found.
pub(crate) fn lease_lost(run_id: &str, expected_holder: Option<&str>) -> StoreError {
    StoreError::LeaseLost {
        run_id: run_id.to_string(),
        holder: expected_holder.unwrap_or("(none)").to_string(),
    }
}

/// Retry-with-backoff wrapper for gateway calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(cfg: &RunConfig) -> Self {
        Self::new(cfg.persist_retry_attempts, Duration::from_millis(cfg.persist_retry_base_ms))
    }

    /// A single attempt and no delay.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Calls `f` until it succeeds, fails permanently or attempts run out.
    ///
    /// The delay doubles after each transient failure.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Persistence`] with the last store error, or
    /// [`RunError::LeaseLost`] at once when a fenced write was refused.
    pub fn run<T>(
        &self,
        operation: &'static str,
        mut f: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, RunError> {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
                    warn!(operation, attempt, error = %e, ?delay, "store call failed, retrying");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(StoreError::LeaseLost { run_id, holder }) => {
                    return Err(RunError::LeaseLost { run_id, holder });
                }
                Err(source) => {
                    return Err(RunError::Persistence {
                        operation,
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RunConfig::default())
    }
}

/// Opens the configured backend.
///
/// # Errors
///
/// Returns a [`StoreError`] if the SQLite file cannot be opened or migrated,
/// or the backend name is unknown.
pub fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn PersistenceGateway>, StoreError> {
    match cfg.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => Ok(Arc::new(SqliteStore::open(&cfg.path)?)),
        other => Err(StoreError::Unavailable(format!("unknown backend \"{other}\""))),
    }
}
