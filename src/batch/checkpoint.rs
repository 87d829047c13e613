//! Checkpoint and resume manager: run state machine, execution lease and
//! heartbeat watchdog.
//!
//! A run is advanced by at most one invocation at a time, the holder of its
//! [`ExecutionLease`]. The lease is live while the heartbeat is younger than
//! the heartbeat timeout and the lease is younger than the wall-clock
//! ceiling. A dead lease is invalidated without touching progress counters
//! or element records, so a fresh invocation can resume where the last one
//! stopped.
//!
//! Lease changes made here go through [`PersistenceGateway::swap_lease`], a
//! compare-and-set on the stored holder, so a watchdog or a second invocation
//! never overwrites progress written by the holder.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::clock::Clock;
use super::types::{AnalysisRun, ElementStatus, ExecutionLease, LeaseChange, RunCommand, RunStatus};
use crate::config::RunConfig;
use crate::error::RunError;
use crate::store::{PersistenceGateway, RetryPolicy};

/// Why an execution lease was found dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    HeartbeatExpired { age: Duration },
    RuntimeCeiling { elapsed: Duration },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartbeatExpired { age } => {
                write!(f, "heartbeat not updated for {}s", age.num_seconds())
            }
            Self::RuntimeCeiling { elapsed } => {
                write!(f, "lease held for {}s, past the wall-clock ceiling", elapsed.num_seconds())
            }
        }
    }
}

/// Result of a watchdog status check.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Run state after any recovery.
    pub run: AnalysisRun,
    /// Set when the check found and invalidated a dead lease.
    pub stale: Option<StaleReason>,
}

/// Result of acquiring a run for processing.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquired {
    /// The caller now holds the lease of a Running run.
    Ready {
        run: AnalysisRun,
        /// Records left in processing by a previous holder, reset to not_started.
        recovered_orphans: usize,
        /// Failed records reset for retry.
        retried_failed: usize,
    },
    /// Nothing to do; the run already completed.
    AlreadyCompleted(AnalysisRun),
}

/// How a pause/stop request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Run status changed immediately.
    Applied(RunStatus),
    /// Stored for the live lease holder, which takes it at its next element
    /// boundary.
    Deferred,
}

/// Owns run-level state transitions.
pub struct CheckpointManager {
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    heartbeat_timeout: Duration,
    max_runtime: Duration,
}

impl CheckpointManager {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, clock: Arc<dyn Clock>, cfg: &RunConfig) -> Self {
        Self {
            gateway,
            clock,
            retry: RetryPolicy::from_config(cfg),
            heartbeat_timeout: cfg.heartbeat_timeout(),
            max_runtime: cfg.max_runtime(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn swap_lease(&self, run: &AnalysisRun, expected_holder: Option<&str>) -> Result<(), RunError> {
        let change = LeaseChange::of(run);
        self.retry.run("swap_lease", || {
            self.gateway.swap_lease(&run.run_id, expected_holder, &change)
        })
    }

    /// Loads a run.
    ///
    /// # Errors
    ///
    /// [`RunError::UnknownRun`] if it does not exist.
    pub fn load(&self, run_id: &str) -> Result<AnalysisRun, RunError> {
        self.retry
            .run("load_run", || self.gateway.load_run(run_id))?
            .ok_or_else(|| RunError::UnknownRun(run_id.to_string()))
    }

    /// Creates an Idle run.
    ///
    /// # Errors
    ///
    /// [`RunError::Persistence`] if the id is taken or the store fails.
    pub fn create(&self, run_id: &str, elements_total: usize) -> Result<AnalysisRun, RunError> {
        let run = AnalysisRun::new(run_id, elements_total, self.now());
        self.retry.run("create_run", || self.gateway.create_run(&run))?;
        info!(run_id, elements_total, "run created");
        Ok(run)
    }

    /// Why the lease of `run` is dead at `now`, if it is.
    ///
    /// Only Running runs can be stale.
    pub fn stale_reason(&self, run: &AnalysisRun, now: DateTime<Utc>) -> Option<StaleReason> {
        if run.status != RunStatus::Running {
            return None;
        }
        let age = now - run.last_heartbeat;
        if age > self.heartbeat_timeout {
            return Some(StaleReason::HeartbeatExpired { age });
        }
        if let Some(lease) = &run.lease {
            let elapsed = now - lease.acquired_at;
            if elapsed > self.max_runtime {
                return Some(StaleReason::RuntimeCeiling { elapsed });
            }
        }
        None
    }

    /// Whether some invocation currently holds a live lease on `run`.
    pub fn lease_is_live(&self, run: &AnalysisRun, now: DateTime<Utc>) -> bool {
        run.lease.is_some() && self.stale_reason(run, now).is_none()
    }

    /// Whether the lease held on `run` has passed the wall-clock ceiling.
    pub fn ceiling_exceeded(&self, run: &AnalysisRun, now: DateTime<Utc>) -> bool {
        run.lease
            .as_ref()
            .is_some_and(|l| now - l.acquired_at > self.max_runtime)
    }

    /// Watchdog check.
    ///
    /// A Running run whose heartbeat is older than the timeout, or whose lease
    /// passed the ceiling, loses its lease and gets a fresh heartbeat. Status,
    /// `elements_processed` and element records are left as they are.
    ///
    /// # Errors
    ///
    /// [`RunError::UnknownRun`] or [`RunError::Persistence`].
    pub fn check_status(&self, run_id: &str) -> Result<StatusReport, RunError> {
        let mut run = self.load(run_id)?;
        let now = self.now();
        let stale = self.stale_reason(&run, now);
        if let Some(reason) = stale {
            warn!(
                run_id,
                %reason,
                elements_processed = run.elements_processed,
                holder = run.lease.as_ref().map(|l| l.holder.as_str()),
                "stale run, execution lease invalidated"
            );
            let expected = run.lease.take().map(|l| l.holder);
            run.last_heartbeat = now;
            match self.swap_lease(&run, expected.as_deref()) {
                Ok(()) => {}
                Err(RunError::LeaseLost { .. }) => {
                    info!(run_id, "lease changed during status check");
                    return Ok(StatusReport {
                        run: self.load(run_id)?,
                        stale: None,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(StatusReport { run, stale })
    }

    /// Takes the execution lease for `holder`, resuming or starting the run.
    ///
    /// The lease is swapped in first, which fences out any previous holder.
    /// Orphaned processing records it left behind are then reset to
    /// not_started. With `retry_failed`, failed records are reset too and
    /// `elements_processed` drops accordingly. A pause/stop request stored
    /// earlier is left for the new holder to take.
    ///
    /// # Errors
    ///
    /// - [`RunError::Terminal`] for Stopped or Failed runs
    /// - [`RunError::RunLocked`] while another invocation holds a live lease,
    ///   including one that acquired it concurrently
    /// - [`RunError::UnknownRun`] or [`RunError::Persistence`]
    pub fn acquire(&self, run_id: &str, holder: &str, retry_failed: bool) -> Result<Acquired, RunError> {
        let mut run = self.load(run_id)?;
        let now = self.now();

        match run.status {
            RunStatus::Completed => {
                info!(run_id, "run already completed");
                return Ok(Acquired::AlreadyCompleted(run));
            }
            RunStatus::Stopped | RunStatus::Failed => {
                return Err(RunError::Terminal {
                    run_id: run_id.to_string(),
                    status: run.status,
                });
            }
            RunStatus::Running => {
                if let Some(lease) = &run.lease {
                    if self.lease_is_live(&run, now) {
                        return Err(RunError::RunLocked {
                            run_id: run_id.to_string(),
                            holder: lease.holder.clone(),
                            expires_at: lease.expires_at,
                        });
                    }
                    let reason = self
                        .stale_reason(&run, now)
                        .map_or_else(|| "lease expired".to_string(), |r| r.to_string());
                    warn!(run_id, previous = %lease.holder, %reason, "taking over stale execution lease");
                }
            }
            RunStatus::Idle | RunStatus::Paused => {
                self.transition(&mut run, RunStatus::Running, None)?;
            }
        }

        let previous = run.lease.take().map(|l| l.holder);
        run.lease = Some(ExecutionLease {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + self.heartbeat_timeout,
        });
        run.last_heartbeat = now;
        run.status_reason = None;
        match self.swap_lease(&run, previous.as_deref()) {
            Ok(()) => {}
            Err(RunError::LeaseLost { .. }) => {
                let current = self.load(run_id)?;
                return Err(match current.lease {
                    Some(lease) => RunError::RunLocked {
                        run_id: run_id.to_string(),
                        holder: lease.holder,
                        expires_at: lease.expires_at,
                    },
                    None => RunError::LeaseLost {
                        run_id: run_id.to_string(),
                        holder: holder.to_string(),
                    },
                });
            }
            Err(e) => return Err(e),
        }

        let recovered_orphans = self.retry.run("reset_records", || {
            self.gateway.reset_records(run_id, ElementStatus::Processing)
        })?;
        if recovered_orphans > 0 {
            warn!(run_id, recovered_orphans, "orphaned claims reset to not_started");
        }

        let retried_failed = if retry_failed {
            let n = self.retry.run("reset_records", || {
                self.gateway.reset_records(run_id, ElementStatus::Failed)
            })?;
            if n > 0 {
                run.elements_processed = run.elements_processed.saturating_sub(n);
                self.retry.run("commit", || self.gateway.commit(&run, holder, &[]))?;
            }
            n
        } else {
            0
        };

        info!(
            run_id,
            holder,
            next_index = run.next_index,
            elements_processed = run.elements_processed,
            "execution lease acquired"
        );
        Ok(Acquired::Ready {
            run,
            recovered_orphans,
            retried_failed,
        })
    }

    /// Refreshes the heartbeat and extends the lease, in memory and in the
    /// store, and takes any pause/stop request stored for the holder.
    ///
    /// # Returns
    ///
    /// The stored request, which is cleared in the same write.
    ///
    /// # Errors
    ///
    /// [`RunError::LeaseLost`] once another invocation or the watchdog has
    /// taken the lease; [`RunError::Persistence`] on store failure.
    pub fn renew(&self, run: &mut AnalysisRun) -> Result<Option<RunCommand>, RunError> {
        let now = self.now();
        run.last_heartbeat = now;
        let Some(lease) = &mut run.lease else {
            return Ok(None);
        };
        lease.expires_at = now + self.heartbeat_timeout;
        let (holder, expires_at) = (lease.holder.as_str(), lease.expires_at);
        let command = self.retry.run("heartbeat", || {
            self.gateway.heartbeat(&run.run_id, holder, now, expires_at)
        })?;
        if let Some(command) = command {
            info!(run_id = %run.run_id, %command, "stored control request taken");
        }
        Ok(command)
    }

    /// Applies a state-machine transition in memory.
    ///
    /// # Errors
    ///
    /// [`RunError::InvalidTransition`] if the state machine forbids it.
    pub fn transition(&self, run: &mut AnalysisRun, to: RunStatus, reason: Option<String>) -> Result<(), RunError> {
        if !run.status.can_transition_to(to) {
            return Err(RunError::InvalidTransition {
                run_id: run.run_id.clone(),
                from: run.status,
                to,
            });
        }
        run.status = to;
        run.status_reason = reason;
        Ok(())
    }

    /// Handles a pause or stop request from outside the running invocation.
    ///
    /// While a live lease exists the request is stored for the holder.
    /// Otherwise it is applied directly: Running or Paused runs move to
    /// Paused/Stopped and lose any dead lease.
    ///
    /// # Errors
    ///
    /// - [`RunError::Terminal`] for finished runs
    /// - [`RunError::InvalidTransition`] for requests the state machine forbids
    /// - [`RunError::UnknownRun`] or [`RunError::Persistence`]
    pub fn request(&self, run_id: &str, command: RunCommand) -> Result<RequestOutcome, RunError> {
        let mut run = self.load(run_id)?;
        let now = self.now();

        if run.status.is_terminal() {
            return Err(RunError::Terminal {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }
        if run.status == RunStatus::Running && self.lease_is_live(&run, now) {
            self.retry.run("set_pending_command", || {
                self.gateway.set_pending_command(run_id, Some(command))
            })?;
            info!(run_id, %command, "control request stored for lease holder");
            return Ok(RequestOutcome::Deferred);
        }

        let target = match command {
            RunCommand::Pause => RunStatus::Paused,
            RunCommand::Stop => RunStatus::Stopped,
        };
        if run.status == target {
            return Ok(RequestOutcome::Applied(target));
        }
        self.transition(&mut run, target, Some(format!("{command} requested")))?;
        let expected = run.lease.take().map(|l| l.holder);
        run.last_heartbeat = now;
        self.swap_lease(&run, expected.as_deref())?;
        if run.pending_command.is_some() {
            self.retry
                .run("set_pending_command", || self.gateway.set_pending_command(run_id, None))?;
        }
        info!(run_id, status = %target, "control request applied");
        Ok(RequestOutcome::Applied(target))
    }

    /// Best-effort write of a Failed status after a persistence failure.
    ///
    /// Results committed before the failure stay valid. Nothing is written
    /// unless `holder` still holds the lease.
    pub fn mark_failed(&self, run: &AnalysisRun, holder: &str, reason: &str) {
        let change = LeaseChange {
            lease: None,
            status: RunStatus::Failed,
            status_reason: Some(reason.to_string()),
            last_heartbeat: self.now(),
        };
        if let Err(e) = self.gateway.swap_lease(&run.run_id, Some(holder), &change) {
            warn!(run_id = %run.run_id, error = %e, "could not record run failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::clock::ManualClock;
    use crate::store::MemoryStore;

    fn setup() -> (CheckpointManager, Arc<ManualClock>, Arc<dyn PersistenceGateway>) {
        let clock = Arc::new(ManualClock::default());
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        let cfg = RunConfig {
            persist_retry_base_ms: 0,
            ..RunConfig::default()
        };
        let mgr = CheckpointManager::new(store.clone(), clock.clone(), &cfg);
        (mgr, clock, store)
    }

    fn ready(a: Acquired) -> AnalysisRun {
        match a {
            Acquired::Ready { run, .. } => run,
            Acquired::AlreadyCompleted(run) => panic!("unexpected completed run {}", run.run_id),
        }
    }

    #[test]
    fn acquire_starts_idle_run() {
        let (mgr, _, _) = setup();
        mgr.create("r", 5).expect("create");
        let run = ready(mgr.acquire("r", "inv-1", false).expect("acquire"));
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.lease.map(|l| l.holder), Some("inv-1".to_string()));
    }

    #[test]
    fn live_lease_blocks_second_invocation() {
        let (mgr, clock, _) = setup();
        mgr.create("r", 5).expect("create");
        mgr.acquire("r", "inv-1", false).expect("acquire");
        clock.advance(Duration::seconds(60));
        assert!(matches!(
            mgr.acquire("r", "inv-2", false),
            Err(RunError::RunLocked { holder, .. }) if holder == "inv-1"
        ));
    }

    #[test]
    fn stale_lease_is_taken_over() {
        let (mgr, clock, _) = setup();
        mgr.create("r", 5).expect("create");
        mgr.acquire("r", "inv-1", false).expect("acquire");
        clock.advance(Duration::seconds(121));
        let run = ready(mgr.acquire("r", "inv-2", false).expect("acquire"));
        assert_eq!(run.lease.map(|l| l.holder), Some("inv-2".to_string()));
    }

    #[test]
    fn watchdog_keeps_progress_and_status() {
        let (mgr, clock, store) = setup();
        mgr.create("r", 100).expect("create");
        let mut run = ready(mgr.acquire("r", "inv-1", false).expect("acquire"));
        run.elements_processed = 37;
        store.commit(&run, "inv-1", &[]).expect("commit");

        clock.advance(Duration::seconds(121));
        let report = mgr.check_status("r").expect("status");
        assert!(matches!(report.stale, Some(StaleReason::HeartbeatExpired { .. })));
        assert_eq!(report.run.status, RunStatus::Running);
        assert_eq!(report.run.elements_processed, 37);
        assert!(report.run.lease.is_none());
        assert_eq!(report.run.last_heartbeat, clock.now());

        let again = mgr.check_status("r").expect("status");
        assert!(again.stale.is_none());
    }

    #[test]
    fn ceiling_invalidates_even_with_fresh_heartbeat() {
        let (mgr, clock, _) = setup();
        mgr.create("r", 10).expect("create");
        let mut run = ready(mgr.acquire("r", "inv-1", false).expect("acquire"));
        for _ in 0..31 {
            clock.advance(Duration::seconds(60));
            mgr.renew(&mut run).expect("renew");
        }
        let report = mgr.check_status("r").expect("status");
        assert!(matches!(report.stale, Some(StaleReason::RuntimeCeiling { .. })));
    }

    #[test]
    fn completed_run_is_idempotent() {
        let (mgr, _, store) = setup();
        mgr.create("r", 1).expect("create");
        let mut run = ready(mgr.acquire("r", "inv-1", false).expect("acquire"));
        mgr.transition(&mut run, RunStatus::Completed, None).expect("complete");
        run.lease = None;
        store.commit(&run, "inv-1", &[]).expect("commit");
        assert!(matches!(
            mgr.acquire("r", "inv-2", false),
            Ok(Acquired::AlreadyCompleted(_))
        ));
    }

    #[test]
    fn stop_on_paused_run_is_terminal() {
        let (mgr, clock, _) = setup();
        mgr.create("r", 1).expect("create");
        mgr.acquire("r", "inv-1", false).expect("acquire");
        assert_eq!(mgr.request("r", RunCommand::Pause).ok(), Some(RequestOutcome::Deferred));

        clock.advance(Duration::seconds(200));
        assert_eq!(
            mgr.request("r", RunCommand::Pause).ok(),
            Some(RequestOutcome::Applied(RunStatus::Paused))
        );
        assert_eq!(
            mgr.request("r", RunCommand::Stop).ok(),
            Some(RequestOutcome::Applied(RunStatus::Stopped))
        );
        assert!(matches!(mgr.acquire("r", "inv-2", false), Err(RunError::Terminal { .. })));
        assert!(matches!(mgr.request("r", RunCommand::Pause), Err(RunError::Terminal { .. })));
    }

    #[test]
    fn idle_run_cannot_be_paused() {
        let (mgr, _, _) = setup();
        mgr.create("r", 1).expect("create");
        assert!(matches!(
            mgr.request("r", RunCommand::Pause),
            Err(RunError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn renew_takes_stored_request_once() {
        let (mgr, clock, store) = setup();
        mgr.create("r", 1).expect("create");
        let mut run = ready(mgr.acquire("r", "inv-1", false).expect("acquire"));
        mgr.request("r", RunCommand::Stop).expect("request");
        clock.advance(Duration::seconds(5));
        assert_eq!(mgr.renew(&mut run).ok(), Some(Some(RunCommand::Stop)));
        assert_eq!(mgr.renew(&mut run).ok(), Some(None));

        let stored = store.load_run("r").expect("load").expect("exists");
        assert_eq!(stored.last_heartbeat, clock.now());
        assert!(stored.pending_command.is_none());
    }

    #[test]
    fn request_arriving_after_a_renew_is_kept() {
        let (mgr, _, _) = setup();
        mgr.create("r", 1).expect("create");
        let mut run = ready(mgr.acquire("r", "inv-1", false).expect("acquire"));
        assert_eq!(mgr.renew(&mut run).ok(), Some(None));
        mgr.request("r", RunCommand::Pause).expect("request");
        assert_eq!(mgr.renew(&mut run).ok(), Some(Some(RunCommand::Pause)));
    }

    #[test]
    fn renew_after_takeover_reports_lost_lease() {
        let (mgr, clock, store) = setup();
        mgr.create("r", 10).expect("create");
        let mut first = ready(mgr.acquire("r", "inv-1", false).expect("acquire"));
        clock.advance(Duration::seconds(121));
        ready(mgr.acquire("r", "inv-2", false).expect("takeover"));

        assert!(matches!(
            mgr.renew(&mut first),
            Err(RunError::LeaseLost { holder, .. }) if holder == "inv-1"
        ));
        first.elements_processed = 9;
        assert!(store.commit(&first, "inv-1", &[]).is_err());
        mgr.mark_failed(&first, "inv-1", "late failure");

        let stored = store.load_run("r").expect("load").expect("exists");
        assert_eq!(stored.status, RunStatus::Running);
        assert_eq!(stored.elements_processed, 0);
        assert_eq!(stored.lease.map(|l| l.holder), Some("inv-2".to_string()));
    }

    #[test]
    fn applied_request_clears_stored_request() {
        let (mgr, clock, store) = setup();
        mgr.create("r", 1).expect("create");
        mgr.acquire("r", "inv-1", false).expect("acquire");
        assert_eq!(mgr.request("r", RunCommand::Pause).ok(), Some(RequestOutcome::Deferred));
        clock.advance(Duration::seconds(200));
        assert_eq!(
            mgr.request("r", RunCommand::Pause).ok(),
            Some(RequestOutcome::Applied(RunStatus::Paused))
        );
        let stored = store.load_run("r").expect("load").expect("exists");
        assert!(stored.pending_command.is_none());
        assert!(stored.lease.is_none());
    }

    #[test]
    fn unknown_run() {
        let (mgr, _, _) = setup();
        assert!(matches!(mgr.check_status("nope"), Err(RunError::UnknownRun(_))));
    }
}
