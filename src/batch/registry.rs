//! Duplicate-prevention registry: at-most-once claims per element per run.
//!
//! Claims go straight to the store as an atomic compare-and-set. Releases are
//! buffered and written by [`DuplicateRegistry::flush`] together with the run's
//! progress. The in-memory mirror only short-circuits repeated checks; a claim
//! is never granted on the mirror's word alone. Claims and flushes are fenced
//! on the invocation's lease, so a registry whose invocation was superseded
//! gets [`RunError::LeaseLost`] instead of writing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::types::{AnalysisRun, ElementCommit, ElementStatus, RadiationResult};
use crate::error::RunError;
use crate::store::{PersistenceGateway, RetryPolicy};

/// How a claimed element finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Completed(RadiationResult),
    /// Excluded with a reason (ineligible or zero samples).
    Skipped(String),
    Failed(String),
}

/// Registry scoped to one run and one invocation.
pub struct DuplicateRegistry {
    run_id: String,
    holder: String,
    gateway: Arc<dyn PersistenceGateway>,
    retry: RetryPolicy,
    mirror: HashMap<String, ElementStatus>,
    pending: Vec<ElementCommit>,
}

impl DuplicateRegistry {
    /// Loads the persisted records of `run_id` into the mirror.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Persistence`] if the records cannot be read.
    pub fn load(
        run_id: &str,
        holder: &str,
        gateway: Arc<dyn PersistenceGateway>,
        retry: RetryPolicy,
    ) -> Result<Self, RunError> {
        let records = retry.run("load_records", || gateway.load_records(run_id))?;
        let mirror = records
            .into_iter()
            .map(|r| (r.element_id, r.status))
            .collect();
        Ok(Self {
            run_id: run_id.to_string(),
            holder: holder.to_string(),
            gateway,
            retry,
            mirror,
            pending: Vec::new(),
        })
    }

    /// Current status; elements never claimed are not_started.
    pub fn status(&self, element_id: &str) -> ElementStatus {
        self.mirror
            .get(element_id)
            .copied()
            .unwrap_or(ElementStatus::NotStarted)
    }

    /// Atomically moves `element_id` from not_started to processing.
    ///
    /// Returns `false` if the element is already claimed or finished.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::LeaseLost`] if the invocation no longer holds the
    /// lease, or [`RunError::Persistence`] if the store cannot be reached.
    pub fn claim(&mut self, element_id: &str) -> Result<bool, RunError> {
        if self.status(element_id) != ElementStatus::NotStarted {
            return Ok(false);
        }
        let granted = self.retry.run("claim", || {
            self.gateway.try_claim(&self.run_id, element_id, &self.holder)
        })?;
        if granted {
            self.mirror.insert(element_id.to_string(), ElementStatus::Processing);
        } else {
            debug!(run_id = %self.run_id, element_id, "claim refused by store");
        }
        Ok(granted)
    }

    /// Records the outcome of a claimed element; persisted on the next flush.
    pub fn release(&mut self, element_id: &str, outcome: ReleaseOutcome) {
        let (status, result, reason) = match outcome {
            ReleaseOutcome::Completed(r) => (ElementStatus::Completed, Some(r), None),
            ReleaseOutcome::Skipped(reason) => (ElementStatus::Skipped, None, Some(reason)),
            ReleaseOutcome::Failed(reason) => (ElementStatus::Failed, None, Some(reason)),
        };
        self.mirror.insert(element_id.to_string(), status);
        self.pending.push(ElementCommit {
            element_id: element_id.to_string(),
            status,
            result,
            reason,
        });
    }

    /// Number of releases not yet persisted.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Writes buffered releases and `run` in one transaction.
    ///
    /// The buffer is kept if the write fails.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::LeaseLost`] if the lease or any buffered claim was
    /// taken over, or [`RunError::Persistence`] once retries are exhausted.
    pub fn flush(&mut self, run: &AnalysisRun) -> Result<usize, RunError> {
        let count = self.pending.len();
        self.retry.run("flush", || self.gateway.commit(run, &self.holder, &self.pending))?;
        self.pending.clear();
        debug!(run_id = %self.run_id, count, "registry flushed");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::batch::types::{ExecutionLease, LeaseChange, RunStatus};
    use crate::store::MemoryStore;

    fn lease_to(store: &Arc<dyn PersistenceGateway>, run: &mut AnalysisRun, holder: &str) {
        let now = Utc::now();
        let previous = run.lease.take().map(|l| l.holder);
        run.status = RunStatus::Running;
        run.lease = Some(ExecutionLease {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(120),
        });
        store
            .swap_lease(&run.run_id, previous.as_deref(), &LeaseChange::of(run))
            .expect("lease");
    }

    fn setup(holder: &str) -> (Arc<dyn PersistenceGateway>, AnalysisRun) {
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        let mut run = AnalysisRun::new("r", 3, Utc::now());
        store.create_run(&run).expect("create");
        lease_to(&store, &mut run, holder);
        (store, run)
    }

    #[test]
    fn claim_once_then_refuse() {
        let (store, _) = setup("inv");
        let mut reg = DuplicateRegistry::load("r", "inv", store, RetryPolicy::none()).expect("load");
        assert_eq!(reg.claim("a").ok(), Some(true));
        assert_eq!(reg.status("a"), ElementStatus::Processing);
        assert_eq!(reg.claim("a").ok(), Some(false));
    }

    #[test]
    fn superseded_registry_cannot_claim_or_flush() {
        let (store, mut run) = setup("inv-1");
        let mut first = DuplicateRegistry::load("r", "inv-1", store.clone(), RetryPolicy::none()).expect("load");
        assert_eq!(first.claim("a").ok(), Some(true));
        first.release("a", ReleaseOutcome::Skipped("ineligible".into()));
        let stale = run.clone();

        lease_to(&store, &mut run, "inv-2");
        let mut second = DuplicateRegistry::load("r", "inv-2", store.clone(), RetryPolicy::none()).expect("load");
        assert_eq!(second.status("a"), ElementStatus::Processing);
        assert_eq!(second.claim("a").ok(), Some(false));
        assert_eq!(second.claim("b").ok(), Some(true));

        assert!(matches!(first.claim("c"), Err(RunError::LeaseLost { .. })));
        assert!(matches!(first.flush(&stale), Err(RunError::LeaseLost { .. })));
        assert_eq!(first.pending_len(), 1);
        assert_eq!(store.load_records("r").expect("records")[0].status, ElementStatus::Processing);
    }

    #[test]
    fn release_is_buffered_until_flush() {
        let (store, run) = setup("inv");
        let mut reg = DuplicateRegistry::load("r", "inv", store.clone(), RetryPolicy::none()).expect("load");
        reg.claim("a").expect("claim");
        reg.release("a", ReleaseOutcome::Skipped("ineligible".into()));
        assert_eq!(reg.status("a"), ElementStatus::Skipped);
        assert_eq!(reg.pending_len(), 1);

        let persisted = store.load_records("r").expect("records");
        assert_eq!(persisted[0].status, ElementStatus::Processing);

        assert_eq!(reg.flush(&run).ok(), Some(1));
        assert_eq!(reg.pending_len(), 0);
        let persisted = store.load_records("r").expect("records");
        assert_eq!(persisted[0].status, ElementStatus::Skipped);
        assert_eq!(persisted[0].reason.as_deref(), Some("ineligible"));
    }
}
