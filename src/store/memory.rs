//! In-process store backed by mutex-guarded maps.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{PersistenceGateway, lease_lost};
use crate::batch::types::{
    AnalysisRun, ElementCommit, ElementProcessingRecord, ElementStatus, LeaseChange, RadiationResult, RunCommand,
    result_reference,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<String, AnalysisRun>,
    records: BTreeMap<(String, String), ElementProcessingRecord>,
    results: BTreeMap<(String, String), RadiationResult>,
}

/// Volatile [`PersistenceGateway`]; state lives as long as the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

fn key(run_id: &str, element_id: &str) -> (String, String) {
    (run_id.to_string(), element_id.to_string())
}

/// The stored run, provided its lease holder is `expected_holder`.
fn fenced<'a>(
    runs: &'a mut HashMap<String, AnalysisRun>,
    run_id: &str,
    expected_holder: Option<&str>,
) -> Result<&'a mut AnalysisRun, StoreError> {
    let stored = runs
        .get_mut(run_id)
        .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
    if stored.lease.as_ref().map(|l| l.holder.as_str()) != expected_holder {
        return Err(lease_lost(run_id, expected_holder));
    }
    Ok(stored)
}

impl PersistenceGateway for MemoryStore {
    fn create_run(&self, run: &AnalysisRun) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.runs.contains_key(&run.run_id) {
            return Err(StoreError::RunExists(run.run_id.clone()));
        }
        inner.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Option<AnalysisRun>, StoreError> {
        Ok(self.lock()?.runs.get(run_id).cloned())
    }

    fn swap_lease(&self, run_id: &str, expected_holder: Option<&str>, change: &LeaseChange) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = fenced(&mut inner.runs, run_id, expected_holder)?;
        stored.lease = change.lease.clone();
        stored.status = change.status;
        stored.status_reason = change.status_reason.clone();
        stored.last_heartbeat = change.last_heartbeat;
        Ok(())
    }

    fn heartbeat(
        &self,
        run_id: &str,
        holder: &str,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<RunCommand>, StoreError> {
        let mut inner = self.lock()?;
        let stored = fenced(&mut inner.runs, run_id, Some(holder))?;
        stored.last_heartbeat = at;
        if let Some(lease) = &mut stored.lease {
            lease.expires_at = expires_at;
        }
        Ok(stored.pending_command.take())
    }

    fn set_pending_command(&self, run_id: &str, command: Option<RunCommand>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        stored.pending_command = command;
        Ok(())
    }

    fn load_records(&self, run_id: &str) -> Result<Vec<ElementProcessingRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    fn try_claim(&self, run_id: &str, element_id: &str, holder: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        fenced(&mut inner.runs, run_id, Some(holder))?;
        let record = inner
            .records
            .entry(key(run_id, element_id))
            .or_insert_with(|| ElementProcessingRecord {
                run_id: run_id.to_string(),
                element_id: element_id.to_string(),
                status: ElementStatus::NotStarted,
                result_reference: None,
                reason: None,
                claimed_by: None,
            });
        if record.status != ElementStatus::NotStarted {
            return Ok(false);
        }
        record.status = ElementStatus::Processing;
        record.claimed_by = Some(holder.to_string());
        Ok(true)
    }

    fn commit(&self, run: &AnalysisRun, holder: &str, commits: &[ElementCommit]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let Inner {
            runs,
            records,
            results,
        } = &mut *inner;

        let stored = fenced(runs, &run.run_id, Some(holder))?;
        let all_claimed = commits.iter().all(|c| {
            records
                .get(&key(&run.run_id, &c.element_id))
                .is_some_and(|r| r.claimed_by.as_deref() == Some(holder))
        });
        if !all_claimed {
            return Err(lease_lost(&run.run_id, Some(holder)));
        }

        for c in commits {
            let k = key(&run.run_id, &c.element_id);
            let Some(record) = records.get_mut(&k) else {
                continue;
            };
            record.status = c.status;
            record.reason = c.reason.clone();
            match &c.result {
                Some(result) => {
                    record.result_reference = Some(result_reference(&run.run_id, &c.element_id));
                    results.insert(k, result.clone());
                }
                None => {
                    record.result_reference = None;
                    results.remove(&k);
                }
            }
        }

        let pending = stored.pending_command;
        *stored = run.clone();
        stored.pending_command = pending;
        Ok(())
    }

    fn reset_records(&self, run_id: &str, from: ElementStatus) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let mut count = 0;
        for record in inner.records.values_mut() {
            if record.run_id == run_id && record.status == from {
                record.status = ElementStatus::NotStarted;
                record.claimed_by = None;
                record.reason = None;
                count += 1;
            }
        }
        Ok(count)
    }

    fn load_results(&self, run_id: &str) -> Result<Vec<RadiationResult>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .results
            .iter()
            .filter(|((r, _), _)| r == run_id)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::batch::types::{ExecutionLease, RunStatus};

    /// A Running run leased to `inv-1`.
    fn store_with_run() -> (MemoryStore, AnalysisRun) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut run = AnalysisRun::new("run-1", 3, now);
        store.create_run(&run).expect("create");
        run.status = RunStatus::Running;
        run.lease = Some(ExecutionLease {
            holder: "inv-1".into(),
            acquired_at: now,
            expires_at: now + Duration::seconds(120),
        });
        store.swap_lease("run-1", None, &LeaseChange::of(&run)).expect("lease");
        (store, run)
    }

    fn failed(id: &str) -> ElementCommit {
        ElementCommit {
            element_id: id.into(),
            status: ElementStatus::Failed,
            result: None,
            reason: Some("boom".into()),
        }
    }

    #[test]
    fn duplicate_run_rejected() {
        let (store, run) = store_with_run();
        assert!(matches!(store.create_run(&run), Err(StoreError::RunExists(_))));
    }

    #[test]
    fn claim_is_exclusive() {
        let (store, _) = store_with_run();
        assert_eq!(store.try_claim("run-1", "a", "inv-1").ok(), Some(true));
        assert_eq!(store.try_claim("run-1", "a", "inv-1").ok(), Some(false));
        let records = store.load_records("run-1").expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].claimed_by.as_deref(), Some("inv-1"));
    }

    #[test]
    fn claim_without_lease_is_refused() {
        let (store, _) = store_with_run();
        assert!(matches!(
            store.try_claim("run-1", "a", "inv-2"),
            Err(StoreError::LeaseLost { holder, .. }) if holder == "inv-2"
        ));
        assert!(store.load_records("run-1").expect("records").is_empty());
        assert!(matches!(store.try_claim("nope", "a", "inv"), Err(StoreError::RunNotFound(_))));
    }

    #[test]
    fn swap_is_compare_and_set_on_holder() {
        let (store, run) = store_with_run();
        let mut cleared = run.clone();
        cleared.lease = None;
        assert!(matches!(
            store.swap_lease("run-1", Some("inv-9"), &LeaseChange::of(&cleared)),
            Err(StoreError::LeaseLost { .. })
        ));
        store
            .swap_lease("run-1", Some("inv-1"), &LeaseChange::of(&cleared))
            .expect("swap");
        assert!(store.load_run("run-1").expect("load").expect("exists").lease.is_none());
        assert!(store.swap_lease("run-1", Some("inv-1"), &LeaseChange::of(&run)).is_err());
    }

    #[test]
    fn heartbeat_takes_pending_command_once() {
        let (store, _) = store_with_run();
        let at = Utc::now() + Duration::seconds(30);
        store.set_pending_command("run-1", Some(RunCommand::Pause)).expect("set");
        assert_eq!(
            store.heartbeat("run-1", "inv-1", at, at + Duration::seconds(120)).ok(),
            Some(Some(RunCommand::Pause))
        );
        assert_eq!(
            store.heartbeat("run-1", "inv-1", at, at + Duration::seconds(120)).ok(),
            Some(None)
        );
        store.set_pending_command("run-1", Some(RunCommand::Stop)).expect("set");
        assert_eq!(
            store.heartbeat("run-1", "inv-1", at, at + Duration::seconds(120)).ok(),
            Some(Some(RunCommand::Stop))
        );

        let loaded = store.load_run("run-1").expect("load").expect("exists");
        assert_eq!(loaded.last_heartbeat, at);
        assert_eq!(loaded.lease.map(|l| l.expires_at), Some(at + Duration::seconds(120)));
    }

    #[test]
    fn heartbeat_of_other_holder_keeps_request() {
        let (store, _) = store_with_run();
        store.set_pending_command("run-1", Some(RunCommand::Stop)).expect("set");
        let at = Utc::now();
        assert!(store.heartbeat("run-1", "inv-2", at, at).is_err());
        let loaded = store.load_run("run-1").expect("load").expect("exists");
        assert_eq!(loaded.pending_command, Some(RunCommand::Stop));
    }

    #[test]
    fn commit_preserves_pending_command() {
        let (store, mut run) = store_with_run();
        store.set_pending_command("run-1", Some(RunCommand::Pause)).expect("set");
        run.elements_processed = 2;
        store.commit(&run, "inv-1", &[]).expect("commit");
        let loaded = store.load_run("run-1").expect("load").expect("exists");
        assert_eq!(loaded.pending_command, Some(RunCommand::Pause));
        assert_eq!(loaded.elements_processed, 2);
    }

    #[test]
    fn commit_of_reset_claim_writes_nothing() {
        let (store, mut run) = store_with_run();
        store.try_claim("run-1", "a", "inv-1").expect("claim");
        store.try_claim("run-1", "b", "inv-1").expect("claim");
        store.reset_records("run-1", ElementStatus::Processing).expect("reset");
        store.try_claim("run-1", "b", "inv-1").expect("claim");

        run.elements_processed = 2;
        assert!(matches!(
            store.commit(&run, "inv-1", &[failed("a"), failed("b")]),
            Err(StoreError::LeaseLost { .. })
        ));
        let loaded = store.load_run("run-1").expect("load").expect("exists");
        assert_eq!(loaded.elements_processed, 0);
        let records = store.load_records("run-1").expect("records");
        assert_eq!(records[0].status, ElementStatus::NotStarted);
        assert_eq!(records[1].status, ElementStatus::Processing);
    }

    #[test]
    fn reset_moves_records_back() {
        let (store, run) = store_with_run();
        store.try_claim("run-1", "a", "inv-1").expect("claim");
        store.try_claim("run-1", "b", "inv-1").expect("claim");
        store.commit(&run, "inv-1", &[failed("b")]).expect("commit");
        assert_eq!(store.reset_records("run-1", ElementStatus::Processing).ok(), Some(1));
        assert_eq!(store.reset_records("run-1", ElementStatus::Failed).ok(), Some(1));
        let records = store.load_records("run-1").expect("records");
        assert!(records.iter().all(|r| r.status == ElementStatus::NotStarted));
    }
}
