//! SQLite-backed store.
//!
//! Timestamps are RFC 3339 text; monthly breakdowns and diagnostics are JSON.
//! Claims use a conditional upsert so that two connections racing for the
//! same element cannot both win. Fenced writes read the lease holder and
//! write inside one `IMMEDIATE` transaction, so the check and the write
//! cannot be split by another connection.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use super::{PersistenceGateway, lease_lost};
use crate::batch::types::{
    AnalysisRun, ElementCommit, ElementProcessingRecord, ElementStatus, ExecutionLease, LeaseChange,
    RadiationResult, ResultDiagnostics, RunCommand, RunStatus, result_reference,
};
use crate::elements::Orientation;
use crate::error::StoreError;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS analysis_runs (
        run_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        last_heartbeat TEXT NOT NULL,
        elements_total INTEGER NOT NULL,
        elements_processed INTEGER NOT NULL,
        next_index INTEGER NOT NULL,
        lease_holder TEXT,
        lease_acquired_at TEXT,
        lease_expires_at TEXT,
        pending_command TEXT,
        status_reason TEXT
    );

    CREATE TABLE IF NOT EXISTS element_records (
        run_id TEXT NOT NULL,
        element_id TEXT NOT NULL,
        status TEXT NOT NULL,
        result_reference TEXT,
        reason TEXT,
        claimed_by TEXT,
        PRIMARY KEY (run_id, element_id)
    );

    CREATE TABLE IF NOT EXISTS radiation_results (
        run_id TEXT NOT NULL,
        element_id TEXT NOT NULL,
        orientation TEXT NOT NULL,
        area_m2 REAL NOT NULL,
        tilt_deg REAL NOT NULL,
        azimuth_deg REAL NOT NULL,
        annual_irradiation_kwh_m2 REAL NOT NULL,
        peak_irradiance_w_m2 REAL NOT NULL,
        monthly_json TEXT NOT NULL,
        annual_energy_potential_kwh REAL NOT NULL,
        diagnostics_json TEXT NOT NULL,
        PRIMARY KEY (run_id, element_id)
    );

    CREATE INDEX IF NOT EXISTS idx_element_records_status ON element_records(run_id, status);
"#;

const RUN_COLUMNS: &str = "run_id, status, started_at, last_heartbeat, elements_total, elements_processed, \
     next_index, lease_holder, lease_acquired_at, lease_expires_at, pending_command, status_reason";

/// Durable [`PersistenceGateway`] over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))
    }
}

fn immediate(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Fails unless the stored lease holder of `run_id` is `expected_holder`.
fn fence(conn: &Connection, run_id: &str, expected_holder: Option<&str>) -> Result<(), StoreError> {
    let current: Option<Option<String>> = conn
        .query_row(
            "SELECT lease_holder FROM analysis_runs WHERE run_id = ?1",
            [run_id],
            |r| r.get(0),
        )
        .optional()?;
    match current {
        None => Err(StoreError::RunNotFound(run_id.to_string())),
        Some(holder) if holder.as_deref() == expected_holder => Ok(()),
        Some(_) => Err(lease_lost(run_id, expected_holder)),
    }
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_ts(field: &str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{field} \"{s}\": {e}")))
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_usize(field: &str, v: i64) -> Result<usize, StoreError> {
    usize::try_from(v).map_err(|_| StoreError::Corrupt(format!("{field} = {v}")))
}

/// Raw `analysis_runs` row before validation.
struct RunRow {
    run_id: String,
    status: String,
    started_at: String,
    last_heartbeat: String,
    elements_total: i64,
    elements_processed: i64,
    next_index: i64,
    lease_holder: Option<String>,
    lease_acquired_at: Option<String>,
    lease_expires_at: Option<String>,
    pending_command: Option<String>,
    status_reason: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            status: row.get(1)?,
            started_at: row.get(2)?,
            last_heartbeat: row.get(3)?,
            elements_total: row.get(4)?,
            elements_processed: row.get(5)?,
            next_index: row.get(6)?,
            lease_holder: row.get(7)?,
            lease_acquired_at: row.get(8)?,
            lease_expires_at: row.get(9)?,
            pending_command: row.get(10)?,
            status_reason: row.get(11)?,
        })
    }

    fn into_run(self) -> Result<AnalysisRun, StoreError> {
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("run status \"{}\"", self.status)))?;
        let lease = match (self.lease_holder, self.lease_acquired_at, self.lease_expires_at) {
            (Some(holder), Some(acquired), Some(expires)) => Some(ExecutionLease {
                holder,
                acquired_at: parse_ts("lease_acquired_at", &acquired)?,
                expires_at: parse_ts("lease_expires_at", &expires)?,
            }),
            _ => None,
        };
        let pending_command = match self.pending_command {
            Some(s) => Some(
                RunCommand::parse(&s).ok_or_else(|| StoreError::Corrupt(format!("pending command \"{s}\"")))?,
            ),
            None => None,
        };
        Ok(AnalysisRun {
            run_id: self.run_id,
            status,
            started_at: parse_ts("started_at", &self.started_at)?,
            last_heartbeat: parse_ts("last_heartbeat", &self.last_heartbeat)?,
            elements_total: to_usize("elements_total", self.elements_total)?,
            elements_processed: to_usize("elements_processed", self.elements_processed)?,
            next_index: to_usize("next_index", self.next_index)?,
            lease,
            pending_command,
            status_reason: self.status_reason,
        })
    }
}

/// Writes every run column except `pending_command`.
fn write_run(conn: &Connection, run: &AnalysisRun) -> Result<usize, StoreError> {
    let lease = run.lease.as_ref();
    let changed = conn.execute(
        "UPDATE analysis_runs SET status = ?2, started_at = ?3, last_heartbeat = ?4,
             elements_total = ?5, elements_processed = ?6, next_index = ?7,
             lease_holder = ?8, lease_acquired_at = ?9, lease_expires_at = ?10, status_reason = ?11
         WHERE run_id = ?1",
        params![
            run.run_id,
            run.status.as_str(),
            ts(&run.started_at),
            ts(&run.last_heartbeat),
            to_i64(run.elements_total),
            to_i64(run.elements_processed),
            to_i64(run.next_index),
            lease.map(|l| l.holder.clone()),
            lease.map(|l| ts(&l.acquired_at)),
            lease.map(|l| ts(&l.expires_at)),
            run.status_reason,
        ],
    )?;
    Ok(changed)
}

impl PersistenceGateway for SqliteStore {
    fn create_run(&self, run: &AnalysisRun) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO analysis_runs (run_id, status, started_at, last_heartbeat,
                 elements_total, elements_processed, next_index, pending_command)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.status.as_str(),
                ts(&run.started_at),
                ts(&run.last_heartbeat),
                to_i64(run.elements_total),
                to_i64(run.elements_processed),
                to_i64(run.next_index),
                run.pending_command.map(RunCommand::as_str),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::RunExists(run.run_id.clone()));
        }
        write_run(&conn, run)?;
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Option<AnalysisRun>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM analysis_runs WHERE run_id = ?1"),
                [run_id],
                RunRow::from_row,
            )
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    fn swap_lease(&self, run_id: &str, expected_holder: Option<&str>, change: &LeaseChange) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = immediate(&mut conn)?;
        fence(&tx, run_id, expected_holder)?;
        let lease = change.lease.as_ref();
        tx.execute(
            "UPDATE analysis_runs SET status = ?2, status_reason = ?3, last_heartbeat = ?4,
                 lease_holder = ?5, lease_acquired_at = ?6, lease_expires_at = ?7
             WHERE run_id = ?1",
            params![
                run_id,
                change.status.as_str(),
                change.status_reason,
                ts(&change.last_heartbeat),
                lease.map(|l| l.holder.clone()),
                lease.map(|l| ts(&l.acquired_at)),
                lease.map(|l| ts(&l.expires_at)),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn heartbeat(
        &self,
        run_id: &str,
        holder: &str,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<RunCommand>, StoreError> {
        let mut conn = self.lock()?;
        let tx = immediate(&mut conn)?;
        fence(&tx, run_id, Some(holder))?;
        let pending: Option<String> = tx.query_row(
            "SELECT pending_command FROM analysis_runs WHERE run_id = ?1",
            [run_id],
            |r| r.get(0),
        )?;
        tx.execute(
            "UPDATE analysis_runs SET last_heartbeat = ?2, lease_expires_at = ?3, pending_command = NULL
             WHERE run_id = ?1",
            params![run_id, ts(&at), ts(&expires_at)],
        )?;
        tx.commit()?;
        pending
            .map(|s| RunCommand::parse(&s).ok_or_else(|| StoreError::Corrupt(format!("pending command \"{s}\""))))
            .transpose()
    }

    fn set_pending_command(&self, run_id: &str, command: Option<RunCommand>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE analysis_runs SET pending_command = ?2 WHERE run_id = ?1",
            params![run_id, command.map(RunCommand::as_str)],
        )?;
        if changed == 0 {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    fn load_records(&self, run_id: &str) -> Result<Vec<ElementProcessingRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, element_id, status, result_reference, reason, claimed_by
             FROM element_records WHERE run_id = ?1 ORDER BY element_id",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (run_id, element_id, status, result_reference, reason, claimed_by) = row?;
            let status = ElementStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("element status \"{status}\"")))?;
            records.push(ElementProcessingRecord {
                run_id,
                element_id,
                status,
                result_reference,
                reason,
                claimed_by,
            });
        }
        Ok(records)
    }

    fn try_claim(&self, run_id: &str, element_id: &str, holder: &str) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = immediate(&mut conn)?;
        fence(&tx, run_id, Some(holder))?;
        let changed = tx.execute(
            "INSERT INTO element_records (run_id, element_id, status, claimed_by)
             VALUES (?1, ?2, 'processing', ?3)
             ON CONFLICT (run_id, element_id) DO UPDATE
                 SET status = 'processing', claimed_by = excluded.claimed_by
                 WHERE element_records.status = 'not_started'",
            params![run_id, element_id, holder],
        )?;
        tx.commit()?;
        Ok(changed == 1)
    }

    fn commit(&self, run: &AnalysisRun, holder: &str, commits: &[ElementCommit]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = immediate(&mut conn)?;
        fence(&tx, &run.run_id, Some(holder))?;

        for c in commits {
            let reference = c.result.as_ref().map(|_| result_reference(&run.run_id, &c.element_id));
            let changed = tx.execute(
                "UPDATE element_records SET status = ?3, result_reference = ?4, reason = ?5
                 WHERE run_id = ?1 AND element_id = ?2 AND claimed_by = ?6",
                params![run.run_id, c.element_id, c.status.as_str(), reference, c.reason, holder],
            )?;
            if changed == 0 {
                return Err(lease_lost(&run.run_id, Some(holder)));
            }

            match &c.result {
                Some(r) => {
                    tx.execute(
                        "INSERT OR REPLACE INTO radiation_results (run_id, element_id, orientation,
                             area_m2, tilt_deg, azimuth_deg, annual_irradiation_kwh_m2,
                             peak_irradiance_w_m2, monthly_json, annual_energy_potential_kwh,
                             diagnostics_json)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                        params![
                            run.run_id,
                            r.element_id,
                            r.orientation.as_str(),
                            r.area_m2,
                            r.tilt_deg,
                            r.azimuth_deg,
                            r.annual_irradiation_kwh_m2,
                            r.peak_irradiance_w_m2,
                            serde_json::to_string(&r.monthly_irradiation_kwh_m2)?,
                            r.annual_energy_potential_kwh,
                            serde_json::to_string(&r.diagnostics)?,
                        ],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM radiation_results WHERE run_id = ?1 AND element_id = ?2",
                        params![run.run_id, c.element_id],
                    )?;
                }
            }
        }

        if write_run(&tx, run)? == 0 {
            return Err(StoreError::RunNotFound(run.run_id.clone()));
        }
        tx.commit()?;
        Ok(())
    }

    fn reset_records(&self, run_id: &str, from: ElementStatus) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE element_records SET status = 'not_started', claimed_by = NULL, reason = NULL
             WHERE run_id = ?1 AND status = ?2",
            params![run_id, from.as_str()],
        )?;
        Ok(changed)
    }

    fn load_results(&self, run_id: &str) -> Result<Vec<RadiationResult>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT element_id, orientation, area_m2, tilt_deg, azimuth_deg,
                    annual_irradiation_kwh_m2, peak_irradiance_w_m2, monthly_json,
                    annual_energy_potential_kwh, diagnostics_json
             FROM radiation_results WHERE run_id = ?1 ORDER BY element_id",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, f64>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (element_id, orientation, area_m2, tilt_deg, azimuth_deg, annual, peak, monthly, energy, diag) = row?;
            let orientation = Orientation::parse(&orientation)
                .ok_or_else(|| StoreError::Corrupt(format!("orientation \"{orientation}\"")))?;
            let monthly_irradiation_kwh_m2: [f64; 12] = serde_json::from_str(&monthly)?;
            let diagnostics: ResultDiagnostics = serde_json::from_str(&diag)?;
            results.push(RadiationResult {
                element_id,
                orientation,
                area_m2,
                tilt_deg,
                azimuth_deg,
                annual_irradiation_kwh_m2: annual,
                peak_irradiance_w_m2: peak,
                monthly_irradiation_kwh_m2,
                annual_energy_potential_kwh: energy,
                diagnostics,
            });
        }
        Ok(results)
    }
}
