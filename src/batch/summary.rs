//! Post-hoc run summary computed from persisted records and results.

use std::fmt;

use serde::Serialize;

use super::types::{AnalysisRun, ElementProcessingRecord, ElementStatus, RadiationResult, RunStatus};
use crate::error::StoreError;
use crate::store::PersistenceGateway;

/// Overall classification of a run for downstream callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Completed with every element analyzed.
    FullSuccess,
    /// Completed; some elements were excluded with a reason.
    SuccessWithExclusions,
    /// Not finished, or finished with failed elements that can be retried.
    NeedsRestart,
    /// The run itself failed.
    Failed,
}

/// An element left out of the results, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementNote {
    pub element_id: String,
    pub reason: String,
}

/// Aggregate view of one run.
///
/// Computed from the store so it always matches the committed records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub elements_total: usize,
    pub elements_processed: usize,
    pub elements_completed: usize,
    pub excluded: Vec<ElementNote>,
    pub failed: Vec<ElementNote>,
    /// kWh/m²/yr over completed elements; 0.0 when there are none.
    pub avg_annual_irradiation_kwh_m2: f64,
    pub min_annual_irradiation_kwh_m2: f64,
    pub max_annual_irradiation_kwh_m2: f64,
    pub total_energy_potential_kwh: f64,
    pub outcome: RunOutcome,
}

impl RunSummary {
    /// Reads the records and results of `run` and summarizes them.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] of the failing read.
    pub fn load(gateway: &dyn PersistenceGateway, run: &AnalysisRun) -> Result<Self, StoreError> {
        let records = gateway.load_records(&run.run_id)?;
        let results = gateway.load_results(&run.run_id)?;
        Ok(Self::from_parts(run, &records, &results))
    }

    /// Builds the summary.
    ///
    /// # Arguments
    ///
    /// * `run` - Run record
    /// * `records` - All element records of the run
    /// * `results` - All results of the run
    pub fn from_parts(run: &AnalysisRun, records: &[ElementProcessingRecord], results: &[RadiationResult]) -> Self {
        let note = |r: &ElementProcessingRecord| ElementNote {
            element_id: r.element_id.clone(),
            reason: r.reason.clone().unwrap_or_else(|| "no reason recorded".to_string()),
        };
        let excluded: Vec<ElementNote> = records
            .iter()
            .filter(|r| r.status == ElementStatus::Skipped)
            .map(note)
            .collect();
        let failed: Vec<ElementNote> = records
            .iter()
            .filter(|r| r.status == ElementStatus::Failed)
            .map(note)
            .collect();
        let elements_completed = records
            .iter()
            .filter(|r| r.status == ElementStatus::Completed)
            .count();

        let (avg, min, max, total) = if results.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let mut sum = 0.0;
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            let mut total = 0.0;
            for r in results {
                sum += r.annual_irradiation_kwh_m2;
                min = min.min(r.annual_irradiation_kwh_m2);
                max = max.max(r.annual_irradiation_kwh_m2);
                total += r.annual_energy_potential_kwh;
            }
            (sum / results.len() as f64, min, max, total)
        };

        let outcome = match run.status {
            RunStatus::Failed => RunOutcome::Failed,
            RunStatus::Completed if !failed.is_empty() => RunOutcome::NeedsRestart,
            RunStatus::Completed if !excluded.is_empty() => RunOutcome::SuccessWithExclusions,
            RunStatus::Completed => RunOutcome::FullSuccess,
            _ => RunOutcome::NeedsRestart,
        };

        Self {
            run_id: run.run_id.clone(),
            status: run.status,
            elements_total: run.elements_total,
            elements_processed: run.elements_processed,
            elements_completed,
            excluded,
            failed,
            avg_annual_irradiation_kwh_m2: avg,
            min_annual_irradiation_kwh_m2: min,
            max_annual_irradiation_kwh_m2: max,
            total_energy_potential_kwh: total,
            outcome,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Run {} ---", self.run_id)?;
        writeln!(f, "Status:                {} ({:?})", self.status, self.outcome)?;
        writeln!(
            f,
            "Elements:              {} processed of {} ({} completed)",
            self.elements_processed, self.elements_total, self.elements_completed
        )?;
        writeln!(f, "Excluded:              {}", self.excluded.len())?;
        for n in &self.excluded {
            writeln!(f, "  {}: {}", n.element_id, n.reason)?;
        }
        writeln!(f, "Failed:                {}", self.failed.len())?;
        for n in &self.failed {
            writeln!(f, "  {}: {}", n.element_id, n.reason)?;
        }
        writeln!(
            f,
            "Annual irradiation:    avg {:.1} / min {:.1} / max {:.1} kWh/m²",
            self.avg_annual_irradiation_kwh_m2, self.min_annual_irradiation_kwh_m2, self.max_annual_irradiation_kwh_m2
        )?;
        write!(f, "Energy potential:      {:.1} kWh/yr", self.total_energy_potential_kwh)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::batch::types::ResultDiagnostics;
    use crate::elements::Orientation;

    fn record(id: &str, status: ElementStatus, reason: Option<&str>) -> ElementProcessingRecord {
        ElementProcessingRecord {
            run_id: "r".into(),
            element_id: id.into(),
            status,
            result_reference: None,
            reason: reason.map(str::to_string),
            claimed_by: None,
        }
    }

    fn result(id: &str, annual: f64, area: f64) -> RadiationResult {
        RadiationResult {
            element_id: id.into(),
            orientation: Orientation::South,
            area_m2: area,
            tilt_deg: 90.0,
            azimuth_deg: 180.0,
            annual_irradiation_kwh_m2: annual,
            peak_irradiance_w_m2: 800.0,
            monthly_irradiation_kwh_m2: [annual / 12.0; 12],
            annual_energy_potential_kwh: annual * area,
            diagnostics: ResultDiagnostics {
                sampled_timesteps: 12,
                daylight_samples: 12,
                shading_modeled: false,
                scale_factor: 730.0,
            },
        }
    }

    fn completed_run() -> AnalysisRun {
        let mut run = AnalysisRun::new("r", 3, Utc::now());
        run.status = RunStatus::Completed;
        run.elements_processed = 3;
        run
    }

    #[test]
    fn empty_results_are_zero() {
        let s = RunSummary::from_parts(&AnalysisRun::new("r", 0, Utc::now()), &[], &[]);
        assert_eq!(s.avg_annual_irradiation_kwh_m2, 0.0);
        assert_eq!(s.outcome, RunOutcome::NeedsRestart);
    }

    #[test]
    fn stats_and_exclusions() {
        let records = vec![
            record("a", ElementStatus::Completed, None),
            record("b", ElementStatus::Completed, None),
            record("c", ElementStatus::Skipped, Some("orientation North is excluded")),
        ];
        let results = vec![result("a", 400.0, 2.0), result("b", 800.0, 1.0)];
        let s = RunSummary::from_parts(&completed_run(), &records, &results);
        assert_eq!(s.elements_completed, 2);
        assert_eq!(s.excluded.len(), 1);
        assert_eq!(s.avg_annual_irradiation_kwh_m2, 600.0);
        assert_eq!(s.min_annual_irradiation_kwh_m2, 400.0);
        assert_eq!(s.max_annual_irradiation_kwh_m2, 800.0);
        assert_eq!(s.total_energy_potential_kwh, 1600.0);
        assert_eq!(s.outcome, RunOutcome::SuccessWithExclusions);
    }

    #[test]
    fn failed_elements_need_restart() {
        let records = vec![record("a", ElementStatus::Failed, Some("degenerate"))];
        let s = RunSummary::from_parts(&completed_run(), &records, &[]);
        assert_eq!(s.outcome, RunOutcome::NeedsRestart);
    }

    #[test]
    fn full_success_and_failed_run() {
        let records = vec![record("a", ElementStatus::Completed, None)];
        let s = RunSummary::from_parts(&completed_run(), &records, &[result("a", 500.0, 1.0)]);
        assert_eq!(s.outcome, RunOutcome::FullSuccess);

        let mut run = completed_run();
        run.status = RunStatus::Failed;
        assert_eq!(RunSummary::from_parts(&run, &records, &[]).outcome, RunOutcome::Failed);
    }

    #[test]
    fn display_lists_exclusions() {
        let records = vec![record("c", ElementStatus::Skipped, Some("excluded"))];
        let s = RunSummary::from_parts(&completed_run(), &records, &[]);
        let text = s.to_string();
        assert!(text.contains("c: excluded"));
        assert!(text.starts_with("--- Run r ---"));
    }
}
