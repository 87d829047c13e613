//! CSV export for per-element radiation results.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::batch::types::RadiationResult;

/// Schema v1 column header for CSV result export.
const HEADER: &str = "element_id,orientation,area_m2,tilt_deg,azimuth_deg,\
                       annual_irradiation_kwh_m2,peak_irradiance_w_m2,annual_energy_potential_kwh,\
                       jan,feb,mar,apr,may,jun,jul,aug,sep,oct,nov,dec";

/// Exports radiation results to a CSV file at the given path.
///
/// Writes a header row followed by one data row per element using the
/// schema v1 column layout. Monthly columns are kWh/m². Produces
/// deterministic output for identical inputs.
///
/// # Arguments
///
/// * `results` - Results of one run, typically ordered by element id
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(results: &[RadiationResult], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(results, buf)
}

/// Writes radiation results as CSV to any writer.
///
/// # Arguments
///
/// * `results` - Results to write
/// * `writer` - Destination implementing `Write`
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(results: &[RadiationResult], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in results {
        let mut row = vec![
            r.element_id.clone(),
            r.orientation.to_string(),
            format!("{:.3}", r.area_m2),
            format!("{:.2}", r.tilt_deg),
            format!("{:.2}", r.azimuth_deg),
            format!("{:.3}", r.annual_irradiation_kwh_m2),
            format!("{:.2}", r.peak_irradiance_w_m2),
            format!("{:.3}", r.annual_energy_potential_kwh),
        ];
        row.extend(r.monthly_irradiation_kwh_m2.iter().map(|m| format!("{m:.3}")));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
