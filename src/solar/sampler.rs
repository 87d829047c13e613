//! Precision policies and the per-run solar lookup.
//!
//! A [`SolarLookup`] resolves every sampled (day, hour) to its sun position and
//! weather once per run. Elements then only pay for their own surface geometry,
//! so the run costs O(timesteps) + O(elements × sampled timesteps) instead of
//! recomputing astronomy per element.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::position::{SolarPosition, solar_position};
use crate::weather::{WeatherSeries, WeatherTimePoint, month_index};

/// Mid-month representative days (Klein's recommended days).
pub const MONTHLY_REPRESENTATIVE_DAYS: [u32; 12] = [17, 47, 75, 105, 135, 162, 198, 228, 258, 288, 318, 344];
/// Equinox and solstice days.
pub const YEARLY_REPRESENTATIVE_DAYS: [u32; 4] = [80, 172, 266, 355];

/// Sampling policy trading calculation volume for accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionLevel {
    /// Every timestep of the year.
    Hourly,
    /// The sample closest to noon on every day.
    DailyPeak,
    /// Noon on one representative day per month.
    MonthlyAverage,
    /// Noon on the two equinoxes and two solstices.
    YearlyAverage,
}

impl PrecisionLevel {
    pub const ALL: [PrecisionLevel; 4] = [
        PrecisionLevel::Hourly,
        PrecisionLevel::DailyPeak,
        PrecisionLevel::MonthlyAverage,
        PrecisionLevel::YearlyAverage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::DailyPeak => "daily_peak",
            Self::MonthlyAverage => "monthly_average",
            Self::YearlyAverage => "yearly_average",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Days restricted by the policy, or `None` for every day.
    fn representative_days(self) -> Option<&'static [u32]> {
        match self {
            Self::Hourly | Self::DailyPeak => None,
            Self::MonthlyAverage => Some(&MONTHLY_REPRESENTATIVE_DAYS),
            Self::YearlyAverage => Some(&YEARLY_REPRESENTATIVE_DAYS),
        }
    }
}

impl fmt::Display for PrecisionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the weather points a policy samples, in series order.
///
/// Noon-based policies take the point whose hour is closest to 12 for each
/// selected day (earlier hour wins a tie). Representative days missing from
/// the series are skipped.
pub fn select_samples(series: &WeatherSeries, precision: PrecisionLevel) -> Vec<WeatherTimePoint> {
    if precision == PrecisionLevel::Hourly {
        return series.points().to_vec();
    }

    let days = precision.representative_days();
    let mut selected: Vec<WeatherTimePoint> = Vec::new();

    for p in series.points() {
        if days.is_some_and(|d| !d.contains(&p.day_of_year)) {
            continue;
        }
        match selected.last_mut() {
            Some(last) if last.day_of_year == p.day_of_year => {
                if p.hour.abs_diff(12) < last.hour.abs_diff(12) {
                    *last = *p;
                }
            }
            _ => selected.push(*p),
        }
    }
    selected
}

/// One resolved sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledTimestep {
    pub day_of_year: u32,
    pub hour: u32,
    /// Zero-based month.
    pub month: usize,
    pub position: SolarPosition,
    pub ghi: f64,
    pub dni: f64,
    pub dhi: f64,
}

/// Sun positions and weather for every sampled timestep of a run.
///
/// Immutable after [`SolarLookup::build`]; shared read-only by all elements.
#[derive(Debug, Clone)]
pub struct SolarLookup {
    precision: PrecisionLevel,
    samples: Vec<SampledTimestep>,
    full_timestep_count: usize,
    timestep_hours: f64,
}

impl SolarLookup {
    /// Resolves the samples selected by `precision`.
    ///
    /// Positions are computed in parallel; sample order follows the series.
    pub fn build(
        latitude_deg: f64,
        longitude_deg: f64,
        series: &WeatherSeries,
        precision: PrecisionLevel,
        timestep_hours: f64,
    ) -> Self {
        let selected = select_samples(series, precision);
        let samples = selected
            .par_iter()
            .map(|p| SampledTimestep {
                day_of_year: p.day_of_year,
                hour: p.hour,
                month: month_index(p.day_of_year),
                position: solar_position(latitude_deg, longitude_deg, p.day_of_year, f64::from(p.hour)),
                ghi: p.ghi,
                dni: p.dni,
                dhi: p.dhi,
            })
            .collect();

        Self {
            precision,
            samples,
            full_timestep_count: series.len(),
            timestep_hours,
        }
    }

    pub fn precision(&self) -> PrecisionLevel {
        self.precision
    }

    pub fn samples(&self) -> &[SampledTimestep] {
        &self.samples
    }

    pub fn sampled_count(&self) -> usize {
        self.samples.len()
    }

    pub fn full_timestep_count(&self) -> usize {
        self.full_timestep_count
    }

    pub fn timestep_hours(&self) -> f64 {
        self.timestep_hours
    }

    /// Full-year timestep count divided by sampled count; 0.0 with no samples.
    pub fn scale_factor(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.full_timestep_count as f64 / self.samples.len() as f64
        }
    }

    /// Number of samples with the sun above the horizon.
    pub fn daylight_count(&self) -> usize {
        self.samples.iter().filter(|s| s.position.is_daylight()).count()
    }
}
