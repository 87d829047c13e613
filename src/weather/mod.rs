//! Hourly weather series (GHI, DNI, DHI) keyed by day of year and hour.

pub mod synthetic;

pub use synthetic::synthetic_tmy;

use serde::{Deserialize, Serialize};

use crate::error::InputDataError;

/// Cumulative day-of-year at the end of each month (non-leap year).
const MONTH_END_DAY: [u32; 12] = [31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365];

/// Zero-based month index for a day of year. Day 366 maps to December.
pub fn month_index(day_of_year: u32) -> usize {
    MONTH_END_DAY
        .iter()
        .position(|&end| day_of_year <= end)
        .unwrap_or(11)
}

/// One weather sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherTimePoint {
    /// 1..=366
    pub day_of_year: u32,
    /// 0..=23, local standard time
    pub hour: u32,
    /// Global horizontal irradiance (W/m²)
    pub ghi: f64,
    /// Direct normal irradiance (W/m²)
    pub dni: f64,
    /// Diffuse horizontal irradiance (W/m²)
    pub dhi: f64,
}

impl WeatherTimePoint {
    pub fn new(day_of_year: u32, hour: u32, ghi: f64, dni: f64, dhi: f64) -> Self {
        Self {
            day_of_year,
            hour,
            ghi,
            dni,
            dhi,
        }
    }
}

/// A validated weather series, strictly increasing by (day, hour).
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSeries {
    points: Vec<WeatherTimePoint>,
}

impl WeatherSeries {
    /// Validates and wraps a series.
    ///
    /// # Errors
    ///
    /// Returns an [`InputDataError`] when the series is empty, a day or hour is
    /// out of range, an irradiance is negative or non-finite, or points are not
    /// strictly increasing by (day, hour).
    pub fn new(points: Vec<WeatherTimePoint>) -> Result<Self, InputDataError> {
        if points.is_empty() {
            return Err(InputDataError::EmptyWeather);
        }

        let mut prev: Option<(u32, u32)> = None;
        for (index, p) in points.iter().enumerate() {
            if !(1..=366).contains(&p.day_of_year) {
                return Err(InputDataError::DayOutOfRange {
                    index,
                    day: p.day_of_year,
                });
            }
            if p.hour > 23 {
                return Err(InputDataError::HourOutOfRange { index, hour: p.hour });
            }
            for (field, value) in [("ghi", p.ghi), ("dni", p.dni), ("dhi", p.dhi)] {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(InputDataError::InvalidIrradiance { index, field, value });
                }
            }
            let key = (p.day_of_year, p.hour);
            if prev.is_some_and(|k| key <= k) {
                return Err(InputDataError::Unordered { index });
            }
            prev = Some(key);
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[WeatherTimePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Annual GHI sum in kWh/m² for a given timestep length.
    pub fn annual_ghi_kwh_m2(&self, timestep_hours: f64) -> f64 {
        self.points.iter().map(|p| p.ghi).sum::<f64>() * timestep_hours / 1000.0
    }
}
