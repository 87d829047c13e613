//! CSV loaders for building elements, walls and weather.
//!
//! Element columns: `element_id, azimuth_deg, glass_area_m2` are required;
//! `orientation, normal_x, normal_y, normal_z, building_level, host_wall_id,
//! pv_suitable` are optional. Weather rows carry either `day_of_year,hour`
//! or an ISO-8601 `timestamp`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use serde::Deserialize;

use crate::elements::{BuildingElement, Orientation, WallElement, tilt_from_normal, vertical_normal};
use crate::error::InputDataError;
use crate::weather::{WeatherSeries, WeatherTimePoint};

#[derive(Debug, Deserialize)]
struct ElementRow {
    element_id: String,
    #[serde(default)]
    orientation: Option<String>,
    azimuth_deg: f64,
    #[serde(default)]
    normal_x: Option<f64>,
    #[serde(default)]
    normal_y: Option<f64>,
    #[serde(default)]
    normal_z: Option<f64>,
    glass_area_m2: f64,
    #[serde(default)]
    building_level: i32,
    #[serde(default)]
    host_wall_id: Option<String>,
    #[serde(default = "default_true")]
    pv_suitable: bool,
}

#[derive(Debug, Deserialize)]
struct WallRow {
    element_id: String,
    #[serde(default)]
    level: i32,
    length_m: f64,
    area_m2: f64,
    azimuth_deg: f64,
    #[serde(default)]
    normal_x: Option<f64>,
    #[serde(default)]
    normal_y: Option<f64>,
    #[serde(default)]
    normal_z: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WeatherRow {
    #[serde(default)]
    day_of_year: Option<u32>,
    #[serde(default)]
    hour: Option<u32>,
    #[serde(default)]
    timestamp: Option<String>,
    ghi: f64,
    dni: f64,
    dhi: f64,
}

fn default_true() -> bool {
    true
}

fn normal_or_vertical(x: Option<f64>, y: Option<f64>, z: Option<f64>, azimuth_deg: f64) -> [f64; 3] {
    match (x, y, z) {
        (Some(x), Some(y), Some(z)) => [x, y, z],
        _ => vertical_normal(azimuth_deg),
    }
}

fn malformed(source_name: &str, row: usize, message: impl ToString) -> InputDataError {
    InputDataError::Malformed {
        source_name: source_name.to_string(),
        row,
        message: message.to_string(),
    }
}

fn open(path: &Path) -> Result<File, InputDataError> {
    File::open(path).map_err(|e| InputDataError::Unreadable {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn rows<T, R>(reader: R, source_name: &str) -> Result<Vec<T>, InputDataError>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    rdr.deserialize()
        .enumerate()
        .map(|(i, row)| row.map_err(|e| malformed(source_name, i + 1, e)))
        .collect()
}

/// Parses building elements from CSV.
///
/// Missing normals default to a vertical surface facing `azimuth_deg`; a
/// missing orientation is classified from azimuth and tilt. Field validation
/// and de-duplication happen later in [`prepare_elements`](crate::elements::prepare_elements).
///
/// # Errors
///
/// Returns [`InputDataError::Malformed`] for unparsable rows or unknown
/// orientation names.
pub fn read_elements(reader: impl Read, source_name: &str) -> Result<Vec<BuildingElement>, InputDataError> {
    let parsed: Vec<ElementRow> = rows(reader, source_name)?;
    parsed
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let normal = normal_or_vertical(r.normal_x, r.normal_y, r.normal_z, r.azimuth_deg);
            let orientation = match r.orientation.as_deref().filter(|s| !s.is_empty()) {
                Some(name) => Orientation::parse(name)
                    .ok_or_else(|| malformed(source_name, i + 1, format!("unknown orientation \"{name}\"")))?,
                None => {
                    let tilt = tilt_from_normal(normal).unwrap_or(90.0);
                    Orientation::from_azimuth_and_tilt(r.azimuth_deg, tilt)
                }
            };
            Ok(BuildingElement {
                element_id: r.element_id,
                orientation,
                azimuth_deg: r.azimuth_deg,
                normal,
                glass_area_m2: r.glass_area_m2,
                building_level: r.building_level,
                host_wall_id: r.host_wall_id.filter(|s| !s.is_empty()),
                pv_suitable: r.pv_suitable,
            })
        })
        .collect()
}

/// Loads building elements from a CSV file.
///
/// # Errors
///
/// [`InputDataError::Unreadable`] or any error of [`read_elements`].
pub fn load_elements(path: &Path) -> Result<Vec<BuildingElement>, InputDataError> {
    read_elements(open(path)?, &path.display().to_string())
}

/// Parses wall elements from CSV.
///
/// # Errors
///
/// Returns [`InputDataError::Malformed`] for unparsable rows.
pub fn read_walls(reader: impl Read, source_name: &str) -> Result<Vec<WallElement>, InputDataError> {
    let parsed: Vec<WallRow> = rows(reader, source_name)?;
    Ok(parsed
        .into_iter()
        .map(|r| WallElement {
            normal: normal_or_vertical(r.normal_x, r.normal_y, r.normal_z, r.azimuth_deg),
            element_id: r.element_id,
            level: r.level,
            length_m: r.length_m,
            area_m2: r.area_m2,
            azimuth_deg: r.azimuth_deg.rem_euclid(360.0),
        })
        .collect())
}

/// Loads wall elements from a CSV file.
///
/// # Errors
///
/// [`InputDataError::Unreadable`] or any error of [`read_walls`].
pub fn load_walls(path: &Path) -> Result<Vec<WallElement>, InputDataError> {
    read_walls(open(path)?, &path.display().to_string())
}

/// Ordinal day and hour of an ISO-8601 timestamp, with or without offset.
fn parse_timestamp(ts: &str) -> Option<(u32, u32)> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some((dt.ordinal(), dt.hour()));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .map(|dt| (dt.ordinal(), dt.hour()))
}

/// Parses and validates a weather series from CSV.
///
/// # Errors
///
/// - [`InputDataError::Malformed`] for unparsable rows, bad timestamps, or
///   rows with neither `day_of_year,hour` nor `timestamp`
/// - any validation error of [`WeatherSeries::new`]
pub fn read_weather(reader: impl Read, source_name: &str) -> Result<WeatherSeries, InputDataError> {
    let parsed: Vec<WeatherRow> = rows(reader, source_name)?;
    let points = parsed
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let (day, hour) = match (r.day_of_year, r.hour, r.timestamp.as_deref()) {
                (Some(d), Some(h), _) => (d, h),
                (_, _, Some(ts)) if !ts.is_empty() => parse_timestamp(ts)
                    .ok_or_else(|| malformed(source_name, i + 1, format!("unparsable timestamp \"{ts}\"")))?,
                _ => return Err(malformed(source_name, i + 1, "needs day_of_year and hour, or timestamp")),
            };
            Ok(WeatherTimePoint::new(day, hour, r.ghi, r.dni, r.dhi))
        })
        .collect::<Result<Vec<_>, _>>()?;
    WeatherSeries::new(points)
}

/// Loads a weather series from a CSV file.
///
/// # Errors
///
/// [`InputDataError::Unreadable`] or any error of [`read_weather`].
pub fn load_weather(path: &Path) -> Result<WeatherSeries, InputDataError> {
    read_weather(open(path)?, &path.display().to_string())
}
