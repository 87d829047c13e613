//! Building glazing and wall elements consumed by a radiation run.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ElementComputationError, InputDataError};

/// Tilt below which a surface is classified as [`Orientation::Horizontal`].
const HORIZONTAL_TILT_DEG: f64 = 15.0;

/// Compass facing of a glazing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    #[serde(alias = "N", alias = "north")]
    North,
    #[serde(alias = "NE", alias = "north_east", alias = "Northeast")]
    NorthEast,
    #[serde(alias = "E", alias = "east")]
    East,
    #[serde(alias = "SE", alias = "south_east", alias = "Southeast")]
    SouthEast,
    #[serde(alias = "S", alias = "south")]
    South,
    #[serde(alias = "SW", alias = "south_west", alias = "Southwest")]
    SouthWest,
    #[serde(alias = "W", alias = "west")]
    West,
    #[serde(alias = "NW", alias = "north_west", alias = "Northwest")]
    NorthWest,
    #[serde(alias = "H", alias = "horizontal")]
    Horizontal,
}

impl Orientation {
    /// All orientations, compass sectors first.
    pub const ALL: [Orientation; 9] = [
        Orientation::North,
        Orientation::NorthEast,
        Orientation::East,
        Orientation::SouthEast,
        Orientation::South,
        Orientation::SouthWest,
        Orientation::West,
        Orientation::NorthWest,
        Orientation::Horizontal,
    ];

    /// Classifies an azimuth (degrees clockwise from north) into one of eight 45° sectors.
    ///
    /// # Examples
    ///
    /// ```
    /// use bipv_radiation::elements::Orientation;
    ///
    /// assert_eq!(Orientation::from_azimuth(0.0), Orientation::North);
    /// assert_eq!(Orientation::from_azimuth(350.0), Orientation::North);
    /// assert_eq!(Orientation::from_azimuth(180.0), Orientation::South);
    /// assert_eq!(Orientation::from_azimuth(-90.0), Orientation::West);
    /// ```
    pub fn from_azimuth(azimuth_deg: f64) -> Self {
        let az = azimuth_deg.rem_euclid(360.0);
        let sector = (((az + 22.5) / 45.0).floor() as usize) % 8;
        Self::ALL[sector]
    }

    /// Classifies a surface from its azimuth and tilt; shallow surfaces are horizontal.
    pub fn from_azimuth_and_tilt(azimuth_deg: f64, tilt_deg: f64) -> Self {
        if tilt_deg < HORIZONTAL_TILT_DEG {
            Self::Horizontal
        } else {
            Self::from_azimuth(azimuth_deg)
        }
    }

    /// Parses a name such as `"North"`, `"north_east"` or `"SW"`.
    pub fn parse(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        let o = match key.as_str() {
            "n" | "north" => Self::North,
            "ne" | "northeast" => Self::NorthEast,
            "e" | "east" => Self::East,
            "se" | "southeast" => Self::SouthEast,
            "s" | "south" => Self::South,
            "sw" | "southwest" => Self::SouthWest,
            "w" | "west" => Self::West,
            "nw" | "northwest" => Self::NorthWest,
            "h" | "horizontal" => Self::Horizontal,
            _ => return None,
        };
        Some(o)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::North => "North",
            Self::NorthEast => "NorthEast",
            Self::East => "East",
            Self::SouthEast => "SouthEast",
            Self::South => "South",
            Self::SouthWest => "SouthWest",
            Self::West => "West",
            Self::NorthWest => "NorthWest",
            Self::Horizontal => "Horizontal",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outward normal for a vertical surface facing `azimuth_deg` (x = east, y = north, z = up).
pub fn vertical_normal(azimuth_deg: f64) -> [f64; 3] {
    let az = azimuth_deg.to_radians();
    [az.sin(), az.cos(), 0.0]
}

/// Surface tilt from horizontal derived from an outward normal vector.
///
/// A normal pointing straight up is a horizontal surface (0°); a normal in the
/// horizontal plane is a vertical surface (90°). Downward-facing normals clamp to 90°.
///
/// # Errors
///
/// Returns [`ElementComputationError::DegenerateOrientation`] when the vector
/// has zero length or non-finite components.
pub fn tilt_from_normal(normal: [f64; 3]) -> Result<f64, ElementComputationError> {
    let norm = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
    if !norm.is_finite() || norm < 1e-9 {
        return Err(ElementComputationError::DegenerateOrientation(normal));
    }
    let z = (normal[2] / norm).clamp(-1.0, 1.0);
    Ok((90.0 - z.asin().to_degrees()).clamp(0.0, 90.0))
}

/// A glazing element evaluated for photovoltaic suitability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingElement {
    /// Stable key, unique after de-duplication.
    pub element_id: String,
    pub orientation: Orientation,
    /// Degrees clockwise from north, normalized to [0, 360).
    pub azimuth_deg: f64,
    /// Outward normal vector; tilt is derived from it.
    pub normal: [f64; 3],
    /// Glazed area (m², > 0).
    pub glass_area_m2: f64,
    pub building_level: i32,
    pub host_wall_id: Option<String>,
    pub pv_suitable: bool,
}

impl BuildingElement {
    /// Creates a PV-suitable vertical window facing `azimuth_deg`.
    pub fn vertical(element_id: &str, azimuth_deg: f64, glass_area_m2: f64, level: i32) -> Self {
        Self {
            element_id: element_id.to_string(),
            orientation: Orientation::from_azimuth(azimuth_deg),
            azimuth_deg: azimuth_deg.rem_euclid(360.0),
            normal: vertical_normal(azimuth_deg),
            glass_area_m2,
            building_level: level,
            host_wall_id: None,
            pv_suitable: true,
        }
    }

    /// Replaces the normal vector (and therefore the derived tilt).
    pub fn with_normal(mut self, normal: [f64; 3]) -> Self {
        self.normal = normal;
        self
    }

    pub fn with_host_wall(mut self, wall_id: &str) -> Self {
        self.host_wall_id = Some(wall_id.to_string());
        self
    }

    pub fn with_pv_suitable(mut self, pv_suitable: bool) -> Self {
        self.pv_suitable = pv_suitable;
        self
    }

    /// Tilt from horizontal (0–90°) derived from the normal vector.
    ///
    /// # Errors
    ///
    /// Propagates [`tilt_from_normal`] failures for degenerate vectors.
    pub fn tilt_deg(&self) -> Result<f64, ElementComputationError> {
        tilt_from_normal(self.normal)
    }
}

/// An opaque wall considered as a potential shading obstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallElement {
    pub element_id: String,
    pub level: i32,
    pub length_m: f64,
    pub area_m2: f64,
    pub azimuth_deg: f64,
    pub normal: [f64; 3],
}

impl WallElement {
    /// Creates a vertical wall facing `azimuth_deg`.
    pub fn vertical(element_id: &str, azimuth_deg: f64, level: i32, length_m: f64, area_m2: f64) -> Self {
        Self {
            element_id: element_id.to_string(),
            level,
            length_m,
            area_m2,
            azimuth_deg: azimuth_deg.rem_euclid(360.0),
            normal: vertical_normal(azimuth_deg),
        }
    }
}

/// Validates required fields, removes duplicate ids and fixes the processing order.
///
/// The first occurrence of an `element_id` wins; later duplicates are dropped
/// with a warning. The result is sorted by `element_id` so that a checkpointed
/// "next index" refers to the same element on every invocation.
///
/// # Errors
///
/// Returns an [`InputDataError`] for an empty list, a missing id, a non-finite
/// azimuth or a non-positive glass area.
pub fn prepare_elements(elements: Vec<BuildingElement>) -> Result<Vec<BuildingElement>, InputDataError> {
    if elements.is_empty() {
        return Err(InputDataError::NoElements);
    }

    let mut seen = HashSet::with_capacity(elements.len());
    let mut prepared = Vec::with_capacity(elements.len());

    for (index, mut e) in elements.into_iter().enumerate() {
        let id = e.element_id.trim();
        if id.is_empty() {
            return Err(InputDataError::MissingElementId { index });
        }
        e.element_id = id.to_string();

        if !e.azimuth_deg.is_finite() {
            return Err(InputDataError::InvalidElement {
                element_id: e.element_id,
                field: "azimuth",
                message: format!("must be finite, got {}", e.azimuth_deg),
            });
        }
        if !(e.glass_area_m2.is_finite() && e.glass_area_m2 > 0.0) {
            return Err(InputDataError::InvalidElement {
                element_id: e.element_id,
                field: "glass_area",
                message: format!("must be > 0, got {}", e.glass_area_m2),
            });
        }
        e.azimuth_deg = e.azimuth_deg.rem_euclid(360.0);

        if !seen.insert(e.element_id.clone()) {
            warn!(element_id = %e.element_id, "duplicate element dropped");
            continue;
        }
        prepared.push(e);
    }

    prepared.sort_by(|a, b| a.element_id.cmp(&b.element_id));
    Ok(prepared)
}
