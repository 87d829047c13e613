//! Sun position from latitude, longitude, day of year and hour.

use serde::Serialize;

/// Sun position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolarPosition {
    /// Angle above the horizon, [-90, 90]. Zero or below is night.
    pub elevation_deg: f64,
    /// Clockwise from north, [0, 360).
    pub azimuth_deg: f64,
    /// `90 - elevation_deg`.
    pub zenith_deg: f64,
}

impl SolarPosition {
    /// Returns true if the sun is above the horizon.
    pub fn is_daylight(&self) -> bool {
        self.elevation_deg > 0.0
    }

    /// Returns this position with the elevation raised by `offset_deg`.
    ///
    /// Used to apply the horizon depression seen from an elevated element.
    pub fn with_elevation_offset(&self, offset_deg: f64) -> Self {
        let elevation_deg = (self.elevation_deg + offset_deg).clamp(-90.0, 90.0);
        Self {
            elevation_deg,
            azimuth_deg: self.azimuth_deg,
            zenith_deg: 90.0 - elevation_deg,
        }
    }

    /// Cosine of the incidence angle on a surface, clamped to >= 0.
    ///
    /// # Arguments
    ///
    /// * `tilt_deg` - Surface tilt from horizontal (0° horizontal, 90° vertical)
    /// * `azimuth_deg` - Surface azimuth clockwise from north
    ///
    /// # Returns
    ///
    /// 0.0 when the sun is below the horizon or behind the surface.
    pub fn incidence_cosine(&self, tilt_deg: f64, azimuth_deg: f64) -> f64 {
        if !self.is_daylight() {
            return 0.0;
        }
        let alt = self.elevation_deg.to_radians();
        let az = self.azimuth_deg.to_radians();
        let beta = tilt_deg.to_radians();
        let gamma = azimuth_deg.to_radians();

        // n . s with both vectors in east-north-up coordinates
        let cos_theta = beta.sin() * gamma.sin() * alt.cos() * az.sin()
            + beta.sin() * gamma.cos() * alt.cos() * az.cos()
            + beta.cos() * alt.sin();

        cos_theta.max(0.0)
    }
}

/// Solar declination (degrees) from a single annual harmonic.
pub fn declination_deg(day_of_year: u32) -> f64 {
    23.45 * (360.0 / 365.0 * (284.0 + f64::from(day_of_year))).to_radians().sin()
}

/// Hours between local standard time and local solar time.
///
/// The standard meridian is the nearest multiple of 15°.
pub fn solar_time_offset_hours(longitude_deg: f64) -> f64 {
    let standard_meridian = (longitude_deg / 15.0).round() * 15.0;
    (longitude_deg - standard_meridian) / 15.0
}

/// Computes the sun position for a site and local standard time.
///
/// Polar latitudes are not specially handled.
///
/// # Arguments
///
/// * `latitude_deg` - Positive north
/// * `longitude_deg` - Positive east
/// * `day_of_year` - 1..=366
/// * `hour` - Local standard time in hours, may be fractional
///
/// # Examples
///
/// ```
/// use bipv_radiation::solar::position::solar_position;
///
/// let noon = solar_position(47.0, 15.0, 172, 12.0);
/// assert!((noon.azimuth_deg - 180.0).abs() < 1e-6);
/// assert!(noon.elevation_deg > 60.0);
///
/// let midnight = solar_position(47.0, 15.0, 172, 0.0);
/// assert!(!midnight.is_daylight());
/// ```
pub fn solar_position(latitude_deg: f64, longitude_deg: f64, day_of_year: u32, hour: f64) -> SolarPosition {
    let decl = declination_deg(day_of_year).to_radians();
    let lat = latitude_deg.to_radians();

    let solar_hour = hour + solar_time_offset_hours(longitude_deg);
    let ha = (15.0 * (solar_hour - 12.0)).to_radians();

    let sin_elev = (lat.sin() * decl.sin() + lat.cos() * decl.cos() * ha.cos()).clamp(-1.0, 1.0);
    let elevation_deg = sin_elev.asin().to_degrees();

    let azimuth_deg =
        (ha.sin().atan2(ha.cos() * lat.sin() - decl.tan() * lat.cos()).to_degrees() + 180.0).rem_euclid(360.0);

    SolarPosition {
        elevation_deg,
        azimuth_deg,
        zenith_deg: 90.0 - elevation_deg,
    }
}
