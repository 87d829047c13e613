//! Plane-of-array irradiance with the isotropic sky model.

use serde::Serialize;

use super::position::SolarPosition;

/// Plane-of-array irradiance components (W/m²).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct IrradianceComponents {
    pub direct: f64,
    pub diffuse: f64,
    pub ground_reflected: f64,
}

impl IrradianceComponents {
    pub fn total(&self) -> f64 {
        self.direct + self.diffuse + self.ground_reflected
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

/// Computes irradiance on a tilted, oriented surface.
///
/// Direct is `DNI × cos(incidence)` with the cosine clamped to >= 0, diffuse is
/// `DHI × (1 + cos β) / 2` and ground-reflected is `GHI × albedo × (1 − cos β) / 2`.
/// Negative or non-finite irradiance inputs are treated as zero so the result
/// is never negative.
///
/// # Arguments
///
/// * `ghi`, `dni`, `dhi` - Weather sample (W/m²)
/// * `sun` - Sun position for the sample
/// * `tilt_deg` - Surface tilt from horizontal
/// * `azimuth_deg` - Surface azimuth clockwise from north
/// * `albedo` - Ground reflectance
///
/// # Returns
///
/// All-zero components when the sun is below the horizon.
pub fn plane_of_array(
    ghi: f64,
    dni: f64,
    dhi: f64,
    sun: &SolarPosition,
    tilt_deg: f64,
    azimuth_deg: f64,
    albedo: f64,
) -> IrradianceComponents {
    if !sun.is_daylight() {
        return IrradianceComponents::default();
    }

    let (ghi, dni, dhi) = (sanitize(ghi), sanitize(dni), sanitize(dhi));
    let albedo = sanitize(albedo);
    let cos_beta = tilt_deg.to_radians().cos();

    IrradianceComponents {
        direct: dni * sun.incidence_cosine(tilt_deg, azimuth_deg),
        diffuse: dhi * (1.0 + cos_beta) / 2.0,
        ground_reflected: ghi * albedo * (1.0 - cos_beta) / 2.0,
    }
}
