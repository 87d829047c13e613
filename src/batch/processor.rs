//! Per-element radiation computation and eligibility filtering.

use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::elements::{BuildingElement, Orientation, WallElement};
use crate::error::ElementComputationError;
use crate::solar::height::{HeightCorrectionCache, HeightModel};
use crate::solar::irradiance::plane_of_array;
use crate::solar::sampler::SolarLookup;
use crate::solar::shading::ShadingModel;
use crate::weather::WeatherSeries;

use super::types::{RadiationResult, ResultDiagnostics};

/// Successful computation of one element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementComputation {
    Result(RadiationResult),
    /// No daylight sample under the chosen policy; recorded as an exclusion.
    ZeroSamples(String),
}

/// Read-only per-run computation context shared by all elements.
///
/// Holds the solar lookup and height-correction cache, both built once.
pub struct ElementProcessor {
    lookup: Arc<SolarLookup>,
    heights: HeightCorrectionCache,
    shading: ShadingModel,
    walls: Vec<WallElement>,
    albedo: f64,
    excluded: Vec<Orientation>,
}

impl ElementProcessor {
    /// Builds the solar lookup and height cache for `elements`.
    pub fn new(
        cfg: &AnalysisConfig,
        weather: &WeatherSeries,
        elements: &[BuildingElement],
        walls: Vec<WallElement>,
    ) -> Self {
        let lookup = SolarLookup::build(
            cfg.site.latitude,
            cfg.site.longitude,
            weather,
            cfg.analysis.precision,
            cfg.analysis.timestep_hours,
        );
        let heights = HeightCorrectionCache::build(HeightModel::from_config(&cfg.model), elements);
        Self {
            lookup: Arc::new(lookup),
            heights,
            shading: ShadingModel::from_config(&cfg.model),
            walls,
            albedo: cfg.model.albedo,
            excluded: cfg.analysis.excluded(),
        }
    }

    pub fn lookup(&self) -> &SolarLookup {
        &self.lookup
    }

    /// `Err(reason)` if the element must not be analyzed.
    ///
    /// # Errors
    ///
    /// Returns the exclusion reason for elements flagged not PV-suitable or
    /// facing an excluded orientation.
    pub fn eligibility(&self, element: &BuildingElement) -> Result<(), String> {
        if !element.pv_suitable {
            return Err("not flagged pv_suitable".to_string());
        }
        if self.excluded.contains(&element.orientation) {
            return Err(format!("orientation {} is excluded", element.orientation));
        }
        Ok(())
    }

    /// Computes annual, monthly and peak irradiance for one element.
    ///
    /// Each sampled timestep applies, in order: horizon depression to the sun
    /// elevation, plane-of-array irradiance, height correction and the wall
    /// shading factor. The sampled sum is scaled to a full year.
    ///
    /// # Errors
    ///
    /// - [`ElementComputationError::DegenerateOrientation`] for an unusable normal
    /// - [`ElementComputationError::NonFinite`] if any intermediate value is not finite
    pub fn compute(&self, element: &BuildingElement) -> Result<ElementComputation, ElementComputationError> {
        let tilt = element.tilt_deg()?;
        let correction = self.heights.get(element.building_level, tilt);
        let candidates = self.shading.candidate_walls(element, &self.walls);
        let dt = self.lookup.timestep_hours();

        let mut annual_wh = 0.0;
        let mut monthly_wh = [0.0_f64; 12];
        let mut peak = 0.0_f64;
        let mut daylight_samples = 0;

        for s in self.lookup.samples() {
            let sun = s.position.with_elevation_offset(correction.horizon_depression_deg);
            if !sun.is_daylight() {
                continue;
            }
            daylight_samples += 1;

            let poa = plane_of_array(s.ghi, s.dni, s.dhi, &sun, tilt, element.azimuth_deg, self.albedo).total();
            let corrected = correction.apply(poa, s.ghi);
            let shade = self.shading.factor(element, &candidates, &sun);
            let irradiance = corrected * shade;

            if !irradiance.is_finite() {
                return Err(ElementComputationError::NonFinite {
                    quantity: "irradiance",
                    day: s.day_of_year,
                    hour: s.hour,
                });
            }

            annual_wh += irradiance * dt;
            monthly_wh[s.month] += irradiance * dt;
            peak = peak.max(irradiance);
        }

        if daylight_samples == 0 {
            return Ok(ElementComputation::ZeroSamples(format!(
                "no daylight samples under {} precision ({} sampled timesteps)",
                self.lookup.precision(),
                self.lookup.sampled_count()
            )));
        }

        let scale = self.lookup.scale_factor();
        let annual = annual_wh * scale / 1000.0;
        let monthly = monthly_wh.map(|wh| wh * scale / 1000.0);
        if !annual.is_finite() {
            return Err(ElementComputationError::NonFinite {
                quantity: "annual irradiation",
                day: 0,
                hour: 0,
            });
        }

        Ok(ElementComputation::Result(RadiationResult {
            element_id: element.element_id.clone(),
            orientation: element.orientation,
            area_m2: element.glass_area_m2,
            tilt_deg: tilt,
            azimuth_deg: element.azimuth_deg,
            annual_irradiation_kwh_m2: annual,
            peak_irradiance_w_m2: peak,
            monthly_irradiation_kwh_m2: monthly,
            annual_energy_potential_kwh: annual * element.glass_area_m2,
            diagnostics: ResultDiagnostics {
                sampled_timesteps: self.lookup.sampled_count(),
                daylight_samples,
                shading_modeled: !self.walls.is_empty(),
                scale_factor: scale,
            },
        }))
    }
}
