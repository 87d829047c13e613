//! Height-above-ground corrections: ground reflectance, atmospheric clarity and horizon.
//!
//! All three terms are empirical. Their caps and band limits come from
//! [`ModelConfig`] so they can be tuned per site.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::ModelConfig;
use crate::elements::BuildingElement;

/// Mean earth radius (m) used for the horizon depression angle.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Horizon depression angle (degrees) seen from `height_m` above a smooth earth.
///
/// # Examples
///
/// ```
/// use bipv_radiation::solar::height::horizon_depression_deg;
///
/// assert_eq!(horizon_depression_deg(0.0), 0.0);
/// assert!(horizon_depression_deg(100.0) > horizon_depression_deg(10.0));
/// ```
pub fn horizon_depression_deg(height_m: f64) -> f64 {
    if !(height_m.is_finite() && height_m > 0.0) {
        return 0.0;
    }
    (EARTH_RADIUS_M / (EARTH_RADIUS_M + height_m)).acos().to_degrees()
}

/// Per-element correction terms for one (level, tilt) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeightCorrection {
    pub height_m: f64,
    /// Extra ground-reflected fraction of GHI, <= ground reflectance cap.
    pub ground_fraction: f64,
    /// Relative clarity gain, <= atmospheric gain cap.
    pub atmospheric_gain: f64,
    /// Step factor for near-horizon obstruction.
    pub horizon_factor: f64,
    /// Added to the effective solar elevation.
    pub horizon_depression_deg: f64,
    /// Ground view factor `(1 − cos β) / 2` of the surface.
    pub view_factor: f64,
}

impl HeightCorrection {
    /// Applies the correction to a plane-of-array irradiance sample.
    pub fn apply(&self, poa_w_m2: f64, ghi_w_m2: f64) -> f64 {
        let ground = ghi_w_m2.max(0.0) * self.ground_fraction * self.view_factor;
        ((poa_w_m2 + ground) * (1.0 + self.atmospheric_gain) * self.horizon_factor).max(0.0)
    }

    /// A correction that leaves irradiance unchanged.
    #[cfg(test)]
    pub fn identity() -> Self {
        Self {
            height_m: 0.0,
            ground_fraction: 0.0,
            atmospheric_gain: 0.0,
            horizon_factor: 1.0,
            horizon_depression_deg: 0.0,
            view_factor: 0.0,
        }
    }
}

/// Height heuristics parameterized from [`ModelConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeightModel {
    floor_height_m: f64,
    ground_cap: f64,
    ground_decay_m: f64,
    atmospheric_cap: f64,
    atmospheric_per_m: f64,
    ground_level_max_m: f64,
    low_rise_max_m: f64,
    ground_level_factor: f64,
    low_rise_factor: f64,
    high_rise_factor: f64,
}

impl HeightModel {
    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            floor_height_m: cfg.floor_height_m,
            ground_cap: cfg.ground_reflectance_cap,
            ground_decay_m: cfg.ground_reflectance_decay_m,
            atmospheric_cap: cfg.atmospheric_gain_cap,
            atmospheric_per_m: cfg.atmospheric_gain_per_m,
            ground_level_max_m: cfg.ground_level_max_m,
            low_rise_max_m: cfg.low_rise_max_m,
            ground_level_factor: cfg.ground_level_factor,
            low_rise_factor: cfg.low_rise_factor,
            high_rise_factor: cfg.high_rise_factor,
        }
    }

    /// Mid-height of the storey. Basement levels are treated as ground level.
    pub fn element_height_m(&self, level: i32) -> f64 {
        (f64::from(level.max(0)) + 0.5) * self.floor_height_m
    }

    /// Ground-reflectance fraction, decaying exponentially from the cap.
    pub fn ground_fraction(&self, height_m: f64) -> f64 {
        if self.ground_decay_m <= 0.0 {
            return 0.0;
        }
        let h = height_m.max(0.0);
        (self.ground_cap * (-h / self.ground_decay_m).exp()).clamp(0.0, self.ground_cap)
    }

    /// Atmospheric clarity gain, linear in height and capped.
    pub fn atmospheric_gain(&self, height_m: f64) -> f64 {
        (self.atmospheric_per_m * height_m.max(0.0)).clamp(0.0, self.atmospheric_cap)
    }

    /// Horizon obstruction factor banded into ground level, low-rise and high-rise.
    pub fn horizon_factor(&self, height_m: f64) -> f64 {
        if height_m < self.ground_level_max_m {
            self.ground_level_factor
        } else if height_m < self.low_rise_max_m {
            self.low_rise_factor
        } else {
            self.high_rise_factor
        }
    }

    pub fn correction(&self, level: i32, tilt_deg: f64) -> HeightCorrection {
        let height_m = self.element_height_m(level);
        HeightCorrection {
            height_m,
            ground_fraction: self.ground_fraction(height_m),
            atmospheric_gain: self.atmospheric_gain(height_m),
            horizon_factor: self.horizon_factor(height_m),
            horizon_depression_deg: horizon_depression_deg(height_m),
            view_factor: (1.0 - tilt_deg.to_radians().cos()) / 2.0,
        }
    }
}

fn tilt_key(tilt_deg: f64) -> i64 {
    (tilt_deg * 100.0).round() as i64
}

/// Corrections precomputed for every distinct (level, tilt) pair of a run.
///
/// Built once before processing and read-only afterwards.
#[derive(Debug, Clone)]
pub struct HeightCorrectionCache {
    model: HeightModel,
    entries: HashMap<(i32, i64), HeightCorrection>,
}

impl HeightCorrectionCache {
    /// Builds the cache for all elements whose tilt can be derived.
    ///
    /// Elements with degenerate normals are left out; they fail individually
    /// during processing.
    pub fn build(model: HeightModel, elements: &[BuildingElement]) -> Self {
        let mut entries = HashMap::new();
        for e in elements {
            if let Ok(tilt) = e.tilt_deg() {
                entries
                    .entry((e.building_level, tilt_key(tilt)))
                    .or_insert_with(|| model.correction(e.building_level, tilt));
            }
        }
        Self { model, entries }
    }

    /// Returns the cached correction, computing it if the pair was not seen at build time.
    pub fn get(&self, level: i32, tilt_deg: f64) -> HeightCorrection {
        self.entries
            .get(&(level, tilt_key(tilt_deg)))
            .copied()
            .unwrap_or_else(|| self.model.correction(level, tilt_deg))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
