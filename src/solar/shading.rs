//! Analytic wall-to-window self-shading estimate.

use crate::config::ModelConfig;
use crate::elements::{BuildingElement, WallElement};

use super::position::SolarPosition;

/// Smallest angle between two azimuths, in [0, 180].
pub fn azimuth_difference(a_deg: f64, b_deg: f64) -> f64 {
    let d = (a_deg - b_deg).rem_euclid(360.0);
    if d > 180.0 { 360.0 - d } else { d }
}

/// Shading parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadingModel {
    /// Residual transmission under worst-case shadow.
    pub floor: f64,
    /// Shadow intensity of a single fully backlit, perfectly aligned wall.
    pub max_wall_shadow: f64,
    /// Multiplier on the shadow when wall and window are on different levels.
    pub level_mismatch_factor: f64,
}

impl ShadingModel {
    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            floor: cfg.shading_floor,
            max_wall_shadow: cfg.max_wall_shadow,
            level_mismatch_factor: cfg.level_mismatch_factor,
        }
    }

    /// Walls that can shade `window`: within 90° of its azimuth and not its host wall.
    pub fn candidate_walls<'a>(&self, window: &BuildingElement, walls: &'a [WallElement]) -> Vec<&'a WallElement> {
        walls
            .iter()
            .filter(|w| window.host_wall_id.as_deref() != Some(w.element_id.as_str()))
            .filter(|w| azimuth_difference(w.azimuth_deg, window.azimuth_deg) <= 90.0)
            .collect()
    }

    /// Multiplicative shading factor in `[floor, 1.0]` for a set of candidate walls.
    ///
    /// Only backlit walls (sun more than 90° from the wall azimuth) cast a
    /// shadow. Shadows from several walls compound.
    ///
    /// # Returns
    ///
    /// 1.0 when there are no candidates or the sun is below the horizon.
    pub fn factor(&self, window: &BuildingElement, candidates: &[&WallElement], sun: &SolarPosition) -> f64 {
        if candidates.is_empty() || !sun.is_daylight() {
            return 1.0;
        }

        let mut factor = 1.0;
        for wall in candidates {
            let to_sun = azimuth_difference(wall.azimuth_deg, sun.azimuth_deg);
            if to_sun <= 90.0 {
                continue;
            }
            let proximity = 1.0 - azimuth_difference(wall.azimuth_deg, window.azimuth_deg) / 90.0;
            let mut shadow = self.max_wall_shadow * ((to_sun - 90.0) / 90.0) * proximity;
            if wall.level != window.building_level {
                shadow *= self.level_mismatch_factor;
            }
            factor *= 1.0 - shadow.clamp(0.0, 1.0);
        }

        factor.clamp(self.floor, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ShadingModel {
        ShadingModel::from_config(&ModelConfig::default())
    }

    fn factor_for(window: &BuildingElement, walls: &[WallElement], sun: &SolarPosition) -> f64 {
        let m = model();
        m.factor(window, &m.candidate_walls(window, walls), sun)
    }

    fn sun(azimuth_deg: f64, elevation_deg: f64) -> SolarPosition {
        SolarPosition {
            elevation_deg,
            azimuth_deg,
            zenith_deg: 90.0 - elevation_deg,
        }
    }

    #[test]
    fn azimuth_difference_wraps() {
        assert_eq!(azimuth_difference(10.0, 350.0), 20.0);
        assert_eq!(azimuth_difference(0.0, 180.0), 180.0);
        assert_eq!(azimuth_difference(90.0, 90.0), 0.0);
    }

    #[test]
    fn no_walls_means_unshaded() {
        let window = BuildingElement::vertical("w", 180.0, 1.0, 0);
        for az in [0.0, 90.0, 180.0, 270.0] {
            assert_eq!(factor_for(&window, &[], &sun(az, 30.0)), 1.0);
        }
    }

    #[test]
    fn night_is_unshaded() {
        let window = BuildingElement::vertical("w", 180.0, 1.0, 0);
        let walls = vec![WallElement::vertical("x", 180.0, 0, 5.0, 15.0)];
        assert_eq!(factor_for(&window, &walls, &sun(0.0, -5.0)), 1.0);
    }

    #[test]
    fn backlit_aligned_wall_casts_full_shadow() {
        let window = BuildingElement::vertical("w", 180.0, 1.0, 0);
        let walls = vec![WallElement::vertical("x", 180.0, 0, 5.0, 15.0)];
        let f = factor_for(&window, &walls, &sun(0.0, 30.0));
        assert!((f - 0.2).abs() < 1e-12);
    }

    #[test]
    fn front_lit_wall_casts_nothing() {
        let window = BuildingElement::vertical("w", 180.0, 1.0, 0);
        let walls = vec![WallElement::vertical("x", 180.0, 0, 5.0, 15.0)];
        assert_eq!(factor_for(&window, &walls, &sun(180.0, 30.0)), 1.0);
    }

    #[test]
    fn level_mismatch_halves_shadow() {
        let window = BuildingElement::vertical("w", 180.0, 1.0, 0);
        let same = vec![WallElement::vertical("x", 180.0, 0, 5.0, 15.0)];
        let other = vec![WallElement::vertical("x", 180.0, 3, 5.0, 15.0)];
        let s = sun(45.0, 30.0);
        let shadow_same = 1.0 - factor_for(&window, &same, &s);
        let shadow_other = 1.0 - factor_for(&window, &other, &s);
        assert!((shadow_other - shadow_same * 0.5).abs() < 1e-12);
    }

    #[test]
    fn host_and_opposite_walls_are_not_candidates() {
        let window = BuildingElement::vertical("w", 180.0, 1.0, 0).with_host_wall("host");
        let walls = vec![
            WallElement::vertical("host", 180.0, 0, 5.0, 15.0),
            WallElement::vertical("opposite", 0.0, 0, 5.0, 15.0),
            WallElement::vertical("side", 100.0, 0, 5.0, 15.0),
        ];
        let ids: Vec<&str> = model()
            .candidate_walls(&window, &walls)
            .iter()
            .map(|w| w.element_id.as_str())
            .collect();
        assert_eq!(ids, vec!["side"]);
    }

    #[test]
    fn factor_always_within_bounds() {
        let window = BuildingElement::vertical("w", 170.0, 1.0, 1);
        let walls: Vec<WallElement> = (0..12)
            .map(|i| WallElement::vertical(&format!("x{i}"), 100.0 + 15.0 * f64::from(i), i % 3, 4.0, 10.0))
            .collect();
        let mut az = 0.0;
        while az < 360.0 {
            let f = factor_for(&window, &walls, &sun(az, 20.0));
            assert!((0.2..=1.0).contains(&f), "az {az}: {f}");
            az += 5.0;
        }
    }
}
