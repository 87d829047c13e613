//! Physical models: sun position, surface irradiance, height effects, self-shading
//! and the sampled solar lookup shared across a run.

pub mod height;
pub mod irradiance;
pub mod position;
pub mod sampler;
pub mod shading;

pub use height::{HeightCorrection, HeightCorrectionCache, HeightModel};
pub use irradiance::{IrradianceComponents, plane_of_array};
pub use position::{SolarPosition, solar_position};
pub use sampler::{PrecisionLevel, SolarLookup};
pub use shading::ShadingModel;
