//! Resumable annual solar radiation analysis for building glazing elements.

#[cfg(feature = "api")]
pub mod api;
/// Run state, duplicate prevention, checkpointing and the scheduler.
pub mod batch;
pub mod config;
pub mod elements;
pub mod error;
pub mod io;
/// Sun position, irradiance, height and shading models.
pub mod solar;
pub mod store;
pub mod weather;
