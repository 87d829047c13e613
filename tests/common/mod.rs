//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use bipv_radiation::batch::{ManualClock, ProgressEvent, ProgressObserver, RunInputs, RunScheduler};
use bipv_radiation::config::AnalysisConfig;
use bipv_radiation::elements::BuildingElement;
use bipv_radiation::solar::PrecisionLevel;
use bipv_radiation::store::{MemoryStore, PersistenceGateway};
use bipv_radiation::weather::{WeatherSeries, WeatherTimePoint};

/// Standard preset at Daily-Peak precision with immediate retries.
pub fn test_config() -> AnalysisConfig {
    let mut cfg = AnalysisConfig::standard();
    cfg.analysis.precision = PrecisionLevel::DailyPeak;
    cfg.analysis.flush_interval = 10;
    cfg.run.persist_retry_base_ms = 0;
    cfg
}

pub fn memory_store() -> Arc<dyn PersistenceGateway> {
    Arc::new(MemoryStore::new())
}

/// Clock frozen at 2024-01-01T00:00:00Z.
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::default())
}

/// 365 days of constant noon irradiance (GHI 600, DNI 700, DHI 100).
pub fn noon_weather() -> WeatherSeries {
    let points = (1..=365)
        .map(|d| WeatherTimePoint::new(d, 12, 600.0, 700.0, 100.0))
        .collect();
    WeatherSeries::new(points).expect("valid noon series")
}

/// `n` south-facing 2 m² windows `E001`, `E002`, ... spread over ten levels.
pub fn south_elements(n: usize) -> Vec<BuildingElement> {
    (1..=n)
        .map(|i| BuildingElement::vertical(&format!("E{i:03}"), 180.0, 2.0, (i % 10) as i32))
        .collect()
}

/// Inputs of `n` south-facing windows under [`noon_weather`].
pub fn south_inputs(n: usize) -> RunInputs {
    RunInputs::new(south_elements(n), Vec::new(), noon_weather()).expect("valid inputs")
}

pub fn scheduler(cfg: AnalysisConfig, store: &Arc<dyn PersistenceGateway>, clock: &Arc<ManualClock>) -> RunScheduler {
    RunScheduler::new(cfg, store.clone(), clock.clone())
}

/// Observer backed by a closure.
pub struct CallbackObserver<F>(pub F);

pub fn observer<F>(f: F) -> CallbackObserver<F>
where
    F: FnMut(&ProgressEvent<'_>),
{
    CallbackObserver(f)
}

impl<F> ProgressObserver for CallbackObserver<F>
where
    F: FnMut(&ProgressEvent<'_>),
{
    fn on_progress(&mut self, event: &ProgressEvent<'_>) {
        (self.0)(event)
    }
}

/// Observer that records the id of every visited element.
#[derive(Default)]
pub struct Recorder {
    pub visited: Vec<String>,
}

impl ProgressObserver for Recorder {
    fn on_progress(&mut self, event: &ProgressEvent<'_>) {
        self.visited.push(event.element_id.to_string());
    }
}
