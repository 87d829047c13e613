//! TOML-based analysis configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::elements::Orientation;
use crate::solar::sampler::PrecisionLevel;

/// Top-level analysis configuration parsed from TOML.
///
/// All fields have defaults matching the `standard` preset. Load from
/// TOML with [`AnalysisConfig::from_toml_file`] or use
/// [`AnalysisConfig::standard`] for the built-in default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Site location.
    #[serde(default)]
    pub site: SiteConfig,
    /// Sampling and eligibility.
    #[serde(default)]
    pub analysis: AnalysisSection,
    /// Empirical model constants.
    #[serde(default)]
    pub model: ModelConfig,
    /// Run control: heartbeat, budgets, retries.
    #[serde(default)]
    pub run: RunConfig,
    /// Persistence backend.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Site location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Latitude (degrees, positive north).
    pub latitude: f64,
    /// Longitude (degrees, positive east).
    pub longitude: f64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            latitude: 47.37,
            longitude: 8.54,
        }
    }
}

/// Sampling policy and element eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisSection {
    /// `hourly`, `daily_peak`, `monthly_average` or `yearly_average`.
    pub precision: PrecisionLevel,
    /// Orientation names never analyzed (e.g. `"North"`).
    pub excluded_orientations: Vec<String>,
    /// Flush progress to the store every N elements (must be > 0).
    pub flush_interval: usize,
    /// Reset failed elements to not_started on resume.
    pub retry_failed: bool,
    /// Length of one weather timestep in hours.
    pub timestep_hours: f64,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            precision: PrecisionLevel::MonthlyAverage,
            excluded_orientations: vec!["North".to_string()],
            flush_interval: 10,
            retry_failed: false,
            timestep_hours: 1.0,
        }
    }
}

impl AnalysisSection {
    /// Parsed excluded orientations; unknown names are skipped (caught by `validate`).
    pub fn excluded(&self) -> Vec<Orientation> {
        self.excluded_orientations
            .iter()
            .filter_map(|name| Orientation::parse(name))
            .collect()
    }
}

/// Empirical model constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Ground albedo for the ground-reflected POA component.
    pub albedo: f64,
    /// Storey height used to estimate element height (m).
    pub floor_height_m: f64,
    /// Minimum shading factor.
    pub shading_floor: f64,
    /// Shadow intensity of one aligned, fully backlit wall (0.0–1.0).
    pub max_wall_shadow: f64,
    /// Shadow multiplier when wall and window levels differ (0.0–1.0).
    pub level_mismatch_factor: f64,
    /// Cap on the extra ground-reflected fraction of GHI.
    pub ground_reflectance_cap: f64,
    /// E-folding height of the ground-reflected term (m).
    pub ground_reflectance_decay_m: f64,
    /// Cap on the atmospheric clarity gain.
    pub atmospheric_gain_cap: f64,
    /// Atmospheric clarity gain per metre of height.
    pub atmospheric_gain_per_m: f64,
    /// Upper bound of the ground-level horizon band (m).
    pub ground_level_max_m: f64,
    /// Upper bound of the low-rise horizon band (m).
    pub low_rise_max_m: f64,
    pub ground_level_factor: f64,
    pub low_rise_factor: f64,
    pub high_rise_factor: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            albedo: 0.2,
            floor_height_m: 3.5,
            shading_floor: 0.2,
            max_wall_shadow: 0.8,
            level_mismatch_factor: 0.5,
            ground_reflectance_cap: 0.15,
            ground_reflectance_decay_m: 20.0,
            atmospheric_gain_cap: 0.05,
            atmospheric_gain_per_m: 0.0005,
            ground_level_max_m: 10.0,
            low_rise_max_m: 30.0,
            ground_level_factor: 0.85,
            low_rise_factor: 0.95,
            high_rise_factor: 1.0,
        }
    }
}

/// Run-control timing and persistence retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Heartbeat age after which the execution lease is invalidated (s).
    pub heartbeat_timeout_s: u64,
    /// Hard wall-clock ceiling for one lease (s).
    pub max_runtime_s: u64,
    /// Wall-clock budget of one invocation (s).
    pub invocation_budget_s: u64,
    /// Remaining-element count below which a timed-out invocation keeps going.
    pub small_remainder_threshold: usize,
    /// Attempts per store call before the run fails.
    pub persist_retry_attempts: u32,
    /// First backoff delay; doubles per attempt (ms).
    pub persist_retry_base_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_s: 120,
            max_runtime_s: 1800,
            invocation_budget_s: 1500,
            small_remainder_threshold: 20,
            persist_retry_attempts: 3,
            persist_retry_base_ms: 50,
        }
    }
}

impl RunConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::seconds(i64::try_from(self.heartbeat_timeout_s).unwrap_or(i64::MAX / 1000))
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::seconds(i64::try_from(self.max_runtime_s).unwrap_or(i64::MAX / 1000))
    }

    pub fn invocation_budget(&self) -> Duration {
        Duration::seconds(i64::try_from(self.invocation_budget_s).unwrap_or(i64::MAX / 1000))
    }
}

/// Persistence backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// `"memory"` or `"sqlite"`.
    pub backend: String,
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("bipv_runs.db"),
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"analysis.flush_interval"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl AnalysisConfig {
    /// Monthly-average sampling with default constants.
    pub fn standard() -> Self {
        Self {
            site: SiteConfig::default(),
            analysis: AnalysisSection::default(),
            model: ModelConfig::default(),
            run: RunConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Four representative days; for quick screening of large buildings.
    pub fn fast() -> Self {
        Self {
            analysis: AnalysisSection {
                precision: PrecisionLevel::YearlyAverage,
                flush_interval: 50,
                ..AnalysisSection::default()
            },
            ..Self::standard()
        }
    }

    /// Every hour of the year, with failed elements retried on resume.
    pub fn detailed() -> Self {
        Self {
            analysis: AnalysisSection {
                precision: PrecisionLevel::Hourly,
                flush_interval: 5,
                retry_failed: true,
                ..AnalysisSection::default()
            },
            ..Self::standard()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["standard", "fast", "detailed"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "standard" => Ok(Self::standard()),
            "fast" => Ok(Self::fast()),
            "detailed" => Ok(Self::detailed()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigError {
                field: field.to_string(),
                message,
            });
        };

        let site = &self.site;
        if !(-90.0..=90.0).contains(&site.latitude) {
            push("site.latitude", "must be in [-90, 90]".into());
        }
        if !(-180.0..=180.0).contains(&site.longitude) {
            push("site.longitude", "must be in [-180, 180]".into());
        }

        let a = &self.analysis;
        if a.flush_interval == 0 {
            push("analysis.flush_interval", "must be > 0".into());
        }
        if !(a.timestep_hours.is_finite() && a.timestep_hours > 0.0) {
            push("analysis.timestep_hours", "must be > 0".into());
        }
        for name in &a.excluded_orientations {
            if Orientation::parse(name).is_none() {
                push(
                    "analysis.excluded_orientations",
                    format!("unknown orientation \"{name}\""),
                );
            }
        }

        let m = &self.model;
        for (field, value) in [
            ("model.albedo", m.albedo),
            ("model.shading_floor", m.shading_floor),
            ("model.max_wall_shadow", m.max_wall_shadow),
            ("model.level_mismatch_factor", m.level_mismatch_factor),
            ("model.ground_reflectance_cap", m.ground_reflectance_cap),
            ("model.atmospheric_gain_cap", m.atmospheric_gain_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                push(field, "must be in [0.0, 1.0]".into());
            }
        }
        if m.floor_height_m <= 0.0 {
            push("model.floor_height_m", "must be > 0".into());
        }
        if m.ground_reflectance_decay_m <= 0.0 {
            push("model.ground_reflectance_decay_m", "must be > 0".into());
        }
        if m.atmospheric_gain_per_m < 0.0 {
            push("model.atmospheric_gain_per_m", "must be >= 0".into());
        }
        if m.ground_level_max_m >= m.low_rise_max_m {
            push("model.ground_level_max_m", "must be < model.low_rise_max_m".into());
        }
        for (field, value) in [
            ("model.ground_level_factor", m.ground_level_factor),
            ("model.low_rise_factor", m.low_rise_factor),
            ("model.high_rise_factor", m.high_rise_factor),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                push(field, "must be in (0.0, 1.0]".into());
            }
        }

        let r = &self.run;
        if r.heartbeat_timeout_s == 0 {
            push("run.heartbeat_timeout_s", "must be > 0".into());
        }
        if r.invocation_budget_s == 0 {
            push("run.invocation_budget_s", "must be > 0".into());
        }
        if r.invocation_budget_s > r.max_runtime_s {
            push("run.invocation_budget_s", "must be <= run.max_runtime_s".into());
        }
        if r.persist_retry_attempts == 0 {
            push("run.persist_retry_attempts", "must be > 0".into());
        }

        let st = &self.store;
        if st.backend != "memory" && st.backend != "sqlite" {
            push(
                "store.backend",
                format!("must be \"memory\" or \"sqlite\", got \"{}\"", st.backend),
            );
        }

        errors
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::standard()
    }
}
