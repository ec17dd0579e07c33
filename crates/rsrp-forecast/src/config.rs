//! # Forecaster Configuration
//!
//! Every tunable of the monitor lives in [`ForecastConfig`]. Configs are
//! either built in code (`ForecastConfig::default()` plus struct update
//! syntax) or loaded from TOML through the permissive [`ForecastConfigInput`]
//! layer, which fills gaps with defaults and then validates.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::noise::NoiseModel;

pub const CONFIG_VERSION: u32 = 1;

/// Upper bound on forward propagation steps, keeps every invocation bounded.
pub const MAX_HORIZON_STEPS: usize = 10_000;

/// Absorbs float noise in `horizon / dt` so an exact ratio never gains a step.
const HORIZON_EPSILON: f64 = 1e-9;

/// How process noise is injected while propagating towards the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookaheadNoise {
    /// Sum of the level, rate and curvature draws added to the level each step.
    #[default]
    Summed,
    /// Only the level draw perturbs the level.
    LevelOnly,
    /// Deterministic propagation.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(String),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("sampling interval must be positive and finite, got {0}")]
    InvalidInterval(f64),
    #[error("min_samples must be at least 2, got {0}")]
    MinSamplesTooSmall(usize),
    #[error("buffer capacity {capacity} is smaller than min_samples {min_samples}")]
    CapacityBelowMinimum { capacity: usize, min_samples: usize },
    #[error("noise re-estimation period must be non-zero")]
    ZeroReestimationPeriod,
    #[error("variance floor must be positive and finite, got {0}")]
    InvalidVarianceFloor(f64),
    #[error("initial noise variances must be positive and finite")]
    InvalidInitialNoise,
    #[error("{name} must be finite")]
    NonFinite { name: &'static str },
    #[error("forecast horizon must be non-negative, got {0}")]
    NegativeHorizon(f64),
    #[error("forecast horizon of {steps} steps exceeds the step limit")]
    HorizonTooLong { steps: usize },
    #[error("valid sample range {min}..={max} dBm is empty")]
    EmptyValidRange { min: f64, max: f64 },
}

/// Resolved, validated monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    /// Nominal interval between consecutive samples, in seconds.
    pub dt_secs: f64,
    /// Retained window length.
    pub buffer_capacity: usize,
    /// Samples required before the filter leaves cold start.
    pub min_samples: usize,
    /// Level reported until the filter has enough data.
    pub initial_level_dbm: f64,
    /// Starting noise variances; also the initial covariance diagonal.
    pub initial_noise: NoiseModel,
    /// Correction updates between noise re-estimations.
    pub reestimation_period: usize,
    /// Lowest variance the adapter may assign.
    pub variance_floor: f64,
    /// Forecasts at or below this level trigger a handover.
    pub threshold_dbm: f64,
    /// How far ahead the forecast looks, in seconds.
    pub horizon_secs: f64,
    pub lookahead_noise: LookaheadNoise,
    /// Samples outside this range are rejected as unavailable readings.
    pub valid_range_dbm: RangeInclusive<f64>,
    /// Fixed RNG seed for reproducible look-ahead noise.
    pub seed: Option<u64>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            dt_secs: 0.2,
            buffer_capacity: 20,
            min_samples: 10,
            initial_level_dbm: -90.0,
            initial_noise: NoiseModel::new(0.1, 0.05, 0.02),
            reestimation_period: 10,
            variance_floor: 1e-6,
            threshold_dbm: -100.0,
            horizon_secs: 1.2,
            lookahead_noise: LookaheadNoise::Summed,
            valid_range_dbm: -140.0..=-44.0,
            seed: None,
        }
    }
}

impl ForecastConfig {
    /// Number of forward Δt steps covering the horizon.
    ///
    /// Rounds up, so a horizon that is not a whole multiple of Δt still
    /// reaches at least `horizon_secs` ahead.
    pub fn horizon_steps(&self) -> usize {
        horizon_steps(self.horizon_secs, self.dt_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dt_secs.is_finite() && self.dt_secs > 0.0) {
            return Err(ConfigError::InvalidInterval(self.dt_secs));
        }
        if self.min_samples < 2 {
            return Err(ConfigError::MinSamplesTooSmall(self.min_samples));
        }
        if self.buffer_capacity < self.min_samples {
            return Err(ConfigError::CapacityBelowMinimum {
                capacity: self.buffer_capacity,
                min_samples: self.min_samples,
            });
        }
        if self.reestimation_period == 0 {
            return Err(ConfigError::ZeroReestimationPeriod);
        }
        if !(self.variance_floor.is_finite() && self.variance_floor > 0.0) {
            return Err(ConfigError::InvalidVarianceFloor(self.variance_floor));
        }
        if !self.initial_noise.is_valid() {
            return Err(ConfigError::InvalidInitialNoise);
        }
        if !self.initial_level_dbm.is_finite() {
            return Err(ConfigError::NonFinite {
                name: "initial_level_dbm",
            });
        }
        if !self.threshold_dbm.is_finite() {
            return Err(ConfigError::NonFinite {
                name: "threshold_dbm",
            });
        }
        if !self.horizon_secs.is_finite() {
            return Err(ConfigError::NonFinite {
                name: "horizon_secs",
            });
        }
        if self.horizon_secs < 0.0 {
            return Err(ConfigError::NegativeHorizon(self.horizon_secs));
        }
        let steps = self.horizon_steps();
        if steps > MAX_HORIZON_STEPS {
            return Err(ConfigError::HorizonTooLong { steps });
        }
        let (min, max) = (*self.valid_range_dbm.start(), *self.valid_range_dbm.end());
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(ConfigError::EmptyValidRange { min, max });
        }
        Ok(())
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(ForecastConfig::default());
        }
        let parsed: ForecastConfigInput =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        parsed.resolve()
    }
}

fn horizon_steps(horizon_secs: f64, dt_secs: f64) -> usize {
    let ratio = horizon_secs / dt_secs;
    if !ratio.is_finite() || ratio <= 0.0 {
        return 0;
    }
    (ratio - HORIZON_EPSILON).ceil().max(0.0) as usize
}

// ─── TOML input layer ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForecastConfigInput {
    pub version: u32,
    pub filter: FilterInput,
    pub noise: NoiseInput,
    pub trigger: TriggerInput,
    pub input: SampleRangeInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterInput {
    pub dt_secs: Option<f64>,
    pub buffer_capacity: Option<usize>,
    pub min_samples: Option<usize>,
    pub initial_level_dbm: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NoiseInput {
    pub initial_level: Option<f64>,
    pub initial_rate: Option<f64>,
    pub initial_curvature: Option<f64>,
    pub reestimation_period: Option<usize>,
    pub variance_floor: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriggerInput {
    pub threshold_dbm: Option<f64>,
    pub horizon_secs: Option<f64>,
    pub lookahead_noise: Option<LookaheadNoise>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SampleRangeInput {
    pub min_dbm: Option<f64>,
    pub max_dbm: Option<f64>,
}

impl ForecastConfigInput {
    pub fn resolve(self) -> Result<ForecastConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let d = ForecastConfig::default();
        let initial_noise = NoiseModel::new(
            self.noise.initial_level.unwrap_or(d.initial_noise.level),
            self.noise.initial_rate.unwrap_or(d.initial_noise.rate),
            self.noise
                .initial_curvature
                .unwrap_or(d.initial_noise.curvature),
        );
        let min_dbm = self.input.min_dbm.unwrap_or(*d.valid_range_dbm.start());
        let max_dbm = self.input.max_dbm.unwrap_or(*d.valid_range_dbm.end());

        let config = ForecastConfig {
            dt_secs: self.filter.dt_secs.unwrap_or(d.dt_secs),
            buffer_capacity: self.filter.buffer_capacity.unwrap_or(d.buffer_capacity),
            min_samples: self.filter.min_samples.unwrap_or(d.min_samples),
            initial_level_dbm: self.filter.initial_level_dbm.unwrap_or(d.initial_level_dbm),
            initial_noise,
            reestimation_period: self
                .noise
                .reestimation_period
                .unwrap_or(d.reestimation_period),
            variance_floor: self.noise.variance_floor.unwrap_or(d.variance_floor),
            threshold_dbm: self.trigger.threshold_dbm.unwrap_or(d.threshold_dbm),
            horizon_secs: self.trigger.horizon_secs.unwrap_or(d.horizon_secs),
            lookahead_noise: self.trigger.lookahead_noise.unwrap_or(d.lookahead_noise),
            valid_range_dbm: min_dbm..=max_dbm,
            seed: self.trigger.seed,
        };
        config.validate()?;
        Ok(config)
    }
}
