//! # Forecaster / Trigger
//!
//! Forward-only propagation of the corrected state to a fixed horizon,
//! followed by an inclusive threshold test. No measurement correction
//! happens during look-ahead; process noise is injected per
//! [`LookaheadNoise`].

use rand::Rng;
use rand::RngExt;

use crate::config::{ForecastConfig, LookaheadNoise};
use crate::estimator::FilterState;
use crate::noise::NoiseModel;

/// Box-Muller standard normal.
fn standard_normal(rng: &mut impl Rng) -> f64 {
    // 1 - U lies in (0, 1], keeping ln() finite.
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0_f64 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[derive(Debug, Clone)]
pub struct Forecaster {
    steps: usize,
    dt: f64,
    noise: LookaheadNoise,
}

impl Forecaster {
    pub fn new(steps: usize, dt: f64, noise: LookaheadNoise) -> Self {
        Forecaster { steps, dt, noise }
    }

    pub fn from_config(config: &ForecastConfig) -> Self {
        Self::new(config.horizon_steps(), config.dt_secs, config.lookahead_noise)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Level expected `steps · dt` seconds ahead of `state`.
    pub fn forecast(&self, state: &FilterState, noise: &NoiseModel, rng: &mut impl Rng) -> f64 {
        let sigma = [noise.level.sqrt(), noise.rate.sqrt(), noise.curvature.sqrt()];
        let mut s = *state;
        for _ in 0..self.steps {
            s = s.predicted(self.dt);
            match self.noise {
                LookaheadNoise::Disabled => {}
                LookaheadNoise::LevelOnly => {
                    s.level += standard_normal(rng) * sigma[0];
                }
                LookaheadNoise::Summed => {
                    let draws: f64 = sigma.iter().map(|sd| standard_normal(rng) * sd).sum();
                    s.level += draws;
                }
            }
        }
        s.level
    }
}

/// Inclusive threshold comparison: a forecast exactly at the threshold
/// triggers.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    threshold_dbm: f64,
}

impl Trigger {
    pub fn new(threshold_dbm: f64) -> Self {
        Trigger { threshold_dbm }
    }

    pub fn threshold_dbm(&self) -> f64 {
        self.threshold_dbm
    }

    pub fn evaluate(&self, forecast_dbm: f64) -> bool {
        forecast_dbm <= self.threshold_dbm
    }
}
