//! # Handover Monitor
//!
//! Synchronous wiring of buffer, estimator, noise adapter and forecaster.
//! One [`HandoverMonitor`] is owned by exactly one writer; it turns each
//! accepted RSRP sample into one [`Decision`].
//!
//! ```text
//! sample ──▶ SampleBuffer ──▶ StateEstimator ◀──▶ NoiseAdapter
//!                                   │
//!                                   ▼
//!                              Forecaster ──▶ Trigger ──▶ Decision
//! ```

use rand::SeedableRng;
use rand::RngExt;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::SampleBuffer;
use crate::config::{ConfigError, ForecastConfig};
use crate::estimator::{Covariance, FilterState, StateEstimator};
use crate::forecast::{Forecaster, Trigger};
use crate::noise::{NoiseAdapter, NoiseModel};

/// Why an inbound sample was discarded.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("sample is not a finite number: {0}")]
    NonFinite(f64),
    #[error("sample {value} dBm outside valid range {min}..={max} dBm")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// Lifecycle of a monitoring session. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fewer than `min_samples` retained; the default level is reported.
    ColdStart,
    /// Estimator and forecaster run on every sample.
    Tracking,
}

/// Outcome of one processed sample. Emitted once, never retained by the
/// monitor beyond the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    /// Position of the sample among accepted samples, starting at 1.
    pub sequence: u64,
    /// Request a handover now.
    pub trigger: bool,
    /// Forecast level that produced the decision (dBm).
    pub forecast_dbm: f64,
    pub phase: Phase,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MonitorStats {
    pub accepted: u64,
    pub rejected: u64,
    pub triggers: u64,
    pub corrections: u64,
    pub noise_reestimations: u64,
}

/// Immutable copy of everything a reader may want at once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub phase: Phase,
    pub state: FilterState,
    pub covariance: Covariance,
    pub noise: NoiseModel,
    pub buffered: usize,
    pub last_decision: Option<Decision>,
    pub stats: MonitorStats,
}

pub struct HandoverMonitor {
    config: ForecastConfig,
    buffer: SampleBuffer,
    estimator: StateEstimator,
    adapter: NoiseAdapter,
    forecaster: Forecaster,
    trigger: Trigger,
    rng: StdRng,
    stats: MonitorStats,
    last_decision: Option<Decision>,
}

impl HandoverMonitor {
    pub fn new(config: ForecastConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let initial = FilterState::new(config.initial_level_dbm, 0.0, 0.0);
        Ok(HandoverMonitor {
            buffer: SampleBuffer::new(config.buffer_capacity),
            estimator: StateEstimator::new(
                initial,
                &config.initial_noise,
                config.dt_secs,
                config.min_samples,
            ),
            adapter: NoiseAdapter::new(
                config.initial_noise,
                config.reestimation_period,
                config.variance_floor,
            ),
            forecaster: Forecaster::from_config(&config),
            trigger: Trigger::new(config.threshold_dbm),
            rng: StdRng::seed_from_u64(seed),
            stats: MonitorStats::default(),
            last_decision: None,
            config,
        })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Checks a raw sample without touching any state.
    pub fn validate_sample(config: &ForecastConfig, value: f64) -> Result<f64, SampleError> {
        if !value.is_finite() {
            return Err(SampleError::NonFinite(value));
        }
        if !config.valid_range_dbm.contains(&value) {
            return Err(SampleError::OutOfRange {
                value,
                min: *config.valid_range_dbm.start(),
                max: *config.valid_range_dbm.end(),
            });
        }
        Ok(value)
    }

    /// Processes one sample. Rejected samples leave every piece of state
    /// except the rejection counter untouched.
    pub fn on_measurement(&mut self, value: f64) -> Result<Decision, SampleError> {
        let value = match Self::validate_sample(&self.config, value) {
            Ok(v) => v,
            Err(e) => {
                self.stats.rejected += 1;
                warn!(error = %e, "discarding RSRP sample");
                return Err(e);
            }
        };

        let was = self.phase();
        self.buffer.push(value);
        self.stats.accepted += 1;
        let phase = self.phase();
        if phase != was {
            info!(buffered = self.buffer.len(), "filter warmed up, tracking");
        }

        let decision = match phase {
            Phase::ColdStart => Decision {
                sequence: self.stats.accepted,
                trigger: false,
                forecast_dbm: self.estimator.state().level,
                phase,
            },
            Phase::Tracking => {
                let window = self.buffer.snapshot();
                let state = self.estimator.update(&window, &mut self.adapter);
                let forecast_dbm =
                    self.forecaster
                        .forecast(&state, &self.adapter.model(), &mut self.rng);
                Decision {
                    sequence: self.stats.accepted,
                    trigger: self.trigger.evaluate(forecast_dbm),
                    forecast_dbm,
                    phase,
                }
            }
        };

        self.stats.corrections = self.estimator.corrections();
        self.stats.noise_reestimations = self.adapter.reestimations();
        if decision.trigger {
            self.stats.triggers += 1;
        }
        self.log_decision(&decision);
        self.last_decision = Some(decision);
        Ok(decision)
    }

    fn log_decision(&self, decision: &Decision) {
        let previous = self.last_decision.map(|d| d.trigger).unwrap_or(false);
        if decision.trigger && !previous {
            info!(
                forecast_dbm = decision.forecast_dbm,
                threshold_dbm = self.trigger.threshold_dbm(),
                "forecast at or below threshold, handover triggered"
            );
        } else if !decision.trigger && previous {
            info!(forecast_dbm = decision.forecast_dbm, "forecast recovered above threshold");
        }
        debug!(
            seq = decision.sequence,
            trigger = decision.trigger,
            forecast_dbm = decision.forecast_dbm,
            level = self.estimator.state().level,
            rate = self.estimator.state().rate,
            "decision"
        );
    }

    pub fn phase(&self) -> Phase {
        if self.estimator.is_warm(self.buffer.len()) {
            Phase::Tracking
        } else {
            Phase::ColdStart
        }
    }

    pub fn state(&self) -> FilterState {
        self.estimator.state()
    }

    pub fn covariance(&self) -> Covariance {
        self.estimator.covariance()
    }

    pub fn noise(&self) -> NoiseModel {
        self.adapter.model()
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            phase: self.phase(),
            state: self.state(),
            covariance: self.covariance(),
            noise: self.noise(),
            buffered: self.buffer.len(),
            last_decision: self.last_decision,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookaheadNoise;

    fn config() -> ForecastConfig {
        ForecastConfig {
            seed: Some(7),
            ..ForecastConfig::default()
        }
    }

    fn feed(monitor: &mut HandoverMonitor, values: impl IntoIterator<Item = f64>) -> Vec<Decision> {
        values
            .into_iter()
            .map(|v| monitor.on_measurement(v).unwrap())
            .collect()
    }

    #[test]
    fn cold_start_reports_default_and_never_triggers() {
        let mut m = HandoverMonitor::new(config()).unwrap();
        let decisions = feed(&mut m, [-139.0, -135.0, -138.0, -140.0, -137.0, -136.0, -139.5, -138.0, -139.0]);
        assert!(decisions.iter().all(|d| !d.trigger));
        assert!(decisions.iter().all(|d| d.forecast_dbm == -90.0));
        assert!(decisions.iter().all(|d| d.phase == Phase::ColdStart));
        assert_eq!(m.phase(), Phase::ColdStart);
    }

    #[test]
    fn cold_start_ignores_low_initial_level() {
        let mut m = HandoverMonitor::new(ForecastConfig {
            initial_level_dbm: -120.0,
            ..config()
        })
        .unwrap();
        let decisions = feed(&mut m, vec![-120.0; 9]);
        assert!(decisions.iter().all(|d| !d.trigger && d.forecast_dbm == -120.0));
    }

    #[test]
    fn tenth_sample_enters_tracking() {
        let mut m = HandoverMonitor::new(config()).unwrap();
        let decisions = feed(&mut m, vec![-80.0; 10]);
        assert_eq!(decisions[8].phase, Phase::ColdStart);
        assert_eq!(decisions[9].phase, Phase::Tracking);
        assert_eq!(decisions[9].sequence, 10);
        assert_eq!(m.stats().corrections, 9);
    }

    #[test]
    fn deep_signal_triggers() {
        let mut m = HandoverMonitor::new(config()).unwrap();
        let decisions = feed(&mut m, vec![-105.0; 30]);
        let last = decisions.last().unwrap();
        assert!(last.trigger, "forecast {}", last.forecast_dbm);
        assert!(m.stats().triggers > 0);
    }

    #[test]
    fn healthy_signal_does_not_trigger() {
        let mut m = HandoverMonitor::new(config()).unwrap();
        let decisions = feed(&mut m, vec![-92.0; 30]);
        assert!(decisions.iter().all(|d| !d.trigger));
        assert_eq!(m.stats().triggers, 0);
    }

    #[test]
    fn decline_towards_tunnel_triggers_before_threshold_is_measured() {
        let mut m = HandoverMonitor::new(ForecastConfig {
            lookahead_noise: LookaheadNoise::Disabled,
            ..config()
        })
        .unwrap();
        // -2 dBm per sample: the forecast crosses before the samples do
        let samples: Vec<f64> = (0..15).map(|i| -70.0 - 2.0 * i as f64).collect();
        let decisions = feed(&mut m, samples.clone());
        let first = decisions.iter().position(|d| d.trigger).unwrap();
        assert!(samples[first] > -100.0, "triggered at sample {}", samples[first]);
    }

    #[test]
    fn rejected_samples_do_not_mutate_state() {
        let mut m = HandoverMonitor::new(config()).unwrap();
        feed(&mut m, vec![-85.0; 12]);
        let before = m.snapshot();

        assert!(matches!(m.on_measurement(f64::NAN), Err(SampleError::NonFinite(_))));
        assert!(matches!(
            m.on_measurement(f64::INFINITY),
            Err(SampleError::NonFinite(_))
        ));
        assert!(matches!(
            m.on_measurement(i32::MAX as f64),
            Err(SampleError::OutOfRange { .. })
        ));

        let after = m.snapshot();
        assert_eq!(after.state, before.state);
        assert_eq!(after.covariance, before.covariance);
        assert_eq!(after.buffered, before.buffered);
        assert_eq!(after.stats.accepted, before.stats.accepted);
        assert_eq!(after.stats.rejected, 3);
    }

    #[test]
    fn invalid_config_is_refused() {
        let result = HandoverMonitor::new(ForecastConfig {
            dt_secs: 0.0,
            ..config()
        });
        assert!(matches!(result, Err(ConfigError::InvalidInterval(_))));
    }

    #[test]
    fn same_seed_same_decisions() {
        let samples: Vec<f64> = (0..40).map(|i| -80.0 - (i % 7) as f64).collect();
        let mut a = HandoverMonitor::new(config()).unwrap();
        let mut b = HandoverMonitor::new(config()).unwrap();
        assert_eq!(feed(&mut a, samples.clone()), feed(&mut b, samples));
    }
}
