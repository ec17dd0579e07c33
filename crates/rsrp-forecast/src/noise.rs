//! # Noise Adaptation
//!
//! Online maximum-likelihood re-estimation of the filter's process noise.
//! Squared residuals accumulate for `period` correction updates; then each
//! variance becomes `sum / count` and the accumulator starts over. There is
//! no smoothing: a regime change moves the noise assumption in one step.

use serde::Serialize;
use tracing::debug;

/// Diagonal process-noise variances. The level variance doubles as the
/// measurement-noise variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseModel {
    pub level: f64,
    pub rate: f64,
    pub curvature: f64,
}

impl NoiseModel {
    pub const fn new(level: f64, rate: f64, curvature: f64) -> Self {
        NoiseModel {
            level,
            rate,
            curvature,
        }
    }

    /// Measurement-noise variance used in the innovation covariance.
    pub fn measurement(&self) -> f64 {
        self.level
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.level, self.rate, self.curvature]
    }

    /// All variances strictly positive and finite.
    pub fn is_valid(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite() && *v > 0.0)
    }

    fn floored(self, floor: f64) -> Self {
        NoiseModel {
            level: self.level.max(floor),
            rate: self.rate.max(floor),
            curvature: self.curvature.max(floor),
        }
    }
}

/// Residuals of one correction update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residuals {
    /// Observed level minus predicted level.
    pub level: f64,
    /// Observed step minus the step the predicted rate implies.
    pub rate: f64,
    /// Observed change of step minus the change the predicted curvature implies.
    pub curvature: f64,
}

/// Running sums of squared residuals since the last re-estimation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidualAccumulator {
    sum_sq_level: f64,
    sum_sq_rate: f64,
    sum_sq_curvature: f64,
    count: usize,
}

impl ResidualAccumulator {
    pub fn add(&mut self, r: &Residuals) {
        self.sum_sq_level += r.level * r.level;
        self.sum_sq_rate += r.rate * r.rate;
        self.sum_sq_curvature += r.curvature * r.curvature;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Per-component mean squared residual, `None` while empty.
    pub fn mean_squares(&self) -> Option<NoiseModel> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(NoiseModel::new(
            self.sum_sq_level / n,
            self.sum_sq_rate / n,
            self.sum_sq_curvature / n,
        ))
    }

    pub fn reset(&mut self) {
        *self = ResidualAccumulator::default();
    }
}

/// Owns the live [`NoiseModel`] and replaces it every `period` updates.
#[derive(Debug, Clone)]
pub struct NoiseAdapter {
    model: NoiseModel,
    accumulator: ResidualAccumulator,
    period: usize,
    floor: f64,
    reestimations: u64,
}

impl NoiseAdapter {
    /// `period` is clamped to at least one update; `initial` is floored.
    pub fn new(initial: NoiseModel, period: usize, floor: f64) -> Self {
        NoiseAdapter {
            model: initial.floored(floor),
            accumulator: ResidualAccumulator::default(),
            period: period.max(1),
            floor,
            reestimations: 0,
        }
    }

    pub fn model(&self) -> NoiseModel {
        self.model
    }

    pub fn pending(&self) -> usize {
        self.accumulator.count()
    }

    /// Number of completed re-estimations.
    pub fn reestimations(&self) -> u64 {
        self.reestimations
    }

    /// Feed one update's residuals. Returns the new model when this update
    /// completed a period.
    pub fn record(&mut self, residuals: &Residuals) -> Option<NoiseModel> {
        self.accumulator.add(residuals);
        if self.accumulator.count() < self.period {
            return None;
        }

        let estimate = self.accumulator.mean_squares()?;
        self.accumulator.reset();
        // NaN.max(floor) == floor, so a poisoned sum cannot leak through.
        self.model = estimate.floored(self.floor);
        self.reestimations += 1;
        debug!(
            level = self.model.level,
            rate = self.model.rate,
            curvature = self.model.curvature,
            "noise variances re-estimated"
        );
        Some(self.model)
    }
}
