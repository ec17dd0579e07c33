//! # State Estimator: Constant-Acceleration Kalman Filter
//!
//! Three-state filter over `[level, rate, curvature]` of the downlink RSRP
//! (dBm, dBm/s, dBm/s²). Only the level is observed (`H = [1, 0, 0]`).
//!
//! Every invocation replays prediction + correction over each adjacent
//! pair of the whole retained window, starting from the persisted state,
//! rather than stepping once for the newest sample. Recent samples are
//! therefore seen several times, which speeds up convergence and smooths
//! over bursty or reordered arrivals at the cost of `O(window)` work.
//!
//! The covariance update uses the Joseph form followed by explicit
//! symmetrisation so `P` stays symmetric positive semi-definite under
//! floating-point rounding.

use serde::Serialize;

use crate::noise::{NoiseAdapter, NoiseModel, Residuals};

type Matrix3 = [[f64; 3]; 3];

const IDENTITY: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Belief about the current signal trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterState {
    /// Current RSRP estimate (dBm).
    pub level: f64,
    /// First derivative (dBm/s).
    pub rate: f64,
    /// Second derivative (dBm/s²).
    pub curvature: f64,
}

impl FilterState {
    pub fn new(level: f64, rate: f64, curvature: f64) -> Self {
        FilterState {
            level,
            rate,
            curvature,
        }
    }

    /// Noise-free constant-acceleration step of `dt` seconds.
    pub fn predicted(&self, dt: f64) -> Self {
        FilterState {
            level: self.level + self.rate * dt + 0.5 * self.curvature * dt * dt,
            rate: self.rate + self.curvature * dt,
            curvature: self.curvature,
        }
    }

    fn as_array(&self) -> [f64; 3] {
        [self.level, self.rate, self.curvature]
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }
}

/// 3×3 symmetric covariance of [`FilterState`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Covariance(Matrix3);

impl Covariance {
    pub fn diagonal(noise: &NoiseModel) -> Self {
        let [a, b, c] = noise.as_array();
        Covariance([[a, 0.0, 0.0], [0.0, b, 0.0], [0.0, 0.0, c]])
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row][col]
    }

    pub fn as_matrix(&self) -> &Matrix3 {
        &self.0
    }

    /// Time update: `P = M·P·Mᵗ + W`.
    pub fn propagated(&self, dt: f64, noise: &NoiseModel) -> Self {
        let m = transition(dt);
        let mut p = mat_mul(&mat_mul(&m, &self.0), &transpose(&m));
        let w = noise.as_array();
        for (i, q) in w.iter().enumerate() {
            p[i][i] += q;
        }
        Covariance(p).symmetrised()
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let scale = self.max_abs().max(1.0);
        (0..3).all(|i| (0..3).all(|j| (self.0[i][j] - self.0[j][i]).abs() <= tolerance * scale))
    }

    /// Checks every principal minor is non-negative, relative to the
    /// largest entry so large-variance regimes are judged fairly.
    pub fn is_positive_semidefinite(&self, tolerance: f64) -> bool {
        let p = &self.0;
        let scale = self.max_abs();
        if scale == 0.0 {
            return true;
        }
        if !scale.is_finite() {
            return false;
        }
        let diag_ok = (0..3).all(|i| p[i][i] / scale >= -tolerance);
        let minors_ok = [(0, 1), (0, 2), (1, 2)].iter().all(|&(i, j)| {
            (p[i][i] * p[j][j] - p[i][j] * p[j][i]) / (scale * scale) >= -tolerance
        });
        let det = p[0][0] * (p[1][1] * p[2][2] - p[1][2] * p[2][1])
            - p[0][1] * (p[1][0] * p[2][2] - p[1][2] * p[2][0])
            + p[0][2] * (p[1][0] * p[2][1] - p[1][1] * p[2][0]);
        diag_ok && minors_ok && det / (scale * scale * scale) >= -tolerance
    }

    fn max_abs(&self) -> f64 {
        self.0
            .iter()
            .flat_map(|row| row.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    fn symmetrised(mut self) -> Self {
        for i in 0..3 {
            for j in (i + 1)..3 {
                let avg = 0.5 * (self.0[i][j] + self.0[j][i]);
                self.0[i][j] = avg;
                self.0[j][i] = avg;
            }
        }
        self
    }
}

/// State and covariance carried between invocations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub state: FilterState,
    pub covariance: Covariance,
}

/// Constant-acceleration transition matrix for a step of `dt` seconds.
pub fn transition(dt: f64) -> Matrix3 {
    [[1.0, dt, 0.5 * dt * dt], [0.0, 1.0, dt], [0.0, 0.0, 1.0]]
}

/// One prediction + correction against `observed`.
///
/// Returns the corrected estimate and the pre-correction level residual.
pub fn correct(estimate: &Estimate, observed: f64, dt: f64, noise: &NoiseModel) -> (Estimate, f64) {
    let predicted = estimate.state.predicted(dt);
    let p = estimate.covariance.propagated(dt, noise);
    let r = noise.measurement();

    // S = H·P·Hᵗ + R, K = P·Hᵗ / S
    let s = p.0[0][0] + r;
    let k = [p.0[0][0] / s, p.0[1][0] / s, p.0[2][0] / s];

    let innovation = observed - predicted.level;
    let state = FilterState {
        level: predicted.level + k[0] * innovation,
        rate: predicted.rate + k[1] * innovation,
        curvature: predicted.curvature + k[2] * innovation,
    };

    // Joseph form: (I - K·H)·P·(I - K·H)ᵗ + K·R·Kᵗ
    let mut a = IDENTITY;
    for (i, ki) in k.iter().enumerate() {
        a[i][0] -= ki;
    }
    let mut updated = mat_mul(&mat_mul(&a, &p.0), &transpose(&a));
    for i in 0..3 {
        for j in 0..3 {
            updated[i][j] += k[i] * r * k[j];
        }
    }

    (
        Estimate {
            state,
            covariance: Covariance(updated).symmetrised(),
        },
        innovation,
    )
}

/// Re-derives the trajectory across `window`, one correction per adjacent
/// pair, feeding residuals to `adapter` as it goes.
///
/// Residuals are level displacements per sample: the observed step against
/// `rate · dt`, and the change of step against `curvature · dt²`. Every
/// noise variance is therefore in dBm² per step, which is the scale the
/// look-ahead adds them to the level with.
///
/// The first pair has no preceding step to compare against, so it is
/// corrected but contributes no residuals. Returns the final estimate and
/// the number of corrections applied.
pub fn replay_window(
    start: Estimate,
    window: &[f64],
    dt: f64,
    adapter: &mut NoiseAdapter,
) -> (Estimate, usize) {
    let mut estimate = start;
    let mut prev_step: Option<f64> = None;
    let mut corrections = 0;

    for pair in window.windows(2) {
        let (prev, observed) = (pair[0], pair[1]);
        let predicted = estimate.state.predicted(dt);
        let (next, level_residual) = correct(&estimate, observed, dt, &adapter.model());

        let step = observed - prev;
        if let Some(prev_step) = prev_step {
            adapter.record(&step_residuals(level_residual, step, prev_step, &predicted, dt));
        }
        prev_step = Some(step);

        estimate = next;
        corrections += 1;
    }

    (estimate, corrections)
}

fn step_residuals(
    level: f64,
    step: f64,
    prev_step: f64,
    predicted: &FilterState,
    dt: f64,
) -> Residuals {
    Residuals {
        level,
        rate: step - predicted.rate * dt,
        curvature: (step - prev_step) - predicted.curvature * dt * dt,
    }
}

/// Owns the filter state and covariance for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct StateEstimator {
    estimate: Estimate,
    dt: f64,
    min_samples: usize,
    corrections: u64,
}

impl StateEstimator {
    pub fn new(initial: FilterState, initial_noise: &NoiseModel, dt: f64, min_samples: usize) -> Self {
        StateEstimator {
            estimate: Estimate {
                state: initial,
                covariance: Covariance::diagonal(initial_noise),
            },
            dt,
            min_samples,
            corrections: 0,
        }
    }

    pub fn state(&self) -> FilterState {
        self.estimate.state
    }

    pub fn covariance(&self) -> Covariance {
        self.estimate.covariance
    }

    /// Total correction steps applied since construction.
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn is_warm(&self, window_len: usize) -> bool {
        window_len >= self.min_samples
    }

    /// Runs a replay over `window`. Below `min_samples` the state is
    /// returned untouched.
    pub fn update(&mut self, window: &[f64], adapter: &mut NoiseAdapter) -> FilterState {
        if !self.is_warm(window.len()) {
            return self.estimate.state;
        }
        let (estimate, applied) = replay_window(self.estimate, window, self.dt, adapter);
        self.estimate = estimate;
        self.corrections += applied as u64;
        self.estimate.state
    }
}

fn mat_mul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn transpose(a: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in a.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            out[j][i] = *v;
        }
    }
    out
}
