//! # rsrp-forecast
//!
//! Real-time forecasting of downlink RSRP for a moving terminal, turning a
//! noisy sample stream into a "hand over now" decision before the link
//! collapses (for example on entering a tunnel).
//!
//! ## Crate structure
//!
//! - [`buffer`]: Bounded rolling window of recent samples
//! - [`estimator`]: Constant-acceleration Kalman filter, replayed over the window
//! - [`noise`]: Online MLE re-estimation of process/measurement noise
//! - [`forecast`]: Forward-only propagation to the horizon, threshold trigger
//! - [`monitor`]: Synchronous wiring of the above, one decision per sample
//! - [`runtime`]: Single-writer worker thread with lock-free snapshots
//! - [`config`]: Tunables and TOML loading

pub mod buffer;
pub mod config;
pub mod estimator;
pub mod forecast;
pub mod monitor;
pub mod noise;
pub mod runtime;

pub use config::{ConfigError, ForecastConfig, LookaheadNoise};
pub use estimator::{Covariance, FilterState};
pub use monitor::{Decision, HandoverMonitor, MonitorSnapshot, MonitorStats, Phase, SampleError};
pub use noise::NoiseModel;
pub use runtime::{ChannelSink, DecisionSink, MonitorRuntime, SubmitError};
