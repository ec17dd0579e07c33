//! End-to-end tests of the synchronous monitor: sample in, decision out.

use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use rsrp_forecast::config::LookaheadNoise;
use rsrp_forecast::{Decision, ForecastConfig, HandoverMonitor, Phase, SampleError};

fn deterministic() -> ForecastConfig {
    ForecastConfig {
        seed: Some(11),
        lookahead_noise: LookaheadNoise::Disabled,
        ..ForecastConfig::default()
    }
}

fn feed(monitor: &mut HandoverMonitor, values: impl IntoIterator<Item = f64>) -> Vec<Decision> {
    values
        .into_iter()
        .map(|v| monitor.on_measurement(v).unwrap())
        .collect()
}

// ─── Cold Start ─────────────────────────────────────────────────────────────

#[test]
fn cold_start_reports_initial_level_without_trigger() {
    let mut monitor = HandoverMonitor::new(deterministic()).unwrap();
    // Far below threshold, but the filter has not warmed up yet.
    let decisions = feed(&mut monitor, [-130.0; 9]);
    for d in &decisions {
        assert_eq!(d.phase, Phase::ColdStart);
        assert!(!d.trigger);
        assert_eq!(d.forecast_dbm, -90.0);
    }
    assert_eq!(monitor.stats().corrections, 0);

    let tenth = monitor.on_measurement(-130.0).unwrap();
    assert_eq!(tenth.phase, Phase::Tracking);
    assert!(tenth.trigger);
}

// ─── Steady Signal ──────────────────────────────────────────────────────────

#[test]
fn constant_signal_converges_without_trigger() {
    let mut monitor = HandoverMonitor::new(deterministic()).unwrap();
    let decisions = feed(&mut monitor, [-92.0; 25]);
    let last = decisions.last().unwrap();
    assert!((last.forecast_dbm - (-92.0)).abs() < 0.1, "{}", last.forecast_dbm);
    assert!(decisions.iter().all(|d| !d.trigger));
    assert_eq!(monitor.stats().triggers, 0);
}

#[test]
fn constant_weak_signal_triggers() {
    let mut monitor = HandoverMonitor::new(deterministic()).unwrap();
    let decisions = feed(&mut monitor, [-105.0; 15]);
    assert!(decisions[9..].iter().all(|d| d.trigger));
    assert_eq!(monitor.stats().triggers, 6);
}

#[test]
fn healthy_signal_with_lookahead_noise_stays_quiet() {
    let cfg = ForecastConfig {
        lookahead_noise: LookaheadNoise::Summed,
        ..deterministic()
    };
    let mut monitor = HandoverMonitor::new(cfg).unwrap();
    let decisions = feed(&mut monitor, [-80.0; 30]);
    assert!(decisions.iter().all(|d| !d.trigger));
}

/// Steady level plus Gaussian jitter, reproducible per seed.
fn jittered(level: f64, jitter_db: f64, len: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let u1 = 1.0 - rng.random::<f64>();
            let u2 = rng.random::<f64>();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            level + z * jitter_db
        })
        .collect()
}

#[test]
fn jittery_steady_signal_never_triggers_with_defaults() {
    let cfg = ForecastConfig {
        seed: Some(5),
        ..ForecastConfig::default()
    };
    assert_eq!(cfg.lookahead_noise, LookaheadNoise::Summed);
    let mut monitor = HandoverMonitor::new(cfg).unwrap();
    let decisions = feed(&mut monitor, jittered(-80.0, 0.5, 300, 5));

    let triggers = decisions.iter().filter(|d| d.trigger).count();
    assert_eq!(triggers, 0, "noise {:?}", monitor.noise());
    // Variances stay on the scale of the per-sample jitter.
    let noise = monitor.noise();
    assert!(noise.curvature < 5.0, "curvature variance {}", noise.curvature);
}

// ─── Trends ─────────────────────────────────────────────────────────────────

#[test]
fn linear_decline_is_extrapolated() {
    let mut monitor = HandoverMonitor::new(deterministic()).unwrap();
    let trace: Vec<f64> = (0..60).map(|k| -80.0 - k as f64).collect();
    let decisions = feed(&mut monitor, trace.iter().copied());

    for (d, &sample) in decisions.iter().zip(&trace).skip(12) {
        assert!(d.forecast_dbm < sample, "forecast {} not below {}", d.forecast_dbm, sample);
    }
    // 1 dB per 0.2 s, 1.2 s ahead
    for (d, &sample) in decisions.iter().zip(&trace).skip(30) {
        let linear = sample - 6.0;
        assert!(
            (d.forecast_dbm - linear).abs() < 3.0,
            "forecast {} vs linear {}",
            d.forecast_dbm,
            linear
        );
    }
    let rate = monitor.state().rate;
    assert!(rate < -3.5 && rate > -5.5, "rate {rate}");
}

#[test]
fn tunnel_fade_triggers_before_link_drops() {
    let mut monitor = HandoverMonitor::new(deterministic()).unwrap();
    let steady = std::iter::repeat(-85.0).take(20);
    let fade = (1..=20).map(|k| -85.0 - 2.0 * k as f64);
    let trace: Vec<f64> = steady.chain(fade).collect();
    let decisions = feed(&mut monitor, trace.iter().copied());

    assert!(decisions[..20].iter().all(|d| !d.trigger));
    let first = decisions
        .iter()
        .position(|d| d.trigger)
        .expect("fade never triggered");
    assert!(trace[first] > -100.0, "triggered only at {}", trace[first]);
}

// ─── Boundary ───────────────────────────────────────────────────────────────

/// Starting at the signal level, every innovation is zero and the forecast
/// equals the input exactly.
fn settled_on(level: f64) -> Decision {
    let cfg = ForecastConfig {
        initial_level_dbm: level,
        ..deterministic()
    };
    let mut monitor = HandoverMonitor::new(cfg).unwrap();
    *feed(&mut monitor, std::iter::repeat(level).take(15))
        .last()
        .unwrap()
}

#[test]
fn forecast_exactly_at_threshold_triggers() {
    let d = settled_on(-100.0);
    assert_eq!(d.phase, Phase::Tracking);
    assert_eq!(d.forecast_dbm, -100.0);
    assert!(d.trigger);
}

#[test]
fn forecast_just_above_threshold_does_not_trigger() {
    let d = settled_on(-99.5);
    assert_eq!(d.forecast_dbm, -99.5);
    assert!(!d.trigger);
}

#[test]
fn rejected_samples_leave_state_untouched() {
    let mut monitor = HandoverMonitor::new(deterministic()).unwrap();
    feed(&mut monitor, [-88.0; 12]);
    let before = monitor.snapshot();

    assert!(matches!(
        monitor.on_measurement(f64::INFINITY),
        Err(SampleError::NonFinite(_))
    ));
    assert!(matches!(
        monitor.on_measurement(-150.0),
        Err(SampleError::OutOfRange { .. })
    ));

    let after = monitor.snapshot();
    assert_eq!(after.state, before.state);
    assert_eq!(after.buffered, before.buffered);
    assert_eq!(after.stats.accepted, before.stats.accepted);
    assert_eq!(after.stats.rejected, 2);
}

#[test]
fn window_keeps_most_recent_samples() {
    let mut monitor = HandoverMonitor::new(deterministic()).unwrap();
    feed(&mut monitor, (0..25).map(|k| -70.0 - k as f64));
    let snap = monitor.snapshot();
    assert_eq!(snap.buffered, 20);
    assert_eq!(snap.stats.accepted, 25);
    assert_eq!(snap.last_decision.map(|d| d.sequence), Some(25));
}

#[test]
fn seeded_monitors_agree() {
    let cfg = ForecastConfig {
        seed: Some(99),
        lookahead_noise: LookaheadNoise::Summed,
        ..ForecastConfig::default()
    };
    let trace: Vec<f64> = (0..40).map(|k| -85.0 - 0.5 * k as f64).collect();
    let a = feed(&mut HandoverMonitor::new(cfg.clone()).unwrap(), trace.iter().copied());
    let b = feed(&mut HandoverMonitor::new(cfg).unwrap(), trace.iter().copied());
    assert_eq!(a, b);
}

// ─── Configuration ──────────────────────────────────────────────────────────

#[test]
fn toml_config_drives_the_monitor() {
    let cfg = ForecastConfig::from_toml_str(
        r#"
version = 1

[trigger]
threshold_dbm = -90.0
lookahead_noise = "disabled"
"#,
    )
    .unwrap();
    let mut monitor = HandoverMonitor::new(cfg).unwrap();
    let decisions = feed(&mut monitor, [-92.0; 12]);
    assert!(decisions[9..].iter().all(|d| d.trigger));
}
