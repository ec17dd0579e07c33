//! RSRP trace sources: recorded text files and a seeded synthetic drive.

use std::io::BufRead;

use anyhow::Context;
use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Reads one sample per line.
///
/// Accepts a bare value (`-87.5`) or `index,value` CSV; only the last field
/// is used. Blank lines and `#` comments are skipped. Values that parse but
/// are not plausible readings (NaN, sentinels) are passed through so the
/// monitor can reject them.
pub fn parse_trace(reader: impl BufRead) -> anyhow::Result<Vec<f64>> {
    let mut samples = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", lineno + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let field = line.rsplit(',').next().unwrap_or(line).trim();
        let value: f64 = field
            .parse()
            .map_err(|e| anyhow::anyhow!("line {}: invalid sample '{}': {}", lineno + 1, field, e))?;
        samples.push(value);
    }
    Ok(samples)
}

/// Steady cruise followed by a tunnel-entry fade, with Gaussian jitter.
#[derive(Debug, Clone)]
pub struct SyntheticTrace {
    pub seed: u64,
    pub dt_secs: f64,
    pub steady_secs: f64,
    pub steady_dbm: f64,
    pub fade_secs: f64,
    /// Fade slope in dB/s (negative).
    pub fade_rate: f64,
    /// Jitter standard deviation in dB.
    pub jitter_db: f64,
    /// Readings never go below the receiver floor.
    pub floor_dbm: f64,
}

impl Default for SyntheticTrace {
    fn default() -> Self {
        Self {
            seed: 1,
            dt_secs: 0.2,
            steady_secs: 8.0,
            steady_dbm: -82.0,
            fade_secs: 4.0,
            fade_rate: -12.0,
            jitter_db: 0.2,
            floor_dbm: -140.0,
        }
    }
}

impl SyntheticTrace {
    pub fn steady_len(&self) -> usize {
        (self.steady_secs / self.dt_secs).round() as usize
    }

    pub fn fade_len(&self) -> usize {
        (self.fade_secs / self.dt_secs).round() as usize
    }

    pub fn generate(&self) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let steady = self.steady_len();
        let total = steady + self.fade_len();

        (0..total)
            .map(|i| {
                let trend = if i < steady {
                    self.steady_dbm
                } else {
                    let t = (i + 1 - steady) as f64 * self.dt_secs;
                    self.steady_dbm + self.fade_rate * t
                };
                (trend + gaussian(&mut rng) * self.jitter_db).max(self.floor_dbm)
            })
            .collect()
    }
}

/// Box-Muller standard normal.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_csv_lines() {
        let input = "# drive test 2024-03-02\n-85.5\n\n1,-86.0\n 2 , -87.25 \n";
        let samples = parse_trace(input.as_bytes()).unwrap();
        assert_eq!(samples, vec![-85.5, -86.0, -87.25]);
    }

    #[test]
    fn passes_through_sentinels_for_rejection() {
        let samples = parse_trace("2147483647\nNaN\n".as_bytes()).unwrap();
        assert_eq!(samples[0], 2147483647.0);
        assert!(samples[1].is_nan());
    }

    #[test]
    fn reports_line_of_bad_sample() {
        let err = parse_trace("-80\n-81\noops\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn synthetic_is_deterministic_for_seed() {
        let cfg = SyntheticTrace::default();
        assert_eq!(cfg.generate(), cfg.generate());
        let other = SyntheticTrace { seed: 2, ..cfg.clone() };
        assert_ne!(cfg.generate(), other.generate());
    }

    #[test]
    fn synthetic_shape() {
        let cfg = SyntheticTrace::default();
        let trace = cfg.generate();
        assert_eq!(trace.len(), 60);

        let steady_mean = trace[..40].iter().sum::<f64>() / 40.0;
        assert!((steady_mean - (-82.0)).abs() < 0.5, "{steady_mean}");
        // 4 s at -12 dB/s ends near -130
        assert!(trace[59] < -125.0 && trace[59] >= -140.0);
        assert!(trace.iter().all(|v| *v >= cfg.floor_dbm));
    }

    #[test]
    fn fade_is_clamped_at_floor() {
        let cfg = SyntheticTrace {
            fade_rate: -100.0,
            jitter_db: 0.0,
            ..SyntheticTrace::default()
        };
        let trace = cfg.generate();
        assert_eq!(*trace.last().unwrap(), -140.0);
    }
}
