//! # rsrp-replay
//!
//! Feeds an RSRP trace through the handover forecaster and prints one
//! decision per accepted sample, followed by a summary.
//!
//! ## Usage
//!
//! ```bash
//! # Recorded trace, one dBm value (or `index,value`) per line
//! rsrp-replay --input drive.csv
//!
//! # From stdin, with a tuned configuration, as JSON lines
//! cat drive.csv | rsrp-replay --input - --config forecast.toml --json
//!
//! # Seeded synthetic tunnel entry
//! rsrp-replay --synthetic --seed 7
//! ```

mod trace;

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use rsrp_forecast::{
    ChannelSink, Decision, ForecastConfig, MonitorRuntime, MonitorSnapshot, SubmitError,
};
use serde::Serialize;

use crate::trace::{SyntheticTrace, parse_trace};

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(io::stderr)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            ForecastConfig::from_toml_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => ForecastConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    // ── Trace ───────────────────────────────────────────────────
    let samples = match &args.source {
        Source::Synthetic => SyntheticTrace {
            seed: args.seed.unwrap_or(1),
            dt_secs: config.dt_secs,
            ..SyntheticTrace::default()
        }
        .generate(),
        Source::Stdin => parse_trace(io::stdin().lock())?,
        Source::File(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open trace {}", path.display()))?;
            parse_trace(BufReader::new(file))?
        }
    };

    tracing::info!(
        source = ?args.source,
        samples = samples.len(),
        threshold_dbm = config.threshold_dbm,
        horizon_steps = config.horizon_steps(),
        lookahead_noise = ?config.lookahead_noise,
        "rsrp-replay starting"
    );

    // ── Replay ──────────────────────────────────────────────────
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = replay(&samples, config, args.json, &mut out)?;
    out.flush()?;

    tracing::info!(
        accepted = summary.snapshot.stats.accepted,
        rejected = summary.rejected,
        triggers = summary.snapshot.stats.triggers,
        first_trigger = ?summary.first_trigger,
        noise_reestimations = summary.snapshot.stats.noise_reestimations,
        level_dbm = summary.snapshot.state.level,
        rate_dbm_per_s = summary.snapshot.state.rate,
        "rsrp-replay finished"
    );

    Ok(())
}

// ─── Replay ─────────────────────────────────────────────────────────────────

/// One output line: the sample that produced a decision, and the decision.
#[derive(Debug, Serialize)]
struct ReplayRecord {
    index: usize,
    sample_dbm: f64,
    #[serde(flatten)]
    decision: Decision,
}

#[derive(Debug)]
struct ReplaySummary {
    decisions: usize,
    rejected: u64,
    /// Trace index of the first triggering sample.
    first_trigger: Option<usize>,
    snapshot: MonitorSnapshot,
}

fn replay(
    samples: &[f64],
    config: ForecastConfig,
    json: bool,
    out: &mut impl Write,
) -> anyhow::Result<ReplaySummary> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut runtime = MonitorRuntime::spawn(config, ChannelSink(tx))?;

    // Trace index of each sample the runtime accepted, in sequence order.
    let mut accepted = Vec::with_capacity(samples.len());
    for (index, &value) in samples.iter().enumerate() {
        loop {
            match runtime.on_measurement(value) {
                Ok(()) => {
                    accepted.push(index);
                    break;
                }
                Err(SubmitError::Full) => std::thread::sleep(Duration::from_millis(1)),
                Err(SubmitError::Rejected(_)) => break,
                Err(e @ SubmitError::Disconnected) => return Err(e.into()),
            }
        }
    }
    runtime.shutdown();

    let mut decisions = 0;
    let mut first_trigger = None;
    for decision in rx.try_iter() {
        let index = decision
            .sequence
            .checked_sub(1)
            .and_then(|seq| usize::try_from(seq).ok())
            .and_then(|seq| accepted.get(seq).copied())
            .context("decision for an unknown sample")?;
        if decision.trigger && first_trigger.is_none() {
            first_trigger = Some(index);
        }
        let record = ReplayRecord {
            index,
            sample_dbm: samples[index],
            decision,
        };
        if json {
            serde_json::to_writer(&mut *out, &record)?;
            writeln!(out)?;
        } else {
            print_record(out, &record)?;
        }
        decisions += 1;
    }

    let snapshot = MonitorSnapshot::clone(&runtime.snapshot());
    let summary = ReplaySummary {
        decisions,
        rejected: runtime.rejected(),
        first_trigger,
        snapshot,
    };
    if !json {
        print_summary(out, &summary)?;
    }
    Ok(summary)
}

fn print_record(out: &mut impl Write, r: &ReplayRecord) -> io::Result<()> {
    writeln!(
        out,
        "{:>6}  {:>8.2} dBm  -> {:>8.2} dBm  {:<10}{}",
        r.index,
        r.sample_dbm,
        r.decision.forecast_dbm,
        format!("{:?}", r.decision.phase),
        if r.decision.trigger { "  HANDOVER" } else { "" }
    )
}

fn print_summary(out: &mut impl Write, s: &ReplaySummary) -> io::Result<()> {
    let stats = &s.snapshot.stats;
    writeln!(out)?;
    writeln!(out, "decisions:           {}", s.decisions)?;
    writeln!(out, "rejected samples:    {}", s.rejected)?;
    writeln!(out, "triggers:            {}", stats.triggers)?;
    match s.first_trigger {
        Some(i) => writeln!(out, "first trigger:       sample {i}")?,
        None => writeln!(out, "first trigger:       none")?,
    }
    writeln!(out, "noise re-estimates:  {}", stats.noise_reestimations)?;
    writeln!(
        out,
        "final state:         {:.2} dBm, {:.2} dB/s, {:.2} dB/s²",
        s.snapshot.state.level, s.snapshot.state.rate, s.snapshot.state.curvature
    )
}

// ─── CLI Parsing ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Stdin,
    File(PathBuf),
    Synthetic,
}

#[derive(Debug)]
struct Args {
    source: Source,
    config: Option<PathBuf>,
    seed: Option<u64>,
    json: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    parse_args_from(&args)
}

fn parse_args_from(args: &[String]) -> anyhow::Result<Args> {
    let mut input = None;
    let mut synthetic = false;
    let mut config = None;
    let mut seed = None;
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--input requires a value"))?;
                input = Some(val.clone());
            }
            "--config" | "-c" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--config requires a value"))?;
                config = Some(PathBuf::from(val));
            }
            "--seed" | "-s" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--seed requires a value"))?;
                seed = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid seed '{}': {}", val, e))?,
                );
            }
            "--synthetic" => synthetic = true,
            "--json" => json = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nRun with --help for usage.");
            }
        }
        i += 1;
    }

    let source = match (input, synthetic) {
        (Some(_), true) => anyhow::bail!("--input and --synthetic are mutually exclusive"),
        (None, true) => Source::Synthetic,
        (Some(path), false) if path != "-" => Source::File(PathBuf::from(path)),
        _ => Source::Stdin,
    };

    Ok(Args {
        source,
        config,
        seed,
        json,
    })
}

fn print_help() {
    eprintln!(
        r#"rsrp-replay: replay RSRP traces through the handover forecaster

USAGE:
  rsrp-replay [--input <FILE|->] [OPTIONS]
  rsrp-replay --synthetic [OPTIONS]

OPTIONS:
  --input, -i <file>      Trace file, one sample per line or index,value
                           ('-' or omitted reads stdin; '#' starts a comment)
  --synthetic             Generate a steady-then-tunnel-fade trace instead
  --config, -c <file>     TOML forecaster configuration
  --seed, -s <n>          Seed for look-ahead noise and the synthetic trace
  --json                  Emit decisions as JSON lines, no summary
  --help, -h              Show this help

ENVIRONMENT:
  RUST_LOG                Log filter (default: info), logs go to stderr"#
    );
}
