use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, info, warn};

use crate::config::ForecastConfig;
use crate::monitor::{Decision, HandoverMonitor, MonitorSnapshot, SampleError};

/// Default depth of the inbound queue between the radio thread and the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Error returned when a sample cannot be handed to the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SubmitError {
    /// Malformed sample, discarded at the boundary.
    #[error(transparent)]
    Rejected(#[from] SampleError),
    #[error("measurement queue is full")]
    Full,
    #[error("monitor worker has shut down")]
    Disconnected,
}

/// Consumer of handover decisions, called on the worker thread once per
/// processed sample.
pub trait DecisionSink: Send + 'static {
    fn on_decision(&mut self, decision: &Decision);
}

/// Forwards decisions into a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub Sender<Decision>);

impl DecisionSink for ChannelSink {
    fn on_decision(&mut self, decision: &Decision) {
        // A hung-up or saturated consumer must not stall estimation.
        let _ = self.0.try_send(*decision);
    }
}

impl<F> DecisionSink for F
where
    F: FnMut(&Decision) + Send + 'static,
{
    fn on_decision(&mut self, decision: &Decision) {
        self(decision)
    }
}

enum Message {
    Measurement(f64),
    SetActive(bool),
    Shutdown,
}

/// Thread-safe handle to the monitor worker.
///
/// A dedicated thread owns the [`HandoverMonitor`] and processes samples
/// strictly in arrival order. Producers enqueue through a bounded
/// crossbeam channel and never block on the estimator. After every sample
/// the worker publishes a fresh immutable [`MonitorSnapshot`]; readers load
/// it without locking.
///
/// Dropping the runtime shuts the worker down and joins it.
pub struct MonitorRuntime {
    tx: Sender<Message>,
    config: ForecastConfig,
    snapshot: Arc<ArcSwap<MonitorSnapshot>>,
    rejected: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MonitorRuntime {
    pub fn spawn(config: ForecastConfig, sink: impl DecisionSink) -> anyhow::Result<Self> {
        Self::with_capacity(config, sink, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        config: ForecastConfig,
        sink: impl DecisionSink,
        queue_capacity: usize,
    ) -> anyhow::Result<Self> {
        let monitor = HandoverMonitor::new(config.clone())?;
        let snapshot = Arc::new(ArcSwap::from_pointee(monitor.snapshot()));
        let (tx, rx) = bounded(queue_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_snapshot = snapshot.clone();
        let handle = thread::Builder::new()
            .name("rsrp-forecast".into())
            .spawn(move || runtime_worker(monitor, rx, sink, worker_snapshot))?;

        Ok(Self {
            tx,
            config,
            snapshot,
            rejected: Arc::new(AtomicU64::new(0)),
            shutdown,
            handle: Some(handle),
        })
    }

    /// Inbound notification for one RSRP sample. Returns immediately.
    ///
    /// Non-finite or out-of-range samples are rejected here, before they
    /// reach the worker.
    pub fn on_measurement(&self, value: f64) -> Result<(), SubmitError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(SubmitError::Disconnected);
        }
        if let Err(e) = HandoverMonitor::validate_sample(&self.config, value) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "discarding RSRP sample");
            return Err(e.into());
        }
        self.tx
            .try_send(Message::Measurement(value))
            .map_err(|e| match e {
                TrySendError::Full(_) => SubmitError::Full,
                TrySendError::Disconnected(_) => SubmitError::Disconnected,
            })
    }

    /// Gates monitoring on or off. While inactive, queued and new samples
    /// are dropped; filter state is kept.
    pub fn set_active(&self, active: bool) -> anyhow::Result<()> {
        self.tx
            .send(Message::SetActive(active))
            .map_err(|e| anyhow::anyhow!("Failed to send activation change: {}", e))
    }

    /// Latest published snapshot, consistent as a whole.
    ///
    /// `stats.rejected` includes samples refused at this boundary, which
    /// never reach the worker.
    pub fn snapshot(&self) -> Arc<MonitorSnapshot> {
        let published = self.snapshot.load_full();
        let boundary = self.rejected();
        if boundary == 0 {
            return published;
        }
        let mut snapshot = MonitorSnapshot::clone(&published);
        snapshot.stats.rejected += boundary;
        Arc::new(snapshot)
    }

    pub fn latest_decision(&self) -> Option<Decision> {
        self.snapshot.load().last_decision
    }

    /// Samples refused at the inbound boundary.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Stops the worker after it drains what is already queued. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MonitorRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn runtime_worker(
    mut monitor: HandoverMonitor,
    rx: Receiver<Message>,
    mut sink: impl DecisionSink,
    snapshot: Arc<ArcSwap<MonitorSnapshot>>,
) {
    info!(
        horizon_steps = monitor.config().horizon_steps(),
        threshold_dbm = monitor.config().threshold_dbm,
        "monitor worker started"
    );
    let mut active = true;
    let mut dropped: u64 = 0;

    while let Ok(msg) = rx.recv() {
        match msg {
            Message::Measurement(value) => {
                if !active {
                    dropped += 1;
                    continue;
                }
                match monitor.on_measurement(value) {
                    Ok(decision) => {
                        snapshot.store(Arc::new(monitor.snapshot()));
                        sink.on_decision(&decision);
                    }
                    Err(e) => debug!(error = %e, "sample refused by monitor"),
                }
            }
            Message::SetActive(next) => {
                if next != active {
                    info!(active = next, "monitoring {}", if next { "resumed" } else { "paused" });
                }
                active = next;
            }
            Message::Shutdown => break,
        }
    }

    info!(
        accepted = monitor.stats().accepted,
        triggers = monitor.stats().triggers,
        dropped_while_paused = dropped,
        "monitor worker stopped"
    );
}
