//! Liveness poller: tracks whether the analysis server is reachable.
//!
//! Each cycle sets the status to `Checking`, probes the gateway, then writes
//! the outcome. Cycles run on a fixed interval and on demand via `recheck()`.
//! Overlapping cycles are allowed; the status always reflects whichever probe
//! completed last.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::gateway::Gateway;
use crate::lock_unpoisoned;

/// Reachability of the analysis server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    /// Probe in flight
    #[default]
    Checking,
    Connected,
    Disconnected,
}

impl LivenessStatus {
    pub fn from_probe(up: bool) -> Self {
        if up {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Checking => "Checking...",
            Self::Connected => "API Connected",
            Self::Disconnected => "API Offline",
        }
    }
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Shortest schedule the poller will run on.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Shared {
    status: watch::Sender<LivenessStatus>,
    completed: AtomicU64,
    recheck: Notify,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owned polling task with an explicit `start()`/`stop()` lifecycle.
pub struct LivenessPoller {
    gateway: Arc<dyn Gateway>,
    interval: Duration,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl LivenessPoller {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(gateway: Arc<dyn Gateway>, interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                requested_ms = interval.as_millis(),
                min_ms = MIN_POLL_INTERVAL.as_millis(),
                "Poll interval too short, clamping"
            );
        }
        let interval = interval.max(MIN_POLL_INTERVAL);
        let (status, _) = watch::channel(LivenessStatus::Checking);
        Self {
            gateway,
            interval,
            shared: Arc::new(Shared {
                status,
                completed: AtomicU64::new(0),
                recheck: Notify::new(),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn status(&self) -> LivenessStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LivenessStatus> {
        self.shared.status.subscribe()
    }

    /// Number of probes whose outcome has been written.
    pub fn completed_cycles(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        lock_unpoisoned(&self.running).is_some()
    }

    /// Start polling. The first cycle runs immediately. No-op if already running.
    pub fn start(&self) {
        let mut running = lock_unpoisoned(&self.running);
        if running.is_some() {
            tracing::debug!("Liveness poller already running");
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.gateway),
            Arc::clone(&self.shared),
            self.interval,
            cancel.clone(),
        ));

        tracing::debug!(interval_ms = self.interval.as_millis(), "Liveness poller started");
        *running = Some(Running { cancel, task });
    }

    /// Request an immediate cycle in addition to the timed ones.
    pub fn recheck(&self) {
        if !self.is_running() {
            tracing::debug!("Ignoring recheck: liveness poller not running");
            return;
        }
        self.shared.recheck.notify_one();
    }

    /// Cancel the schedule and abort in-flight cycles. Idempotent.
    pub fn stop(&self) {
        if let Some(running) = lock_unpoisoned(&self.running).take() {
            running.cancel.cancel();
            running.task.abort();
            tracing::debug!("Liveness poller stopped");
        }
    }
}

impl Drop for LivenessPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    gateway: Arc<dyn Gateway>,
    shared: Arc<Shared>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Dropping the set aborts every cycle still in flight.
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                cycles.spawn(run_cycle(Arc::clone(&gateway), Arc::clone(&shared), cancel.clone()));
            }
            _ = shared.recheck.notified() => {
                tracing::debug!("Manual liveness recheck");
                cycles.spawn(run_cycle(Arc::clone(&gateway), Arc::clone(&shared), cancel.clone()));
            }
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    tracing::error!(error = %e, "Liveness cycle panicked");
                }
            }
        }
    }

    cycles.abort_all();
}

async fn run_cycle(gateway: Arc<dyn Gateway>, shared: Arc<Shared>, cancel: CancellationToken) {
    shared.status.send_replace(LivenessStatus::Checking);

    let up = gateway.probe_liveness().await;
    if cancel.is_cancelled() {
        return;
    }

    let status = LivenessStatus::from_probe(up);
    shared.status.send_replace(status);
    shared.completed.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(?status, "Liveness cycle completed");
}
