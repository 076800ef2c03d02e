//! Timeout monitor (§4.5).
//!
//! Grounded on the Design Notes' (§9) "task + join" mapping for the
//! source's `setInterval`-based timer: a `tokio::time::interval` loop
//! polling at a fixed cadence, selected against a `tokio::sync::watch`
//! stop signal so manual stop and timeout share one cancellation
//! mechanism, generalized from the `tokio::sync::{mpsc, RwLock}`
//! event-forwarding idiom in the teacher's orchestrator services.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::interval;

const POLL_CADENCE: Duration = Duration::from_millis(500);

/// Why the monitor fired, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Iteration,
    Inactivity,
}

/// Bounds for one wave. `None` disables that bound.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutBounds {
    pub iteration: Option<Duration>,
    pub inactivity: Option<Duration>,
}

impl TimeoutBounds {
    pub fn from_secs(iteration_sec: Option<u64>, inactivity_sec: Option<u64>) -> Self {
        Self {
            iteration: iteration_sec.filter(|s| *s > 0).map(Duration::from_secs),
            inactivity: inactivity_sec.filter(|s| *s > 0).map(Duration::from_secs),
        }
    }
}

/// Polls a set of per-worker idle durations against the configured bounds
/// and signals `fired` the first time either one trips.
pub struct TimeoutMonitor {
    bounds: TimeoutBounds,
    started_at: Instant,
    fired_tx: watch::Sender<Option<TimeoutKind>>,
}

impl TimeoutMonitor {
    pub fn new(bounds: TimeoutBounds) -> Self {
        let (fired_tx, _rx) = watch::channel(None);
        Self {
            bounds,
            started_at: Instant::now(),
            fired_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TimeoutKind>> {
        self.fired_tx.subscribe()
    }

    /// Runs until it fires or `stop` resolves. `idle_probe` returns the
    /// longest any still-running worker has gone without output.
    pub async fn run<F>(&self, mut stop: watch::Receiver<bool>, idle_probe: F)
    where
        F: Fn() -> Option<Duration>,
    {
        let mut ticker = interval(POLL_CADENCE);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(bound) = self.bounds.iteration {
                        if self.started_at.elapsed() >= bound {
                            let _ = self.fired_tx.send(Some(TimeoutKind::Iteration));
                            return;
                        }
                    }
                    if let Some(bound) = self.bounds.inactivity {
                        if let Some(idle) = idle_probe() {
                            if idle >= bound {
                                let _ = self.fired_tx.send(Some(TimeoutKind::Inactivity));
                                return;
                            }
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
