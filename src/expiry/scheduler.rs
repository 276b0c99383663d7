//! Expiry processing loop
//!
//! One long-lived task consumes two intakes: fired expiries and pause
//! requests. It is an explicit two-state machine:
//!
//! - `Running`: takes whichever intake is ready first (no priority).
//! - `PausedUntil(t)`: takes only pause requests; fired expiries stay queued
//!   and are processed once `t` passes.
//!
//! A pause request while paused extends the window to the later deadline.

use crate::metrics::ControllerMetrics;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::info;

/// Deadline used when `now + pause` is not representable (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A timer fired for `ip`; `token` identifies which registry entry armed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub ip: String,
    pub token: u64,
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    PausedUntil(Instant),
}

/// Deletion path invoked for every processed expiry
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    async fn on_expired(&self, expired: Expired);
}

/// Intake side of the scheduler, cloned into the registry and the dispatcher
#[derive(Debug, Clone)]
pub struct ExpiryControl {
    expired_tx: mpsc::UnboundedSender<Expired>,
    pause_tx: mpsc::UnboundedSender<Duration>,
    paused: Arc<AtomicBool>,
}

impl ExpiryControl {
    pub(crate) fn expired_sender(&self) -> mpsc::UnboundedSender<Expired> {
        self.expired_tx.clone()
    }

    /// Suspend expiry processing for `duration`. Returns false if the
    /// scheduler is no longer running.
    pub fn pause(&self, duration: Duration) -> bool {
        self.pause_tx.send(duration).is_ok()
    }

    /// Whether the scheduler is currently inside a pause window
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// The expiry-processing loop
pub struct ExpiryScheduler {
    expired_rx: mpsc::UnboundedReceiver<Expired>,
    pause_rx: mpsc::UnboundedReceiver<Duration>,
    state: SchedulerState,
    paused: Arc<AtomicBool>,
    metrics: ControllerMetrics,
}

impl ExpiryScheduler {
    /// Create the scheduler and its intake handle
    pub fn new(metrics: ControllerMetrics) -> (Self, ExpiryControl) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let (pause_tx, pause_rx) = mpsc::unbounded_channel();
        let paused = Arc::new(AtomicBool::new(false));

        let scheduler = Self {
            expired_rx,
            pause_rx,
            state: SchedulerState::Running,
            paused: Arc::clone(&paused),
            metrics,
        };
        let control = ExpiryControl {
            expired_tx,
            pause_tx,
            paused,
        };
        (scheduler, control)
    }

    /// Current state
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Process expiries until every [`ExpiryControl`] is dropped
    pub async fn run<H>(mut self, handler: Arc<H>)
    where
        H: ExpiryHandler + ?Sized,
    {
        info!("Expiry scheduler started");

        loop {
            match self.state {
                SchedulerState::Running => {
                    tokio::select! {
                        expired = self.expired_rx.recv() => match expired {
                            Some(expired) => handler.on_expired(expired).await,
                            None => break,
                        },
                        pause = self.pause_rx.recv() => match pause {
                            Some(duration) => self.pause_for(duration),
                            None => break,
                        },
                    }
                }
                SchedulerState::PausedUntil(until) => {
                    tokio::select! {
                        _ = time::sleep_until(until) => self.resume(),
                        pause = self.pause_rx.recv() => match pause {
                            Some(duration) => self.pause_for(duration),
                            None => break,
                        },
                    }
                }
            }
        }

        info!("Expiry scheduler stopped");
    }

    fn pause_for(&mut self, duration: Duration) {
        let now = Instant::now();
        let requested = now
            .checked_add(duration)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let until = match self.state {
            SchedulerState::PausedUntil(current) if current > requested => current,
            _ => requested,
        };

        self.state = SchedulerState::PausedUntil(until);
        self.paused.store(true, Ordering::SeqCst);
        self.metrics.set_expiry_paused(true);
        info!(
            pause_secs = duration.as_secs(),
            remaining_secs = until.saturating_duration_since(Instant::now()).as_secs(),
            "Expiry processing paused"
        );
    }

    fn resume(&mut self) {
        self.state = SchedulerState::Running;
        self.paused.store(false, Ordering::SeqCst);
        self.metrics.set_expiry_paused(false);
        info!(queued = self.expired_rx.len(), "Expiry processing resumed");
    }

    #[cfg(test)]
    pub(crate) async fn next_expired(&mut self) -> Option<Expired> {
        self.expired_rx.recv().await
    }
}
