//! Display debouncing for status areas.
//!
//! A status area never switches content faster than the dwell time. A raw
//! status change first hides the area, and after the dwell the newest raw
//! status is revealed. Changes that arrive while the area is hidden, or
//! while the last reveal is still younger than the dwell, are coalesced:
//! only the newest one is ever shown.
//!
//! [`DwellGate`] is the pure state machine; it takes the current time as an
//! argument and is tested without a runtime. [`DisplayStream`] drives one
//! gate from a raw status watch channel.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use wolweb_types::{ActionStatus, DisplayStatus};

use crate::guard::Dispose;

/// Default dwell time.
pub const DEFAULT_DWELL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatePhase {
    /// Showing the newest status.
    Steady,
    /// A change is waiting for the current content to age.
    Holding { until: Instant },
    /// Hidden; the newest status is revealed at `until`.
    Hiding { until: Instant },
}

/// Pure dwell debouncer for one status area.
#[derive(Debug, Clone)]
pub struct DwellGate {
    dwell: Duration,
    shown: ActionStatus,
    latest: ActionStatus,
    display: DisplayStatus,
    revealed_at: Option<Instant>,
    phase: GatePhase,
}

impl DwellGate {
    /// Create a gate showing `initial`.
    pub fn new(initial: ActionStatus, dwell: Duration) -> Self {
        Self {
            dwell,
            shown: initial.clone(),
            latest: initial.clone(),
            display: DisplayStatus::Visible(initial),
            revealed_at: None,
            phase: GatePhase::Steady,
        }
    }

    /// What the area shows now.
    pub fn display(&self) -> &DisplayStatus {
        &self.display
    }

    /// The newest raw status observed.
    pub fn latest(&self) -> &ActionStatus {
        &self.latest
    }

    /// When [`poll`](Self::poll) next has work to do.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            GatePhase::Steady => None,
            GatePhase::Holding { until } | GatePhase::Hiding { until } => Some(until),
        }
    }

    /// Feed a raw status. Returns the new display if it changed.
    pub fn observe(&mut self, status: ActionStatus, now: Instant) -> Option<DisplayStatus> {
        self.latest = status;
        if self.phase != GatePhase::Steady || self.latest == self.shown {
            return None;
        }

        match self.revealed_at {
            Some(at) if now < at + self.dwell => {
                self.phase = GatePhase::Holding {
                    until: at + self.dwell,
                };
                None
            }
            _ => Some(self.hide(now)),
        }
    }

    /// Advance timers. Returns the new display if it changed.
    pub fn poll(&mut self, now: Instant) -> Option<DisplayStatus> {
        match self.phase {
            GatePhase::Holding { until } if now >= until => {
                if self.latest == self.shown {
                    self.phase = GatePhase::Steady;
                    None
                } else {
                    Some(self.hide(now))
                }
            }
            GatePhase::Hiding { until } if now >= until => {
                self.shown = self.latest.clone();
                self.display = DisplayStatus::Visible(self.shown.clone());
                self.revealed_at = Some(now);
                self.phase = GatePhase::Steady;
                Some(self.display.clone())
            }
            _ => None,
        }
    }

    fn hide(&mut self, now: Instant) -> DisplayStatus {
        self.display = DisplayStatus::Hidden;
        self.phase = GatePhase::Hiding {
            until: now + self.dwell,
        };
        DisplayStatus::Hidden
    }
}

/// Debounced view of one raw status channel.
///
/// The driver task stops when the stream is disposed or dropped.
#[derive(Debug)]
pub struct DisplayStream {
    display: watch::Receiver<DisplayStatus>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DisplayStream {
    /// Start debouncing `raw`. Must be called from within a tokio runtime.
    pub fn spawn(mut raw: watch::Receiver<ActionStatus>, dwell: Duration) -> Self {
        let initial = raw.borrow_and_update().clone();
        let mut gate = DwellGate::new(initial, dwell);
        let (tx, display) = watch::channel(gate.display().clone());
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut raw_open = true;
            loop {
                let deadline = gate.deadline();
                if !raw_open && deadline.is_none() {
                    break;
                }

                let changed = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        gate.poll(Instant::now())
                    }
                    result = raw.changed(), if raw_open => match result {
                        Ok(()) => {
                            let status = raw.borrow_and_update().clone();
                            gate.observe(status, Instant::now())
                        }
                        Err(_) => {
                            raw_open = false;
                            None
                        }
                    },
                };

                if let Some(next) = changed {
                    trace!("display -> {:?}", next);
                    tx.send_replace(next);
                }
            }
        });

        Self {
            display,
            token,
            handle,
        }
    }

    /// What the area shows now.
    pub fn current(&self) -> DisplayStatus {
        self.display.borrow().clone()
    }

    /// Watch display changes.
    pub fn subscribe(&self) -> watch::Receiver<DisplayStatus> {
        self.display.clone()
    }

    /// Whether the driver task is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Dispose for DisplayStream {
    fn dispose(&self) {
        self.token.cancel();
    }
}

impl Drop for DisplayStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
