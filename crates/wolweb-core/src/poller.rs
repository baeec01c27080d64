//! Bounded reachability polling.
//!
//! [`BoundedPoller`] drives the ping pair of one device. A session issues a
//! probe immediately, then keeps probing at a fixed interval until a probe
//! reports the device reachable or the budget runs out. On timeout the pair
//! is forced to `Failed(TimedOut)`.
//!
//! There is at most one live session per poller. Beginning a new session
//! cancels the previous one, including its in-flight probe. A probe is only
//! scheduled if it would start inside the budget; a probe started just
//! before the deadline may still be answered after it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wolweb_types::{ActionStatus, DeviceAddress, FailureReason};

use crate::action::{ActionMachine, Completion, Ticket};
use crate::error::{Error, Result};
use crate::events::{ActionEvent, EventDispatcher, PollEnd};
use crate::guard::Dispose;

/// Timing of a poll session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between the end of one probe and the start of the next.
    pub interval: Duration,
    /// Time after which no further probe is scheduled.
    pub budget: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            budget: Duration::from_secs(5),
        }
    }
}

impl PollOptions {
    /// Create options with defaults (3 s interval, 5 s budget).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interval between probes.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the overall budget.
    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Whether a probe scheduled `interval` from now would start inside the
    /// budget, given that `elapsed` has passed since the session began.
    pub fn allows_another(&self, elapsed: Duration) -> bool {
        elapsed.saturating_add(self.interval) < self.budget
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::invalid_config("poll interval must be > 0"));
        }
        if self.budget.is_zero() {
            return Err(Error::invalid_config("poll budget must be > 0"));
        }
        Ok(())
    }
}

/// A live poll session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSession {
    /// Device being probed.
    pub target: DeviceAddress,
    /// When the session began.
    pub started_at: Instant,
    /// Probes issued so far, counting the one in flight.
    pub attempt: u32,
}

impl PollSession {
    /// Time since the session began.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Where the poller is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PollPhase {
    /// No session has run yet.
    #[default]
    Idle,
    /// A session is live.
    Active(PollSession),
    /// The last session ended.
    Finished {
        /// How it ended.
        end: PollEnd,
        /// Probes it issued.
        attempts: u32,
    },
}

impl PollPhase {
    /// Whether a session is live.
    pub fn is_active(&self) -> bool {
        matches!(self, PollPhase::Active(_))
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<&PollSession> {
        match self {
            PollPhase::Active(session) => Some(session),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct LiveSession {
    id: u64,
    token: CancellationToken,
}

struct Shared {
    machine: ActionMachine,
    options: PollOptions,
    /// The live session. Every phase write checks it under this lock.
    live: Mutex<Option<LiveSession>>,
    phase: watch::Sender<PollPhase>,
    next_id: AtomicU64,
    events: Option<EventDispatcher>,
}

impl Shared {
    fn lock_live(&self) -> MutexGuard<'_, Option<LiveSession>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target(&self) -> &DeviceAddress {
        self.machine.target()
    }

    fn attempts(&self) -> u32 {
        self.phase
            .borrow()
            .session()
            .map(|session| session.attempt)
            .unwrap_or(0)
    }

    fn emit(&self, event: ActionEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    /// Issue the next probe of session `id`, if it is still live.
    fn next_probe(&self, id: u64, session: &mut PollSession) -> Option<Ticket> {
        let live = self.lock_live();
        match live.as_ref() {
            Some(current) if current.id == id && !current.token.is_cancelled() => {}
            _ => return None,
        }
        session.attempt += 1;
        let ticket = self.machine.issue();
        self.phase.send_replace(PollPhase::Active(session.clone()));
        Some(ticket)
    }

    /// End session `id` if it is still live, optionally writing a final
    /// status for `ticket`.
    fn finish(
        &self,
        id: u64,
        end: PollEnd,
        attempts: u32,
        conclusion: Option<(&Ticket, ActionStatus)>,
    ) -> bool {
        {
            let mut live = self.lock_live();
            if live.as_ref().map(|current| current.id) != Some(id) {
                return false;
            }
            *live = None;
            if let Some((ticket, status)) = conclusion {
                self.machine.conclude(ticket, status);
            }
            self.phase.send_replace(PollPhase::Finished { end, attempts });
        }

        self.emit(ActionEvent::PollFinished {
            device: self.target().clone(),
            end,
            attempts,
        });
        true
    }

    /// Cancel the live session, or only session `id` when given.
    fn cancel(&self, id: Option<u64>) -> bool {
        let attempts = {
            let mut live = self.lock_live();
            let matches = match (live.as_ref(), id) {
                (Some(current), Some(id)) => current.id == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                return false;
            }
            if let Some(current) = live.take() {
                current.token.cancel();
            }
            self.machine.cancel();
            let attempts = self.attempts();
            self.phase.send_replace(PollPhase::Finished {
                end: PollEnd::Cancelled,
                attempts,
            });
            attempts
        };

        debug!("Ping {}: poll cancelled after {} probe(s)", self.target(), attempts);
        self.emit(ActionEvent::PollFinished {
            device: self.target().clone(),
            end: PollEnd::Cancelled,
            attempts,
        });
        true
    }
}

/// Probes one device until it answers or the budget runs out.
///
/// Cloning gives another handle to the same poller.
#[derive(Clone)]
pub struct BoundedPoller {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BoundedPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPoller")
            .field("target", self.shared.target())
            .field("options", &self.shared.options)
            .field("phase", &*self.shared.phase.borrow())
            .finish()
    }
}

impl BoundedPoller {
    /// Create a poller driving `machine`, which must be a ping pair.
    ///
    /// Fails with [`Error::InvalidConfig`] if `options` do not validate.
    pub fn new(machine: ActionMachine, options: PollOptions) -> Result<Self> {
        Self::with_events(machine, options, None)
    }

    /// Create a poller that also reports session lifecycle events.
    pub fn with_events(
        machine: ActionMachine,
        options: PollOptions,
        events: Option<EventDispatcher>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self::from_validated(machine, options, events))
    }

    /// Create a poller from options the caller has already validated.
    pub(crate) fn from_validated(
        machine: ActionMachine,
        options: PollOptions,
        events: Option<EventDispatcher>,
    ) -> Self {
        let (phase, _) = watch::channel(PollPhase::Idle);
        Self {
            shared: Arc::new(Shared {
                machine,
                options,
                live: Mutex::new(None),
                phase,
                next_id: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// The ping pair this poller drives.
    pub fn machine(&self) -> &ActionMachine {
        &self.shared.machine
    }

    /// Session timing.
    pub fn options(&self) -> PollOptions {
        self.shared.options
    }

    /// Current phase.
    pub fn phase(&self) -> PollPhase {
        self.shared.phase.borrow().clone()
    }

    /// Watch phase changes.
    pub fn subscribe(&self) -> watch::Receiver<PollPhase> {
        self.shared.phase.subscribe()
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<PollSession> {
        self.shared.phase.borrow().session().cloned()
    }

    /// Whether a session is live.
    pub fn is_active(&self) -> bool {
        self.shared.lock_live().is_some()
    }

    /// Begin a new session, cancelling any live one.
    ///
    /// The first probe is issued before this returns, so the ping pair is
    /// already `Pending`. Must be called from within a tokio runtime.
    pub fn begin(&self) -> PollHandle {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let (session, ticket, replaced) = {
            let mut live = shared.lock_live();
            let replaced = live.take().map(|previous| {
                previous.token.cancel();
                shared.attempts()
            });
            shared.machine.cancel();

            let session = PollSession {
                target: shared.target().clone(),
                started_at: Instant::now(),
                attempt: 1,
            };
            let ticket = shared.machine.issue();
            *live = Some(LiveSession {
                id,
                token: token.clone(),
            });
            shared.phase.send_replace(PollPhase::Active(session.clone()));
            (session, ticket, replaced)
        };

        if let Some(attempts) = replaced {
            debug!("Ping {}: replacing live poll session", shared.target());
            shared.emit(ActionEvent::PollFinished {
                device: shared.target().clone(),
                end: PollEnd::Cancelled,
                attempts,
            });
        }
        info!("Ping {}: polling", shared.target());
        shared.emit(ActionEvent::PollStarted {
            device: shared.target().clone(),
        });

        tokio::spawn(drive(Arc::clone(shared), id, token, session, ticket));

        PollHandle {
            shared: Arc::clone(shared),
            id,
        }
    }

    /// Cancel the live session. Returns whether there was one.
    ///
    /// The in-flight probe is aborted and the ping status is left as is.
    pub fn cancel(&self) -> bool {
        self.shared.cancel(None)
    }
}

impl Dispose for BoundedPoller {
    fn dispose(&self) {
        self.cancel();
    }
}

async fn drive(
    shared: Arc<Shared>,
    id: u64,
    token: CancellationToken,
    mut session: PollSession,
    mut ticket: Ticket,
) {
    loop {
        let completion = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            completion = shared.machine.settle(&ticket) => completion,
        };

        match completion {
            Completion::Applied(ActionStatus::Succeeded) => {
                if shared.finish(id, PollEnd::Reachable, session.attempt, None) {
                    info!(
                        "Ping {}: reachable after {} probe(s)",
                        session.target, session.attempt
                    );
                }
                return;
            }
            Completion::Applied(status) => {
                debug!(
                    "Ping {}: probe {} -> {}",
                    session.target, session.attempt, status
                );
            }
            Completion::Superseded | Completion::Cancelled => {
                shared.finish(id, PollEnd::Cancelled, session.attempt, None);
                return;
            }
        }

        if !shared.options.allows_another(session.elapsed()) {
            let attempts = session.attempt;
            let exceeded = Error::TimeoutExceeded {
                attempts,
                budget: shared.options.budget,
            };
            let reason = exceeded
                .failure_reason()
                .unwrap_or(FailureReason::TimedOut { attempts });
            let timed_out = ActionStatus::Failed(reason);
            if shared.finish(id, PollEnd::TimedOut, attempts, Some((&ticket, timed_out))) {
                warn!("Ping {}: {}", session.target, exceeded);
            }
            return;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = sleep(shared.options.interval) => {}
        }

        match shared.next_probe(id, &mut session) {
            Some(next) => ticket = next,
            None => return,
        }
    }
}

/// Handle to one poll session.
///
/// Disposing it cancels that session only; if a newer session has replaced
/// it, disposing does nothing.
#[derive(Clone)]
pub struct PollHandle {
    shared: Arc<Shared>,
    id: u64,
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("target", self.shared.target())
            .field("id", &self.id)
            .finish()
    }
}

impl PollHandle {
    /// Whether this session is still the live one.
    pub fn is_live(&self) -> bool {
        self.shared
            .lock_live()
            .as_ref()
            .is_some_and(|current| current.id == self.id)
    }

    /// Wait until this session is no longer live and return the final phase.
    pub async fn finished(&self) -> PollPhase {
        let mut rx = self.shared.phase.subscribe();
        loop {
            if !self.is_live() {
                return rx.borrow_and_update().clone();
            }
            if rx.changed().await.is_err() {
                return PollPhase::Idle;
            }
        }
    }
}

impl Dispose for PollHandle {
    fn dispose(&self) {
        self.shared.cancel(Some(self.id));
    }
}
