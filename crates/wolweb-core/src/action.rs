//! Per-(device, action) state machine.
//!
//! ```text
//!            start()                 outcome
//!   Idle ─────────────► Pending ─────────────► Succeeded | Failed
//!    ▲                    ▲                          │
//!    │      reset()       │        start()           │
//!    └────────────────────┴──────────────────────────┘
//! ```
//!
//! Every `start` is issued, even while a call is already pending. Each
//! issued call gets a generation number. An outcome is applied only if its
//! generation is still the newest one, so a slow response to an older call
//! can never overwrite the state produced by a newer call. The generation
//! check and the state write happen under the same lock.
//!
//! A cancelled call leaves the state exactly as it was.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wolweb_types::wire::PingResponse;
use wolweb_types::{ActionKind, ActionStatus, DeviceAddress, FailureReason};

use crate::channel::{Outcome, ResultChannel};
use crate::error::Error;
use crate::events::{ActionEvent, EventDispatcher};
use crate::guard::Dispose;
use crate::transport::Request;

/// What happened to an issued call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The outcome was applied and the pair now shows this status.
    Applied(ActionStatus),
    /// A newer call (or a reset) took over; the outcome was dropped.
    Superseded,
    /// The call was cancelled; the state was not touched.
    Cancelled,
}

impl Completion {
    /// The applied status, if any.
    pub fn status(&self) -> Option<&ActionStatus> {
        match self {
            Completion::Applied(status) => Some(status),
            _ => None,
        }
    }
}

/// Proof that a call was issued, used to apply its outcome later.
#[derive(Debug, Clone)]
pub struct Ticket {
    generation: u64,
    token: CancellationToken,
}

impl Ticket {
    /// Issuance order of this call on its pair.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Inner {
    kind: ActionKind,
    target: DeviceAddress,
    request: Request,
    channel: ResultChannel,
    /// Generation of the newest issued call; guards every status write.
    generation: Mutex<u64>,
    status: watch::Sender<ActionStatus>,
    events: Option<EventDispatcher>,
}

/// State machine for one (device, action) pair.
///
/// Cloning gives another handle to the same pair.
#[derive(Clone)]
pub struct ActionMachine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ActionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionMachine")
            .field("kind", &self.inner.kind)
            .field("target", &self.inner.target)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl ActionMachine {
    /// Create a machine issuing the default request for `kind`.
    pub fn new(kind: ActionKind, target: DeviceAddress, channel: ResultChannel) -> Self {
        let request = match kind {
            ActionKind::Wake => Request::wake(&target, None),
            ActionKind::Ping => Request::ping(&target),
        };
        Self::from_parts(kind, target, request, channel, None)
    }

    /// Create a machine with an explicit request and an optional event sink.
    pub fn from_parts(
        kind: ActionKind,
        target: DeviceAddress,
        request: Request,
        channel: ResultChannel,
        events: Option<EventDispatcher>,
    ) -> Self {
        let (status, _) = watch::channel(ActionStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                kind,
                target,
                request,
                channel,
                generation: Mutex::new(0),
                status,
                events,
            }),
        }
    }

    /// Action kind.
    pub fn kind(&self) -> ActionKind {
        self.inner.kind
    }

    /// Device address.
    pub fn target(&self) -> &DeviceAddress {
        &self.inner.target
    }

    /// Current status.
    pub fn status(&self) -> ActionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ActionStatus> {
        self.inner.status.subscribe()
    }

    /// Generation of the newest issued call (0 before the first).
    pub fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    /// Whether `ticket` still belongs to the newest call.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        *self.lock_generation() == ticket.generation
    }

    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.inner
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ActionEvent) {
        if let Some(events) = &self.inner.events {
            events.send(event);
        }
    }

    /// Issue a new call: bump the generation and go to `Pending`.
    ///
    /// The network call itself happens in [`settle`](Self::settle).
    pub fn issue(&self) -> Ticket {
        let ticket = {
            let mut generation = self.lock_generation();
            *generation += 1;
            self.inner.status.send_replace(ActionStatus::Pending);
            Ticket {
                generation: *generation,
                token: self.inner.channel.call_token(),
            }
        };

        debug!(
            "{} {}: issued call #{}",
            self.inner.kind, self.inner.target, ticket.generation
        );
        self.emit(ActionEvent::Started {
            device: self.inner.target.clone(),
            kind: self.inner.kind,
            generation: ticket.generation,
        });
        ticket
    }

    /// Perform the call for `ticket` and apply its outcome if still current.
    pub async fn settle(&self, ticket: &Ticket) -> Completion {
        let outcome = self
            .inner
            .channel
            .invoke_with(&self.inner.request, &ticket.token)
            .await;

        match self.interpret(outcome) {
            Some(status) => self.apply(ticket, status),
            None => {
                debug!(
                    "{} {}: call #{} cancelled, state unchanged",
                    self.inner.kind, self.inner.target, ticket.generation
                );
                Completion::Cancelled
            }
        }
    }

    /// Map an outcome to the status it produces. `None` for cancellation.
    fn interpret(&self, outcome: Outcome) -> Option<ActionStatus> {
        let payload = match outcome.into_result(&self.inner.request) {
            Ok(payload) => payload,
            Err(e) if e.is_cancelled() => return None,
            Err(e) => return Some(failed(&e)),
        };
        let status = match self.inner.kind {
            ActionKind::Wake => ActionStatus::Succeeded,
            ActionKind::Ping => match payload.json::<PingResponse>() {
                Ok(response) if response.is_reachable() => ActionStatus::Succeeded,
                Ok(_) => ActionStatus::Failed(FailureReason::Unreachable),
                Err(e) => failed(&e),
            },
        };
        Some(status)
    }

    fn apply(&self, ticket: &Ticket, status: ActionStatus) -> Completion {
        if !self.conclude(ticket, status.clone()) {
            debug!(
                "{} {}: discarding stale outcome of call #{}",
                self.inner.kind, self.inner.target, ticket.generation
            );
            self.emit(ActionEvent::Discarded {
                device: self.inner.target.clone(),
                kind: self.inner.kind,
                generation: ticket.generation,
            });
            return Completion::Superseded;
        }

        debug!(
            "{} {}: call #{} -> {}",
            self.inner.kind, self.inner.target, ticket.generation, status
        );
        self.emit(ActionEvent::Settled {
            device: self.inner.target.clone(),
            kind: self.inner.kind,
            status: status.clone(),
        });
        Completion::Applied(status)
    }

    /// Write `status` on behalf of `ticket` if it is still the newest call.
    ///
    /// Returns whether the write happened.
    pub fn conclude(&self, ticket: &Ticket, status: ActionStatus) -> bool {
        let generation = self.lock_generation();
        if *generation != ticket.generation {
            return false;
        }
        self.inner.status.send_replace(status);
        true
    }

    /// Issue a call and wait for it.
    pub async fn run(&self) -> Completion {
        let ticket = self.issue();
        self.settle(&ticket).await
    }

    /// Issue a call and settle it in the background.
    ///
    /// The pair is `Pending` when this returns. Must be called from within
    /// a tokio runtime.
    pub fn start(&self) -> ActionTask {
        let ticket = self.issue();
        let machine = self.clone();
        let task_ticket = ticket.clone();
        let handle = tokio::spawn(async move { machine.settle(&task_ticket).await });
        ActionTask { ticket, handle }
    }

    /// Force `Idle` and invalidate every call in flight.
    ///
    /// In-flight calls keep running, but their outcomes will be discarded.
    pub fn reset(&self) {
        {
            let mut generation = self.lock_generation();
            *generation += 1;
            self.inner.status.send_replace(ActionStatus::Idle);
        }
        debug!("{} {}: reset", self.inner.kind, self.inner.target);
        self.emit(ActionEvent::Reset {
            device: self.inner.target.clone(),
            kind: self.inner.kind,
        });
    }

    /// Abort every call in flight. The state is left as it is.
    pub fn cancel(&self) {
        self.inner.channel.cancel();
    }
}

fn failed(error: &Error) -> ActionStatus {
    let reason = error.failure_reason().unwrap_or_else(|| FailureReason::Transport {
        cause: error.to_string(),
    });
    ActionStatus::Failed(reason)
}

impl Dispose for ActionMachine {
    fn dispose(&self) {
        self.cancel();
    }
}

/// A call started with [`ActionMachine::start`].
#[derive(Debug)]
pub struct ActionTask {
    ticket: Ticket,
    handle: JoinHandle<Completion>,
}

impl ActionTask {
    /// The ticket of this call.
    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    /// Whether the call has settled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the call to settle.
    ///
    /// A call whose task panicked or was aborted counts as cancelled.
    pub async fn join(self) -> Completion {
        match self.handle.await {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Call #{} task ended abnormally: {}", self.ticket.generation, e);
                Completion::Cancelled
            }
        }
    }
}

impl Dispose for ActionTask {
    /// Abort this call only; newer calls on the same pair are untouched.
    fn dispose(&self) {
        self.ticket.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport};
    use crate::transport::Response;
    use std::time::Duration;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn addr() -> DeviceAddress {
        DeviceAddress::new(MAC).unwrap()
    }

    fn machine(kind: ActionKind, mock: &Arc<MockTransport>) -> ActionMachine {
        ActionMachine::new(kind, addr(), ResultChannel::new(mock.clone()))
    }

    fn ping_path() -> String {
        wolweb_types::wire::ping_path(&addr())
    }

    #[tokio::test]
    async fn test_start_is_pending_immediately() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(200, r#"{"message":"success"}"#));
        let wake = machine(ActionKind::Wake, &mock);

        assert_eq!(wake.status(), ActionStatus::Idle);
        let task = wake.start();
        assert_eq!(wake.status(), ActionStatus::Pending);

        assert_eq!(task.join().await, Completion::Applied(ActionStatus::Succeeded));
        assert_eq!(wake.status(), ActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_http_error_uses_server_message() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            "/api/wol",
            Response::new(400, r#"{"error":"invalid MAC address"}"#),
        );
        let wake = machine(ActionKind::Wake, &mock);

        wake.run().await;
        let status = wake.status();
        let reason = status.failure().unwrap();
        assert_eq!(reason.message(), "invalid MAC address");
    }

    #[tokio::test]
    async fn test_http_error_without_body_is_generic() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(500, "boom\n"));
        let wake = machine(ActionKind::Wake, &mock);

        wake.run().await;
        assert_eq!(
            wake.status(),
            ActionStatus::Failed(FailureReason::Server {
                status: 500,
                message: None
            })
        );
        assert_eq!(
            wake.status().failure().unwrap().message(),
            wolweb_types::GENERIC_FAILURE
        );
    }

    #[tokio::test]
    async fn test_network_error_fails_and_never_retries() {
        let mock = Arc::new(MockTransport::new());
        mock.fail("/api/wol", "connection refused");
        let wake = machine(ActionKind::Wake, &mock);

        wake.run().await;
        assert!(matches!(
            wake.status(),
            ActionStatus::Failed(FailureReason::Transport { .. })
        ));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_ping_payload_interpretation() {
        let mock = Arc::new(MockTransport::new());
        let ping = machine(ActionKind::Ping, &mock);

        mock.respond(&ping_path(), Response::new(200, r#"{"status":"ok"}"#));
        ping.run().await;
        assert_eq!(ping.status(), ActionStatus::Succeeded);

        mock.respond(&ping_path(), Response::new(200, r#"{"status":"failed"}"#));
        ping.run().await;
        assert_eq!(
            ping.status(),
            ActionStatus::Failed(FailureReason::Unreachable)
        );

        mock.respond(&ping_path(), Response::new(200, "<html>"));
        ping.run().await;
        assert!(matches!(
            ping.status(),
            ActionStatus::Failed(FailureReason::InvalidResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_call_wins_regardless_of_completion_order() {
        let mock = Arc::new(MockTransport::new());
        // Call A: slow failure. Call B: fast success.
        mock.enqueue_after(
            "/api/wol",
            Duration::from_secs(2),
            MockReply::Respond(Response::new(500, r#"{"error":"late"}"#)),
        );
        mock.enqueue_after(
            "/api/wol",
            Duration::from_millis(100),
            MockReply::Respond(Response::new(200, "{}")),
        );
        let wake = machine(ActionKind::Wake, &mock);

        let a = wake.start();
        let b = wake.start();
        assert!(b.ticket().generation() > a.ticket().generation());

        assert_eq!(b.join().await, Completion::Applied(ActionStatus::Succeeded));
        assert_eq!(a.join().await, Completion::Superseded);
        assert_eq!(wake.status(), ActionStatus::Succeeded);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_state_untouched() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(200, "{}"));
        let wake = machine(ActionKind::Wake, &mock);

        wake.run().await;
        assert_eq!(wake.status(), ActionStatus::Succeeded);

        mock.set_latency(Duration::from_secs(5));
        let task = wake.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        wake.cancel();

        assert_eq!(task.join().await, Completion::Cancelled);
        assert_eq!(wake.status(), ActionStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_failure_does_not_land() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(500, "{}"));
        mock.set_latency(Duration::from_secs(1));
        let wake = machine(ActionKind::Wake, &mock);

        let task = wake.start();
        task.dispose();
        assert_eq!(task.join().await, Completion::Cancelled);
        assert!(wake.status().failure().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposing_superseded_task_keeps_newer_call() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(200, "{}"));
        mock.set_latency(Duration::from_secs(1));
        let wake = machine(ActionKind::Wake, &mock);

        let old = wake.start();
        let new = wake.start();
        old.dispose();

        assert_eq!(new.join().await, Completion::Applied(ActionStatus::Succeeded));
        assert_eq!(old.join().await, Completion::Cancelled);
        assert_eq!(wake.status(), ActionStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_in_flight_outcome() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(500, r#"{"error":"stale"}"#));
        mock.set_latency(Duration::from_secs(1));
        let wake = machine(ActionKind::Wake, &mock);

        let task = wake.start();
        wake.reset();
        assert_eq!(wake.status(), ActionStatus::Idle);

        assert_eq!(task.join().await, Completion::Superseded);
        assert_eq!(wake.status(), ActionStatus::Idle);
    }

    #[tokio::test]
    async fn test_restart_after_terminal_state() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(500, "{}"));
        let wake = machine(ActionKind::Wake, &mock);

        wake.run().await;
        assert!(wake.status().failure().is_some());

        mock.respond("/api/wol", Response::new(200, "{}"));
        let mut rx = wake.subscribe();
        let task = wake.start();
        assert_eq!(*rx.borrow_and_update(), ActionStatus::Pending);
        task.join().await;
        assert_eq!(wake.status(), ActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_events_follow_transitions() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/wol", Response::new(200, "{}"));
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let wake = ActionMachine::from_parts(
            ActionKind::Wake,
            addr(),
            Request::wake(&addr(), None),
            ResultChannel::new(mock.clone()),
            Some(events),
        );

        wake.run().await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            ActionEvent::Started { generation: 1, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ActionEvent::Settled {
                status: ActionStatus::Succeeded,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_panicked_task_joins_as_cancelled() {
        let mock = Arc::new(MockTransport::new());
        let wake = machine(ActionKind::Wake, &mock);
        let task = ActionTask {
            ticket: wake.issue(),
            handle: tokio::spawn(async { panic!("settle blew up") }),
        };

        assert_eq!(task.join().await, Completion::Cancelled);
        assert_eq!(wake.status(), ActionStatus::Pending);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_ping_body_keeps_decode_detail() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(&ping_path(), Response::new(200, "<html>"));
        let ping = machine(ActionKind::Ping, &mock);

        ping.run().await;
        match ping.status() {
            ActionStatus::Failed(FailureReason::InvalidResponse { detail }) => {
                assert!(!detail.is_empty());
                assert!(!detail.starts_with("Invalid response"));
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }
}
