//! Action event system.
//!
//! Every state change the engine makes is also published as an
//! [`ActionEvent`], so a front end (or a log sink) can follow what happens
//! across all devices without subscribing to each pair.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use wolweb_types::{ActionKind, ActionStatus, DeviceAddress};

/// How a poll session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollEnd {
    /// A probe reported the device as reachable.
    Reachable,
    /// The budget ran out.
    TimedOut,
    /// Torn down or replaced by a newer session.
    Cancelled,
}

/// Events emitted by action machines and pollers.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ActionEvent {
    /// A call was issued and the pair went to `Pending`.
    Started {
        device: DeviceAddress,
        kind: ActionKind,
        generation: u64,
    },
    /// A call's outcome was applied.
    Settled {
        device: DeviceAddress,
        kind: ActionKind,
        status: ActionStatus,
    },
    /// A call's outcome arrived after it was superseded and was dropped.
    Discarded {
        device: DeviceAddress,
        kind: ActionKind,
        generation: u64,
    },
    /// The pair was forced back to `Idle`.
    Reset {
        device: DeviceAddress,
        kind: ActionKind,
    },
    /// A poll session began.
    PollStarted { device: DeviceAddress },
    /// A poll session ended.
    PollFinished {
        device: DeviceAddress,
        end: PollEnd,
        attempts: u32,
    },
}

impl ActionEvent {
    /// The device this event concerns.
    pub fn device(&self) -> &DeviceAddress {
        match self {
            ActionEvent::Started { device, .. }
            | ActionEvent::Settled { device, .. }
            | ActionEvent::Discarded { device, .. }
            | ActionEvent::Reset { device, .. }
            | ActionEvent::PollStarted { device }
            | ActionEvent::PollFinished { device, .. } => device,
        }
    }
}

/// Sender for action events.
pub type EventSender = broadcast::Sender<ActionEvent>;

/// Receiver for action events.
pub type EventReceiver = broadcast::Receiver<ActionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ActionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
