//! Client engine for the wolweb wake and ping service.
//!
//! This crate tracks wake-on-LAN and reachability actions for the devices a
//! wolweb service knows about. It talks to the service over its small REST
//! API and keeps per-device, per-action state that a front end can render.
//!
//! # Features
//!
//! - **Cancelable calls**: every request can be abandoned, and an abandoned
//!   call never changes visible state
//! - **Stale outcome protection**: only the newest call on a pair updates it
//! - **Bounded polling**: ping probes repeat at an interval within a budget
//! - **Display debouncing**: status areas never flicker faster than a dwell
//! - **Device board**: one registry holding every pair for every device
//!
//! # Endpoints
//!
//! | Method | Path | Used by |
//! |--------|------|---------|
//! | `GET` | `/api/macs` | [`DeviceListResource`], [`DeviceBoard::refresh`] |
//! | `POST` | `/api/wol` | [`DeviceBoard::wake`] |
//! | `GET` | `/api/ping/{address}` | [`DeviceBoard::begin_ping`] |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wolweb_core::{ActionKind, ClientConfig, DeviceBoard};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::load_default()?;
//!     let board = DeviceBoard::new(Arc::new(config.transport()?), config.board_options())?;
//!
//!     board.refresh().await?;
//!     for device in board.devices() {
//!         let status = board.status(&device.address, ActionKind::Ping)?;
//!         println!("{}: {}", device.display_name(), status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The library never installs a tracing subscriber; that is up to the
//! application.

pub mod action;
pub mod board;
pub mod channel;
pub mod client;
pub mod config;
pub mod debounce;
pub mod devices;
pub mod error;
pub mod events;
pub mod guard;
pub mod mock;
pub mod poller;
pub mod transport;

// Core exports
pub use action::{ActionMachine, ActionTask, Completion, Ticket};
pub use board::{BoardOptions, DeviceBoard, SyncReport};
pub use channel::{Outcome, ResultChannel};
pub use client::{DEFAULT_REQUEST_TIMEOUT, HttpTransport};
pub use config::{ClientConfig, ConfigError, ValidationError};
pub use debounce::{DEFAULT_DWELL, DisplayStream, DwellGate};
pub use devices::{DeviceList, DeviceListResource, ResourceState, load_devices};
pub use error::{Error, Result};
pub use events::{ActionEvent, EventDispatcher, EventReceiver, EventSender, PollEnd};
pub use guard::{Dispose, DisposeGuard};
pub use mock::{MockReply, MockTransport};
pub use poller::{BoundedPoller, PollHandle, PollOptions, PollPhase, PollSession};
pub use transport::{Method, Payload, Request, Response, Transport};

// Re-export from wolweb-types
pub use wolweb_types::{
    ActionKind, ActionStatus, Device, DeviceAddress, DisplayStatus, FailureReason, GENERIC_FAILURE,
};
