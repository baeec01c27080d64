//! Error types for wolweb-core.
//!
//! This module defines the errors that can surface while talking to the
//! wolweb service and while driving per-device actions.
//!
//! # How errors reach the user
//!
//! | Error Type | Where it ends up | Notes |
//! |------------|------------------|-------|
//! | [`Error::Transport`] | `Failed` status of the pair | Request never reached the server |
//! | [`Error::Server`] | `Failed` status of the pair | Message from the `error` body field |
//! | [`Error::TimeoutExceeded`] | `Failed(TimedOut)` on the ping pair | Poll budget exhausted |
//! | [`Error::Cancelled`] | Nowhere | Superseded or torn down, never displayed |
//! | [`Error::InvalidResponse`] | `Failed` status, or the device list error | 2xx with an unreadable body |
//! | [`Error::UnknownDevice`] | Caller | Address not on the board |
//! | [`Error::NoHost`] | Caller | Device has nothing to ping |
//!
//! A failed device list replaces the whole view; per-device failures stay
//! inside that device's status area.
//!
//! ## Cancellation is not failure
//!
//! [`Error::Cancelled`] means the caller moved on. The action machine
//! swallows it without a state change, and the device list resource skips
//! its state update entirely.

use std::time::Duration;

use thiserror::Error;

use wolweb_types::{DeviceAddress, FailureReason, ParseError};

/// Errors that can occur in the wolweb client engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request never reached the server, or failed mid-flight.
    #[error("Service not reachable at {url}: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying cause.
        message: String,
    },

    /// The server answered with a non-2xx status.
    #[error("Server error (HTTP {status}): {}", message.as_deref().unwrap_or(wolweb_types::GENERIC_FAILURE))]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the `error` body field, if any.
        message: Option<String>,
    },

    /// The poll budget ran out without a reachable answer.
    #[error("No reachable answer after {attempts} probe(s) within {budget:?}")]
    TimeoutExceeded {
        /// Probes issued in the session.
        attempts: u32,
        /// Configured budget.
        budget: Duration,
    },

    /// The call was superseded or its owner was torn down.
    #[error("Operation cancelled")]
    Cancelled,

    /// A 2xx response whose body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The address is not on the board.
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceAddress),

    /// The device has no host configured, so it cannot be pinged.
    #[error("Device {0} has no host to ping")]
    NoHost(DeviceAddress),

    /// Invalid value in a response or argument.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Error {
    /// Create a transport error for a URL.
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a server error.
    pub fn server(status: u16, message: Option<String>) -> Self {
        Self::Server { status, message }
    }

    /// Create an invalid response error.
    pub fn invalid_response(detail: impl ToString) -> Self {
        Self::InvalidResponse(detail.to_string())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error only means "abandoned".
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The failure reason a pair should display for this error.
    ///
    /// Returns `None` for errors that never reach a status area.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Error::Transport { message, .. } => Some(FailureReason::Transport {
                cause: message.clone(),
            }),
            Error::Server { status, message } => Some(FailureReason::Server {
                status: *status,
                message: message.clone(),
            }),
            Error::TimeoutExceeded { attempts, .. } => Some(FailureReason::TimedOut {
                attempts: *attempts,
            }),
            Error::InvalidResponse(detail) => Some(FailureReason::InvalidResponse {
                detail: detail.clone(),
            }),
            _ => None,
        }
    }
}

/// Result type alias using wolweb-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
