//! Core types for devices and per-device action state.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ParseError, ParseResult};

/// Stable identity of a device in the inventory.
///
/// The service matches addresses byte-for-byte when it looks a device up, so
/// the value is kept exactly as received: no case folding, no separator
/// rewriting. Only empty addresses and control characters are rejected.
///
/// # Examples
///
/// ```
/// use wolweb_types::DeviceAddress;
///
/// let addr = DeviceAddress::new("AA:BB:CC:DD:EE:FF").unwrap();
/// assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:FF");
/// assert!(DeviceAddress::new("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Validate and wrap an address.
    pub fn new(address: impl Into<String>) -> ParseResult<Self> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(ParseError::EmptyAddress);
        }
        if let Some((position, _)) = address.char_indices().find(|(_, c)| c.is_control()) {
            return Err(ParseError::ControlCharacter { position });
        }
        Ok(Self(address))
    }

    /// The address exactly as the service knows it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DeviceAddress {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceAddress> for String {
    fn from(value: DeviceAddress) -> Self {
        value.0
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A device known to the inventory service.
///
/// The service serializes its configuration structs directly, so field
/// names on the wire are capitalized and a missing host arrives as `""`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Device {
    /// Identity key, unique across the list.
    #[cfg_attr(feature = "serde", serde(rename = "Address"))]
    pub address: DeviceAddress,
    /// Human readable label.
    #[cfg_attr(feature = "serde", serde(rename = "Name", default))]
    pub name: String,
    /// Host name or IP the service pings on our behalf.
    #[cfg_attr(
        feature = "serde",
        serde(
            rename = "Host",
            default,
            deserialize_with = "empty_as_none",
            skip_serializing_if = "Option::is_none"
        )
    )]
    pub host: Option<String>,
}

impl Device {
    /// Create a device without a host.
    pub fn new(address: DeviceAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            host: None,
        }
    }

    /// Attach a host label.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.host = if host.trim().is_empty() {
            None
        } else {
            Some(host)
        };
        self
    }

    /// Whether the service has something to ping for this device.
    #[must_use]
    pub fn is_pingable(&self) -> bool {
        self.host.is_some()
    }

    /// Name to show, falling back to the address for unnamed devices.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.address.as_str()
        } else {
            &self.name
        }
    }
}

#[cfg(feature = "serde")]
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|host| !host.trim().is_empty()))
}

/// The two remote actions a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ActionKind {
    /// Ask the service to send a wake packet.
    Wake,
    /// Ask the service whether the device answers.
    Ping,
}

impl ActionKind {
    /// Stable lowercase name, used in logs and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Wake => "wake",
            ActionKind::Ping => "ping",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message shown when the service gave no reason of its own.
pub const GENERIC_FAILURE: &str = "request failed";

/// Why an action ended in [`ActionStatus::Failed`].
///
/// Transport problems, server rejections, and "the device did not answer"
/// are kept apart so a timed-out probe never reads like a server error.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[non_exhaustive]
pub enum FailureReason {
    /// Non-2xx response, with the server's `error` message when it sent one.
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the response body.
        message: Option<String>,
    },
    /// The request never reached the server.
    Transport {
        /// Underlying cause.
        cause: String,
    },
    /// A 2xx response whose body could not be understood.
    InvalidResponse {
        /// Decoder message.
        detail: String,
    },
    /// The probe call succeeded but the device did not answer.
    Unreachable,
    /// The poll budget ran out without a reachable answer.
    TimedOut {
        /// Number of probes issued in the session.
        attempts: u32,
    },
}

impl FailureReason {
    /// Text for the device's status area.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            FailureReason::Server {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            FailureReason::Server { .. } => GENERIC_FAILURE.to_string(),
            FailureReason::Transport { .. } | FailureReason::InvalidResponse { .. } => {
                GENERIC_FAILURE.to_string()
            }
            FailureReason::Unreachable => "device did not answer".to_string(),
            FailureReason::TimedOut { .. } => "timed out".to_string(),
        }
    }

    /// Whether this reason came from the poll budget rather than a call.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureReason::TimedOut { .. })
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Server { status, message } => match message {
                Some(message) if !message.trim().is_empty() => {
                    write!(f, "{} (HTTP {})", message, status)
                }
                _ => write!(f, "{} (HTTP {})", GENERIC_FAILURE, status),
            },
            FailureReason::Transport { cause } => write!(f, "{}: {}", GENERIC_FAILURE, cause),
            FailureReason::InvalidResponse { detail } => {
                write!(f, "invalid response: {}", detail)
            }
            FailureReason::Unreachable => write!(f, "device did not answer"),
            FailureReason::TimedOut { attempts } => {
                write!(f, "timed out after {} probe(s)", attempts)
            }
        }
    }
}

/// State of one (device, action) pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "state", content = "reason", rename_all = "snake_case")
)]
pub enum ActionStatus {
    /// Nothing has been requested, or the pair was reset.
    #[default]
    Idle,
    /// A call is in flight.
    Pending,
    /// The most recent call succeeded.
    Succeeded,
    /// The most recent call failed.
    Failed(FailureReason),
}

impl ActionStatus {
    /// `Succeeded` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Succeeded | ActionStatus::Failed(_))
    }

    /// `Pending`.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, ActionStatus::Pending)
    }

    /// The failure reason, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ActionStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Short lowercase label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ActionStatus::Idle => "idle",
            ActionStatus::Pending => "pending",
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// What the status area of a pair currently shows.
///
/// `Hidden` is the blank frame between two visible statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "display", content = "status", rename_all = "snake_case")
)]
pub enum DisplayStatus {
    /// Nothing is shown.
    Hidden,
    /// The given status is shown.
    Visible(ActionStatus),
}

impl DisplayStatus {
    /// The visible status, if any.
    #[must_use]
    pub fn visible(&self) -> Option<&ActionStatus> {
        match self {
            DisplayStatus::Hidden => None,
            DisplayStatus::Visible(status) => Some(status),
        }
    }

    /// `Hidden`.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        matches!(self, DisplayStatus::Hidden)
    }
}

impl Default for DisplayStatus {
    fn default() -> Self {
        DisplayStatus::Visible(ActionStatus::Idle)
    }
}
