//! Request and response bodies of the wolweb HTTP API.
//!
//! Paths are relative to the configured base URL.

use serde::{Deserialize, Serialize};

use crate::types::{Device, DeviceAddress};

/// Device inventory endpoint.
pub const DEVICES_PATH: &str = "/api/macs";

/// Wake packet endpoint.
pub const WAKE_PATH: &str = "/api/wol";

/// Prefix of the reachability endpoint; the address is appended.
pub const PING_PATH_PREFIX: &str = "/api/ping/";

/// The only probe status that counts as reachable.
pub const PING_OK: &str = "ok";

/// Build the reachability path for an address.
///
/// The address is percent-encoded into a single path segment.
///
/// ```
/// use wolweb_types::{DeviceAddress, wire::ping_path};
///
/// let addr = DeviceAddress::new("AA:BB:CC:DD:EE:FF").unwrap();
/// assert_eq!(ping_path(&addr), "/api/ping/AA%3ABB%3ACC%3ADD%3AEE%3AFF");
/// ```
#[must_use]
pub fn ping_path(address: &DeviceAddress) -> String {
    format!("{}{}", PING_PATH_PREFIX, urlencoding::encode(address.as_str()))
}

/// `GET /api/macs` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceListResponse {
    /// Devices; `null` or absent means none configured.
    #[serde(default)]
    pub macs: Option<Vec<Device>>,
}

impl DeviceListResponse {
    /// The devices, empty when the server sent none.
    #[must_use]
    pub fn into_devices(self) -> Vec<Device> {
        self.macs.unwrap_or_default()
    }
}

/// `POST /api/wol` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeRequest {
    /// Address to wake.
    pub mac_addr: DeviceAddress,
    /// Broadcast address to send the packet to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_addr: Option<String>,
}

impl WakeRequest {
    /// Wake request for an address with no explicit broadcast address.
    pub fn new(mac_addr: DeviceAddress) -> Self {
        Self {
            mac_addr,
            broadcast_addr: None,
        }
    }
}

/// `GET /api/ping/{address}` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// `"ok"` when the device answered.
    #[serde(default)]
    pub status: Option<String>,
}

impl PingResponse {
    /// Whether the service reported the device as reachable.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.status.as_deref() == Some(PING_OK)
    }
}

/// Body of a non-2xx response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Server supplied reason.
    #[serde(default)]
    pub error: Option<String>,
}
