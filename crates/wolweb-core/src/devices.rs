//! Device list loading.
//!
//! The list is fetched exactly once per mount. A failed fetch replaces the
//! whole view with an error; an abandoned fetch leaves the state alone.

use std::collections::HashSet;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wolweb_types::Device;
use wolweb_types::wire::DeviceListResponse;

use crate::channel::ResultChannel;
use crate::error::{Error, Result};
use crate::guard::Dispose;
use crate::transport::Request;

/// A successfully fetched device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceList {
    /// Devices in server order.
    pub devices: Vec<Device>,
    /// When the list arrived.
    pub fetched_at: OffsetDateTime,
}

impl DeviceList {
    /// Whether the server has no devices configured.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// State of a one-shot remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResourceState<T> {
    /// Fetch in progress.
    #[default]
    Loading,
    /// Fetch succeeded.
    Ready(T),
    /// Fetch failed; the message is meant for display.
    Failed(String),
}

impl<T> ResourceState<T> {
    /// Whether the fetch is still in progress.
    pub fn is_loading(&self) -> bool {
        matches!(self, ResourceState::Loading)
    }

    /// The loaded value, if any.
    pub fn ready(&self) -> Option<&T> {
        match self {
            ResourceState::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Fetch the device list once.
///
/// A `null` list is an empty list. Devices repeating an address already
/// seen are dropped, keeping the first. Returns [`Error::Cancelled`] if
/// `token` fires first.
pub async fn load_devices(channel: &ResultChannel, token: &CancellationToken) -> Result<Vec<Device>> {
    let request = Request::list_devices();
    let payload = channel
        .invoke_with(&request, token)
        .await
        .into_result(&request)?;
    let response: DeviceListResponse = payload.json()?;
    Ok(dedupe(response.into_devices()))
}

fn dedupe(devices: Vec<Device>) -> Vec<Device> {
    let mut seen = HashSet::with_capacity(devices.len());
    devices
        .into_iter()
        .filter(|device| {
            let first = seen.insert(device.address.clone());
            if !first {
                warn!(
                    "Ignoring duplicate device entry for {} ({})",
                    device.address, device.name
                );
            }
            first
        })
        .collect()
}

/// The mounted device list.
///
/// Dropping or disposing it abandons a fetch still in flight.
#[derive(Debug)]
pub struct DeviceListResource {
    state: watch::Receiver<ResourceState<DeviceList>>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DeviceListResource {
    /// Start the fetch. Must be called from within a tokio runtime.
    pub fn mount(channel: ResultChannel) -> Self {
        let (tx, state) = watch::channel(ResourceState::Loading);
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            match load_devices(&channel, &task_token).await {
                Ok(devices) => {
                    info!("Loaded {} device(s)", devices.len());
                    tx.send_replace(ResourceState::Ready(DeviceList {
                        devices,
                        fetched_at: OffsetDateTime::now_utc(),
                    }));
                }
                Err(Error::Cancelled) => debug!("Device list fetch abandoned"),
                Err(e) => {
                    warn!("Failed to load device list: {}", e);
                    tx.send_replace(ResourceState::Failed(e.to_string()));
                }
            }
        });

        Self {
            state,
            token,
            handle,
        }
    }

    /// Current state.
    pub fn state(&self) -> ResourceState<DeviceList> {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ResourceState<DeviceList>> {
        self.state.clone()
    }

    /// Wait for the fetch to settle.
    ///
    /// Returns `None` if it was abandoned before settling.
    pub async fn settled(&self) -> Option<ResourceState<DeviceList>> {
        let mut rx = self.state.clone();
        let settled = match rx.wait_for(|state| !state.is_loading()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        settled
    }

    /// Whether the fetch task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Dispose for DeviceListResource {
    fn dispose(&self) {
        self.token.cancel();
    }
}

impl Drop for DeviceListResource {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
