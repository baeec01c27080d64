//! Per-device registry.
//!
//! The board holds, for every device on the list, its wake pair, its ping
//! poller and a debounced display for each. Pairs are independent: each
//! one issues requests on its own forked [`ResultChannel`], so cancelling
//! or resetting one never touches another.
//!
//! All methods are synchronous and cheap; the ones that start work spawn it
//! on the current tokio runtime and return a handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use wolweb_types::{ActionKind, ActionStatus, Device, DeviceAddress, DisplayStatus};

use crate::action::{ActionMachine, ActionTask};
use crate::channel::ResultChannel;
use crate::debounce::{DEFAULT_DWELL, DisplayStream};
use crate::devices::load_devices;
use crate::error::{Error, Result};
use crate::events::EventDispatcher;
use crate::guard::Dispose;
use crate::poller::{BoundedPoller, PollHandle, PollOptions, PollPhase};
use crate::transport::{Request, Transport};

/// Board settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardOptions {
    /// Ping poll timing.
    pub poll: PollOptions,
    /// Display dwell time.
    pub dwell: Duration,
    /// Broadcast address sent with wake requests.
    pub broadcast_addr: Option<String>,
}

impl BoardOptions {
    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()
    }
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            dwell: DEFAULT_DWELL,
            broadcast_addr: None,
        }
    }
}

/// What [`DeviceBoard::sync`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Devices that got fresh pairs.
    pub added: Vec<DeviceAddress>,
    /// Devices whose pairs were disposed.
    pub removed: Vec<DeviceAddress>,
}

struct BoardEntry {
    device: Device,
    wake: ActionMachine,
    ping: BoundedPoller,
    wake_display: DisplayStream,
    ping_display: DisplayStream,
}

impl BoardEntry {
    fn new(
        device: Device,
        channel: &ResultChannel,
        options: &BoardOptions,
        events: &EventDispatcher,
    ) -> Self {
        let address = device.address.clone();
        let wake = ActionMachine::from_parts(
            ActionKind::Wake,
            address.clone(),
            Request::wake(&address, options.broadcast_addr.as_deref()),
            channel.fork(),
            Some(events.clone()),
        );
        let ping_machine = ActionMachine::from_parts(
            ActionKind::Ping,
            address.clone(),
            Request::ping(&address),
            channel.fork(),
            Some(events.clone()),
        );
        let ping =
            BoundedPoller::from_validated(ping_machine, options.poll, Some(events.clone()));
        let wake_display = DisplayStream::spawn(wake.subscribe(), options.dwell);
        let ping_display = DisplayStream::spawn(ping.machine().subscribe(), options.dwell);

        Self {
            device,
            wake,
            ping,
            wake_display,
            ping_display,
        }
    }

    fn machine(&self, kind: ActionKind) -> &ActionMachine {
        match kind {
            ActionKind::Wake => &self.wake,
            ActionKind::Ping => self.ping.machine(),
        }
    }

    fn display(&self, kind: ActionKind) -> &DisplayStream {
        match kind {
            ActionKind::Wake => &self.wake_display,
            ActionKind::Ping => &self.ping_display,
        }
    }
}

impl Dispose for BoardEntry {
    fn dispose(&self) {
        self.ping.cancel();
        self.wake.cancel();
        self.wake_display.dispose();
        self.ping_display.dispose();
    }
}

impl Drop for BoardEntry {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Default)]
struct Entries {
    /// Addresses in list order.
    order: Vec<DeviceAddress>,
    by_address: HashMap<DeviceAddress, BoardEntry>,
}

/// Wake and ping state for every device on the list.
///
/// Dropping the board disposes every pair.
pub struct DeviceBoard {
    channel: ResultChannel,
    options: BoardOptions,
    entries: Mutex<Entries>,
    events: EventDispatcher,
}

impl std::fmt::Debug for DeviceBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBoard")
            .field("options", &self.options)
            .field("devices", &self.addresses())
            .finish()
    }
}

impl DeviceBoard {
    /// Create an empty board.
    ///
    /// Fails with [`Error::InvalidConfig`] if `options` do not validate.
    pub fn new(transport: Arc<dyn Transport>, options: BoardOptions) -> Result<Self> {
        Self::with_events(transport, options, EventDispatcher::default())
    }

    /// Create an empty board publishing to `events`.
    pub fn with_events(
        transport: Arc<dyn Transport>,
        options: BoardOptions,
        events: EventDispatcher,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            channel: ResultChannel::new(transport),
            options,
            entries: Mutex::new(Entries::default()),
            events,
        })
    }

    /// Event dispatcher for every pair on the board.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Board settings.
    pub fn options(&self) -> &BoardOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_entry<T>(
        &self,
        address: &DeviceAddress,
        f: impl FnOnce(&BoardEntry) -> T,
    ) -> Result<T> {
        let entries = self.lock();
        entries
            .by_address
            .get(address)
            .map(f)
            .ok_or_else(|| Error::UnknownDevice(address.clone()))
    }

    /// Make the board match `devices`.
    ///
    /// New devices start at `Idle`. Devices no longer listed are disposed.
    /// Devices already on the board keep their state; their name and host
    /// are updated.
    pub fn sync(&self, devices: &[Device]) -> SyncReport {
        let mut report = SyncReport::default();
        let removed_entries = {
            let mut entries = self.lock();
            let mut previous = std::mem::take(&mut entries.by_address);
            entries.order.clear();

            for device in devices {
                if entries.by_address.contains_key(&device.address) {
                    continue;
                }
                let entry = match previous.remove(&device.address) {
                    Some(mut entry) => {
                        entry.device = device.clone();
                        entry
                    }
                    None => {
                        report.added.push(device.address.clone());
                        BoardEntry::new(device.clone(), &self.channel, &self.options, &self.events)
                    }
                };
                entries.order.push(device.address.clone());
                entries.by_address.insert(device.address.clone(), entry);
            }

            report.removed = previous.keys().cloned().collect();
            previous
        };
        // Dropping disposes.
        drop(removed_entries);

        if !report.added.is_empty() || !report.removed.is_empty() {
            info!(
                "Board synced: {} added, {} removed",
                report.added.len(),
                report.removed.len()
            );
        }
        report
    }

    /// Fetch the device list and [`sync`](Self::sync) to it.
    ///
    /// Disposing the board while the fetch is in flight abandons it with
    /// [`Error::Cancelled`] and leaves the board empty.
    pub async fn refresh(&self) -> Result<SyncReport> {
        let token = self.channel.call_token();
        let devices = load_devices(&self.channel, &token).await?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self.sync(&devices))
    }

    /// Addresses in list order.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.lock().order.clone()
    }

    /// Devices in list order.
    pub fn devices(&self) -> Vec<Device> {
        let entries = self.lock();
        entries
            .order
            .iter()
            .filter_map(|address| entries.by_address.get(address))
            .map(|entry| entry.device.clone())
            .collect()
    }

    /// The device at `address`.
    pub fn device(&self, address: &DeviceAddress) -> Result<Device> {
        self.with_entry(address, |entry| entry.device.clone())
    }

    /// Parse user-supplied text into an address that is on the board.
    pub fn resolve(&self, address: &str) -> Result<DeviceAddress> {
        let address = DeviceAddress::new(address)?;
        if !self.contains(&address) {
            return Err(Error::UnknownDevice(address));
        }
        Ok(address)
    }

    /// Whether `address` is on the board.
    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.lock().by_address.contains_key(address)
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    /// Whether the board is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send a wake request. The wake pair is `Pending` when this returns.
    pub fn wake(&self, address: &DeviceAddress) -> Result<ActionTask> {
        let machine = self.with_entry(address, |entry| entry.wake.clone())?;
        Ok(machine.start())
    }

    /// Begin a ping session, replacing any live one for this device.
    pub fn begin_ping(&self, address: &DeviceAddress) -> Result<PollHandle> {
        let (pingable, poller) =
            self.with_entry(address, |entry| (entry.device.is_pingable(), entry.ping.clone()))?;
        if !pingable {
            return Err(Error::NoHost(address.clone()));
        }
        Ok(poller.begin())
    }

    /// Cancel the live ping session. Returns whether there was one.
    pub fn cancel_ping(&self, address: &DeviceAddress) -> Result<bool> {
        let poller = self.with_entry(address, |entry| entry.ping.clone())?;
        Ok(poller.cancel())
    }

    /// Force a pair back to `Idle`.
    ///
    /// For the ping pair the live session is cancelled first. An in-flight
    /// wake call is left running; its outcome is discarded.
    pub fn reset(&self, address: &DeviceAddress, kind: ActionKind) -> Result<()> {
        let (machine, poller) = self.with_entry(address, |entry| {
            (entry.machine(kind).clone(), entry.ping.clone())
        })?;
        if kind == ActionKind::Ping {
            poller.cancel();
        }
        machine.reset();
        debug!("{} {}: reset by caller", kind, address);
        Ok(())
    }

    /// Reset both pairs of every device.
    pub fn reset_all(&self) {
        for address in self.addresses() {
            for kind in [ActionKind::Wake, ActionKind::Ping] {
                if let Err(e) = self.reset(&address, kind) {
                    debug!("{} {}: skipped reset: {}", kind, address, e);
                }
            }
        }
    }

    /// Raw status of a pair.
    pub fn status(&self, address: &DeviceAddress, kind: ActionKind) -> Result<ActionStatus> {
        self.with_entry(address, |entry| entry.machine(kind).status())
    }

    /// Watch the raw status of a pair.
    pub fn subscribe(
        &self,
        address: &DeviceAddress,
        kind: ActionKind,
    ) -> Result<watch::Receiver<ActionStatus>> {
        self.with_entry(address, |entry| entry.machine(kind).subscribe())
    }

    /// What the status area of a pair shows now.
    pub fn display(&self, address: &DeviceAddress, kind: ActionKind) -> Result<DisplayStatus> {
        self.with_entry(address, |entry| entry.display(kind).current())
    }

    /// Watch the status area of a pair.
    pub fn watch_display(
        &self,
        address: &DeviceAddress,
        kind: ActionKind,
    ) -> Result<watch::Receiver<DisplayStatus>> {
        self.with_entry(address, |entry| entry.display(kind).subscribe())
    }

    /// Ping poller phase of a device.
    pub fn poll_phase(&self, address: &DeviceAddress) -> Result<PollPhase> {
        self.with_entry(address, |entry| entry.ping.phase())
    }

    /// Remove a device and dispose its pairs. Returns whether it was there.
    pub fn remove(&self, address: &DeviceAddress) -> bool {
        let removed = {
            let mut entries = self.lock();
            entries.order.retain(|a| a != address);
            entries.by_address.remove(address)
        };
        removed.is_some()
    }

    /// Remove every device.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.lock();
            entries.order.clear();
            std::mem::take(&mut entries.by_address)
        };
        drop(removed);
    }
}

impl Dispose for DeviceBoard {
    fn dispose(&self) {
        self.channel.cancel();
        self.clear();
    }
}

impl Drop for DeviceBoard {
    fn drop(&mut self) {
        self.dispose();
    }
}
