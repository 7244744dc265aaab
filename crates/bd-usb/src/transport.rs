use std::collections::HashMap;

use bd_container::{Queue, RecipientTable};
use bd_protocol::{HeaderError, Packet, HEADER_LEN};
use tracing::{debug, info, warn};

use crate::backend::{DeviceId, TransferDirection, TransferOutcome, UsbBackend, UsbBackendError, UsbDeviceInfo};
use crate::device::{classify_device, BrickKind};
use crate::pool::{StallKind, TransferPool};

const READ_POOL_SIZE: usize = 10;
const WRITE_POOL_SIZE: usize = 10;
const WRITE_BACKLOG_CAPACITY: usize = 32768;

/// RED Brick quirk: the very first read after a reopen may carry one of
/// these two fixed bytes because the host queued the read before USB OTG
/// finished syncing. Such a short read is silently dropped rather than
/// logged as an error.
const RED_BRICK_BOOT_QUIRK_BYTES: [u8; 2] = [0xA1, 0xAA];

#[derive(Debug)]
pub enum UsbTransportEvent {
    ResponseReceived { device: DeviceId, payload: Vec<u8> },
    DeviceConnected { device: DeviceId, kind: BrickKind },
    DeviceRemoved { device: DeviceId, orphaned_uids: Vec<u32> },
    PendingErrorArmed { device: DeviceId, direction: TransferDirection, kind: StallKind },
}

struct UsbDeviceState {
    info: UsbDeviceInfo,
    kind: BrickKind,
    connected: bool,
    expecting_removal: bool,
    /// Windows unplugs a RED Brick by stalling its read endpoint right
    /// before the device vanishes, rather than going straight to
    /// `NoDevice`/`Cancelled`. Consumed (set back to `false`) the first time
    /// a read stall is observed on this device.
    expecting_read_stall_before_removal: bool,
    just_reopened: bool,
    read_pool: TransferPool,
    write_pool: TransferPool,
    write_backlog: Queue<Vec<u8>>,
    dropped_backlog_count: u64,
    recipients: RecipientTable<()>,
    pending_error: Option<(TransferDirection, StallKind)>,
}

impl UsbDeviceState {
    fn new(info: UsbDeviceInfo, kind: BrickKind) -> UsbDeviceState {
        UsbDeviceState {
            info,
            kind,
            connected: true,
            expecting_removal: false,
            expecting_read_stall_before_removal: cfg!(target_os = "windows") && kind == BrickKind::RedBrick,
            just_reopened: false,
            read_pool: TransferPool::with_initial_capacity(READ_POOL_SIZE),
            write_pool: TransferPool::with_initial_capacity(WRITE_POOL_SIZE),
            write_backlog: Queue::new(),
            dropped_backlog_count: 0,
            recipients: RecipientTable::new(),
            pending_error: None,
        }
    }
}

/// Owns every known USB device's transport-level state: transfer pools,
/// write backlog, recipient table, and stall-recovery bookkeeping. Driven by
/// the reactor through `rescan`, `poll_device`, and the pending-error /
/// reopen helpers; never touches client or pending-request state directly.
pub struct UsbTransport<B: UsbBackend> {
    backend: B,
    devices: HashMap<DeviceId, UsbDeviceState>,
}

impl<B: UsbBackend> UsbTransport<B> {
    pub fn new(backend: B) -> UsbTransport<B> {
        UsbTransport { backend, devices: HashMap::new() }
    }

    /// Runs a full hot-plug rescan: lists devices, matches against what we
    /// already track, opens and claims newly appeared ones, and reports
    /// departures for stacks that vanished.
    pub fn rescan(&mut self) -> Result<Vec<UsbTransportEvent>, UsbBackendError> {
        let mut events = Vec::new();
        let discovered = self.backend.list_devices()?;

        for state in self.devices.values_mut() {
            state.connected = false;
        }

        for info in &discovered {
            if let Some(state) = self.devices.get_mut(&info.id) {
                state.connected = true;
                continue;
            }
            let Some(kind) = classify_device(info.vendor_id, info.product_id, info.release_number) else {
                continue;
            };
            if let Err(err) = self.open_and_claim(*info) {
                warn!(?info, %err, "failed to open newly discovered device");
                continue;
            }
            let mut state = UsbDeviceState::new(*info, kind);
            for _ in 0..READ_POOL_SIZE {
                state.read_pool.try_take_idle_bounded(READ_POOL_SIZE);
                let _ = self.backend.submit_read(info.id, 80);
            }
            self.devices.insert(info.id, state);
            events.push(UsbTransportEvent::DeviceConnected { device: info.id, kind });
        }

        let gone: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|(_, state)| !state.connected)
            .map(|(id, _)| *id)
            .collect();
        for id in gone {
            if let Some(state) = self.devices.remove(&id) {
                self.backend.cancel_all(id);
                self.backend.close(id);
                let orphaned_uids: Vec<u32> = state.recipients.iter().map(|(uid, _)| uid).collect();
                events.push(UsbTransportEvent::DeviceRemoved { device: id, orphaned_uids });
            }
        }

        Ok(events)
    }

    fn open_and_claim(&mut self, info: UsbDeviceInfo) -> Result<(), UsbBackendError> {
        self.backend.open(info.id)?;
        self.backend.claim_interface(info.id)
    }

    /// Drains completed transfers for `device` and returns the transport
    /// events they produce (parsed responses, stall arming, removal).
    pub fn poll_device(&mut self, device: DeviceId) -> Vec<UsbTransportEvent> {
        let completions = self.backend.poll_completions(device);
        let mut events = Vec::new();
        for (direction, outcome) in completions {
            match direction {
                TransferDirection::Read => self.handle_read_completion(device, outcome, &mut events),
                TransferDirection::Write => self.handle_write_completion(device, outcome),
            }
        }
        events
    }

    fn handle_read_completion(
        &mut self,
        device: DeviceId,
        outcome: TransferOutcome,
        events: &mut Vec<UsbTransportEvent>,
    ) {
        let just_reopened = match self.devices.get_mut(&device) {
            Some(state) => {
                state.read_pool.release_one();
                let just_reopened = state.just_reopened;
                state.just_reopened = false;
                just_reopened
            }
            None => return,
        };

        match outcome {
            TransferOutcome::NoDevice | TransferOutcome::Cancelled => {
                if let Some(state) = self.devices.get_mut(&device) {
                    state.expecting_removal = true;
                }
            }
            TransferOutcome::Stalled
                if self.devices.get(&device).is_some_and(|s| s.expecting_read_stall_before_removal) =>
            {
                if let Some(state) = self.devices.get_mut(&device) {
                    state.expecting_read_stall_before_removal = false;
                    state.expecting_removal = true;
                }
            }
            TransferOutcome::Stalled | TransferOutcome::Unspecified => {
                let kind = if matches!(outcome, TransferOutcome::Stalled) {
                    StallKind::Stall
                } else {
                    StallKind::Unspecified
                };
                if let Some(state) = self.devices.get_mut(&device) {
                    state.pending_error = Some((TransferDirection::Read, kind));
                }
                events.push(UsbTransportEvent::PendingErrorArmed { device, direction: TransferDirection::Read, kind });
            }
            TransferOutcome::Completed(bytes) => {
                self.parse_read_payload(device, &bytes, just_reopened, events);
                if let Some(state) = self.devices.get_mut(&device) {
                    state.read_pool.try_take_idle_bounded(READ_POOL_SIZE);
                }
                let _ = self.backend.submit_read(device, 80);
            }
        }
    }

    fn parse_read_payload(
        &mut self,
        device: DeviceId,
        bytes: &[u8],
        just_reopened: bool,
        events: &mut Vec<UsbTransportEvent>,
    ) {
        if bytes.len() < HEADER_LEN {
            let is_boot_quirk_byte = bytes.len() == 1 && RED_BRICK_BOOT_QUIRK_BYTES.contains(&bytes[0]);
            if just_reopened && is_boot_quirk_byte {
                debug!(?device, "dropped RED Brick boot-quirk byte");
            } else {
                warn!(?device, len = bytes.len(), "short USB read below header size");
            }
            return;
        }

        let mut offset = 0;
        while offset + HEADER_LEN <= bytes.len() {
            let packet = match Packet::parse(&bytes[offset..]) {
                Ok(packet) => packet,
                Err(HeaderError::Truncated(_)) => break,
                Err(err) => {
                    warn!(?device, %err, "malformed packet on USB read");
                    break;
                }
            };
            let total_len = packet.header.length as usize;
            if let Some(state) = self.devices.get_mut(&device) {
                state.recipients.upsert(packet.header.uid, ());
            }
            events.push(UsbTransportEvent::ResponseReceived { device, payload: packet.to_bytes() });
            offset += total_len;
        }
    }

    fn handle_write_completion(&mut self, device: DeviceId, outcome: TransferOutcome) {
        let Some(state) = self.devices.get_mut(&device) else { return };
        match outcome {
            TransferOutcome::NoDevice | TransferOutcome::Cancelled => {
                state.expecting_removal = true;
            }
            TransferOutcome::Stalled | TransferOutcome::Unspecified => {
                let kind = if matches!(outcome, TransferOutcome::Stalled) {
                    StallKind::Stall
                } else {
                    StallKind::Unspecified
                };
                state.pending_error = Some((TransferDirection::Write, kind));
            }
            TransferOutcome::Completed(_) => {
                state.write_pool.release_one();
                if let Some(next) = state.write_backlog.pop() {
                    state.write_pool.try_take_idle_bounded(WRITE_POOL_SIZE);
                    let _ = self.backend.submit_write(device, next);
                }
            }
        }
    }

    /// Sends `payload` to `device`: tries a free write transfer first,
    /// falling back to the backlog (dropping the oldest entry on overflow).
    pub fn dispatch_request(&mut self, device: DeviceId, payload: Vec<u8>) {
        let Some(state) = self.devices.get_mut(&device) else { return };
        if state.write_pool.try_take_idle_bounded(WRITE_POOL_SIZE).is_some() {
            if self.backend.submit_write(device, payload).is_ok() {
                return;
            }
        }
        if state.write_backlog.len() >= WRITE_BACKLOG_CAPACITY {
            state.write_backlog.pop();
            state.dropped_backlog_count += 1;
        }
        state.write_backlog.push(payload);
    }

    /// Called once the 1-second pending-error timer for `device` elapses.
    /// Attempts `clear_halt`; on success resubmits stalled reads, on
    /// `NO_DEVICE` marks the device for removal, otherwise triggers reopen.
    pub fn resolve_pending_error(&mut self, device: DeviceId) -> UsbPendingErrorResolution {
        let Some((direction, _kind)) = self.devices.get(&device).and_then(|s| s.pending_error) else {
            return UsbPendingErrorResolution::NoOp;
        };
        match self.backend.clear_halt(device, direction) {
            Ok(()) => {
                if let Some(state) = self.devices.get_mut(&device) {
                    state.pending_error = None;
                }
                if direction == TransferDirection::Read {
                    let _ = self.backend.submit_read(device, 80);
                }
                UsbPendingErrorResolution::Recovered
            }
            Err(UsbBackendError::NoDevice(_)) => {
                if let Some(state) = self.devices.get_mut(&device) {
                    state.expecting_removal = true;
                }
                UsbPendingErrorResolution::DeviceGone
            }
            Err(_) => UsbPendingErrorResolution::ReopenRequired,
        }
    }

    /// Destroys and recreates a device's transport state in place,
    /// preserving its recipient table across the transition so in-flight
    /// routing survives a stall-triggered reopen. On failure the orphaned
    /// recipients are announced as a disconnect instead of silently
    /// dropped. Either way, finishes with a rescan so a device that failed
    /// to reopen gets a fresh chance to be picked back up.
    pub fn reopen(&mut self, device: DeviceId, info: UsbDeviceInfo) -> Vec<UsbTransportEvent> {
        let recipients = self.devices.remove(&device).map(|s| s.recipients).unwrap_or_default();
        self.backend.cancel_all(device);
        self.backend.close(device);

        let claimed =
            self.open_and_claim(info).ok().and_then(|()| {
                classify_device(info.vendor_id, info.product_id, info.release_number)
            });

        let mut events = Vec::new();
        match claimed {
            Some(kind) => {
                let mut state = UsbDeviceState::new(info, kind);
                state.recipients = recipients;
                state.just_reopened = true;
                self.devices.insert(device, state);
                for _ in 0..READ_POOL_SIZE {
                    let _ = self.backend.submit_read(device, 80);
                }
                info!(?device, "USB device reopened");
            }
            None => {
                warn!(?device, "USB reopen failed, announcing disconnect for orphaned recipients");
                let orphaned_uids: Vec<u32> = recipients.iter().map(|(uid, _)| uid).collect();
                events.push(UsbTransportEvent::DeviceRemoved { device, orphaned_uids });
            }
        }

        match self.rescan() {
            Ok(rescan_events) => events.extend(rescan_events),
            Err(err) => warn!(%err, "rescan after reopen failed"),
        }

        events
    }

    pub fn is_expecting_removal(&self, device: DeviceId) -> bool {
        self.devices.get(&device).map(|s| s.expecting_removal).unwrap_or(false)
    }

    pub fn recipient_uids(&self, device: DeviceId) -> Vec<u32> {
        self.devices
            .get(&device)
            .map(|s| s.recipients.iter().map(|(uid, _)| uid).collect())
            .unwrap_or_default()
    }

    pub fn knows_recipient(&self, device: DeviceId, uid: u32) -> bool {
        self.devices.get(&device).is_some_and(|s| s.recipients.get(uid).is_some())
    }

    pub fn known_devices(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// The discovery-time info for a still-known device, needed by the
    /// caller to drive [`Self::reopen`] after a stall that `resolve_pending_error`
    /// could not clear in place.
    pub fn device_info(&self, device: DeviceId) -> Option<UsbDeviceInfo> {
        self.devices.get(&device).map(|s| s.info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbPendingErrorResolution {
    NoOp,
    Recovered,
    DeviceGone,
    ReopenRequired,
}
