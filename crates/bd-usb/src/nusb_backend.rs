use std::collections::HashMap;
use std::time::Duration;

use nusb::transfer::TransferError;
use nusb::{Device, Interface};

use crate::backend::{DeviceId, TransferDirection, TransferOutcome, UsbBackend, UsbBackendError, UsbDeviceInfo};

const BULK_ENDPOINT_IN: u8 = 0x82;
const BULK_ENDPOINT_OUT: u8 = 0x01;
const INTERFACE_NUMBER: u8 = 0;
const CLAIM_RETRIES: u32 = 10;
const CLAIM_RETRY_DELAY: Duration = Duration::from_millis(50);

struct OpenDevice {
    device: Device,
    interface: Option<Interface>,
}

impl OpenDevice {
    fn interface(&self, id: DeviceId) -> Result<&Interface, UsbBackendError> {
        self.interface.as_ref().ok_or(UsbBackendError::ClaimFailed(id))
    }
}

/// [`UsbBackend`] grounded on `nusb`, the cross-platform pure-Rust USB
/// access crate. Queues submitted transfers with `nusb`'s own bulk
/// in/out queue API and polls for completions non-blockingly, matching the
/// reactor's "never block in a callback" rule.
pub struct NusbBackend {
    open: HashMap<DeviceId, OpenDevice>,
}

impl NusbBackend {
    pub fn new() -> NusbBackend {
        NusbBackend { open: HashMap::new() }
    }
}

impl Default for NusbBackend {
    fn default() -> NusbBackend {
        NusbBackend::new()
    }
}

impl UsbBackend for NusbBackend {
    fn list_devices(&mut self) -> Result<Vec<UsbDeviceInfo>, UsbBackendError> {
        let devices = nusb::list_devices().map_err(|err| UsbBackendError::SubmitFailed(err.to_string()))?;
        Ok(devices
            .map(|info| UsbDeviceInfo {
                id: DeviceId { bus_number: info.bus_number(), device_address: info.device_address() },
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                release_number: info.device_version(),
            })
            .collect())
    }

    /// Opens the device handle. Interface claiming happens separately in
    /// [`claim_interface`](Self::claim_interface), matching the two-step
    /// open-then-claim sequence the discovery flow uses.
    fn open(&mut self, id: DeviceId) -> Result<(), UsbBackendError> {
        let matched = nusb::list_devices()
            .map_err(|err| UsbBackendError::SubmitFailed(err.to_string()))?
            .find(|info| info.bus_number() == id.bus_number && info.device_address() == id.device_address)
            .ok_or(UsbBackendError::NoDevice(id))?;
        let device = matched.open().map_err(|err| UsbBackendError::SubmitFailed(err.to_string()))?;
        self.open.insert(id, OpenDevice { device, interface: None });
        Ok(())
    }

    fn close(&mut self, id: DeviceId) {
        self.open.remove(&id);
    }

    fn claim_interface(&mut self, id: DeviceId) -> Result<(), UsbBackendError> {
        let entry = self.open.get(&id).ok_or(UsbBackendError::NoDevice(id))?;
        for attempt in 0..CLAIM_RETRIES {
            match entry.device.claim_interface(INTERFACE_NUMBER) {
                Ok(interface) => {
                    if let Some(open) = self.open.get_mut(&id) {
                        open.interface = Some(interface);
                    }
                    return Ok(());
                }
                Err(_) if attempt + 1 < CLAIM_RETRIES => std::thread::sleep(CLAIM_RETRY_DELAY),
                Err(_) => return Err(UsbBackendError::ClaimFailed(id)),
            }
        }
        Err(UsbBackendError::ClaimFailed(id))
    }

    fn submit_read(&mut self, id: DeviceId, max_len: usize) -> Result<(), UsbBackendError> {
        let open = self.open.get(&id).ok_or(UsbBackendError::NoDevice(id))?;
        open.interface(id)?.bulk_in_queue(BULK_ENDPOINT_IN).submit(max_len);
        Ok(())
    }

    fn submit_write(&mut self, id: DeviceId, data: Vec<u8>) -> Result<(), UsbBackendError> {
        let open = self.open.get(&id).ok_or(UsbBackendError::NoDevice(id))?;
        open.interface(id)?.bulk_out_queue(BULK_ENDPOINT_OUT).submit(data);
        Ok(())
    }

    fn poll_completions(&mut self, id: DeviceId) -> Vec<(TransferDirection, TransferOutcome)> {
        let Some(open) = self.open.get(&id) else { return Vec::new() };
        let Some(interface) = open.interface.as_ref() else { return Vec::new() };
        let mut completions = Vec::new();
        while let Some(completion) = interface.bulk_in_queue(BULK_ENDPOINT_IN).try_next_complete() {
            completions.push((TransferDirection::Read, map_outcome(completion.status, completion.data)));
        }
        while let Some(completion) = interface.bulk_out_queue(BULK_ENDPOINT_OUT).try_next_complete() {
            completions.push((TransferDirection::Write, map_outcome(completion.status, Vec::new())));
        }
        completions
    }

    fn clear_halt(&mut self, id: DeviceId, direction: TransferDirection) -> Result<(), UsbBackendError> {
        let open = self.open.get(&id).ok_or(UsbBackendError::NoDevice(id))?;
        let endpoint = match direction {
            TransferDirection::Read => BULK_ENDPOINT_IN,
            TransferDirection::Write => BULK_ENDPOINT_OUT,
        };
        open.interface(id)?.clear_halt(endpoint).map_err(|err| UsbBackendError::ClearHaltFailed(err.to_string()))
    }

    fn cancel_all(&mut self, id: DeviceId) {
        if let Some(interface) = self.open.get(&id).and_then(|o| o.interface.as_ref()) {
            interface.bulk_in_queue(BULK_ENDPOINT_IN).cancel_all();
            interface.bulk_out_queue(BULK_ENDPOINT_OUT).cancel_all();
        }
    }
}

fn map_outcome(status: Result<(), TransferError>, data: Vec<u8>) -> TransferOutcome {
    match status {
        Ok(()) => TransferOutcome::Completed(data),
        Err(TransferError::Stall) => TransferOutcome::Stalled,
        Err(TransferError::Disconnected) => TransferOutcome::NoDevice,
        Err(TransferError::Cancelled) => TransferOutcome::Cancelled,
        Err(_) => TransferOutcome::Unspecified,
    }
}
