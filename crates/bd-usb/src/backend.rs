use thiserror::Error;

/// Identifies a physical USB device by bus topology rather than by a handle,
/// so a device that briefly disappears and reappears at the same bus
/// position can be recognized across a rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub bus_number: u8,
    pub device_address: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub release_number: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Read,
    Write,
}

/// What became of a submitted transfer once the backend reports completion.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed(Vec<u8>),
    Stalled,
    NoDevice,
    Cancelled,
    Unspecified,
}

#[derive(Debug, Clone, Error)]
pub enum UsbBackendError {
    #[error("device {0:?} is no longer present")]
    NoDevice(DeviceId),
    #[error("failed to claim interface on device {0:?}")]
    ClaimFailed(DeviceId),
    #[error("transfer submission failed: {0}")]
    SubmitFailed(String),
    #[error("clear_halt failed: {0}")]
    ClearHaltFailed(String),
}

/// The seam between the daemon's stall-recovery / hot-plug state machine and
/// the platform USB stack. The production implementation is backed by
/// `nusb`; tests drive a `MockUsbBackend` that implements the same trait
/// without touching real hardware.
pub trait UsbBackend {
    fn list_devices(&mut self) -> Result<Vec<UsbDeviceInfo>, UsbBackendError>;

    fn open(&mut self, id: DeviceId) -> Result<(), UsbBackendError>;

    fn close(&mut self, id: DeviceId);

    /// Claims interface 0, retrying internally per the documented cadence
    /// (up to 10 attempts, 50ms apart) before giving up.
    fn claim_interface(&mut self, id: DeviceId) -> Result<(), UsbBackendError>;

    fn submit_read(&mut self, id: DeviceId, max_len: usize) -> Result<(), UsbBackendError>;

    fn submit_write(&mut self, id: DeviceId, data: Vec<u8>) -> Result<(), UsbBackendError>;

    /// Polls for completed transfers without blocking; called once per
    /// reactor wake-up for this device's fd.
    fn poll_completions(&mut self, id: DeviceId) -> Vec<(TransferDirection, TransferOutcome)>;

    fn clear_halt(&mut self, id: DeviceId, direction: TransferDirection) -> Result<(), UsbBackendError>;

    fn cancel_all(&mut self, id: DeviceId);
}
