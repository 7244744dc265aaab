use std::time::Duration;

use bd_spi::{SpiBackend, SpiBackendError};
use bd_usb::{DeviceId, TransferDirection, TransferOutcome, UsbBackend, UsbBackendError, UsbDeviceInfo};

/// A [`UsbBackend`] that never sees a device. Lets integration tests stand
/// up a full daemon and drive the network/auth/pending-request paths
/// without a real bus.
#[derive(Default)]
pub struct NullUsbBackend;

impl UsbBackend for NullUsbBackend {
    fn list_devices(&mut self) -> Result<Vec<UsbDeviceInfo>, UsbBackendError> {
        Ok(Vec::new())
    }
    fn open(&mut self, _id: DeviceId) -> Result<(), UsbBackendError> {
        Ok(())
    }
    fn close(&mut self, _id: DeviceId) {}
    fn claim_interface(&mut self, _id: DeviceId) -> Result<(), UsbBackendError> {
        Ok(())
    }
    fn submit_read(&mut self, _id: DeviceId, _max_len: usize) -> Result<(), UsbBackendError> {
        Ok(())
    }
    fn submit_write(&mut self, _id: DeviceId, _data: Vec<u8>) -> Result<(), UsbBackendError> {
        Ok(())
    }
    fn poll_completions(&mut self, _id: DeviceId) -> Vec<(TransferDirection, TransferOutcome)> {
        Vec::new()
    }
    fn clear_halt(&mut self, _id: DeviceId, _direction: TransferDirection) -> Result<(), UsbBackendError> {
        Ok(())
    }
    fn cancel_all(&mut self, _id: DeviceId) {}
}

/// A [`SpiBackend`] with no slaves present: every probe during discovery
/// comes back silent, so `SpiBus::discover` finds nothing and the driver
/// thread just idles.
#[derive(Default)]
pub struct NullSpiBackend;

impl SpiBackend for NullSpiBackend {
    fn transceive(&mut self, _slave_index: u8, _tx: &[u8]) -> Result<Vec<u8>, SpiBackendError> {
        Err(SpiBackendError::Transceive("no hardware attached".into()))
    }
    fn reset_button_pressed(&mut self) -> bool {
        false
    }
    fn retry_delay(&self) -> Duration {
        Duration::ZERO
    }
}
