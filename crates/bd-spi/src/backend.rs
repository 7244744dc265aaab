use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpiBackendError {
    #[error("SPI transceive failed: {0}")]
    Transceive(String),
    #[error("GPIO chip-select line request failed: {0}")]
    ChipSelect(String),
}

/// The seam between the per-slave polling state machine and the physical
/// bus. The production implementation is `LinuxSpiBackend`, built on
/// `spidev` (full-duplex `/dev/spidevB.D` ioctl transfers) and `gpio-cdev`
/// (`/dev/gpiochipN` line requests for chip-select and the reset button);
/// tests drive a `MockSpiBackend` that implements the same trait without
/// real hardware.
pub trait SpiBackend {
    /// Selects `slave_index`, performs a full-duplex transfer of `tx`, and
    /// deselects, returning the bytes shifted in.
    fn transceive(&mut self, slave_index: u8, tx: &[u8]) -> Result<Vec<u8>, SpiBackendError>;

    /// Non-blocking poll of the reset-button GPIO interrupt line. Returns
    /// `true` on a falling edge (button pressed) since the last call.
    fn reset_button_pressed(&mut self) -> bool;

    /// Spacing between discovery retry attempts. Defaults to the documented
    /// 50ms; a mock backend can shrink this to zero to keep tests fast.
    fn retry_delay(&self) -> Duration {
        Duration::from_millis(50)
    }
}
