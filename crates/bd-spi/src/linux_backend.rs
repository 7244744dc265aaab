use std::io;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::backend::{SpiBackend, SpiBackendError};

/// [`SpiBackend`] grounded on `spidev` (full-duplex `/dev/spidevB.D` ioctl
/// transfers) and `gpio-cdev` (`/dev/gpiochipN` line requests), the standard
/// real Linux-userspace crates for this class of access. One GPIO output
/// line per slave drives chip-select; a dedicated input line watches the
/// reset button.
pub struct LinuxSpiBackend {
    spi: Spidev,
    chip_selects: Vec<LineHandle>,
    reset_button: LineHandle,
    reset_button_was_pressed: bool,
}

impl LinuxSpiBackend {
    pub fn open(
        spi_path: &str,
        gpio_chip_path: &str,
        chip_select_offsets: &[u32],
        reset_button_offset: u32,
    ) -> io::Result<LinuxSpiBackend> {
        let mut spi = Spidev::open(spi_path)?;
        let options =
            SpidevOptions::new().bits_per_word(8).max_speed_hz(1_000_000).mode(SpiModeFlags::SPI_MODE_0).build();
        spi.configure(&options)?;

        let mut chip = Chip::new(gpio_chip_path)?;
        let mut chip_selects = Vec::with_capacity(chip_select_offsets.len());
        for &offset in chip_select_offsets {
            let line = chip.get_line(offset)?.request(LineRequestFlags::OUTPUT, 1, "brickd-spi-cs")?;
            chip_selects.push(line);
        }
        let reset_button =
            chip.get_line(reset_button_offset)?.request(LineRequestFlags::INPUT, 0, "brickd-spi-reset")?;

        Ok(LinuxSpiBackend { spi, chip_selects, reset_button, reset_button_was_pressed: false })
    }

    fn select(&self, slave_index: u8) -> io::Result<()> {
        for (i, line) in self.chip_selects.iter().enumerate() {
            line.set_value(if i as u8 == slave_index { 0 } else { 1 })?;
        }
        Ok(())
    }

    fn deselect_all(&self) -> io::Result<()> {
        for line in &self.chip_selects {
            line.set_value(1)?;
        }
        Ok(())
    }
}

impl SpiBackend for LinuxSpiBackend {
    fn transceive(&mut self, slave_index: u8, tx: &[u8]) -> Result<Vec<u8>, SpiBackendError> {
        self.select(slave_index).map_err(|err| SpiBackendError::ChipSelect(err.to_string()))?;
        let mut rx = vec![0u8; tx.len()];
        let result = {
            let mut transfer = SpidevTransfer::read_write(tx, &mut rx);
            self.spi.transfer(&mut transfer)
        };
        let _ = self.deselect_all();
        result.map_err(|err| SpiBackendError::Transceive(err.to_string()))?;
        Ok(rx)
    }

    fn reset_button_pressed(&mut self) -> bool {
        let pressed = self.reset_button.get_value().unwrap_or(1) == 0;
        let edge = pressed && !self.reset_button_was_pressed;
        self.reset_button_was_pressed = pressed;
        edge
    }
}
