//! Daemon configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/brickd/brickd.toml`.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "/etc/brickd/brickd.toml";
const DEFAULT_PLAIN_PORT: u16 = 4223;
const DEFAULT_WEBSOCKET_PORT: u16 = 4280;
const DEFAULT_SPI_POLL_DELAY_MICROS: u64 = 50;
const DEFAULT_RS485_POLL_DELAY_MICROS: u64 = 500;
const DEFAULT_SPI_DEVICE_PATH: &str = "/dev/spidev0.0";
const DEFAULT_GPIO_CHIP_PATH: &str = "/dev/gpiochip0";
const DEFAULT_CHIP_SELECT_OFFSETS: [u32; 8] = [5, 6, 13, 19, 26, 16, 20, 21];
const DEFAULT_RESET_BUTTON_OFFSET: u32 = 17;

// ---------------------------------------------------------------------------
// Config types (validated, defaulted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BrickdConfig {
    pub authentication: AuthenticationConfig,
    pub listen: ListenConfig,
    pub poll_delay: PollDelayConfig,
    pub spi_hardware: SpiHardwareConfig,
}

#[derive(Debug, Clone)]
pub struct AuthenticationConfig {
    /// `None` disables authentication entirely.
    pub secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub address: IpAddr,
    pub plain_port: u16,
    pub websocket_port: u16,
    pub dual_stack: bool,
}

#[derive(Debug, Clone)]
pub struct PollDelayConfig {
    pub spi_micros: u64,
    pub rs485_micros: u64,
}

/// Which `/dev/spidevB.D` device and `/dev/gpiochipN` lines `LinuxSpiBackend`
/// opens. Defaults match the RED Brick's reference wiring.
#[derive(Debug, Clone)]
pub struct SpiHardwareConfig {
    pub spi_path: String,
    pub gpio_chip_path: String,
    pub chip_select_offsets: Vec<u32>,
    pub reset_button_offset: u32,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    authentication: Option<RawAuthenticationConfig>,
    listen: Option<RawListenConfig>,
    poll_delay: Option<RawPollDelayConfig>,
    spi_hardware: Option<RawSpiHardwareConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAuthenticationConfig {
    secret: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawListenConfig {
    address: Option<String>,
    plain_port: Option<u16>,
    websocket_port: Option<u16>,
    dual_stack: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPollDelayConfig {
    spi_micros: Option<u64>,
    rs485_micros: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSpiHardwareConfig {
    spi_path: Option<String>,
    gpio_chip_path: Option<String>,
    chip_select_offsets: Option<Vec<u32>>,
    reset_button_offset: Option<u32>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config() -> Result<BrickdConfig, ConfigError> {
    load_config_from_path(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_config_from_path(path: &Path) -> Result<BrickdConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<BrickdConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    let authentication = AuthenticationConfig { secret: raw.authentication.unwrap_or_default().secret };

    let raw_listen = raw.listen.unwrap_or_default();
    let address = match raw_listen.address {
        Some(s) => s
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("listen.address '{s}' is not a valid IP address")))?,
        None => IpAddr::from([0, 0, 0, 0]),
    };
    let listen = ListenConfig {
        address,
        plain_port: raw_listen.plain_port.unwrap_or(DEFAULT_PLAIN_PORT),
        websocket_port: raw_listen.websocket_port.unwrap_or(DEFAULT_WEBSOCKET_PORT),
        dual_stack: raw_listen.dual_stack.unwrap_or(false),
    };

    let raw_poll_delay = raw.poll_delay.unwrap_or_default();
    let poll_delay = PollDelayConfig {
        spi_micros: raw_poll_delay.spi_micros.unwrap_or(DEFAULT_SPI_POLL_DELAY_MICROS),
        rs485_micros: raw_poll_delay.rs485_micros.unwrap_or(DEFAULT_RS485_POLL_DELAY_MICROS),
    };

    let raw_spi_hardware = raw.spi_hardware.unwrap_or_default();
    let spi_hardware = SpiHardwareConfig {
        spi_path: raw_spi_hardware.spi_path.unwrap_or_else(|| DEFAULT_SPI_DEVICE_PATH.to_owned()),
        gpio_chip_path: raw_spi_hardware.gpio_chip_path.unwrap_or_else(|| DEFAULT_GPIO_CHIP_PATH.to_owned()),
        chip_select_offsets: raw_spi_hardware.chip_select_offsets.unwrap_or_else(|| DEFAULT_CHIP_SELECT_OFFSETS.to_vec()),
        reset_button_offset: raw_spi_hardware.reset_button_offset.unwrap_or(DEFAULT_RESET_BUTTON_OFFSET),
    };

    Ok(BrickdConfig { authentication, listen, poll_delay, spi_hardware })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_documented_defaults() {
        let cfg = load_config_from_str("").unwrap();
        assert!(cfg.authentication.secret.is_none());
        assert_eq!(cfg.listen.plain_port, DEFAULT_PLAIN_PORT);
        assert_eq!(cfg.listen.websocket_port, DEFAULT_WEBSOCKET_PORT);
        assert!(!cfg.listen.dual_stack);
        assert_eq!(cfg.poll_delay.spi_micros, DEFAULT_SPI_POLL_DELAY_MICROS);
        assert_eq!(cfg.spi_hardware.spi_path, DEFAULT_SPI_DEVICE_PATH);
        assert_eq!(cfg.spi_hardware.chip_select_offsets, DEFAULT_CHIP_SELECT_OFFSETS.to_vec());
    }

    #[test]
    fn explicit_spi_hardware_paths_are_honored() {
        let toml_str = r#"
            [spi_hardware]
            spi_path = "/dev/spidev1.0"
            gpio_chip_path = "/dev/gpiochip1"
            chip_select_offsets = [1, 2]
            reset_button_offset = 9
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.spi_hardware.spi_path, "/dev/spidev1.0");
        assert_eq!(cfg.spi_hardware.gpio_chip_path, "/dev/gpiochip1");
        assert_eq!(cfg.spi_hardware.chip_select_offsets, vec![1, 2]);
        assert_eq!(cfg.spi_hardware.reset_button_offset, 9);
    }

    #[test]
    fn explicit_secret_and_ports_are_honored() {
        let toml_str = r#"
            [authentication]
            secret = "topsecret"

            [listen]
            address = "127.0.0.1"
            plain_port = 4000
            websocket_port = 4001
            dual_stack = true

            [poll_delay]
            spi_micros = 10
            rs485_micros = 20
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.authentication.secret.as_deref(), Some("topsecret"));
        assert_eq!(cfg.listen.address, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(cfg.listen.plain_port, 4000);
        assert_eq!(cfg.listen.websocket_port, 4001);
        assert!(cfg.listen.dual_stack);
        assert_eq!(cfg.poll_delay.spi_micros, 10);
        assert_eq!(cfg.poll_delay.rs485_micros, 20);
    }

    #[test]
    fn rejects_unparseable_address() {
        let err = load_config_from_str("[listen]\naddress = \"not-an-ip\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = load_config_from_str("not valid toml {{{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
