use anyhow::Context;
use bd_reactor::Reactor;
use bd_spi::LinuxSpiBackend;
use bd_usb::NusbBackend;
use brickd::config::load_config;
use brickd::daemon::Daemon;
use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        tracing::error!(%err, "brickd exiting");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = load_config().context("loading config")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        plain_port = config.listen.plain_port,
        websocket_port = config.listen.websocket_port,
        "brickd starting"
    );

    let usb_backend = NusbBackend::new();
    let spi_hw = &config.spi_hardware;
    let spi_backend = LinuxSpiBackend::open(
        &spi_hw.spi_path,
        &spi_hw.gpio_chip_path,
        &spi_hw.chip_select_offsets,
        spi_hw.reset_button_offset,
    )
    .context("opening SPI bus")?;

    let mut reactor = Reactor::new().context("initializing reactor")?;
    let mut daemon = Daemon::new(&config, usb_backend, spi_backend, &mut reactor).context("initializing daemon")?;

    reactor.run(&mut daemon).context("reactor loop exited with an error")?;
    Ok(())
}
