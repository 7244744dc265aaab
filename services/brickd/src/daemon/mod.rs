//! Ties `Network`, `Hardware`, and the SPI driver thread together behind a
//! single [`bd_reactor::ReactorHandler`] implementation. This is the home of
//! Component K (USB rescan/poll) and the wiring for Component J's SPI
//! delivery path.

pub mod spi_driver;

use std::collections::HashMap;
use std::time::Duration;

use bd_protocol::Packet;
use bd_reactor::{Interest, Reactor, ReactorHandler, SourceId, TimerId};
use bd_spi::{SpiBackend, SpiBus, SpiBusEvent};
use bd_usb::{DeviceId, UsbBackend, UsbPendingErrorResolution, UsbTransportEvent};
use tracing::{debug, info, warn};

use crate::config::BrickdConfig;
use crate::hardware::{build_enumerate_disconnected, Hardware, StackId};
use crate::network::{ListenerKind, Network};
use crate::pending::ClientId;

use spi_driver::SpiDriver;

/// How often the USB transport re-lists devices, standing in for a real
/// platform hot-plug notification (see `UsbTransport::rescan`).
const USB_RESCAN_INTERVAL: Duration = Duration::from_millis(500);
/// How often every known USB device's completion queue is drained.
const USB_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long a stalled USB transfer is given before `resolve_pending_error`
/// is attempted.
const USB_PENDING_ERROR_DELAY: Duration = Duration::from_secs(1);
/// Matches the SPI driver thread's "avoid starving other sources" draining
/// policy: at most this many queued bus events are processed per wake-up.
const SPI_EVENTS_PER_WAKEUP: usize = 5;

/// What a registered reactor source is for, so `on_readable`/`on_writable`
/// can route without re-deriving it from the fd.
enum Source {
    Listener(ListenerKind),
    Client(ClientId),
    SpiWake,
}

/// The whole daemon process, minus `main`'s config-load and tracing-init
/// steps. Owns the network layer, the hardware stacks, and the SPI driver
/// thread; everything else is reactor plumbing.
pub struct Daemon<UB: UsbBackend, SB: SpiBackend + Send + 'static> {
    network: Network,
    hardware: Hardware<UB, SB>,
    spi_driver: SpiDriver,
    sources: HashMap<SourceId, Source>,
    usb_rescan_timer: TimerId,
    usb_poll_timer: TimerId,
    usb_pending_error_timers: HashMap<TimerId, DeviceId>,
    pending_client_retirement: Vec<ClientId>,
}

impl<UB: UsbBackend, SB: SpiBackend + Send + 'static> Daemon<UB, SB> {
    pub fn new(
        config: &BrickdConfig,
        usb_backend: UB,
        spi_backend: SB,
        reactor: &mut Reactor,
    ) -> std::io::Result<Daemon<UB, SB>> {
        let network = Network::new(config)?;
        let hardware = Hardware::new(usb_backend, spi_backend);
        let spi_poll_delay = Duration::from_micros(config.poll_delay.spi_micros);
        let spi_driver = SpiDriver::spawn(std::sync::Arc::clone(&hardware.spi), spi_poll_delay)?;

        let mut sources = HashMap::new();
        for (fd, kind) in network.listener_fds() {
            let source_id = reactor.add_source(fd, Interest::Read).map_err(std::io::Error::other)?;
            sources.insert(source_id, Source::Listener(kind));
        }
        let spi_source = reactor.add_source(spi_driver.raw_fd(), Interest::Read).map_err(std::io::Error::other)?;
        sources.insert(spi_source, Source::SpiWake);

        let usb_rescan_timer = reactor.schedule_timer_after(USB_RESCAN_INTERVAL);
        let usb_poll_timer = reactor.schedule_timer_after(USB_POLL_INTERVAL);

        Ok(Daemon {
            network,
            hardware,
            spi_driver,
            sources,
            usb_rescan_timer,
            usb_poll_timer,
            usb_pending_error_timers: HashMap::new(),
            pending_client_retirement: Vec::new(),
        })
    }

    fn accept_on(&mut self, reactor: &mut Reactor, kind: ListenerKind) {
        loop {
            match self.network.accept(kind) {
                Ok(Some((client_id, addr))) => {
                    let Some(client) = self.network.client(client_id) else { continue };
                    let fd = client.raw_fd();
                    match reactor.add_source(fd, Interest::ReadWrite) {
                        Ok(source_id) => {
                            if let Some(client) = self.network.client_mut(client_id) {
                                client.source_id = Some(source_id);
                            }
                            self.sources.insert(source_id, Source::Client(client_id));
                            debug!(%addr, "client connected");
                        }
                        Err(err) => warn!(%err, "failed to register new client with reactor"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn handle_client_readable(&mut self, client_id: ClientId) {
        let packets = self.network.read_client(client_id);
        for packet in packets {
            self.network.handle_client_request(client_id, packet, &mut self.hardware);
        }
    }

    fn handle_usb_event(&mut self, reactor: &mut Reactor, event: UsbTransportEvent) {
        match event {
            UsbTransportEvent::ResponseReceived { payload, .. } => match Packet::parse(&payload) {
                Ok(packet) => self.network.dispatch_response(&packet),
                Err(err) => warn!(%err, "malformed packet from USB device"),
            },
            UsbTransportEvent::DeviceConnected { device, kind } => {
                info!(?device, ?kind, "USB device connected");
            }
            UsbTransportEvent::DeviceRemoved { orphaned_uids, .. } => {
                for uid in orphaned_uids {
                    self.network.dispatch_response(&build_enumerate_disconnected(uid));
                }
            }
            UsbTransportEvent::PendingErrorArmed { device, direction, kind } => {
                debug!(?device, ?direction, ?kind, "USB transfer stalled, arming recovery timer");
                let timer = reactor.schedule_timer_after(USB_PENDING_ERROR_DELAY);
                self.usb_pending_error_timers.insert(timer, device);
            }
        }
    }

    fn handle_spi_event(&mut self, event: SpiBusEvent) {
        match event {
            SpiBusEvent::ResponseReceived { payload, .. } => match Packet::parse(&payload) {
                Ok(packet) => self.network.dispatch_response(&packet),
                Err(err) => warn!(%err, "malformed packet from SPI slave"),
            },
            SpiBusEvent::SlaveDiscovered { slave_index } => {
                info!(slave_index, "SPI slave discovered");
            }
            SpiBusEvent::FrameDesynced { slave_index, reason } => {
                warn!(slave_index, reason, "SPI frame desynced, next frame will be empty");
            }
            SpiBusEvent::SlaveReset { slave_index, orphaned_uids } => {
                info!(slave_index, "SPI bus reset, rediscovering slaves");
                for uid in orphaned_uids {
                    self.network.dispatch_response(&build_enumerate_disconnected(uid));
                }
            }
        }
    }

    fn resolve_usb_pending_error(&mut self, reactor: &mut Reactor, device: DeviceId) {
        match self.hardware.usb.resolve_pending_error(device) {
            UsbPendingErrorResolution::NoOp | UsbPendingErrorResolution::Recovered => {}
            UsbPendingErrorResolution::DeviceGone => {
                let packets = self.hardware.announce_disconnect(StackId::Usb(device));
                for packet in packets {
                    self.network.dispatch_response(&packet);
                }
            }
            UsbPendingErrorResolution::ReopenRequired => {
                let Some(info) = self.hardware.usb.device_info(device) else { return };
                for event in self.hardware.usb.reopen(device, info) {
                    self.handle_usb_event(reactor, event);
                }
            }
        }
    }
}

impl<UB: UsbBackend, SB: SpiBackend + Send + 'static> ReactorHandler for Daemon<UB, SB> {
    fn on_readable(&mut self, reactor: &mut Reactor, id: SourceId) {
        let Some(source) = self.sources.get(&id) else {
            warn!("readable event for unknown source");
            return;
        };
        match *source {
            Source::Listener(kind) => self.accept_on(reactor, kind),
            Source::Client(client_id) => self.handle_client_readable(client_id),
            Source::SpiWake => {
                self.spi_driver.drain_wake();
                for event in self.spi_driver.drain(SPI_EVENTS_PER_WAKEUP) {
                    self.handle_spi_event(event);
                }
            }
        }
    }

    fn on_writable(&mut self, _reactor: &mut Reactor, id: SourceId) {
        if let Some(Source::Client(client_id)) = self.sources.get(&id) {
            self.network.drain_client(*client_id);
        }
    }

    fn on_timer(&mut self, reactor: &mut Reactor, id: TimerId) {
        if id == self.usb_rescan_timer {
            match self.hardware.usb.rescan() {
                Ok(events) => {
                    for event in events {
                        self.handle_usb_event(reactor, event);
                    }
                }
                Err(err) => warn!(%err, "USB rescan failed"),
            }
            self.usb_rescan_timer = reactor.schedule_timer_after(USB_RESCAN_INTERVAL);
        } else if id == self.usb_poll_timer {
            let devices = self.hardware.usb.known_devices();
            for device in devices {
                let events = self.hardware.usb.poll_device(device);
                for event in events {
                    self.handle_usb_event(reactor, event);
                }
            }
            self.usb_poll_timer = reactor.schedule_timer_after(USB_POLL_INTERVAL);
        } else if let Some(device) = self.usb_pending_error_timers.remove(&id) {
            self.resolve_usb_pending_error(reactor, device);
        } else {
            self.network.zombie_timer_fired(id);
        }
    }

    fn on_iteration_cleanup(&mut self, reactor: &mut Reactor) {
        for client_id in std::mem::take(&mut self.pending_client_retirement) {
            self.network.retire_client(client_id, reactor);
        }

        for client_id in self.network.disconnected_clients() {
            if let Some(source_id) = self.network.client(client_id).and_then(|c| c.source_id) {
                reactor.remove_source(source_id);
                self.sources.remove(&source_id);
            }
            self.pending_client_retirement.push(client_id);
        }

        self.network.reap_finished_zombies(reactor);
    }
}
