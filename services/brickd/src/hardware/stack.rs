use std::sync::{Arc, Mutex};

use bd_protocol::{Packet, UID_BROADCAST};
use bd_spi::{SpiBackend, SpiBus};
use bd_usb::{DeviceId, UsbBackend, UsbTransport};

use crate::hardware::enumerate::build_enumerate_disconnected;

/// Identifies one addressable routing target. USB stacks are one per
/// device; the SPI bus is a single object internally, but each slave on it
/// routes independently, so it is addressed by slave index.
///
/// `Local` is never constructed: the gadget-file/redapid local-API transport
/// it would identify is a named collaborator this repo doesn't implement.
/// The slot stays in the enum so a future local-stack implementation has a
/// routing identity to slot in without reshaping this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackId {
    Usb(DeviceId),
    SpiSlave(u8),
    Local,
}

/// Owns both hardware transports and implements the uid-routing decision
/// every request goes through before it reaches a transport's own
/// `dispatch_request`/`queue_request_for`. The SPI bus runs its round-robin
/// poll loop on a dedicated thread (see `crate::daemon::spi_driver`), so it
/// is shared behind a mutex rather than owned outright; USB is driven
/// directly from the reactor thread and needs no such sharing.
pub struct Hardware<UB: UsbBackend, SB: SpiBackend> {
    pub usb: UsbTransport<UB>,
    pub spi: Arc<Mutex<SpiBus<SB>>>,
}

impl<UB: UsbBackend, SB: SpiBackend> Hardware<UB, SB> {
    pub fn new(usb_backend: UB, spi_backend: SB) -> Hardware<UB, SB> {
        Hardware { usb: UsbTransport::new(usb_backend), spi: Arc::new(Mutex::new(SpiBus::new(spi_backend))) }
    }

    pub fn stack_ids(&self) -> Vec<StackId> {
        let mut ids: Vec<StackId> = self.usb.known_devices().into_iter().map(StackId::Usb).collect();
        let present_count = self.spi.lock().expect("SPI bus mutex poisoned").present_count();
        ids.extend((0..present_count).map(StackId::SpiSlave));
        ids
    }

    fn knows_recipient(&self, stack: StackId, uid: u32) -> bool {
        match stack {
            StackId::Usb(device) => self.usb.knows_recipient(device, uid),
            StackId::SpiSlave(slave) => self.spi.lock().expect("SPI bus mutex poisoned").knows_recipient(slave, uid),
            StackId::Local => false,
        }
    }

    fn dispatch_to(&mut self, stack: StackId, payload: Vec<u8>) {
        match stack {
            StackId::Usb(device) => self.usb.dispatch_request(device, payload),
            StackId::SpiSlave(slave) => {
                self.spi.lock().expect("SPI bus mutex poisoned").queue_request_for(slave, payload);
            }
            StackId::Local => {}
        }
    }

    /// Component F's `hardware_dispatch_request`: broadcasts on uid 0, or on
    /// any uid no stack has yet learned (stacks learn uids lazily from
    /// observed responses, so an unseen device still needs to hear the
    /// first request addressed to it).
    pub fn hardware_dispatch_request(&mut self, request: &Packet) {
        let stacks = self.stack_ids();
        if request.header.uid == UID_BROADCAST {
            for stack in stacks {
                self.dispatch_to(stack, request.to_bytes());
            }
            return;
        }
        let known_by_any = stacks.iter().any(|&stack| self.knows_recipient(stack, request.header.uid));
        if known_by_any {
            for stack in stacks {
                if self.knows_recipient(stack, request.header.uid) {
                    self.dispatch_to(stack, request.to_bytes());
                }
            }
        } else {
            for stack in stacks {
                self.dispatch_to(stack, request.to_bytes());
            }
        }
    }

    /// Synthesizes an `ENUMERATE_DISCONNECTED` callback for every uid a
    /// departing stack had taught us about.
    pub fn announce_disconnect(&self, stack: StackId) -> Vec<Packet> {
        let uids = match stack {
            StackId::Usb(device) => self.usb.recipient_uids(device),
            StackId::SpiSlave(slave) => self.spi.lock().expect("SPI bus mutex poisoned").recipient_uids(slave),
            StackId::Local => Vec::new(),
        };
        uids.into_iter().map(build_enumerate_disconnected).collect()
    }
}

/// The seam `Network` dispatches forwarded requests through, so it does not
/// need to know the concrete USB/SPI backend types `Hardware` is generic
/// over.
pub trait RequestRouter {
    fn dispatch(&mut self, request: &Packet);
}

impl<UB: UsbBackend, SB: SpiBackend> RequestRouter for Hardware<UB, SB> {
    fn dispatch(&mut self, request: &Packet) {
        self.hardware_dispatch_request(request);
    }
}
