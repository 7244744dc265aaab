use std::thread;
use std::time::Duration;

use bd_protocol::{HeaderError, Packet};
use tracing::{debug, info, warn};

use crate::backend::{SpiBackend, SpiBackendError};
use crate::frame::{Frame, FrameError};
use crate::slave::{SlaveState, MAX_SLAVES, SEQUENCE_MASK};

const DISCOVERY_RETRIES: u32 = 10;
const BOOT_DELAY_AFTER_RESET: Duration = Duration::from_millis(1500);

#[derive(Debug)]
pub enum SpiBusEvent {
    SlaveDiscovered { slave_index: u8 },
    ResponseReceived { slave_index: u8, payload: Vec<u8> },
    FrameDesynced { slave_index: u8, reason: String },
    /// The reset button cleared every slave's learned state. Carries the
    /// uids each previously-present slave had taught us about, since that
    /// information is gone by the time discovery runs again.
    SlaveReset { slave_index: u8, orphaned_uids: Vec<u32> },
}

/// The round-robin RED Brick master: discovers present slaves, then cycles
/// them forever, each cycle either delivering a queued request or polling
/// with an empty frame. Intended to run on its own thread — the reactor
/// never touches slave state directly, it only drains the events this bus
/// produces.
pub struct SpiBus<B: SpiBackend> {
    backend: B,
    slaves: Vec<SlaveState>,
    present_count: u8,
}

impl<B: SpiBackend> SpiBus<B> {
    pub fn new(backend: B) -> SpiBus<B> {
        let slaves = (0..MAX_SLAVES).map(|_| SlaveState::absent()).collect();
        SpiBus { backend, slaves, present_count: 0 }
    }

    pub fn present_count(&self) -> u8 {
        self.present_count
    }

    pub fn queue_request(&mut self, slave_index: u8, payload: Vec<u8>) {
        if let Some(slave) = self.slaves.get_mut(slave_index as usize) {
            slave.request_queue.push(payload);
        }
    }

    /// Probes stack addresses 0..7 in order, stopping at the first address
    /// that never responds (addresses are assigned contiguously by the
    /// hardware, so a gap means there are no more slaves on the bus).
    pub fn discover(&mut self) -> Vec<SpiBusEvent> {
        let mut events = Vec::new();
        let mut present_count = 0u8;
        for slave_index in 0..MAX_SLAVES as u8 {
            if !self.probe_slave(slave_index) {
                break;
            }
            self.slaves[slave_index as usize] = SlaveState { present: true, ..SlaveState::absent() };
            present_count += 1;
            events.push(SpiBusEvent::SlaveDiscovered { slave_index });

            if let Some(payload) = self.poll_for_enumeration(slave_index) {
                if let Some(event) = self.ingest_payload(slave_index, payload) {
                    events.push(event);
                }
            }
        }
        self.present_count = present_count;
        info!(present_count, "SPI discovery complete");
        events
    }

    fn probe_slave(&mut self, slave_index: u8) -> bool {
        let frame = Frame::empty(0, 0).encode().expect("empty frame always encodes");
        for _ in 0..DISCOVERY_RETRIES {
            if let Ok(resp) = self.backend.transceive(slave_index, &frame) {
                if Frame::decode(&resp).is_ok() {
                    return true;
                }
            }
            thread::sleep(self.backend.retry_delay());
        }
        false
    }

    fn poll_for_enumeration(&mut self, slave_index: u8) -> Option<Vec<u8>> {
        for _ in 0..DISCOVERY_RETRIES {
            let frame = Frame::empty(0, 0).encode().ok()?;
            if let Ok(resp) = self.backend.transceive(slave_index, &frame) {
                if let Ok(decoded) = Frame::decode(&resp) {
                    if !decoded.payload.is_empty() {
                        return Some(decoded.payload);
                    }
                }
            }
            thread::sleep(self.backend.retry_delay());
        }
        None
    }

    /// Runs one round-robin step for `slave_index`. Call in a loop over
    /// `0..present_count()`.
    pub fn poll_once(&mut self, slave_index: u8) -> Option<SpiBusEvent> {
        let idx = slave_index as usize;
        let slave = self.slaves.get(idx)?;
        if !slave.present {
            return None;
        }

        let (tx_frame, sent_seq) = self.build_outbound_frame(idx);
        let rx = match self.backend.transceive(slave_index, &tx_frame) {
            Ok(rx) => rx,
            Err(SpiBackendError::Transceive(reason)) | Err(SpiBackendError::ChipSelect(reason)) => {
                self.slaves[idx].next_frame_empty = true;
                return Some(SpiBusEvent::FrameDesynced { slave_index, reason });
            }
        };

        let decoded = match Frame::decode(&rx) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.slaves[idx].next_frame_empty = true;
                return Some(SpiBusEvent::FrameDesynced { slave_index, reason: err.to_string() });
            }
        };
        self.slaves[idx].next_frame_empty = false;

        match sent_seq {
            Some(sent_seq) => {
                if decoded.master_seq == sent_seq {
                    self.slaves[idx].request_queue.pop();
                    self.slaves[idx].seq_master = sent_seq;
                    return None;
                }
            }
            None => {
                // No packet was sent this cycle, but the echoed master_seq still
                // has to be advanced past — otherwise a later real send could
                // land on a master_seq the slave already echoed here and get
                // mistaken for an ACK of that earlier (nonexistent) send.
                let seq_master = self.slaves[idx].seq_master;
                let seq_inc = (seq_master + 1) & SEQUENCE_MASK;
                if decoded.master_seq == seq_master || seq_inc != decoded.master_seq {
                    self.slaves[idx].seq_master = seq_inc;
                } else {
                    self.slaves[idx].next_frame_empty = true;
                }
            }
        }

        if decoded.slave_seq == self.slaves[idx].seq_slave {
            return None;
        }
        self.slaves[idx].seq_slave = decoded.slave_seq;
        if decoded.payload.is_empty() {
            return None;
        }
        self.ingest_payload(slave_index, decoded.payload)
    }

    fn build_outbound_frame(&self, idx: usize) -> (Vec<u8>, Option<u8>) {
        let slave = &self.slaves[idx];
        if !slave.next_frame_empty {
            if let Some(payload) = slave.request_queue.peek() {
                let sent_seq = slave.next_sent_seq();
                let frame = Frame { payload: payload.clone(), master_seq: sent_seq, slave_seq: slave.seq_slave };
                return (frame.encode().expect("queued request fits a frame"), Some(sent_seq));
            }
        }
        let frame = Frame::empty(slave.seq_master, slave.seq_slave);
        (frame.encode().expect("empty frame always encodes"), None)
    }

    fn ingest_payload(&mut self, slave_index: u8, payload: Vec<u8>) -> Option<SpiBusEvent> {
        match Packet::parse(&payload) {
            Ok(packet) => {
                if let Some(slave) = self.slaves.get_mut(slave_index as usize) {
                    slave.recipients.upsert(packet.header.uid, ());
                }
                Some(SpiBusEvent::ResponseReceived { slave_index, payload: packet.to_bytes() })
            }
            Err(HeaderError::Truncated(_)) => None,
            Err(err) => {
                warn!(slave_index, %err, "malformed packet from SPI slave");
                None
            }
        }
    }

    /// Non-blocking check for a reset-button falling edge, for a caller that
    /// wants to decide for itself when to run [`Self::handle_reset_button`].
    pub fn poll_reset_button(&mut self) -> bool {
        self.backend.reset_button_pressed()
    }

    /// Handles a reset-button falling edge: stops treating the bus as
    /// discovered, waits for release (delegated to the backend) plus the
    /// boot delay, clears all slave state, and rediscovers.
    pub fn handle_reset_button(&mut self) -> Vec<SpiBusEvent> {
        debug!("SPI reset button pressed, waiting for release");
        while self.backend.reset_button_pressed() {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(BOOT_DELAY_AFTER_RESET);

        let mut events: Vec<SpiBusEvent> = self
            .slaves
            .iter()
            .enumerate()
            .filter(|(_, slave)| slave.present)
            .map(|(slave_index, slave)| SpiBusEvent::SlaveReset {
                slave_index: slave_index as u8,
                orphaned_uids: slave.recipients.iter().map(|(uid, _)| uid).collect(),
            })
            .collect();

        for slave in &mut self.slaves {
            *slave = SlaveState::absent();
        }
        self.present_count = 0;
        events.extend(self.discover());
        events
    }

    pub fn knows_recipient(&self, slave_index: u8, uid: u32) -> bool {
        self.slaves.get(slave_index as usize).is_some_and(|s| s.recipients.get(uid).is_some())
    }

    pub fn recipient_uids(&self, slave_index: u8) -> Vec<u32> {
        self.slaves.get(slave_index as usize).map(|s| s.recipients.iter().map(|(uid, _)| uid).collect()).unwrap_or_default()
    }

    pub fn queue_request_for(&mut self, slave_index: u8, payload: Vec<u8>) -> bool {
        if self.slaves.get(slave_index as usize).is_some_and(|s| s.present) {
            self.queue_request(slave_index, payload);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockSpiBackend {
        responses: VecDeque<Result<Vec<u8>, SpiBackendError>>,
        reset_pressed: bool,
    }

    impl SpiBackend for MockSpiBackend {
        fn transceive(&mut self, _slave_index: u8, _tx: &[u8]) -> Result<Vec<u8>, SpiBackendError> {
            self.responses.pop_front().unwrap_or_else(|| Err(SpiBackendError::Transceive("no fixture".into())))
        }
        fn reset_button_pressed(&mut self) -> bool {
            std::mem::take(&mut self.reset_pressed)
        }
        fn retry_delay(&self) -> Duration {
            Duration::ZERO
        }
    }

    fn ack_bytes() -> Vec<u8> {
        Frame::empty(0, 0).encode().unwrap()
    }

    #[test]
    fn poll_reset_button_delegates_to_backend() {
        let mut bus = SpiBus::new(MockSpiBackend::default());
        assert!(!bus.poll_reset_button());
        bus.backend.reset_pressed = true;
        assert!(bus.poll_reset_button());
        assert!(!bus.poll_reset_button());
    }

    #[test]
    fn discover_stops_at_first_silent_address() {
        let mut backend = MockSpiBackend::default();
        // slave 0 responds, slave 1 never does.
        backend.responses.push_back(Ok(ack_bytes()));
        for _ in 0..DISCOVERY_RETRIES {
            backend.responses.push_back(Ok(ack_bytes()));
        }
        for _ in 0..DISCOVERY_RETRIES {
            backend.responses.push_back(Err(SpiBackendError::Transceive("silent".into())));
        }
        let mut bus = SpiBus::new(backend);
        let events = bus.discover();
        assert_eq!(bus.present_count(), 1);
        assert!(events.iter().any(|e| matches!(e, SpiBusEvent::SlaveDiscovered { slave_index: 0 })));
    }

    #[test]
    fn poll_once_detects_new_response_via_slave_seq_change() {
        let mut bus = SpiBus::new(MockSpiBackend::default());
        bus.slaves[0] = SlaveState { present: true, ..SlaveState::absent() };

        let packet_bytes = {
            use bd_protocol::Header;
            let header = Header {
                uid: 7,
                length: 8,
                function_id: 1,
                sequence_number: 0,
                response_expected: false,
                error_code_bits: 0,
            };
            header.to_bytes().to_vec()
        };
        let response_frame = Frame { payload: packet_bytes, master_seq: 0, slave_seq: 1 }.encode().unwrap();
        bus.backend.responses.push_back(Ok(response_frame));

        let event = bus.poll_once(0).unwrap();
        match event {
            SpiBusEvent::ResponseReceived { slave_index, .. } => assert_eq!(slave_index, 0),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(bus.slaves[0].seq_slave, 1);
    }

    #[test]
    fn repeated_slave_seq_yields_no_event() {
        let mut bus = SpiBus::new(MockSpiBackend::default());
        bus.slaves[0] = SlaveState { present: true, seq_slave: 2, ..SlaveState::absent() };
        let response_frame = Frame::empty(0, 2).encode().unwrap();
        bus.backend.responses.push_back(Ok(response_frame));
        assert!(bus.poll_once(0).is_none());
    }

    #[test]
    fn empty_poll_advances_master_seq_when_no_collision() {
        let mut bus = SpiBus::new(MockSpiBackend::default());
        bus.slaves[0] = SlaveState { present: true, seq_master: 3, ..SlaveState::absent() };
        // Slave echoes master_seq=3 (our current value), not 4 (what we'd
        // advance to) — no collision risk, so we advance normally.
        let response_frame = Frame::empty(3, 0).encode().unwrap();
        bus.backend.responses.push_back(Ok(response_frame));
        bus.poll_once(0);
        assert_eq!(bus.slaves[0].seq_master, 4);
        assert!(!bus.slaves[0].next_frame_empty);
    }

    #[test]
    fn empty_poll_defers_advance_on_sequence_collision() {
        let mut bus = SpiBus::new(MockSpiBackend::default());
        bus.slaves[0] = SlaveState { present: true, seq_master: 3, ..SlaveState::absent() };
        // Slave echoes master_seq=4, the value we'd advance to — advancing
        // now would make the next real send's ACK check false-positive
        // against this empty poll.
        let response_frame = Frame::empty(4, 0).encode().unwrap();
        bus.backend.responses.push_back(Ok(response_frame));
        bus.poll_once(0);
        assert_eq!(bus.slaves[0].seq_master, 3);
        assert!(bus.slaves[0].next_frame_empty);
    }

    #[test]
    fn desynced_frame_marks_next_frame_empty() {
        let mut bus = SpiBus::new(MockSpiBackend::default());
        bus.slaves[0] = SlaveState { present: true, ..SlaveState::absent() };
        let mut bad = Frame::empty(0, 0).encode().unwrap();
        bad[0] = 0x00;
        bus.backend.responses.push_back(Ok(bad));
        let event = bus.poll_once(0);
        assert!(matches!(event, Some(SpiBusEvent::FrameDesynced { .. })));
        assert!(bus.slaves[0].next_frame_empty);
    }
}
