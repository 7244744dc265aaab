use bd_container::{Queue, RecipientTable};

pub const MAX_SLAVES: usize = 8;

/// Master/slave sequence numbers are 3-bit fields packed into a frame's info byte.
pub const SEQUENCE_MASK: u8 = 0x07;

/// A single RED Brick SPI slave's polling state. `seq_master` advances when
/// a sent packet is ACKed; `seq_slave` mirrors the last distinct sequence
/// number the slave has reported, which is how a repeated response is told
/// apart from a fresh one.
pub struct SlaveState {
    pub present: bool,
    pub seq_master: u8,
    pub seq_slave: u8,
    pub next_frame_empty: bool,
    pub request_queue: Queue<Vec<u8>>,
    pub recipients: RecipientTable<()>,
}

impl SlaveState {
    pub fn absent() -> SlaveState {
        SlaveState {
            present: false,
            seq_master: 0,
            seq_slave: 0,
            next_frame_empty: true,
            request_queue: Queue::new(),
            recipients: RecipientTable::new(),
        }
    }

    pub fn reset(&mut self) {
        self.seq_master = 0;
        self.seq_slave = 0;
        self.next_frame_empty = true;
        self.request_queue = Queue::new();
    }

    pub fn next_sent_seq(&self) -> u8 {
        (self.seq_master + 1) & SEQUENCE_MASK
    }
}
