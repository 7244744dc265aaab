use bd_protocol::pearson_hash;
use thiserror::Error;

pub const FRAME_PREAMBLE: u8 = 0xAA;
pub const MIN_FRAME_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = 84;
/// Largest payload a frame can carry: one full [`bd_protocol::Packet`] at
/// its maximum wire length.
pub const MAX_FRAME_PAYLOAD: usize = MAX_FRAME_LEN - MIN_FRAME_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame missing preamble byte 0xAA, got {0:#04x}")]
    BadPreamble(u8),
    #[error("frame declares length {0} outside [{MIN_FRAME_LEN}, {MAX_FRAME_LEN}]")]
    BadLength(u8),
    #[error("frame declares length {declared} but only {available} bytes were transceived")]
    Truncated { declared: usize, available: usize },
    #[error("frame checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum { expected: u8, actual: u8 },
    #[error("payload of {0} bytes exceeds the {MAX_FRAME_PAYLOAD}-byte frame budget")]
    PayloadTooLarge(usize),
}

/// One 84-byte-max SPI master/slave frame: `[0xAA][len][payload...][info][checksum]`.
/// `payload` is either empty (a bare poll) or one full protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub master_seq: u8,
    pub slave_seq: u8,
}

impl Frame {
    pub fn empty(master_seq: u8, slave_seq: u8) -> Frame {
        Frame { payload: Vec::new(), master_seq, slave_seq }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }
        let total_len = self.payload.len() + MIN_FRAME_LEN;
        let mut buf = vec![0u8; total_len];
        buf[0] = FRAME_PREAMBLE;
        buf[1] = total_len as u8;
        buf[2..2 + self.payload.len()].copy_from_slice(&self.payload);
        let info_index = total_len - 2;
        buf[info_index] = (self.master_seq & 0x07) | ((self.slave_seq & 0x07) << 3);
        let checksum = pearson_hash(&buf[..total_len - 1]);
        buf[total_len - 1] = checksum;
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
        if buf.is_empty() {
            return Err(FrameError::Truncated { declared: MIN_FRAME_LEN, available: 0 });
        }
        if buf[0] != FRAME_PREAMBLE {
            return Err(FrameError::BadPreamble(buf[0]));
        }
        if buf.len() < 2 {
            return Err(FrameError::Truncated { declared: MIN_FRAME_LEN, available: buf.len() });
        }
        let declared_len = buf[1];
        if (declared_len as usize) < MIN_FRAME_LEN || (declared_len as usize) > MAX_FRAME_LEN {
            return Err(FrameError::BadLength(declared_len));
        }
        let total_len = declared_len as usize;
        if buf.len() < total_len {
            return Err(FrameError::Truncated { declared: total_len, available: buf.len() });
        }
        let expected = pearson_hash(&buf[..total_len - 1]);
        let actual = buf[total_len - 1];
        if expected != actual {
            return Err(FrameError::BadChecksum { expected, actual });
        }
        let info = buf[total_len - 2];
        Ok(Frame {
            payload: buf[2..total_len - 2].to_vec(),
            master_seq: info & 0x07,
            slave_seq: (info >> 3) & 0x07,
        })
    }
}
