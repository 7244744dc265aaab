use thiserror::Error;

use crate::{MAX_PACKET_LENGTH, MIN_PACKET_LENGTH};

/// Size in bytes of the fixed header that precedes every packet's payload.
pub const HEADER_LEN: usize = 8;

/// Bit position of `response_expected` within the flags byte at offset 6.
pub const FLAGS_RESPONSE_EXPECTED_BIT: u8 = 1 << 4;

/// Parsed fixed header, wire-compatible byte-for-byte with the C source.
///
/// Field layout (little-endian):
/// ```text
/// offset 0 : u32 uid
/// offset 4 : u8  length          [8..80]
/// offset 5 : u8  function_id
/// offset 6 : u8  flags1          bits 0..3 sequence_number, bit 4 response_expected
/// offset 7 : u8  error_code      bits 0..1
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub uid: u32,
    pub length: u8,
    pub function_id: u8,
    pub sequence_number: u8,
    pub response_expected: bool,
    pub error_code_bits: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header requires at least {HEADER_LEN} bytes, got {0}")]
    Truncated(usize),
    #[error("packet length {0} out of range [{MIN_PACKET_LENGTH}, {MAX_PACKET_LENGTH}]")]
    LengthOutOfRange(u8),
}

impl Header {
    /// Parse a header from the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Does not by itself enforce request/response validity — only that the
    /// bytes are long enough and the declared length is in range. Use
    /// [`Header::is_valid_request`] / [`Header::is_valid_response`] for the
    /// semantic checks.
    pub fn parse(buf: &[u8]) -> Result<Header, HeaderError> {
        if buf.len() < HEADER_LEN {
            return Err(HeaderError::Truncated(buf.len()));
        }
        let uid = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let length = buf[4];
        let function_id = buf[5];
        let flags1 = buf[6];
        let error_byte = buf[7];
        if length < MIN_PACKET_LENGTH || length > MAX_PACKET_LENGTH {
            return Err(HeaderError::LengthOutOfRange(length));
        }
        Ok(Header {
            uid,
            length,
            function_id,
            sequence_number: flags1 & 0x0F,
            response_expected: flags1 & FLAGS_RESPONSE_EXPECTED_BIT != 0,
            error_code_bits: error_byte & 0b11,
        })
    }

    /// Serialize this header back into its 8-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.uid.to_le_bytes());
        buf[4] = self.length;
        buf[5] = self.function_id;
        buf[6] = (self.sequence_number & 0x0F)
            | if self.response_expected { FLAGS_RESPONSE_EXPECTED_BIT } else { 0 };
        buf[7] = self.error_code_bits & 0b11;
        buf
    }

    /// Payload length implied by this header (`length - HEADER_LEN`).
    pub fn payload_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }

    /// A request has a non-zero sequence number; zero is reserved for
    /// unsolicited callbacks.
    pub fn is_valid_request(&self) -> bool {
        self.sequence_number != 0
    }

    /// Any header with a length in range is a valid response; a zero
    /// sequence number marks it as an unsolicited callback rather than a
    /// solicited reply.
    pub fn is_valid_response(&self) -> bool {
        true
    }

    /// A callback is a response with `sequence_number == 0`.
    pub fn is_callback(&self) -> bool {
        self.sequence_number == 0
    }

    /// Two headers match (response satisfies request) iff uid, function_id,
    /// and sequence_number all agree.
    pub fn is_matching_response(&self, saved_request: &Header) -> bool {
        self.uid == saved_request.uid
            && self.function_id == saved_request.function_id
            && self.sequence_number == saved_request.sequence_number
    }
}

/// A complete packet: header plus its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(header: Header, payload: Vec<u8>) -> Packet {
        debug_assert_eq!(header.payload_len(), payload.len());
        Packet { header, payload }
    }

    /// Encode this packet to its wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.length as usize);
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a complete packet out of `buf`, which must contain at least
    /// `header.length` bytes once the header has been read.
    pub fn parse(buf: &[u8]) -> Result<Packet, HeaderError> {
        let header = Header::parse(buf)?;
        let total = header.length as usize;
        if buf.len() < total {
            return Err(HeaderError::Truncated(buf.len()));
        }
        let payload = buf[HEADER_LEN..total].to_vec();
        Ok(Packet { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(length: u8, function_id: u8, seq: u8, resp_expected: bool) -> Vec<u8> {
        let mut buf = vec![0u8; length as usize];
        buf[0..4].copy_from_slice(&42u32.to_le_bytes());
        buf[4] = length;
        buf[5] = function_id;
        buf[6] = (seq & 0x0F) | if resp_expected { FLAGS_RESPONSE_EXPECTED_BIT } else { 0 };
        buf[7] = 0;
        buf
    }

    #[test]
    fn parses_minimal_header() {
        let bytes = sample_bytes(8, 7, 3, true);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.uid, 42);
        assert_eq!(header.length, 8);
        assert_eq!(header.function_id, 7);
        assert_eq!(header.sequence_number, 3);
        assert!(header.response_expected);
        assert!(header.is_valid_request());
    }

    #[test]
    fn rejects_truncated_header() {
        let err = Header::parse(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, HeaderError::Truncated(3));
    }

    #[test]
    fn rejects_length_out_of_range() {
        let bytes = sample_bytes(8, 1, 1, false);
        let mut too_short = bytes.clone();
        too_short[4] = 7;
        assert_eq!(Header::parse(&too_short).unwrap_err(), HeaderError::LengthOutOfRange(7));

        let mut too_long = bytes;
        too_long[4] = 81;
        assert_eq!(Header::parse(&too_long).unwrap_err(), HeaderError::LengthOutOfRange(81));
    }

    #[test]
    fn zero_sequence_number_is_a_callback_not_a_request() {
        let bytes = sample_bytes(8, 1, 0, false);
        let header = Header::parse(&bytes).unwrap();
        assert!(!header.is_valid_request());
        assert!(header.is_callback());
    }

    #[test]
    fn matching_response_requires_all_three_fields() {
        let req = Header::parse(&sample_bytes(8, 5, 2, true)).unwrap();
        let mut resp_bytes = sample_bytes(8, 5, 2, false);
        let resp = Header::parse(&resp_bytes).unwrap();
        assert!(resp.is_matching_response(&req));

        resp_bytes[5] = 6; // different function_id
        let resp2 = Header::parse(&resp_bytes).unwrap();
        assert!(!resp2.is_matching_response(&req));
    }

    #[test]
    fn round_trips_through_bytes() {
        let bytes = sample_bytes(12, 9, 4, true);
        let packet = Packet::parse(&bytes).unwrap();
        assert_eq!(packet.payload.len(), 4);
        assert_eq!(packet.to_bytes(), bytes);
    }
}
