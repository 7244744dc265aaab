//! Wire protocol types for the device-routing broker.
//!
//! The wire format is a raw, length-delimited binary header (not JSON): every
//! packet — request, response, or callback — starts with the same
//! [`Header`]. This crate owns parsing, validity checks, request/response
//! matching, UID base58 rendering, and the authentication HMAC primitive.
//! Nothing here touches sockets or the reactor; see `bd-reactor` and the
//! `brickd` binary for that.

mod base58;
mod hash;
mod header;
mod hmac_auth;

pub use base58::{decode_uid, encode_uid};
pub use hash::pearson_hash;
pub use header::{Header, HeaderError, Packet, FLAGS_RESPONSE_EXPECTED_BIT, HEADER_LEN};
pub use hmac_auth::{hmac_sha1, verify_hmac_sha1, HMAC_DIGEST_LEN};

/// Minimum legal packet length, header included.
pub const MIN_PACKET_LENGTH: u8 = 8;
/// Maximum legal packet length.
pub const MAX_PACKET_LENGTH: u8 = 80;

/// Reserved UID meaning "broadcast to every stack".
pub const UID_BROADCAST: u32 = 0;
/// Reserved UID meaning "the daemon itself".
pub const UID_DAEMON: u32 = 1;

/// Function IDs reserved for requests addressed to [`UID_DAEMON`].
pub mod function_id {
    pub const GET_AUTHENTICATION_NONCE: u8 = 1;
    pub const AUTHENTICATE: u8 = 2;
    pub const ENUMERATE: u8 = 253;
    pub const DISCONNECT_PROBE: u8 = 254;
}

/// `enumeration_type` values carried in an `ENUMERATE` callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnumerationType {
    Available = 0,
    Connected = 1,
    Disconnected = 2,
}

/// Two-bit error codes carried in the header's trailing flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    InvalidParameter = 1,
    FunctionNotSupported = 2,
    Unknown = 3,
}

impl ErrorCode {
    pub fn from_bits(bits: u8) -> ErrorCode {
        match bits & 0b11 {
            0 => ErrorCode::Ok,
            1 => ErrorCode::InvalidParameter,
            2 => ErrorCode::FunctionNotSupported,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Identity used to match a response against the request that caused it.
///
/// Two packets are a matching request/response pair iff all three fields are
/// equal — this is the sole key the pending-request table indexes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey {
    pub uid: u32,
    pub function_id: u8,
    pub sequence_number: u8,
}

impl MatchKey {
    pub fn from_header(header: &Header) -> MatchKey {
        MatchKey {
            uid: header.uid,
            function_id: header.function_id,
            sequence_number: header.sequence_number,
        }
    }
}
