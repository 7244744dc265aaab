use bd_protocol::{function_id, Header, Packet, HEADER_LEN};
use bd_reactor::SourceId;
use tracing::warn;

use crate::auth::AuthState;
use crate::network::client_io::{would_block, ClientIo};
use crate::network::writer::Writer;
use crate::pending::OwnerList;

pub const MAX_PACKET_SIZE: usize = 80;

#[derive(Debug)]
pub enum ReadOutcome {
    /// Zero or more fully framed requests, in arrival order. Empty means the
    /// read produced data but no packet is complete yet (or the only packet
    /// completed was a silently-dropped disconnect probe).
    Packets(Vec<Packet>),
    /// Peer closed the connection or sent unparsable bytes; the caller must
    /// tear this client down.
    Disconnected,
}

/// One connected peer: the read-parse loop, auth state, pending-request
/// list head, and outbound writer. Created by [`crate::network::Network`]
/// on accept; destroyed once `disconnected` is observed between reactor
/// iterations.
pub struct Client {
    pub name: String,
    io: Box<dyn ClientIo>,
    buffer: [u8; MAX_PACKET_SIZE],
    used: usize,
    header_checked: Option<Header>,
    pub pending: OwnerList,
    pub pending_count: usize,
    pub dropped_pending_requests: u64,
    pub auth_state: AuthState,
    pub server_nonce: u32,
    pub writer: Writer,
    pub disconnected: bool,
    pub source_id: Option<SourceId>,
}

impl Client {
    pub fn new(name: String, io: Box<dyn ClientIo>, auth_state: AuthState, server_nonce: u32) -> Client {
        Client {
            name,
            io,
            buffer: [0u8; MAX_PACKET_SIZE],
            used: 0,
            header_checked: None,
            pending: OwnerList::new(),
            pending_count: 0,
            dropped_pending_requests: 0,
            auth_state,
            server_nonce,
            writer: Writer::new(),
            disconnected: false,
            source_id: None,
        }
    }

    pub fn io_mut(&mut self) -> &mut dyn ClientIo {
        self.io.as_mut()
    }

    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.io.raw_fd()
    }

    /// Reads whatever is available and extracts every packet that is now
    /// fully framed, leaving a partial trailing packet buffered for the next
    /// call. `DISCONNECT_PROBE` requests are consumed here and never appear
    /// in the returned list, per the read loop's own silent-drop step.
    pub fn read_available(&mut self) -> ReadOutcome {
        debug_assert!(self.used < MAX_PACKET_SIZE, "a full 80-byte buffer always holds a complete packet");
        let n = match self.io.read(&mut self.buffer[self.used..]) {
            Ok(0) => {
                self.disconnected = true;
                return ReadOutcome::Disconnected;
            }
            Ok(n) => n,
            Err(err) if would_block(&err) => return ReadOutcome::Packets(Vec::new()),
            Err(err) => {
                warn!(client = %self.name, %err, "client read failed");
                self.disconnected = true;
                return ReadOutcome::Disconnected;
            }
        };
        self.used += n;

        let mut packets = Vec::new();
        loop {
            if self.used < HEADER_LEN {
                break;
            }
            if self.header_checked.is_none() {
                match Header::parse(&self.buffer[..self.used]) {
                    Ok(header) => self.header_checked = Some(header),
                    Err(err) => {
                        warn!(client = %self.name, %err, "malformed header, disconnecting");
                        self.disconnected = true;
                        return ReadOutcome::Disconnected;
                    }
                }
            }
            let header = self.header_checked.expect("checked above");
            let total = header.length as usize;
            if self.used < total {
                break;
            }
            if header.function_id != function_id::DISCONNECT_PROBE {
                let payload = self.buffer[HEADER_LEN..total].to_vec();
                packets.push(Packet { header, payload });
            }
            self.buffer.copy_within(total..self.used, 0);
            self.used -= total;
            self.header_checked = None;
        }
        ReadOutcome::Packets(packets)
    }
}

#[cfg(test)]
pub(crate) fn test_client(name: &str) -> Client {
    Client::new(name.to_owned(), Box::new(crate::network::client_io::NullClientIo), AuthState::Disabled, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct FeedIo {
        data: std::collections::VecDeque<u8>,
    }
    impl ClientIo for FeedIo {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
            }
            let n = buf.len().min(self.data.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.data.pop_front().unwrap();
            }
            Ok(n)
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn raw_fd(&self) -> std::os::unix::io::RawFd {
            -1
        }
    }

    fn request_bytes(uid: u32, function_id: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
        let header = Header {
            uid,
            length: (HEADER_LEN + payload.len()) as u8,
            function_id,
            sequence_number: seq,
            response_expected: true,
            error_code_bits: 0,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn client_with(bytes: Vec<u8>) -> Client {
        let io = FeedIo { data: bytes.into() };
        Client::new("t".to_owned(), Box::new(io), AuthState::Disabled, 0)
    }

    #[test]
    fn parses_single_complete_packet() {
        let bytes = request_bytes(1, 5, 3, &[9, 9]);
        let mut client = client_with(bytes);
        match client.read_available() {
            ReadOutcome::Packets(packets) => {
                assert_eq!(packets.len(), 1);
                assert_eq!(packets[0].header.uid, 1);
                assert_eq!(packets[0].payload, vec![9, 9]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_two_concatenated_packets_in_order() {
        let mut bytes = request_bytes(1, 5, 1, &[]);
        bytes.extend(request_bytes(2, 6, 2, &[]));
        let mut client = client_with(bytes);
        match client.read_available() {
            ReadOutcome::Packets(packets) => {
                assert_eq!(packets.len(), 2);
                assert_eq!(packets[0].header.uid, 1);
                assert_eq!(packets[1].header.uid, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn disconnect_probe_is_silently_dropped() {
        let bytes = request_bytes(1, function_id::DISCONNECT_PROBE, 1, &[]);
        let mut client = client_with(bytes);
        match client.read_available() {
            ReadOutcome::Packets(packets) => assert!(packets.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_header_disconnects() {
        let mut client = client_with(vec![0xFF; 8]);
        assert!(matches!(client.read_available(), ReadOutcome::Disconnected));
        assert!(client.disconnected);
    }

    #[test]
    fn eof_disconnects() {
        let mut client = client_with(Vec::new());
        let io = &mut client.io;
        // Force an EOF read by swapping in an IO that returns Ok(0).
        struct EofIo;
        impl ClientIo for EofIo {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }
            fn raw_fd(&self) -> std::os::unix::io::RawFd {
                -1
            }
        }
        *io = Box::new(EofIo);
        assert!(matches!(client.read_available(), ReadOutcome::Disconnected));
    }
}
