use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use bd_protocol::{Header, HeaderError, Packet, HEADER_LEN};

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A plain-TCP client for integration tests: connects to a listener address,
/// writes and reads raw packets, with a bounded read timeout so a protocol
/// bug hangs a single test instead of the whole suite.
pub struct TestTcpClient {
    stream: TcpStream,
}

impl TestTcpClient {
    pub fn connect(addr: SocketAddr) -> std::io::Result<TestTcpClient> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(TestTcpClient { stream })
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Read exactly one packet: an 8-byte header followed by its declared
    /// payload. Blocks up to the read timeout for each chunk.
    pub fn recv_packet(&mut self) -> std::io::Result<Packet> {
        let mut header_buf = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header_buf)?;
        let header = Header::parse(&header_buf)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let mut payload = vec![0u8; header.payload_len()];
        if !payload.is_empty() {
            self.stream.read_exact(&mut payload)?;
        }
        Ok(Packet { header, payload })
    }

    /// Like [`Self::recv_packet`], but returns `Ok(None)` on a clean EOF
    /// (used to assert a server disconnected the client rather than keeping
    /// it open).
    pub fn recv_packet_or_eof(&mut self) -> std::io::Result<Option<Packet>> {
        let mut first_byte = [0u8; 1];
        match self.stream.read(&mut first_byte)? {
            0 => return Ok(None),
            _ => {}
        }
        let mut rest = [0u8; HEADER_LEN - 1];
        self.stream.read_exact(&mut rest)?;
        let mut header_buf = [0u8; HEADER_LEN];
        header_buf[0] = first_byte[0];
        header_buf[1..].copy_from_slice(&rest);
        let header = Header::parse(&header_buf)
            .map_err(|err: HeaderError| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let mut payload = vec![0u8; header.payload_len()];
        if !payload.is_empty() {
            self.stream.read_exact(&mut payload)?;
        }
        Ok(Some(Packet { header, payload }))
    }

    pub fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}
