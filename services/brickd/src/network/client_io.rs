use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// The byte-stream seam a [`crate::network::client::Client`] reads requests
/// from and writes responses to. A plain TCP socket implements this
/// directly; a WebSocket upgrade wraps the same shape around a message
/// codec (see [`crate::network::ws::WsClientIo`]) so the read-parse loop
/// never has to know which transport it is talking to.
pub trait ClientIo: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn raw_fd(&self) -> RawFd;
}

pub struct PlainTcpIo {
    stream: std::net::TcpStream,
}

impl PlainTcpIo {
    pub fn new(stream: std::net::TcpStream) -> io::Result<PlainTcpIo> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(PlainTcpIo { stream })
    }
}

impl ClientIo for PlainTcpIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        self.stream.write(buf)
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Returns `true` for the two error kinds a non-blocking socket legitimately
/// produces when there is simply nothing to do right now.
pub fn would_block(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

#[cfg(test)]
pub(crate) struct NullClientIo;

#[cfg(test)]
impl ClientIo for NullClientIo {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
    }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
    fn raw_fd(&self) -> RawFd {
        -1
    }
}
