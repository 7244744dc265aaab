use std::collections::VecDeque;
use std::io;
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};

use tungstenite::{Message, WebSocket};

use crate::network::client_io::{would_block, ClientIo};

/// Wraps a handshaken `tungstenite` WebSocket so the client read-parse loop
/// sees the same byte-stream shape it would over plain TCP: each `write()`
/// call becomes one binary message, and incoming binary messages are
/// buffered byte-wise for `read()`. The handshake itself runs synchronously
/// at accept time (see `network::listener`), a deliberate simplification —
/// framing is an implementation detail of the transport, not the core.
pub struct WsClientIo {
    ws: WebSocket<TcpStream>,
    read_buffer: VecDeque<u8>,
}

impl WsClientIo {
    pub fn new(ws: WebSocket<TcpStream>) -> io::Result<WsClientIo> {
        ws.get_ref().set_nonblocking(true)?;
        Ok(WsClientIo { ws, read_buffer: VecDeque::new() })
    }
}

impl ClientIo for WsClientIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buffer.is_empty() {
            loop {
                match self.ws.read() {
                    Ok(Message::Binary(data)) => {
                        self.read_buffer.extend(data);
                        break;
                    }
                    Ok(Message::Close(_)) => return Ok(0),
                    Ok(_) => continue,
                    Err(tungstenite::Error::Io(err)) if would_block(&err) => return Err(err),
                    Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                        return Ok(0)
                    }
                    Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
                }
            }
        }
        let n = buf.len().min(self.read_buffer.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.read_buffer.pop_front().expect("checked len above");
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.ws.send(Message::Binary(buf.to_vec())) {
            Ok(()) => Ok(buf.len()),
            Err(tungstenite::Error::Io(err)) if would_block(&err) => Err(err),
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
        }
    }

    fn raw_fd(&self) -> RawFd {
        self.ws.get_ref().as_raw_fd()
    }
}
