use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::config::ListenConfig;
use crate::network::client_io::{would_block, ClientIo, PlainTcpIo};
use crate::network::ws::WsClientIo;

/// Expands `listen.address`/`dual_stack` into the concrete addresses a
/// listener socket is bound to: the configured address alone, or both
/// wildcard IPv4 and IPv6 when dual-stack is requested and the address
/// itself did not already pin a specific family.
fn bind_addresses(config: &ListenConfig, port: u16) -> Vec<SocketAddr> {
    if config.dual_stack && config.address.is_unspecified() {
        vec![
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        ]
    } else {
        vec![SocketAddr::new(config.address, port)]
    }
}

fn bind_nonblocking(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// A plain-TCP accept socket. `accept()` is non-blocking: `Ok(None)` means
/// nothing is waiting right now.
pub struct PlainListener {
    listener: TcpListener,
}

impl PlainListener {
    pub fn bind_all(config: &ListenConfig) -> io::Result<Vec<PlainListener>> {
        bind_addresses(config, config.plain_port).into_iter().map(|addr| Ok(PlainListener { listener: bind_nonblocking(addr)? })).collect()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn accept(&self) -> io::Result<Option<(Box<dyn ClientIo>, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => Ok(Some((Box::new(PlainTcpIo::new(stream)?), addr))),
            Err(err) if would_block(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// A WebSocket-upgrade accept socket. The upgrade handshake runs
/// synchronously on the freshly accepted (still-blocking) stream before the
/// connection is handed off as non-blocking to the reactor.
pub struct WsListener {
    listener: TcpListener,
}

impl WsListener {
    pub fn bind_all(config: &ListenConfig) -> io::Result<Vec<WsListener>> {
        bind_addresses(config, config.websocket_port).into_iter().map(|addr| Ok(WsListener { listener: bind_nonblocking(addr)? })).collect()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn accept(&self) -> io::Result<Option<(Box<dyn ClientIo>, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => match self.handshake(stream) {
                Ok(io) => Ok(Some((io, addr))),
                Err(err) => {
                    tracing::warn!(%addr, %err, "WebSocket handshake failed");
                    Ok(None)
                }
            },
            Err(err) if would_block(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn handshake(&self, stream: TcpStream) -> io::Result<Box<dyn ClientIo>> {
        let ws = tungstenite::accept(stream).map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        Ok(Box::new(WsClientIo::new(ws)?))
    }
}
