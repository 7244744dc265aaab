use std::collections::VecDeque;

use crate::network::client_io::{would_block, ClientIo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The full packet went out in this call; no reactor subscription change needed.
    Sent,
    /// Some or all of the packet is now backlogged; caller should ensure a
    /// writable-interest subscription.
    Enqueued,
    /// An unrecoverable write error occurred; the caller must disconnect.
    FatalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Backlog is now empty; caller should drop the writable subscription.
    Drained,
    StillPending,
    FatalError,
}

/// Per-destination non-blocking writer with a backlog queue.
///
/// `write` always preserves call order: bytes queued by one call are never
/// interleaved with bytes from a later call, since every later call appends
/// to the tail of the same backlog once any backlog exists at all.
#[derive(Default)]
pub struct Writer {
    backlog: VecDeque<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer { backlog: VecDeque::new() }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn has_backlog(&self) -> bool {
        !self.backlog.is_empty()
    }

    pub fn write(&mut self, io: &mut dyn ClientIo, bytes: &[u8]) -> WriteOutcome {
        if !self.backlog.is_empty() {
            self.backlog.extend(bytes);
            return WriteOutcome::Enqueued;
        }
        match io.write(bytes) {
            Ok(n) if n == bytes.len() => WriteOutcome::Sent,
            Ok(n) => {
                self.backlog.extend(&bytes[n..]);
                WriteOutcome::Enqueued
            }
            Err(err) if would_block(&err) => {
                self.backlog.extend(bytes);
                WriteOutcome::Enqueued
            }
            Err(_) => WriteOutcome::FatalError,
        }
    }

    /// Drains as much of the backlog as the socket accepts right now.
    pub fn drain(&mut self, io: &mut dyn ClientIo) -> DrainOutcome {
        while !self.backlog.is_empty() {
            let (front, _) = self.backlog.as_slices();
            match io.write(front) {
                Ok(0) => return DrainOutcome::StillPending,
                Ok(n) => {
                    self.backlog.drain(..n);
                }
                Err(err) if would_block(&err) => return DrainOutcome::StillPending,
                Err(_) => return DrainOutcome::FatalError,
            }
        }
        DrainOutcome::Drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::client_io::ClientIo;
    use std::io;

    struct RecordingIo {
        accepted: usize,
        writes: Vec<Vec<u8>>,
    }

    impl ClientIo for RecordingIo {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "n/a"))
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.accepted);
            self.writes.push(buf[..n].to_vec());
            if n == 0 {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "full"))
            } else {
                Ok(n)
            }
        }
        fn raw_fd(&self) -> std::os::unix::io::RawFd {
            -1
        }
    }

    #[test]
    fn full_direct_write_needs_no_backlog() {
        let mut io = RecordingIo { accepted: usize::MAX, writes: Vec::new() };
        let mut writer = Writer::new();
        assert_eq!(writer.write(&mut io, b"hello"), WriteOutcome::Sent);
        assert!(!writer.has_backlog());
    }

    #[test]
    fn partial_write_enqueues_remainder() {
        let mut io = RecordingIo { accepted: 3, writes: Vec::new() };
        let mut writer = Writer::new();
        assert_eq!(writer.write(&mut io, b"hello!"), WriteOutcome::Enqueued);
        assert_eq!(writer.backlog_len(), 3);

        io.accepted = usize::MAX;
        assert_eq!(writer.drain(&mut io), DrainOutcome::Drained);
        assert_eq!(io.writes.last().unwrap(), b"lo!");
    }

    #[test]
    fn calls_preserve_order_once_backlogged() {
        let mut io = RecordingIo { accepted: 0, writes: Vec::new() };
        let mut writer = Writer::new();
        writer.write(&mut io, b"AAA");
        writer.write(&mut io, b"BBB");
        io.accepted = usize::MAX;
        writer.drain(&mut io);
        assert_eq!(io.writes.last().unwrap(), b"AAABBB");
    }

    #[test]
    fn fatal_error_is_reported() {
        struct BrokenIo;
        impl ClientIo for BrokenIo {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "n/a"))
            }
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
            fn raw_fd(&self) -> std::os::unix::io::RawFd {
                -1
            }
        }
        let mut writer = Writer::new();
        assert_eq!(writer.write(&mut BrokenIo, b"x"), WriteOutcome::FatalError);
    }
}
