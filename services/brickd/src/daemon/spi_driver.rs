//! Runs a [`SpiBus`]'s round-robin poll loop on a dedicated OS thread.
//!
//! The bus's own retry and reset-button handling block for tens to
//! thousands of milliseconds at a time (`thread::sleep` between discovery
//! retries, a 1.5s boot delay after a reset), which the single reactor
//! thread cannot afford to sit through. The driver thread owns the polling
//! cadence; it only ever hands parsed events back across a mutex-protected
//! queue, signaling the reactor through a wake pipe exactly as it would an
//! eventfd.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bd_spi::{SpiBackend, SpiBus, SpiBusEvent};

pub struct SpiDriver {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    events: Arc<Mutex<VecDeque<SpiBusEvent>>>,
    wake: UnixStream,
}

impl SpiDriver {
    pub fn spawn<SB: SpiBackend + Send + 'static>(bus: Arc<Mutex<SpiBus<SB>>>, poll_delay: Duration) -> io::Result<SpiDriver> {
        let (mut thread_wake, wake) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        thread_wake.set_nonblocking(true)?;

        let events = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_events = Arc::clone(&events);
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("brickd-spi".to_owned())
            .spawn(move || run(&bus, &thread_events, &mut thread_wake, &thread_stop, poll_delay))
            .map_err(io::Error::other)?;

        Ok(SpiDriver { stop, handle: Some(handle), events, wake })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.wake.as_raw_fd()
    }

    /// Pops up to `max` queued events, matching the "reads up to 5 queued
    /// responses per wake-up" draining policy so one hardware source can't
    /// starve the rest of the reactor.
    pub fn drain(&self, max: usize) -> Vec<SpiBusEvent> {
        let mut queue = self.events.lock().expect("SPI event queue mutex poisoned");
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Drains whatever is sitting in the wake pipe. The byte count carries
    /// no meaning; it is only ever used to mean "check the queue".
    pub fn drain_wake(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.wake.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

impl Drop for SpiDriver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<SB: SpiBackend>(
    bus: &Arc<Mutex<SpiBus<SB>>>,
    events: &Arc<Mutex<VecDeque<SpiBusEvent>>>,
    wake: &mut UnixStream,
    stop: &AtomicBool,
    poll_delay: Duration,
) {
    push_all(events, bus.lock().expect("SPI bus mutex poisoned").discover(), wake);
    while !stop.load(Ordering::Relaxed) {
        if bus.lock().expect("SPI bus mutex poisoned").poll_reset_button() {
            let fired = bus.lock().expect("SPI bus mutex poisoned").handle_reset_button();
            push_all(events, fired, wake);
        }
        let present_count = bus.lock().expect("SPI bus mutex poisoned").present_count();
        for slave in 0..present_count {
            if let Some(event) = bus.lock().expect("SPI bus mutex poisoned").poll_once(slave) {
                push_all(events, vec![event], wake);
            }
        }
        thread::sleep(poll_delay);
    }
}

fn push_all(events: &Arc<Mutex<VecDeque<SpiBusEvent>>>, new_events: Vec<SpiBusEvent>, wake: &mut UnixStream) {
    if new_events.is_empty() {
        return;
    }
    events.lock().expect("SPI event queue mutex poisoned").extend(new_events);
    let _ = wake.write_all(&[0]);
}
