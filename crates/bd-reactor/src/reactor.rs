use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use bd_container::{Arena, Handle};
use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Events, Interest as MioInterest, Poll, Token};
use tracing::{debug, trace, warn};

use crate::timer::{TimerId, TimerWheel};

const EVENTS_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("failed to create poll instance: {0}")]
    PollCreate(#[source] std::io::Error),
    #[error("failed to register source: {0}")]
    Register(#[source] std::io::Error),
    #[error("failed to deregister source: {0}")]
    Deregister(#[source] std::io::Error),
    #[error("poll wait failed: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    fn to_mio(self) -> MioInterest {
        match self {
            Interest::Read => MioInterest::READABLE,
            Interest::Write => MioInterest::WRITABLE,
            Interest::ReadWrite => MioInterest::READABLE.add(MioInterest::WRITABLE),
        }
    }
}

struct Registration {
    fd: RawFd,
    token: Token,
}

/// A registered, poll-ready IO source. Identified by a stable [`Handle`] so
/// callers can hold on to it across reactor iterations without worrying
/// about a raw token being reused for an unrelated source.
pub type SourceId = Handle<Registration>;

/// Callbacks invoked by [`Reactor::run`]. One implementation per daemon, not
/// per source: the reactor dispatches by [`SourceId`] rather than storing a
/// closure per registration, since a closure would need simultaneous
/// mutable access to the reactor itself to call `remove_source`.
pub trait ReactorHandler {
    fn on_readable(&mut self, reactor: &mut Reactor, id: SourceId);
    fn on_writable(&mut self, reactor: &mut Reactor, id: SourceId);
    fn on_timer(&mut self, reactor: &mut Reactor, id: TimerId);

    /// Called once at the start of every iteration, after deferred removals
    /// have been applied, before the pollset is rebuilt. Used to reap
    /// resources that became stale during the previous iteration's
    /// callbacks (for instance a zombie whose drain timer already elapsed).
    fn on_iteration_cleanup(&mut self, reactor: &mut Reactor) {
        let _ = reactor;
    }
}

/// A single-threaded, poll-based event loop.
///
/// Sources are registered once and read/write-readiness is dispatched to a
/// [`ReactorHandler`]. Removal is deferred to the start of the next
/// iteration so a callback may safely remove the very source whose
/// readiness invoked it without disturbing the event batch being drained.
pub struct Reactor {
    poll: Poll,
    events: Events,
    sources: Arena<Registration>,
    token_to_source: Vec<Option<SourceId>>,
    pending_removals: Vec<SourceId>,
    timers: TimerWheel,
    running: bool,
    stop_requested: bool,
}

impl Reactor {
    pub fn new() -> Result<Reactor, ReactorError> {
        let poll = Poll::new().map_err(ReactorError::PollCreate)?;
        Ok(Reactor {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            sources: Arena::new(),
            token_to_source: Vec::new(),
            pending_removals: Vec::new(),
            timers: TimerWheel::new(),
            running: false,
            stop_requested: false,
        })
    }

    pub fn add_source(&mut self, fd: RawFd, interest: Interest) -> Result<SourceId, ReactorError> {
        let id = self.sources.insert(Registration { fd, token: Token(0) });
        let token = Token(id.slot_index() as usize);
        self.sources.get_mut(id).expect("just inserted").token = token;
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, interest.to_mio())
            .map_err(ReactorError::Register)?;
        self.token_to_source
            .resize(self.token_to_source.len().max(token.0 + 1), None);
        self.token_to_source[token.0] = Some(id);
        trace!(fd, ?interest, "source registered");
        Ok(id)
    }

    /// Marks `id` for removal at the start of the next iteration. Safe to
    /// call from within a callback for the same source that triggered it.
    pub fn remove_source(&mut self, id: SourceId) {
        self.pending_removals.push(id);
    }

    pub fn schedule_timer_at(&mut self, deadline: Instant) -> TimerId {
        self.timers.schedule_at(deadline)
    }

    pub fn schedule_timer_after(&mut self, delay: Duration) -> TimerId {
        self.timers.schedule_after(delay, Instant::now())
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.stop_requested = true;
    }

    /// Runs the event loop until [`Reactor::stop`] is called. A `stop()`
    /// issued before `run()` is ever entered makes the first call a no-op.
    pub fn run<H: ReactorHandler>(&mut self, handler: &mut H) -> Result<(), ReactorError> {
        if self.stop_requested {
            return Ok(());
        }
        self.running = true;
        while self.running {
            self.apply_pending_removals()?;
            handler.on_iteration_cleanup(self);

            let timeout = self.timers.next_timeout(Instant::now());
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                    debug!("poll wait interrupted, retrying");
                    continue;
                }
                Err(err) => return Err(ReactorError::Wait(err)),
            }

            let ready: Vec<(SourceId, bool, bool)> = self
                .events
                .iter()
                .filter_map(|event| self.source_for_event(event))
                .collect();
            for (id, readable, writable) in ready {
                if self.pending_removals.contains(&id) {
                    continue;
                }
                if readable && self.sources.contains(id) {
                    handler.on_readable(self, id);
                }
                if writable && self.sources.contains(id) {
                    handler.on_writable(self, id);
                }
            }

            let fired = self.timers.drain_expired(Instant::now());
            for id in fired {
                handler.on_timer(self, id);
            }
        }
        Ok(())
    }

    fn source_for_event(&self, event: &Event) -> Option<(SourceId, bool, bool)> {
        let token = event.token();
        let id = *self.token_to_source.get(token.0)?;
        id.map(|id| (id, event.is_readable(), event.is_writable()))
    }

    fn apply_pending_removals(&mut self) -> Result<(), ReactorError> {
        for id in self.pending_removals.drain(..) {
            if let Some(reg) = self.sources.remove(id) {
                self.token_to_source[reg.token.0] = None;
                let mut fd = reg.fd;
                self.poll
                    .registry()
                    .deregister(&mut SourceFd(&fd))
                    .map_err(ReactorError::Deregister)?;
            } else {
                warn!("remove_source called for an already-removed source");
            }
        }
        Ok(())
    }
}
