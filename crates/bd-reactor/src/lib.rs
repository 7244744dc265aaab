mod reactor;
mod timer;

pub use reactor::{Interest, Reactor, ReactorError, ReactorHandler, SourceId};
pub use timer::{TimerId, TimerWheel};
