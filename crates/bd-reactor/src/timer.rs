use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use bd_container::{Arena, Handle};

/// Handle identifying a scheduled timer. Stable across rescheduling; becomes
/// invalid once the timer fires or is cancelled.
pub type TimerId = Handle<Instant>;

/// A min-heap of pending deadlines keyed by [`TimerId`]. Firing order is by
/// deadline, not by insertion order.
///
/// Cancellation is lazy: a cancelled entry stays in the heap and is simply
/// skipped when popped, because removing an arbitrary element from a
/// `BinaryHeap` is not supported. The arena is the source of truth for
/// whether a timer is still live.
#[derive(Default)]
pub struct TimerWheel {
    deadlines: Arena<Instant>,
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
}

impl TimerWheel {
    pub fn new() -> TimerWheel {
        TimerWheel { deadlines: Arena::new(), heap: BinaryHeap::new() }
    }

    pub fn schedule_at(&mut self, deadline: Instant) -> TimerId {
        let id = self.deadlines.insert(deadline);
        self.heap.push(Reverse((deadline, id)));
        id
    }

    pub fn schedule_after(&mut self, delay: Duration, now: Instant) -> TimerId {
        self.schedule_at(now + delay)
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.deadlines.remove(id);
    }

    /// Duration until the next live deadline, `None` if no timers remain.
    /// `Some(Duration::ZERO)` if one is already due.
    pub fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        self.prune_cancelled();
        let Reverse((deadline, _)) = self.heap.peek()?;
        Some(deadline.saturating_duration_since(now))
    }

    /// Pop and return every timer whose deadline has passed.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        loop {
            self.prune_cancelled();
            match self.heap.peek() {
                Some(Reverse((deadline, _))) if *deadline <= now => {
                    let Reverse((_, id)) = self.heap.pop().unwrap();
                    self.deadlines.remove(id);
                    fired.push(id);
                }
                _ => break,
            }
        }
        fired
    }

    fn prune_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.deadlines.contains(*id) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order_not_insertion_order() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let later = wheel.schedule_at(now + Duration::from_secs(10));
        let sooner = wheel.schedule_at(now + Duration::from_secs(1));
        let fired = wheel.drain_expired(now + Duration::from_secs(5));
        assert_eq!(fired, vec![sooner]);
        assert!(wheel.drain_expired(now + Duration::from_secs(20)).contains(&later));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let id = wheel.schedule_at(now + Duration::from_millis(1));
        wheel.cancel(id);
        let fired = wheel.drain_expired(now + Duration::from_secs(1));
        assert!(fired.is_empty());
    }

    #[test]
    fn next_timeout_reflects_earliest_live_deadline() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        assert_eq!(wheel.next_timeout(now), None);
        wheel.schedule_at(now + Duration::from_secs(3));
        let timeout = wheel.next_timeout(now).unwrap();
        assert!(timeout <= Duration::from_secs(3) && timeout > Duration::from_secs(2));
    }
}
