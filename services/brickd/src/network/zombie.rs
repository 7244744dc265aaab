use bd_reactor::TimerId;

use crate::pending::OwnerList;

/// What remains of a disconnected client while its in-flight requests are
/// still being answered. The daemon keeps routing late responses to a
/// zombie's own pending list until it drains, then retires it on the next
/// cleanup pass.
pub struct Zombie {
    pub pending: OwnerList,
    pub pending_count: usize,
    pub drain_timer: TimerId,
    /// Set either when `pending_count` reaches zero or when `drain_timer`
    /// fires, whichever comes first. `Network::on_iteration_cleanup` reaps
    /// every zombie with `finished == true`.
    pub finished: bool,
}

impl Zombie {
    pub fn new(drain_timer: TimerId) -> Zombie {
        Zombie { pending: OwnerList::new(), pending_count: 0, drain_timer, finished: false }
    }
}

#[cfg(test)]
pub(crate) fn test_zombie(drain_timer: TimerId) -> Zombie {
    Zombie::new(drain_timer)
}
