use std::fmt;

/// A point in logical time. Lamport values are totally ordered and never move backwards on the
/// process that owns the clock. `u64::MAX` is sticky: a clock that reaches it stays there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lamport(pub u64);

impl Lamport {
    pub fn next(&self) -> Lamport {
        Lamport(self.0.saturating_add(1))
    }
}

impl fmt::Display for Lamport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

/// A Lamport clock.
///
/// Every local event (including sending a message) is a `tick`. Every received message is a
/// `merge`, which jumps forward to the sender's time if it is ahead of ours and then ticks, so
/// the receive event is ordered strictly after the send.
#[derive(Debug, Clone, Default)]
pub struct LamportClock {
    now: Lamport,
}

impl LamportClock {
    pub fn new() -> LamportClock {
        LamportClock { now: Lamport(0) }
    }

    /// Start a clock at a given time.
    pub fn starting_at(now: Lamport) -> LamportClock {
        LamportClock { now }
    }

    pub fn now(&self) -> Lamport {
        self.now
    }

    /// Advance by one and return the new time.
    pub fn tick(&mut self) -> Lamport {
        self.now = self.now.next();
        self.now
    }

    /// Observe a remote timestamp. The returned time is strictly greater than both the time
    /// before the call and `remote`, unless one of them is already `u64::MAX`.
    pub fn merge(&mut self, remote: Lamport) -> Lamport {
        self.now = self.now.max(remote);
        self.tick()
    }
}
