use crate::clock::Lamport;
use std::collections::BTreeSet;
use std::fmt;

/// Identifies a bidder. Bidders pick their own id on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BidderId(pub u64);

impl fmt::Display for BidderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bidder {}", self.0)
    }
}

/// What happened to a single bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidOutcome {
    /// The bid is now the highest bid.
    Accepted,
    /// The bid did not beat the current highest bid. Ties lose.
    RejectedLow,
    /// The auction has closed.
    RejectedClosed,
}

impl BidOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BidOutcome::Accepted)
    }
}

impl fmt::Display for BidOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BidOutcome::Accepted => write!(f, "accepted"),
            BidOutcome::RejectedLow => write!(f, "rejected (too low)"),
            BidOutcome::RejectedClosed => write!(f, "rejected (auction closed)"),
        }
    }
}

/// The replicated auction record.
///
/// The leader validates bids with `try_accept`. The backup copies what the leader accepted with
/// `apply_mirrored`, in the same order, so both copies agree as long as the backup is reachable.
/// Closing is driven by logical time: once the owning node's clock reaches `duration` the auction
/// closes and never reopens.
#[derive(Debug, Clone)]
pub struct AuctionState {
    highest_bid: u64,
    highest_bidder: Option<BidderId>,
    closed_at: Option<Lamport>,
    duration: Lamport,
    registered: BTreeSet<BidderId>,
}

impl AuctionState {
    pub fn new(duration: Lamport) -> AuctionState {
        AuctionState {
            highest_bid: 0,
            highest_bidder: None,
            closed_at: None,
            duration,
            registered: BTreeSet::new(),
        }
    }

    pub fn highest_bid(&self) -> u64 {
        self.highest_bid
    }

    pub fn highest_bidder(&self) -> Option<BidderId> {
        self.highest_bidder
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// The logical time at which the auction was seen to close, if it has.
    pub fn closed_at(&self) -> Option<Lamport> {
        self.closed_at
    }

    pub fn duration(&self) -> Lamport {
        self.duration
    }

    pub fn is_registered(&self, bidder: BidderId) -> bool {
        self.registered.contains(&bidder)
    }

    /// Validate a bid and record it if it wins. State is left untouched on rejection.
    pub fn try_accept(
        &mut self,
        bidder: BidderId,
        amount: u64,
        bidder_sequence: u64,
    ) -> BidOutcome {
        if self.is_closed() {
            return BidOutcome::RejectedClosed;
        }

        if amount <= self.highest_bid {
            return BidOutcome::RejectedLow;
        }

        self.highest_bid = amount;
        self.highest_bidder = Some(bidder);
        if bidder_sequence == 1 {
            self.registered.insert(bidder);
        }
        BidOutcome::Accepted
    }

    /// Record a bid the leader already accepted. The leader's decision stands even if this copy
    /// has closed in the meantime, since each node closes on its own clock. Returns false if the
    /// bid does not beat the current highest bid, which means the two copies have diverged. The
    /// bid is recorded either way.
    pub fn apply_mirrored(&mut self, bidder: BidderId, amount: u64, bidder_sequence: u64) -> bool {
        let in_order = amount > self.highest_bid;
        self.highest_bid = amount;
        self.highest_bidder = Some(bidder);
        if bidder_sequence == 1 {
            self.registered.insert(bidder);
        }
        in_order
    }

    /// Close the auction if `now` has reached the deadline. Returns true only on the call that
    /// actually closed it.
    pub fn close_if_due(&mut self, now: Lamport) -> bool {
        if self.closed_at.is_none() && now >= self.duration {
            self.closed_at = Some(now);
            return true;
        }
        false
    }
}
