use std::fmt;

use crate::auction::{BidOutcome, BidderId};
use crate::clock::Lamport;
use crate::node::config::Role;
use crate::rpc::pb;
use tonic::Status;

/// Where a bid came from. Only bidder traffic can promote a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidRequest {
    /// Who is bidding.
    pub bidder: BidderId,

    /// How much they are bidding.
    pub amount: u64,

    /// The sender's clock when the request was sent.
    pub lamport: Lamport,

    /// The number of bids from this bidder a server has seen, including this one.
    /// `1` marks the bidder's first contact.
    pub bidder_sequence: u64,

    /// For mirrored bids, the leader's commit index after accepting this bid. Zero otherwise.
    pub replication_index: u64,
}

impl BidRequest {
    pub fn from_pb(pb: &pb::BidRequest) -> Self {
        Self {
            bidder: BidderId(pb.bidder_id),
            amount: pb.amount,
            lamport: Lamport(pb.lamport),
            bidder_sequence: pb.bidder_sequence,
            replication_index: pb.replication_index,
        }
    }

    pub fn to_pb(&self) -> pb::BidRequest {
        pb::BidRequest {
            bidder_id: self.bidder.0,
            amount: self.amount,
            lamport: self.lamport.0,
            bidder_sequence: self.bidder_sequence,
            replication_index: self.replication_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidAck {
    pub outcome: BidOutcome,

    /// The responder's clock when the ack was sent.
    pub lamport: Lamport,
}

impl BidAck {
    pub fn from_pb(pb: &pb::BidAck) -> Result<Self, Status> {
        let outcome = match pb::BidOutcome::try_from(pb.outcome) {
            Ok(pb::BidOutcome::Accepted) => BidOutcome::Accepted,
            Ok(pb::BidOutcome::RejectedLow) => BidOutcome::RejectedLow,
            Ok(pb::BidOutcome::RejectedClosed) => BidOutcome::RejectedClosed,
            Ok(pb::BidOutcome::Unspecified) | Err(_) => {
                let message = format!("unknown bid outcome `{}`", pb.outcome);
                return Err(Status::invalid_argument(message));
            }
        };
        Ok(Self { outcome, lamport: Lamport(pb.lamport) })
    }

    pub fn to_pb(&self) -> pb::BidAck {
        let outcome = match self.outcome {
            BidOutcome::Accepted => pb::BidOutcome::Accepted,
            BidOutcome::RejectedLow => pb::BidOutcome::RejectedLow,
            BidOutcome::RejectedClosed => pb::BidOutcome::RejectedClosed,
        };
        pb::BidAck { outcome: outcome.into(), lamport: self.lamport.0 }
    }
}

/// A read of the auction as seen by one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuctionSnapshot {
    pub highest_bid: u64,
    pub highest_bidder: Option<BidderId>,
    pub closed: bool,
    pub lamport: Lamport,
}

impl AuctionSnapshot {
    pub fn from_pb(pb: &pb::ResultResponse) -> Self {
        Self {
            highest_bid: pb.highest_bid,
            highest_bidder: pb.highest_bidder_id.map(BidderId),
            closed: pb.auction_closed,
            lamport: Lamport(pb.lamport),
        }
    }

    pub fn to_pb(&self) -> pb::ResultResponse {
        pb::ResultResponse {
            highest_bid: self.highest_bid,
            highest_bidder_id: self.highest_bidder.map(|b| b.0),
            auction_closed: self.closed,
            lamport: self.lamport.0,
        }
    }
}

impl fmt::Display for AuctionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.closed { "closed" } else { "open" };
        match self.highest_bidder {
            Some(bidder) => {
                write!(f, "auction {}: highest bid {} by {}", status, self.highest_bid, bidder)
            }
            None => write!(f, "auction {}: no bids yet", status),
        }
    }
}

/// Replication and role information about a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub role: Role,
    pub lamport: Lamport,
    pub closed: bool,
    pub backup_attached: bool,

    /// How many bids this node has accepted.
    pub commit_index: u64,

    /// The highest commit index the backup has acknowledged. Always zero on a backup.
    pub replicated_index: u64,
}

impl NodeStatus {
    /// How many accepted bids the backup has not acknowledged.
    pub fn replication_lag(&self) -> u64 {
        self.commit_index.saturating_sub(self.replicated_index)
    }

    pub fn from_pb(pb: &pb::StatusResponse) -> Result<Self, Status> {
        Ok(Self {
            role: role_from_pb(pb.role)?,
            lamport: Lamport(pb.lamport),
            closed: pb.auction_closed,
            backup_attached: pb.backup_attached,
            commit_index: pb.commit_index,
            replicated_index: pb.replicated_index,
        })
    }

    pub fn to_pb(&self) -> pb::StatusResponse {
        pb::StatusResponse {
            role: role_to_pb(self.role).into(),
            lamport: self.lamport.0,
            auction_closed: self.closed,
            backup_attached: self.backup_attached,
            commit_index: self.commit_index,
            replicated_index: self.replicated_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromoteAck {
    pub previous_role: Role,
    pub lamport: Lamport,
}

impl PromoteAck {
    pub fn from_pb(pb: &pb::PromoteResponse) -> Result<Self, Status> {
        Ok(Self { previous_role: role_from_pb(pb.previous_role)?, lamport: Lamport(pb.lamport) })
    }

    pub fn to_pb(&self) -> pb::PromoteResponse {
        pb::PromoteResponse {
            previous_role: role_to_pb(self.previous_role).into(),
            lamport: self.lamport.0,
        }
    }
}

fn role_from_pb(role: i32) -> Result<Role, Status> {
    match pb::NodeRole::try_from(role) {
        Ok(pb::NodeRole::Leader) => Ok(Role::Leader),
        Ok(pb::NodeRole::Backup) => Ok(Role::Backup),
        Ok(pb::NodeRole::Unspecified) | Err(_) => {
            Err(Status::invalid_argument(format!("unknown node role `{}`", role)))
        }
    }
}

fn role_to_pb(role: Role) -> pb::NodeRole {
    match role {
        Role::Leader => pb::NodeRole::Leader,
        Role::Backup => pb::NodeRole::Backup,
    }
}
