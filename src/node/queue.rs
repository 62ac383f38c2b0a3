use crate::clock::Lamport;
use crate::node::error::NodeError;
use crate::node::messages::{AuctionSnapshot, BidAck, BidRequest, NodeStatus, Origin, PromoteAck};
use tokio::sync::oneshot;
use tracing::Span;

/// A request for the node task. Each entry carries the span of the RPC that produced it so the
/// node logs inside the caller's context.
#[derive(Debug)]
pub enum CoreQueueEntry {
    Bid {
        request: BidRequest,
        origin: Origin,
        response_tx: oneshot::Sender<Result<BidAck, NodeError>>,
        span: Span,
    },

    Result {
        lamport: Lamport,
        response_tx: oneshot::Sender<AuctionSnapshot>,
        span: Span,
    },

    Status {
        lamport: Lamport,
        response_tx: oneshot::Sender<NodeStatus>,
        span: Span,
    },

    Promote {
        lamport: Lamport,
        response_tx: oneshot::Sender<PromoteAck>,
        span: Span,
    },
}
