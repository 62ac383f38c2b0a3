use crate::clock::Lamport;
use crate::node::error::NodeError;
use crate::node::messages::{AuctionSnapshot, BidAck, BidRequest, NodeStatus, Origin, PromoteAck};
use crate::node::queue::CoreQueueEntry;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::Span;

/// A cheap, cloneable way to talk to a running node task.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    tx: UnboundedSender<CoreQueueEntry>,
}

impl NodeHandle {
    pub fn new(tx: UnboundedSender<CoreQueueEntry>) -> Self {
        Self { tx }
    }

    pub async fn bid(&self, request: BidRequest, origin: Origin) -> Result<BidAck, NodeError> {
        let (response_tx, rx) = oneshot::channel();
        self.send(CoreQueueEntry::Bid { request, origin, response_tx, span: Span::current() })?;
        rx.await.map_err(|_| NodeError::Stopped)?
    }

    pub async fn result(&self, lamport: Lamport) -> Result<AuctionSnapshot, NodeError> {
        let (response_tx, rx) = oneshot::channel();
        self.send(CoreQueueEntry::Result { lamport, response_tx, span: Span::current() })?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    pub async fn status(&self, lamport: Lamport) -> Result<NodeStatus, NodeError> {
        let (response_tx, rx) = oneshot::channel();
        self.send(CoreQueueEntry::Status { lamport, response_tx, span: Span::current() })?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    pub async fn promote(&self, lamport: Lamport) -> Result<PromoteAck, NodeError> {
        let (response_tx, rx) = oneshot::channel();
        self.send(CoreQueueEntry::Promote { lamport, response_tx, span: Span::current() })?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    fn send(&self, entry: CoreQueueEntry) -> Result<(), NodeError> {
        self.tx.send(entry).map_err(|_| NodeError::Stopped)
    }
}
