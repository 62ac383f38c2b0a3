//! In-process stand-ins for the network, shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::clock::Lamport;
use crate::node::backup::BackupPeer;
use crate::node::config::{NodeConfig, NodeConfigBuilder, Role};
use crate::node::error::NodeError;
use crate::node::messages::{AuctionSnapshot, BidAck, BidRequest, Origin};
use crate::node::AuctionNode;
use crate::rpc::client::{AuctionRpc, RpcError};
use tokio::sync::Mutex;
use tonic::{async_trait, Status};

pub fn node_config(role: Role, duration: u64) -> NodeConfig {
    NodeConfigBuilder::default()
        .listen("127.0.0.1:0".parse().expect("valid address"))
        .role(role)
        .duration(Lamport(duration))
        .build()
        .expect("valid config")
}

/// The backup type of a node that never has one.
pub enum NoBackup {}

#[async_trait]
impl BackupPeer for NoBackup {
    fn addr(&self) -> &str {
        match *self {}
    }

    async fn mirror(&mut self, _request: BidRequest) -> anyhow::Result<BidAck> {
        match *self {}
    }
}

/// A backup node living in the same process.
#[derive(Clone)]
pub struct LocalBackup {
    pub node: Arc<Mutex<AuctionNode<NoBackup>>>,
}

impl LocalBackup {
    pub fn new(config: NodeConfig) -> Self {
        Self { node: Arc::new(Mutex::new(AuctionNode::new(config, None))) }
    }
}

#[async_trait]
impl BackupPeer for LocalBackup {
    fn addr(&self) -> &str {
        "local-backup"
    }

    async fn mirror(&mut self, request: BidRequest) -> anyhow::Result<BidAck> {
        let mut node = self.node.lock().await;
        Ok(node.handle_bid(request, Origin::Peer).await?)
    }
}

/// A backup that never answers.
#[derive(Clone, Default)]
pub struct FailingBackup {
    attempts: Arc<AtomicUsize>,
}

impl FailingBackup {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackupPeer for FailingBackup {
    fn addr(&self) -> &str {
        "failing-backup"
    }

    async fn mirror(&mut self, _request: BidRequest) -> anyhow::Result<BidAck> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("deadline exceeded"))
    }
}

/// A node a bidder can talk to without a network. It can be switched off to simulate the node
/// becoming unreachable.
#[derive(Clone)]
pub struct InProcessRpc {
    addr: String,
    node: Arc<Mutex<AuctionNode<NoBackup>>>,
    reachable: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    seen_sequences: Arc<StdMutex<Vec<u64>>>,
}

impl InProcessRpc {
    pub fn new(addr: &str, config: NodeConfig) -> Self {
        Self {
            addr: addr.to_string(),
            node: Arc::new(Mutex::new(AuctionNode::new(config, None))),
            reachable: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicUsize::new(0)),
            seen_sequences: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Calls attempted against this node, reachable or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bidder sequence numbers of the bids that reached the node.
    pub fn seen_sequences(&self) -> Vec<u64> {
        self.seen_sequences.lock().expect("not poisoned").clone()
    }

    pub async fn role(&self) -> Role {
        self.node.lock().await.role()
    }

    fn check_reachable(&self) -> Result<(), RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::Unreachable {
                addr: self.addr.clone(),
                reason: "switched off".to_string(),
            })
        }
    }
}

#[async_trait]
impl AuctionRpc for InProcessRpc {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn bid(&self, request: BidRequest) -> Result<BidAck, RpcError> {
        self.check_reachable()?;
        self.seen_sequences.lock().expect("not poisoned").push(request.bidder_sequence);
        let mut node = self.node.lock().await;
        node.handle_bid(request, Origin::Client).await.map_err(|e| match e {
            NodeError::NotLeader => RpcError::Refused {
                addr: self.addr.clone(),
                status: Status::failed_precondition(e.to_string()),
            },
            NodeError::Stopped => {
                RpcError::Unreachable { addr: self.addr.clone(), reason: e.to_string() }
            }
        })
    }

    async fn result(&self, lamport: Lamport) -> Result<AuctionSnapshot, RpcError> {
        self.check_reachable()?;
        Ok(self.node.lock().await.handle_result(lamport))
    }
}
