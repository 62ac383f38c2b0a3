use std::time::Duration;

use crate::clock::LamportClock;
use crate::node::messages::{NodeStatus, PromoteAck};
use crate::rpc::client::{bounded_call, make_auction_client, RpcError};
use crate::rpc::parse_peer_token;
use crate::rpc::pb::auction_client::AuctionClient;
use crate::rpc::pb::{PromoteRequest, StatusRequest};
use crate::rpc::PEER_TOKEN_HEADER;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tracing::info;

/// An operator's connection to one node, for inspecting it and promoting a backup by hand.
pub struct AdminClient {
    addr: String,
    client: AuctionClient<Channel>,
    timeout: Duration,
    peer_token: Option<MetadataValue<Ascii>>,
    clock: LamportClock,
}

impl AdminClient {
    /// `peer_token` must match the node's if it has one, or promotion is refused.
    pub fn connect(
        addr: &str,
        timeout: Duration,
        peer_token: Option<&str>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            addr: addr.to_string(),
            client: make_auction_client(addr, timeout)?,
            timeout,
            peer_token: parse_peer_token(peer_token)?,
            clock: LamportClock::new(),
        })
    }

    pub async fn status(&mut self) -> Result<NodeStatus, RpcError> {
        let mut request = tonic::Request::new(StatusRequest { lamport: self.clock.tick().0 });
        request.set_timeout(self.timeout);
        let mut client = self.client.clone();
        let call = client.status(request);
        let response = bounded_call(&self.addr, self.timeout, call).await?;
        let status = NodeStatus::from_pb(&response).map_err(|status| self.refused(status))?;
        self.clock.merge(status.lamport);
        Ok(status)
    }

    /// Ask the node to take over as leader. Promoting a leader is a no-op.
    pub async fn promote(&mut self) -> Result<PromoteAck, RpcError> {
        let mut request = tonic::Request::new(PromoteRequest { lamport: self.clock.tick().0 });
        request.set_timeout(self.timeout);
        if let Some(token) = &self.peer_token {
            request.metadata_mut().insert(PEER_TOKEN_HEADER, token.clone());
        }
        let mut client = self.client.clone();
        let call = client.promote(request);
        let response = bounded_call(&self.addr, self.timeout, call).await?;
        let ack = PromoteAck::from_pb(&response).map_err(|status| self.refused(status))?;
        self.clock.merge(ack.lamport);
        info!("{} was {} before the promotion request.", self.addr, ack.previous_role);
        Ok(ack)
    }

    fn refused(&self, status: tonic::Status) -> RpcError {
        RpcError::Refused { addr: self.addr.clone(), status }
    }
}
