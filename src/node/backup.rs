use std::time::Duration;

use crate::node::messages::{BidAck, BidRequest};
use crate::rpc::client::make_auction_client;
use crate::rpc::pb::auction_client::AuctionClient;
use crate::rpc::{parse_peer_token, ORIGIN_HEADER, ORIGIN_PEER, PEER_TOKEN_HEADER};
use anyhow::Context;
use tonic::async_trait;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;

/// The leader's view of its backup.
#[async_trait]
pub trait BackupPeer: Send + 'static {
    /// Where the backup lives, for logging.
    fn addr(&self) -> &str;

    /// Apply an already accepted bid on the backup. An error means the backup could not be
    /// reached in time and should be treated as gone.
    async fn mirror(&mut self, request: BidRequest) -> anyhow::Result<BidAck>;
}

/// Mirrors bids to a backup over gRPC, tagging every call as peer traffic.
pub struct GrpcBackupPeer {
    addr: String,
    client: AuctionClient<Channel>,
    timeout: Duration,
    peer_token: Option<MetadataValue<Ascii>>,
}

impl GrpcBackupPeer {
    pub fn new(addr: &str, timeout: Duration, peer_token: Option<&str>) -> anyhow::Result<Self> {
        let client = make_auction_client(addr, timeout)?;
        let peer_token = parse_peer_token(peer_token)?;
        Ok(Self { addr: addr.to_string(), client, timeout, peer_token })
    }
}

#[async_trait]
impl BackupPeer for GrpcBackupPeer {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn mirror(&mut self, request: BidRequest) -> anyhow::Result<BidAck> {
        let mut request = tonic::Request::new(request.to_pb());
        request.set_timeout(self.timeout);
        request.metadata_mut().insert(ORIGIN_HEADER, MetadataValue::from_static(ORIGIN_PEER));
        if let Some(token) = &self.peer_token {
            request.metadata_mut().insert(PEER_TOKEN_HEADER, token.clone());
        }

        // Dropping the call on timeout means a late reply is never looked at.
        let response = tokio::time::timeout(self.timeout, self.client.bid(request))
            .await
            .with_context(|| format!("no reply from backup within {:?}", self.timeout))??;
        let ack = BidAck::from_pb(&response.into_inner())?;
        Ok(ack)
    }
}
