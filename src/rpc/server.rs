use std::net::SocketAddr;

use crate::clock::Lamport;
use crate::node::error::NodeError;
use crate::node::handle::NodeHandle;
use crate::node::messages::{BidRequest, Origin};
use crate::rpc::pb::auction_server::{Auction, AuctionServer};
use crate::rpc::pb::{
    BidAck, PromoteRequest, PromoteResponse, ResultRequest, ResultResponse, StatusRequest,
    StatusResponse,
};
use crate::rpc::{ORIGIN_HEADER, ORIGIN_PEER, PEER_TOKEN_HEADER};
use anyhow::Context;
use tonic::metadata::MetadataMap;
use tonic::{async_trait, Request, Response, Status};
use tracing::{debug, info, warn};

struct AuctionService {
    node: NodeHandle,
    peer_token: Option<String>,
}

impl AuctionService {
    fn presents_peer_token(&self, metadata: &MetadataMap) -> bool {
        match &self.peer_token {
            None => true,
            Some(expected) => {
                let presented = metadata.get(PEER_TOKEN_HEADER).and_then(|v| v.to_str().ok());
                presented == Some(expected.as_str())
            }
        }
    }

    /// Decide whether a bid was mirrored by the leader or sent by a bidder. A call that claims
    /// to be peer traffic without the right token is treated as coming from a bidder.
    fn classify(&self, metadata: &MetadataMap) -> Origin {
        let claims_peer =
            metadata.get(ORIGIN_HEADER).and_then(|v| v.to_str().ok()) == Some(ORIGIN_PEER);
        if !claims_peer {
            return Origin::Client;
        }

        if self.presents_peer_token(metadata) {
            Origin::Peer
        } else {
            warn!("Peer claim without the peer token. Treating the call as a bidder's.");
            Origin::Client
        }
    }
}

fn to_status(e: NodeError) -> Status {
    match e {
        NodeError::NotLeader => Status::failed_precondition(e.to_string()),
        NodeError::Stopped => Status::unavailable(e.to_string()),
    }
}

#[async_trait]
impl Auction for AuctionService {
    #[tracing::instrument(skip_all)]
    async fn bid(
        &self,
        request: Request<crate::rpc::pb::BidRequest>,
    ) -> Result<Response<BidAck>, Status> {
        let origin = self.classify(request.metadata());
        let request = BidRequest::from_pb(&request.into_inner());
        debug!("Bid `{:?}` from {:?}", request, origin);
        let ack = self.node.bid(request, origin).await.map_err(to_status)?;
        Ok(Response::new(ack.to_pb()))
    }

    #[tracing::instrument(skip_all)]
    async fn result(
        &self,
        request: Request<ResultRequest>,
    ) -> Result<Response<ResultResponse>, Status> {
        let lamport = Lamport(request.into_inner().lamport);
        let snapshot = self.node.result(lamport).await.map_err(to_status)?;
        debug!("Result `{}`", snapshot);
        Ok(Response::new(snapshot.to_pb()))
    }

    #[tracing::instrument(skip_all)]
    async fn status(
        &self,
        request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let lamport = Lamport(request.into_inner().lamport);
        let status = self.node.status(lamport).await.map_err(to_status)?;
        Ok(Response::new(status.to_pb()))
    }

    #[tracing::instrument(skip_all)]
    async fn promote(
        &self,
        request: Request<PromoteRequest>,
    ) -> Result<Response<PromoteResponse>, Status> {
        if !self.presents_peer_token(request.metadata()) {
            warn!("Refusing promotion without the peer token.");
            return Err(Status::permission_denied("promotion requires the peer token"));
        }
        let lamport = Lamport(request.into_inner().lamport);
        let ack = self.node.promote(lamport).await.map_err(to_status)?;
        Ok(Response::new(ack.to_pb()))
    }
}

/// Serve the auction on `listen` until the server fails. Failing to bind is an error.
pub async fn serve(
    listen: SocketAddr,
    node: NodeHandle,
    peer_token: Option<String>,
) -> anyhow::Result<()> {
    let incoming = crate::net::bind_incoming(listen)
        .await
        .with_context(|| format!("failed to listen on {}", listen))?;
    info!("Auction node listening on {}", listen);

    let service = AuctionService { node, peer_token };
    tonic::transport::Server::builder()
        .add_service(AuctionServer::new(service))
        .serve_with_incoming(incoming)
        .await
        .context("auction server failed")?;
    Ok(())
}
