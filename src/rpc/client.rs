use std::future::Future;
use std::time::Duration;

use crate::auction::{BidOutcome, BidderId};
use crate::clock::{Lamport, LamportClock};
use crate::node::messages::{AuctionSnapshot, BidAck, BidRequest};
use crate::rpc::config::BidderConfig;
use crate::rpc::pb::auction_client::AuctionClient;
use crate::rpc::pb::ResultRequest;
use crate::rpc::to_uri;
use tonic::transport::{Channel, Endpoint};
use tonic::{async_trait, Code, Response, Status};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The server could not be reached or did not answer in time.
    #[error("{addr} is not responding: {reason}")]
    Unreachable { addr: String, reason: String },

    /// The server answered, but with an error.
    #[error("{addr} refused the call: {status}")]
    Refused { addr: String, status: Status },
}

impl RpcError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RpcError::Unreachable { .. })
    }
}

/// Codes that mean the call never got a real answer from the server.
fn is_transport_failure(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled | Code::Unknown
    )
}

/// The calls a bidder makes against one auction node.
#[async_trait]
pub trait AuctionRpc: Send + Sync {
    fn addr(&self) -> &str;

    async fn bid(&self, request: BidRequest) -> Result<BidAck, RpcError>;

    async fn result(&self, lamport: Lamport) -> Result<AuctionSnapshot, RpcError>;
}

pub struct GrpcAuctionRpc {
    addr: String,
    client: AuctionClient<Channel>,
    timeout: Duration,
}

impl GrpcAuctionRpc {
    pub fn new(addr: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = make_auction_client(addr, timeout)?;
        Ok(Self { addr: addr.to_string(), client, timeout })
    }
}

/// Run one call against `addr`, giving up after `timeout`. Transport failures and timeouts come
/// back as [`RpcError::Unreachable`], every other error status as [`RpcError::Refused`].
pub(crate) async fn bounded_call<T, F>(
    addr: &str,
    timeout: Duration,
    call: F,
) -> Result<T, RpcError>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) if is_transport_failure(&status) => {
            Err(RpcError::Unreachable { addr: addr.to_string(), reason: status.to_string() })
        }
        Ok(Err(status)) => Err(RpcError::Refused { addr: addr.to_string(), status }),
        Err(_) => Err(RpcError::Unreachable {
            addr: addr.to_string(),
            reason: format!("no reply within {:?}", timeout),
        }),
    }
}

#[async_trait]
impl AuctionRpc for GrpcAuctionRpc {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn bid(&self, request: BidRequest) -> Result<BidAck, RpcError> {
        let mut request = tonic::Request::new(request.to_pb());
        request.set_timeout(self.timeout);
        let mut client = self.client.clone();
        let ack = bounded_call(&self.addr, self.timeout, client.bid(request)).await?;
        BidAck::from_pb(&ack)
            .map_err(|status| RpcError::Refused { addr: self.addr.clone(), status })
    }

    async fn result(&self, lamport: Lamport) -> Result<AuctionSnapshot, RpcError> {
        let mut request = tonic::Request::new(ResultRequest { lamport: lamport.0 });
        request.set_timeout(self.timeout);
        let mut client = self.client.clone();
        let call = client.result(request);
        let response = bounded_call(&self.addr, self.timeout, call).await?;
        Ok(AuctionSnapshot::from_pb(&response))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidReceipt {
    pub amount: u64,
    pub outcome: BidOutcome,

    /// Our clock after merging the server's reply.
    pub lamport: Lamport,
}

/// A bidder's connection to the auction.
///
/// Calls go to the primary target. The first time the primary cannot be reached during a bid,
/// the client switches to the backup for good and resends the bid there once. There is no way
/// back: the client never learns whether the old leader recovered.
pub struct BidderClient<T: AuctionRpc> {
    id: BidderId,
    target: T,
    backup: Option<T>,
    clock: LamportClock,

    /// Bids a server has seen from us. Incremented before sending, undone if nobody saw it.
    bid_sequence: u64,

    failed_over: bool,
}

impl BidderClient<GrpcAuctionRpc> {
    pub fn connect(config: &BidderConfig) -> anyhow::Result<Self> {
        let primary = GrpcAuctionRpc::new(&config.primary, config.rpc_timeout)?;
        let backup = config
            .backup
            .as_deref()
            .map(|addr| GrpcAuctionRpc::new(addr, config.rpc_timeout))
            .transpose()?;
        Ok(BidderClient::new(config.id, primary, backup))
    }
}

impl<T: AuctionRpc> BidderClient<T> {
    pub fn new(id: BidderId, primary: T, backup: Option<T>) -> Self {
        Self {
            id,
            target: primary,
            backup,
            clock: LamportClock::new(),
            bid_sequence: 0,
            failed_over: false,
        }
    }

    pub fn id(&self) -> BidderId {
        self.id
    }

    /// The node calls currently go to.
    pub fn target_addr(&self) -> &str {
        self.target.addr()
    }

    pub fn has_failed_over(&self) -> bool {
        self.failed_over
    }

    pub fn bid_sequence(&self) -> u64 {
        self.bid_sequence
    }

    pub fn now(&self) -> Lamport {
        self.clock.now()
    }

    #[instrument(skip(self), fields(bidder = self.id.0))]
    pub async fn bid(&mut self, amount: u64) -> Result<BidReceipt, RpcError> {
        let lamport = self.clock.tick();
        self.bid_sequence += 1;
        let request = BidRequest {
            bidder: self.id,
            amount,
            lamport,
            bidder_sequence: self.bid_sequence,
            replication_index: 0,
        };
        debug!("Sending bid {:?} to {}", request, self.target.addr());

        let mut result = self.target.bid(request.clone()).await;
        let unreachable = matches!(&result, Err(e) if e.is_unreachable());
        if unreachable && self.fail_over() {
            info!("Trying backup {}", self.target.addr());
            result = self.target.bid(request).await;
        }

        match result {
            Ok(ack) => {
                self.clock.merge(ack.lamport);
                Ok(BidReceipt { amount, outcome: ack.outcome, lamport: self.clock.now() })
            }
            Err(e) => {
                warn!("Bid of {} failed: {}", amount, e);
                self.bid_sequence -= 1;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(bidder = self.id.0))]
    pub async fn result(&mut self) -> Result<AuctionSnapshot, RpcError> {
        let lamport = self.clock.tick();
        let snapshot = self.target.result(lamport).await?;
        self.clock.merge(snapshot.lamport);
        Ok(AuctionSnapshot { lamport: self.clock.now(), ..snapshot })
    }

    /// Switch to the backup. Only ever succeeds once.
    fn fail_over(&mut self) -> bool {
        if self.failed_over {
            return false;
        }
        match self.backup.take() {
            Some(backup) => {
                warn!(
                    "{} is not responding. Failing over to {} for good.",
                    self.target.addr(),
                    backup.addr()
                );
                self.target = backup;
                self.failed_over = true;
                true
            }
            None => false,
        }
    }
}

pub fn make_auction_client(
    addr: &str,
    timeout: Duration,
) -> anyhow::Result<AuctionClient<Channel>> {
    let endpoint = Endpoint::from_shared(to_uri(addr))?
        .connect_timeout(timeout)
        .timeout(timeout);

    #[cfg(not(feature = "turmoil"))]
    let channel = endpoint.connect_lazy();

    #[cfg(feature = "turmoil")]
    let channel =
        endpoint.connect_with_connector_lazy(tower::service_fn(crate::net::sim::connect));

    Ok(AuctionClient::new(channel))
}
