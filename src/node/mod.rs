use crate::auction::{AuctionState, BidOutcome};
use crate::clock::{Lamport, LamportClock};
use crate::node::backup::BackupPeer;
use crate::node::config::{NodeConfig, PromotionPolicy, Role};
use crate::node::error::NodeError;
use crate::node::handle::NodeHandle;
use crate::node::messages::{AuctionSnapshot, BidAck, BidRequest, NodeStatus, Origin, PromoteAck};
use crate::node::queue::CoreQueueEntry;
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, info, warn, Instrument};

pub mod backup;
pub mod config;
pub mod error;
pub mod handle;
pub mod messages;
mod queue;

/// One auction node, leader or backup.
///
/// The node owns its clock, its copy of the auction and its backup handle outright. It is driven
/// by a single task (see [`run_node`]) that handles one request at a time, so the whole accept
/// sequence for a bid, mirroring included, happens without interleaving.
pub struct AuctionNode<B: BackupPeer> {
    config: NodeConfig,

    role: Role,

    clock: LamportClock,

    auction: AuctionState,

    /// Where accepted bids are mirrored to. Only a leader has one, and it is dropped for good the
    /// first time the backup fails to answer.
    backup: Option<B>,

    /// How many bids this node has accepted.
    commit_index: u64,

    /// The highest commit index the backup has acknowledged.
    replicated_index: u64,
}

impl<B: BackupPeer> AuctionNode<B> {
    pub fn new(config: NodeConfig, backup: Option<B>) -> AuctionNode<B> {
        let role = config.role;
        let auction = AuctionState::new(config.duration);
        let backup = match role {
            Role::Leader => backup,
            Role::Backup => None,
        };
        AuctionNode {
            config,
            role,
            clock: LamportClock::new(),
            auction,
            backup,
            commit_index: 0,
            replicated_index: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn now(&self) -> Lamport {
        self.clock.now()
    }

    pub fn auction(&self) -> &AuctionState {
        &self.auction
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    async fn handle_event(&mut self, cqe: CoreQueueEntry) {
        match cqe {
            CoreQueueEntry::Bid { request, origin, response_tx, span } => {
                let ack = self.handle_bid(request, origin).instrument(span).await;
                if response_tx.send(ack).is_err() {
                    warn!("Failed to send BidAck. Client request may have timed out.");
                }
            }

            CoreQueueEntry::Result { lamport, response_tx, span } => {
                let snapshot = span.in_scope(|| self.handle_result(lamport));
                if response_tx.send(snapshot).is_err() {
                    warn!("Failed to send result. Client request may have timed out.");
                }
            }

            CoreQueueEntry::Status { lamport, response_tx, span } => {
                let status = span.in_scope(|| self.handle_status(lamport));
                if response_tx.send(status).is_err() {
                    warn!("Failed to send status. Client request may have timed out.");
                }
            }

            CoreQueueEntry::Promote { lamport, response_tx, span } => {
                let ack = span.in_scope(|| self.handle_promote(lamport));
                if response_tx.send(ack).is_err() {
                    warn!("Failed to send promotion ack. Client request may have timed out.");
                }
            }
        }
    }

    pub async fn handle_bid(
        &mut self,
        req: BidRequest,
        origin: Origin,
    ) -> Result<BidAck, NodeError> {
        debug!("Received {:?} bid: {:?}", origin, req);
        self.merge(req.lamport);

        match (self.role, origin) {
            (Role::Backup, Origin::Client) => match self.config.promotion {
                PromotionPolicy::FirstClientContact => {
                    info!("Bidder {} contacted us directly. The leader must be gone.", req.bidder);
                    self.promote();
                }
                PromotionPolicy::ExplicitOnly => {
                    warn!(
                        "Refusing bid from {}: not leader, waiting for an explicit promotion.",
                        req.bidder
                    );
                    self.tick();
                    return Err(NodeError::NotLeader);
                }
            },

            (Role::Backup, Origin::Peer) => return Ok(self.apply_mirrored(&req)),

            (Role::Leader, Origin::Peer) => {
                // Split brain: an old leader came back and is still mirroring to us.
                warn!("Received a mirrored bid while leading. Treating it as an ordinary bid.");
            }

            (Role::Leader, Origin::Client) => {}
        }

        if req.bidder_sequence == 1 {
            info!("{} is registered and can now bid ({}).", req.bidder, self.now());
        }

        let outcome = self.auction.try_accept(req.bidder, req.amount, req.bidder_sequence);
        if outcome != BidOutcome::Accepted {
            info!("Bid by {} of {} {}.", req.bidder, req.amount, outcome);
            let lamport = self.tick();
            return Ok(BidAck { outcome, lamport });
        }

        self.commit_index += 1;
        let lamport = self.tick();
        info!(
            "Bid by {} of {} accepted at index {} ({}).",
            req.bidder, req.amount, self.commit_index, lamport
        );

        if self.role == Role::Leader {
            self.replicate(&req).await;
        }

        Ok(BidAck { outcome: BidOutcome::Accepted, lamport: self.now() })
    }

    /// Copy a bid the leader has committed. The leader already validated it, so it is recorded
    /// even if our own clock has closed the auction.
    fn apply_mirrored(&mut self, req: &BidRequest) -> BidAck {
        let expected = self.commit_index + 1;
        if req.replication_index != 0 && req.replication_index != expected {
            warn!(
                "Mirrored bid has leader index {} but we expected {}. Copies may have diverged.",
                req.replication_index, expected
            );
        }

        if !self.auction.apply_mirrored(req.bidder, req.amount, req.bidder_sequence) {
            warn!(
                "Mirrored bid by {} of {} does not beat our highest bid. Taking the leader's copy.",
                req.bidder, req.amount
            );
        }

        self.commit_index += 1;
        let lamport = self.tick();
        debug!("Applied mirrored bid at index {} ({}).", self.commit_index, lamport);
        BidAck { outcome: BidOutcome::Accepted, lamport }
    }

    /// Mirror the bid just committed to the backup, if we still have one.
    async fn replicate(&mut self, req: &BidRequest) {
        let mirrored = BidRequest {
            lamport: self.now(),
            replication_index: self.commit_index,
            ..req.clone()
        };

        let (addr, result) = match self.backup.as_mut() {
            Some(backup) => (backup.addr().to_string(), backup.mirror(mirrored).await),
            None => {
                debug!("No backup attached. Skipping replication.");
                return;
            }
        };

        match result {
            Ok(ack) => {
                self.merge(ack.lamport);
                if ack.outcome.is_accepted() {
                    self.replicated_index = self.commit_index;
                    debug!("Backup {} acknowledged index {}.", addr, self.commit_index);
                } else {
                    warn!(
                        "Backup {} answered {} to a bid we accepted. Copies have diverged.",
                        addr, ack.outcome
                    );
                }
            }

            Err(e) => {
                warn!("Backup {} is not responding ({:#}). Continuing without a backup.", addr, e);
                self.backup = None;
            }
        }
    }

    pub fn handle_result(&mut self, lamport: Lamport) -> AuctionSnapshot {
        self.merge(lamport);
        let lamport = self.tick();
        AuctionSnapshot {
            highest_bid: self.auction.highest_bid(),
            highest_bidder: self.auction.highest_bidder(),
            closed: self.auction.is_closed(),
            lamport,
        }
    }

    pub fn handle_status(&mut self, lamport: Lamport) -> NodeStatus {
        self.merge(lamport);
        let lamport = self.tick();
        NodeStatus {
            role: self.role,
            lamport,
            closed: self.auction.is_closed(),
            backup_attached: self.has_backup(),
            commit_index: self.commit_index,
            replicated_index: self.replicated_index,
        }
    }

    pub fn handle_promote(&mut self, lamport: Lamport) -> PromoteAck {
        self.merge(lamport);
        let previous_role = self.role;
        match previous_role {
            Role::Backup => {
                info!("Promotion requested by an operator.");
                self.promote();
            }
            Role::Leader => debug!("Promotion requested but we already lead."),
        }
        PromoteAck { previous_role, lamport: self.tick() }
    }

    fn promote(&mut self) {
        self.role = Role::Leader;
        self.backup = None;
        info!(
            "Changed role to leader with highest bid {} ({}).",
            self.auction.highest_bid(),
            self.now()
        );
    }

    fn tick(&mut self) -> Lamport {
        self.clock.tick();
        self.check_clock();
        self.now()
    }

    fn merge(&mut self, remote: Lamport) -> Lamport {
        self.clock.merge(remote);
        self.check_clock();
        self.now()
    }

    fn check_clock(&mut self) {
        if self.auction.close_if_due(self.now()) {
            info!(
                "Auction closed with highest bid {} ({}).",
                self.auction.highest_bid(),
                self.now()
            );
        }
    }
}

#[tracing::instrument(skip_all, fields(listen = %node.config.listen, role = %node.role))]
async fn run<B: BackupPeer>(
    mut node: AuctionNode<B>,
    mut core_rx: UnboundedReceiver<CoreQueueEntry>,
) {
    while let Some(cqe) = core_rx.recv().await {
        node.handle_event(cqe).await;
    }
    debug!("Every handle was dropped. Stopping.");
}

/// Start a node task and return a handle to it.
pub fn run_node<B: BackupPeer>(config: NodeConfig, backup: Option<B>) -> NodeHandle {
    let (core_tx, core_rx) = unbounded_channel();
    let node = AuctionNode::new(config, backup);
    spawn(run(node, core_rx));
    NodeHandle::new(core_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::BidderId;
    use crate::testing::{node_config, FailingBackup, LocalBackup, NoBackup};

    fn bid(bidder: u64, amount: u64, lamport: u64, bidder_sequence: u64) -> BidRequest {
        BidRequest {
            bidder: BidderId(bidder),
            amount,
            lamport: Lamport(lamport),
            bidder_sequence,
            replication_index: 0,
        }
    }

    fn solo_leader(duration: u64) -> AuctionNode<NoBackup> {
        AuctionNode::new(node_config(Role::Leader, duration), None)
    }

    #[tokio::test]
    async fn test_accept_then_reject_low_then_result() {
        let mut leader = solo_leader(100);

        let ack = leader.handle_bid(bid(1, 100, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack, BidAck { outcome: BidOutcome::Accepted, lamport: Lamport(2) });

        let ack = leader.handle_bid(bid(2, 50, 2, 1), Origin::Client).await.unwrap();
        assert_eq!(ack, BidAck { outcome: BidOutcome::RejectedLow, lamport: Lamport(4) });

        let snapshot = leader.handle_result(Lamport(0));
        assert_eq!(snapshot.highest_bid, 100);
        assert_eq!(snapshot.highest_bidder, Some(BidderId(1)));
        assert!(!snapshot.closed);
        assert!(leader.auction().is_registered(BidderId(1)));
        assert!(!leader.auction().is_registered(BidderId(2)));
    }

    #[tokio::test]
    async fn test_increasing_bids_are_all_accepted() {
        let mut leader = solo_leader(1_000);
        let mut lamport = Lamport(0);
        for (seq, amount) in (1..=10).map(|i| (i, i * 10)) {
            let request = bid(seq % 3, amount, lamport.0, seq);
            let ack = leader.handle_bid(request, Origin::Client).await.unwrap();
            assert_eq!(ack.outcome, BidOutcome::Accepted);
            assert!(ack.lamport > lamport);
            lamport = ack.lamport;
            assert_eq!(leader.auction().highest_bid(), amount);
            assert_eq!(leader.auction().highest_bidder(), Some(BidderId(seq % 3)));
        }
    }

    #[tokio::test]
    async fn test_equal_bid_is_rejected() {
        let mut leader = solo_leader(1_000);
        leader.handle_bid(bid(1, 100, 0, 1), Origin::Client).await.unwrap();
        let ack = leader.handle_bid(bid(2, 100, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::RejectedLow);
        assert_eq!(leader.auction().highest_bidder(), Some(BidderId(1)));
    }

    #[tokio::test]
    async fn test_auction_closes_once_on_logical_time() {
        let mut leader = solo_leader(5);

        let ack = leader.handle_bid(bid(1, 10, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);
        assert!(!leader.handle_result(Lamport(0)).closed);

        // The merge of the third call reaches the deadline.
        let ack = leader.handle_bid(bid(2, 20, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::RejectedClosed);
        let closed_at = leader.auction().closed_at().expect("closed");
        assert_eq!(closed_at, Lamport(5));

        for _ in 0..2 {
            assert!(leader.handle_result(Lamport(0)).closed);
        }
        assert_eq!(leader.auction().closed_at(), Some(closed_at));
        assert_eq!(leader.auction().highest_bid(), 10);
        assert_eq!(leader.auction().highest_bidder(), Some(BidderId(1)));
    }

    #[tokio::test]
    async fn test_remote_time_can_close_the_auction() {
        let mut leader = solo_leader(50);
        let ack = leader.handle_bid(bid(1, 10, 49, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::RejectedClosed);
        assert_eq!(leader.auction().highest_bid(), 0);
    }

    #[tokio::test]
    async fn test_closed_auction_rejects_everything() {
        let mut leader = solo_leader(3);
        leader.handle_result(Lamport(10));
        for amount in [1, 100, u64::MAX] {
            let ack = leader.handle_bid(bid(1, amount, 0, 1), Origin::Client).await.unwrap();
            assert_eq!(ack.outcome, BidOutcome::RejectedClosed);
        }
        assert_eq!(leader.auction().highest_bid(), 0);
        assert_eq!(leader.auction().highest_bidder(), None);
    }

    #[tokio::test]
    async fn test_accepted_bids_are_mirrored() {
        let backup_node = LocalBackup::new(node_config(Role::Backup, 1_000));
        let mut leader =
            AuctionNode::new(node_config(Role::Leader, 1_000), Some(backup_node.clone()));

        let ack = leader.handle_bid(bid(1, 100, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);
        leader.handle_bid(bid(2, 50, 0, 1), Origin::Client).await.unwrap();
        leader.handle_bid(bid(2, 150, 0, 2), Origin::Client).await.unwrap();

        let backup = backup_node.node.lock().await;
        assert_eq!(backup.role(), Role::Backup);
        assert_eq!(backup.auction().highest_bid(), 150);
        assert_eq!(backup.auction().highest_bidder(), Some(BidderId(2)));
        assert!(backup.auction().is_registered(BidderId(1)));
        assert_eq!(backup.commit_index, 2);
        drop(backup);

        let status = leader.handle_status(Lamport(0));
        assert_eq!(status.commit_index, 2);
        assert_eq!(status.replicated_index, 2);
        assert_eq!(status.replication_lag(), 0);
        assert!(status.backup_attached);
    }

    #[tokio::test]
    async fn test_leader_clock_follows_backup_ack() {
        let backup_node = LocalBackup::new(node_config(Role::Backup, 1_000));
        let mut leader =
            AuctionNode::new(node_config(Role::Leader, 1_000), Some(backup_node.clone()));

        let ack = leader.handle_bid(bid(1, 100, 0, 1), Origin::Client).await.unwrap();
        let backup_now = backup_node.node.lock().await.now();
        // Mirror sent at 2, backup merges to 3 and commits at 4, leader merges the ack to 5.
        assert_eq!(backup_now, Lamport(4));
        assert_eq!(ack.lamport, Lamport(5));
    }

    #[tokio::test]
    async fn test_unreachable_backup_is_dropped() {
        let backup = FailingBackup::default();
        let mut leader = AuctionNode::new(node_config(Role::Leader, 1_000), Some(backup.clone()));

        let ack = leader.handle_bid(bid(1, 75, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);
        assert!(!leader.has_backup());

        let ack = leader.handle_bid(bid(2, 80, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);
        assert_eq!(backup.attempts(), 1);

        let status = leader.handle_status(Lamport(0));
        assert_eq!(status.commit_index, 2);
        assert_eq!(status.replicated_index, 0);
        assert_eq!(status.replication_lag(), 2);
    }

    #[tokio::test]
    async fn test_rejected_bids_are_not_mirrored() {
        let backup = FailingBackup::default();
        let mut leader = AuctionNode::new(node_config(Role::Leader, 1_000), Some(backup.clone()));
        leader.auction.try_accept(BidderId(9), 500, 1);

        leader.handle_bid(bid(1, 10, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(backup.attempts(), 0);
        assert!(leader.has_backup());
    }

    #[tokio::test]
    async fn test_backup_promotes_on_first_client_bid() {
        let mut backup: AuctionNode<NoBackup> =
            AuctionNode::new(node_config(Role::Backup, 1_000), None);

        let mirrored = BidRequest { replication_index: 1, ..bid(1, 100, 2, 1) };
        backup.handle_bid(mirrored, Origin::Peer).await.unwrap();
        assert_eq!(backup.role(), Role::Backup);

        let ack = backup.handle_bid(bid(2, 75, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(backup.role(), Role::Leader);
        assert_eq!(ack.outcome, BidOutcome::RejectedLow);

        let ack = backup.handle_bid(bid(2, 175, 0, 2), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);
        assert_eq!(backup.auction().highest_bidder(), Some(BidderId(2)));
    }

    #[tokio::test]
    async fn test_explicit_promotion_policy() {
        let mut config = node_config(Role::Backup, 1_000);
        config.promotion = PromotionPolicy::ExplicitOnly;
        let mut backup: AuctionNode<NoBackup> = AuctionNode::new(config, None);

        let result = backup.handle_bid(bid(1, 100, 0, 1), Origin::Client).await;
        assert!(matches!(result, Err(NodeError::NotLeader)));
        assert_eq!(backup.role(), Role::Backup);
        assert_eq!(backup.auction().highest_bid(), 0);

        let ack = backup.handle_promote(Lamport(0));
        assert_eq!(ack.previous_role, Role::Backup);
        let ack = backup.handle_promote(Lamport(0));
        assert_eq!(ack.previous_role, Role::Leader);

        let ack = backup.handle_bid(bid(1, 100, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_every_call_advances_the_clock() {
        let mut leader = solo_leader(1_000);
        let mut last = leader.now();
        for i in 0..5 {
            leader.handle_bid(bid(1, i, 0, i + 1), Origin::Client).await.unwrap();
            assert!(leader.now() > last);
            last = leader.now();
            leader.handle_result(Lamport(0));
            assert!(leader.now() > last);
            last = leader.now();
        }
    }

    #[tokio::test]
    async fn test_node_task_serves_handle() {
        let handle = run_node::<NoBackup>(node_config(Role::Leader, 1_000), None);

        let ack = handle.bid(bid(1, 100, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);

        // Concurrent bids are serialized: exactly one of two equal bids can win.
        let (a, b) = tokio::join!(
            handle.bid(bid(2, 200, 0, 1), Origin::Client),
            handle.bid(bid(3, 200, 0, 1), Origin::Client),
        );
        let accepted = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|ack| ack.outcome.is_accepted())
            .count();
        assert_eq!(accepted, 1);

        let snapshot = handle.result(Lamport(0)).await.unwrap();
        assert_eq!(snapshot.highest_bid, 200);

        let status = handle.status(Lamport(0)).await.unwrap();
        assert_eq!(status.role, Role::Leader);
        assert_eq!(status.commit_index, 2);
        assert!(!status.backup_attached);
    }

    #[tokio::test]
    async fn test_bid_committed_at_deadline_reaches_backup() {
        let backup_node = LocalBackup::new(node_config(Role::Backup, 5));
        let mut leader = AuctionNode::new(node_config(Role::Leader, 5), Some(backup_node.clone()));

        // Merge to 4, commit at 5 closes the leader. The backup merges the mirror to 6 and is
        // closed before the bid is applied.
        let ack = leader.handle_bid(bid(1, 100, 3, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::Accepted);
        assert_eq!(leader.auction().closed_at(), Some(Lamport(5)));

        let backup = backup_node.node.lock().await;
        assert!(backup.auction().is_closed());
        assert_eq!(backup.auction().highest_bid(), 100);
        assert_eq!(backup.auction().highest_bidder(), Some(BidderId(1)));
        assert_eq!(backup.commit_index, 1);
        drop(backup);

        let status = leader.handle_status(Lamport(0));
        assert_eq!(status.replicated_index, 1);
        assert!(status.backup_attached);
    }

    #[tokio::test]
    async fn test_promoted_backup_keeps_winning_bid_after_close() {
        let backup_node = LocalBackup::new(node_config(Role::Backup, 5));
        let mut leader = AuctionNode::new(node_config(Role::Leader, 5), Some(backup_node.clone()));
        leader.handle_bid(bid(1, 100, 3, 1), Origin::Client).await.unwrap();

        let mut backup = backup_node.node.lock().await;
        let ack = backup.handle_bid(bid(2, 500, 0, 1), Origin::Client).await.unwrap();
        assert_eq!(backup.role(), Role::Leader);
        assert_eq!(ack.outcome, BidOutcome::RejectedClosed);

        let snapshot = backup.handle_result(Lamport(0));
        assert!(snapshot.closed);
        assert_eq!(snapshot.highest_bid, 100);
        assert_eq!(snapshot.highest_bidder, Some(BidderId(1)));
    }

    #[tokio::test]
    async fn test_extreme_remote_clock_does_not_stop_node() {
        let handle = run_node::<NoBackup>(node_config(Role::Leader, 1_000), None);

        let snapshot = handle.result(Lamport(u64::MAX)).await.unwrap();
        assert_eq!(snapshot.lamport, Lamport(u64::MAX));
        assert!(snapshot.closed);

        let ack = handle.bid(bid(1, 100, u64::MAX, 1), Origin::Client).await.unwrap();
        assert_eq!(ack.outcome, BidOutcome::RejectedClosed);
        assert_eq!(ack.lamport, Lamport(u64::MAX));

        let status = handle.status(Lamport(0)).await.unwrap();
        assert_eq!(status.lamport, Lamport(u64::MAX));
        assert_eq!(status.commit_index, 0);
    }
}
