use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::clock::Lamport;
use derive_builder::Builder;

/// Which part a node is playing in the auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Serves bidders and mirrors every accepted bid to its backup.
    Leader,
    /// Passively applies mirrored bids until it is promoted.
    Backup,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => write!(f, "leader"),
            Role::Backup => write!(f, "backup"),
        }
    }
}

/// When a backup is allowed to take over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PromotionPolicy {
    /// The first bid that arrives directly from a bidder promotes the backup. A bidder only
    /// talks to the backup once it has given up on the leader.
    #[default]
    FirstClientContact,
    /// Only an explicit `Promote` call promotes the backup. Bidder traffic is refused until then.
    ExplicitOnly,
}

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct NodeConfig {
    /// The address to serve the auction on.
    pub listen: SocketAddr,

    /// The role this node starts in.
    pub role: Role,

    /// The backup to mirror accepted bids to, as a URI. Only used when starting as leader.
    #[builder(default)]
    pub peer: Option<String>,

    /// The logical time at which the auction closes.
    #[builder(default = "Lamport(50)")]
    pub duration: Lamport,

    /// How long to wait on the backup before treating it as gone.
    #[builder(default = "Duration::from_secs(1)")]
    pub rpc_timeout: Duration,

    #[builder(default)]
    pub promotion: PromotionPolicy,

    /// Shared secret that mirrored bids must present. Without it, any caller claiming to be the
    /// leader is believed.
    #[builder(default)]
    pub peer_token: Option<String>,
}
