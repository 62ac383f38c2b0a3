use std::time::Duration;

use crate::auction::BidderId;
use derive_builder::Builder;

#[derive(Debug, Clone, Builder)]
pub struct BidderConfig {
    pub id: BidderId,

    /// The node bids go to first, normally the leader.
    pub primary: String,

    /// Where to go once the primary stops answering.
    #[builder(default)]
    pub backup: Option<String>,

    #[builder(default = "Duration::from_secs(5)")]
    pub rpc_timeout: Duration,
}

impl BidderConfigBuilder {
    /// Take the primary and backup from a server list. The first entry is the primary, the
    /// second the backup, anything after that is ignored.
    pub fn servers(&mut self, servers: &[String]) -> &mut Self {
        if let Some(primary) = servers.first() {
            self.primary(primary.clone());
        }
        self.backup(servers.get(1).cloned())
    }
}
