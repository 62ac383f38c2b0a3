use crate::node::backup::GrpcBackupPeer;
use crate::node::config::{NodeConfig, Role};
use crate::node::run_node;
use crate::rpc::server::serve;
use tracing::{info, warn};

/// Run an auction node until its server stops. Returns an error if the listen address cannot
/// be bound or the backup address is unusable.
pub async fn run_gavel_node(config: NodeConfig) -> anyhow::Result<()> {
    let backup = match (config.role, &config.peer) {
        (Role::Leader, Some(peer)) => {
            info!("Mirroring accepted bids to backup {}", peer);
            Some(GrpcBackupPeer::new(peer, config.rpc_timeout, config.peer_token.as_deref())?)
        }
        (Role::Leader, None) => {
            warn!("Starting as leader without a backup.");
            None
        }
        (Role::Backup, Some(peer)) => {
            info!("Ignoring peer {}: a backup does not replicate onward.", peer);
            None
        }
        (Role::Backup, None) => None,
    };

    if config.peer_token.is_none() {
        warn!("No peer token configured. Any caller claiming to be the leader will be believed.");
    }

    info!("Starting as {} with auction duration {}", config.role, config.duration);
    let listen = config.listen;
    let peer_token = config.peer_token.clone();
    let handle = run_node(config, backup);
    serve(listen, handle, peer_token).await
}
