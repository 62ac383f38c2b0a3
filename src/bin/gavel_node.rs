use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use gavel::clock::Lamport;
use gavel::node::config::{NodeConfigBuilder, PromotionPolicy, Role};
use gavel::server::run_gavel_node;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Serve one replica of the auction", long_about = None)]
struct Args {
    /// The role this node starts in.
    #[arg(long, value_enum)]
    role: Role,

    /// The address to serve the auction on, of the form "host:port".
    #[arg(long)]
    listen: SocketAddr,

    /// The backup to mirror accepted bids to. Only meaningful for a leader.
    #[arg(long)]
    peer: Option<String>,

    /// The logical time at which the auction closes.
    #[arg(long, default_value_t = 50)]
    duration: u64,

    /// How long the leader waits on its backup before dropping it.
    #[arg(long)]
    #[clap(value_parser = humantime::parse_duration, default_value = "1s")]
    rpc_timeout: Duration,

    /// When a backup is allowed to take over.
    #[arg(long, value_enum, default_value_t = PromotionPolicy::FirstClientContact)]
    promotion: PromotionPolicy,

    /// Shared secret between leader and backup.
    #[arg(long)]
    peer_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .finish(),
    )?;

    let args = Args::parse();

    let config = NodeConfigBuilder::default()
        .listen(args.listen)
        .role(args.role)
        .peer(args.peer)
        .duration(Lamport(args.duration))
        .rpc_timeout(args.rpc_timeout)
        .promotion(args.promotion)
        .peer_token(args.peer_token)
        .build()?;

    run_gavel_node(config).await
}
