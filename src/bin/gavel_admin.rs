use std::time::Duration;

use clap::{Parser, Subcommand};
use gavel::rpc::admin::AdminClient;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Inspect or promote an auction node", long_about = None)]
struct Args {
    /// The node to talk to.
    #[arg(long)]
    target: String,

    /// Shared secret between leader and backup. Needed to promote a node that has one.
    #[arg(long)]
    peer_token: Option<String>,

    #[arg(long)]
    #[clap(value_parser = humantime::parse_duration, default_value = "5s")]
    rpc_timeout: Duration,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the node's role, clock and replication progress.
    Status,
    /// Make a backup take over as leader.
    Promote,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .finish(),
    )?;

    let args = Args::parse();
    let peer_token = args.peer_token.as_deref();
    let mut client = AdminClient::connect(&args.target, args.rpc_timeout, peer_token)?;

    match args.command {
        Command::Status => {
            let status = client.status().await?;
            println!("role: {}", status.role);
            println!("clock: {}", status.lamport);
            println!("auction closed: {}", status.closed);
            println!("backup attached: {}", status.backup_attached);
            println!(
                "committed: {}, replicated: {} (lag {})",
                status.commit_index,
                status.replicated_index,
                status.replication_lag()
            );
        }
        Command::Promote => {
            let ack = client.promote().await?;
            println!("{} was {}, now leader ({})", args.target, ack.previous_role, ack.lamport);
        }
    }
    Ok(())
}
