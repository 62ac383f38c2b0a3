use std::time::Duration;

use clap::Parser;
use gavel::auction::BidderId;
use gavel::rpc::client::BidderClient;
use gavel::rpc::config::BidderConfigBuilder;
use gavel::shell::{run_shell, USAGE};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Bid in the auction from the terminal", long_about = None)]
struct Args {
    /// This bidder's id. Should be unique among bidders.
    #[arg(long)]
    id: u64,

    /// The leader followed by the backup, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    servers: Vec<String>,

    /// How long to wait on a node before giving up on it.
    #[arg(long)]
    #[clap(value_parser = humantime::parse_duration, default_value = "5s")]
    rpc_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the prompt.
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .finish(),
    )?;

    let args = Args::parse();

    let config = BidderConfigBuilder::default()
        .id(BidderId(args.id))
        .servers(&args.servers)
        .rpc_timeout(args.rpc_timeout)
        .build()?;
    let mut client = BidderClient::connect(&config)?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{}\n", USAGE).as_bytes()).await?;
    run_shell(&mut client, BufReader::new(tokio::io::stdin()), stdout).await
}
