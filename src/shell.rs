use crate::rpc::client::{AuctionRpc, BidderClient};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const USAGE: &str = "Commands: bid <amount> | result | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Bid(u64),
    Result,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("needs amount, try: bid <amount>")]
    MissingAmount,

    #[error("bid takes a single amount")]
    TooManyArguments,

    #[error("amount must be a non-negative integer, got `{0}`")]
    InvalidAmount(String),

    #[error("unknown command `{0}`, valid commands: bid <amount> | result | quit")]
    Unknown(String),
}

/// Parse one line of input. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(None);
    };

    let command = match cmd {
        "bid" => {
            let amount = parts.next().ok_or(CommandError::MissingAmount)?;
            if parts.next().is_some() {
                return Err(CommandError::TooManyArguments);
            }
            let amount = amount
                .parse()
                .map_err(|_| CommandError::InvalidAmount(amount.to_string()))?;
            Command::Bid(amount)
        }
        "result" => Command::Result,
        "quit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Read commands from `input` until `quit` or end of input, writing replies to `output`.
///
/// Nothing that goes wrong with a single command ends the loop. Only failing to read or write
/// the terminal does.
pub async fn run_shell<T, R, W>(
    client: &mut BidderClient<T>,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    T: AuctionRpc,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let reply = match parse_command(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Quit)) => {
                output.write_all(b"Quitting\n").await?;
                break;
            }
            Ok(Some(Command::Bid(amount))) => match client.bid(amount).await {
                Ok(receipt) => format!(
                    "Bid {} from {} was {} ({})",
                    amount,
                    client.id(),
                    receipt.outcome,
                    receipt.lamport
                ),
                Err(e) => format!("error in bid: {}", e),
            },
            Ok(Some(Command::Result)) => match client.result().await {
                Ok(snapshot) => format!("Result of {} ({})", snapshot, snapshot.lamport),
                Err(e) => format!("error in result: {}", e),
            },
            Err(e) => e.to_string(),
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await?;
    Ok(())
}
