use anyhow::Context;
use tonic::metadata::{Ascii, MetadataValue};

pub mod admin;
pub mod client;
pub mod config;
pub mod pb;
pub mod server;

/// Metadata key naming who sent a bid. Only the value [`ORIGIN_PEER`] means anything; every
/// other call is bidder traffic.
pub const ORIGIN_HEADER: &str = "x-gavel-origin";

pub const ORIGIN_PEER: &str = "peer";

/// Metadata key carrying the shared secret of leader-to-backup calls.
pub const PEER_TOKEN_HEADER: &str = "x-gavel-peer-token";

/// Check a peer token can travel as gRPC metadata.
pub(crate) fn parse_peer_token(
    token: Option<&str>,
) -> anyhow::Result<Option<MetadataValue<Ascii>>> {
    token
        .map(|token| token.parse().context("peer token must be printable ASCII"))
        .transpose()
}

/// Turn "host:port" into a URI tonic can dial. Anything that already has a scheme is kept.
pub fn to_uri(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}
