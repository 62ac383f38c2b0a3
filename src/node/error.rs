#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A passive backup that may only be promoted explicitly received bidder traffic.
    #[error("not the leader: this backup only takes over on an explicit promotion")]
    NotLeader,

    /// The node task is gone, so nothing can answer the request.
    #[error("the auction node has stopped")]
    Stopped,
}
