pub mod auction;
pub mod clock;
pub mod net;
pub mod node;
pub mod rpc;
pub mod server;
pub mod shell;

#[cfg(test)]
mod testing;
