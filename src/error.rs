use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failure to turn a host literal or name into a [`ParsedAddress`](crate::address::ParsedAddress).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address literal: {0}")]
    InvalidAddress(String),

    #[error("unknown host: {0}")]
    UnresolvedHost(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("hard connection limit must be at least 1")]
    NoConnectionSlots,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("could not bind listening socket {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Reasons a session stops without going through the normal QUIT path.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
