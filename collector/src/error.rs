//! Collector error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by the collecting process itself.
///
/// Per-message decode failures are reported through
/// [`DecodeError`](crate::DecodeError) and never reach the message channel.
#[derive(Error, Debug)]
pub enum Error {
    /// Bind address did not parse
    #[error("invalid bind address '{0}': expected tcp://host:port or udp://host:port")]
    InvalidBindAddress(String),

    /// Configuration rejected before start
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Binding the listener or socket failed
    #[error("failed to bind {addr}")]
    Bind {
        /// The address that could not be bound
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// `start` was called twice
    #[error("collector already started")]
    AlreadyStarted,
}
