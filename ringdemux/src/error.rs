use std::io;
use std::net::SocketAddr;

use ringdemux_addr::AddressFamily;
use thiserror::Error;

/// Errors returned by the multiplexer.
///
/// A receive timeout is not an error; see [`Recv::TimedOut`](crate::Recv::TimedOut).
#[derive(Debug, Error)]
pub enum Error {
    /// A requested local address could not be bound. Nothing stays open.
    #[error("bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Ring setup failed or the configuration is out of range.
    #[error("ring setup: {0}")]
    RingSetup(String),
    /// No bound socket can reach a destination of this family.
    #[error("no {0} socket bound")]
    NoSocket(AddressFamily),
    /// The kernel accepted fewer bytes than the datagram holds.
    #[error("short write: sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },
    /// The multiplexer was closed.
    #[error("multiplexer closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
