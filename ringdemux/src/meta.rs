use std::net::IpAddr;
use std::time::Instant;

use bytes::Bytes;
use ringdemux_addr::EndpointTuple;

/// Position of a socket in [`Config::bind`](crate::Config::bind) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketIndex(pub(crate) u32);

impl SocketIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Everything known about where a datagram came from and where it landed.
#[derive(Debug, Clone, Copy)]
pub struct RecvMeta {
    /// Remote address and port.
    pub source: EndpointTuple,
    /// Local address the datagram was sent to. Taken from the packet header
    /// when the kernel reports it, which matters for wildcard-bound sockets;
    /// otherwise the socket's bound address.
    pub destination: EndpointTuple,
    /// Arrival interface, 0 if unknown.
    pub if_index: u32,
    /// Socket the datagram arrived on.
    pub socket: SocketIndex,
    /// Taken when the completion was reaped.
    pub received_at: Instant,
    /// The datagram was longer than the receive buffer; the payload holds
    /// only its first `recv_buffer_size` bytes.
    pub truncated: bool,
}

impl RecvMeta {
    /// The local path a reply to this datagram should leave by: same socket,
    /// same local address, same interface.
    pub fn reply_path(&self) -> LocalPath {
        LocalPath {
            socket: Some(self.socket),
            source: Some(self.destination.ip()).filter(|ip| !ip.is_unspecified()),
            if_index: self.if_index,
        }
    }
}

/// Send-side hint selecting socket, source address and interface.
///
/// All fields are optional. An unset socket falls back to the first bound
/// socket of the destination's family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalPath {
    pub socket: Option<SocketIndex>,
    pub source: Option<IpAddr>,
    /// Outgoing interface, 0 to let routing decide.
    pub if_index: u32,
}

/// One received datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub meta: RecvMeta,
}

/// Result of [`Multiplexer::receive`](crate::Multiplexer::receive).
#[derive(Debug)]
pub enum Recv {
    Datagram(Datagram),
    /// The timeout elapsed with no datagram.
    TimedOut,
}

impl Recv {
    /// The datagram, if one arrived.
    pub fn datagram(self) -> Option<Datagram> {
        match self {
            Recv::Datagram(d) => Some(d),
            Recv::TimedOut => None,
        }
    }
}
