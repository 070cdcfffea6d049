use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::Error;

/// Largest datagram delivered whole by default. Longer datagrams arrive
/// truncated to this size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1536;

/// Configuration for a [`Multiplexer`](crate::Multiplexer).
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of SQ entries. CQ will be 4x this and must fit every
    /// in-flight op: one recv per socket, the eventfd read, and their
    /// cancels on close.
    pub sq_entries: u32,
    /// Local addresses to bind, one socket each. Port 0 lets the kernel pick.
    /// Empty is allowed: `receive` then only waits for timeout or close.
    pub bind: Vec<SocketAddr>,
    /// Per-socket receive buffer size in bytes. Default: 1536.
    pub recv_buffer_size: usize,
    /// Set `SO_REUSEPORT` before binding. Default: false.
    pub reuse_port: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sq_entries: 64,
            bind: Vec::new(),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            reuse_port: false,
        }
    }
}

impl Config {
    /// One IPv4 and one IPv6 wildcard socket on `port`.
    ///
    /// IPv6 sockets are always `IPV6_V6ONLY`, so both can share the port.
    pub fn dual_stack(port: u16) -> Self {
        Self {
            bind: vec![
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port),
                SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port),
            ],
            ..Self::default()
        }
    }

    /// Add a bind address.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind.push(addr);
        self
    }

    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sq_entries == 0 || !self.sq_entries.is_power_of_two() {
            return Err(Error::RingSetup(
                "sq_entries must be > 0 and a power of two".into(),
            ));
        }
        // recv + cancel per socket, eventfd read + its cancel.
        let needed = self.bind.len() as u64 * 2 + 2;
        if needed > self.sq_entries as u64 * 4 {
            return Err(Error::RingSetup(format!(
                "sq_entries {} too small for {} sockets",
                self.sq_entries,
                self.bind.len()
            )));
        }
        if self.bind.len() >= (1 << 24) {
            return Err(Error::RingSetup("too many bind addresses".into()));
        }
        if self.recv_buffer_size == 0 || self.recv_buffer_size > u32::MAX as usize {
            return Err(Error::RingSetup(
                "recv_buffer_size must be > 0 and fit in u32".into(),
            ));
        }
        Ok(())
    }
}
