use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// IP address family of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// The wildcard address of this family.
    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("IPv4"),
            AddressFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// A UDP endpoint: address family, address bytes and port.
///
/// Two tuples are equal iff all three match. An IPv4 address and its
/// IPv4-mapped IPv6 form are different tuples. The IPv6 scope id travels
/// with the tuple so replies to link-local peers leave on the right
/// interface, but it is ignored by `Eq` and `Hash`.
#[derive(Debug, Clone, Copy)]
pub struct EndpointTuple {
    ip: IpAddr,
    port: u16,
    scope_id: u32,
}

impl EndpointTuple {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            scope_id: 0,
        }
    }

    pub fn v4(octets: [u8; 4], port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::from(octets)), port)
    }

    pub fn v6(octets: [u8; 16], port: u16) -> Self {
        Self::new(IpAddr::V6(Ipv6Addr::from(octets)), port)
    }

    /// Attach an IPv6 scope id. No effect on IPv4 tuples.
    pub fn with_scope_id(mut self, scope_id: u32) -> Self {
        if self.ip.is_ipv6() {
            self.scope_id = scope_id;
        }
        self
    }

    #[inline]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.ip)
    }

    #[inline]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn scope_id(&self) -> u32 {
        self.scope_id
    }

    pub fn socket_addr(&self) -> SocketAddr {
        match self.ip {
            IpAddr::V4(v4) => SocketAddr::V4(SocketAddrV4::new(v4, self.port)),
            IpAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(v6, self.port, 0, self.scope_id)),
        }
    }
}

impl PartialEq for EndpointTuple {
    fn eq(&self, other: &Self) -> bool {
        // IpAddr equality already distinguishes families.
        self.port == other.port && self.ip == other.ip
    }
}

impl Eq for EndpointTuple {}

impl Hash for EndpointTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.ip {
            IpAddr::V4(v4) => {
                state.write_u8(4);
                state.write(&v4.octets());
            }
            IpAddr::V6(v6) => {
                state.write_u8(6);
                state.write(&v6.octets());
            }
        }
        state.write_u16(self.port);
    }
}

impl From<SocketAddr> for EndpointTuple {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::new(IpAddr::V4(*v4.ip()), v4.port()),
            SocketAddr::V6(v6) => {
                Self::new(IpAddr::V6(*v6.ip()), v6.port()).with_scope_id(v6.scope_id())
            }
        }
    }
}

impl From<EndpointTuple> for SocketAddr {
    fn from(tuple: EndpointTuple) -> Self {
        tuple.socket_addr()
    }
}

impl fmt::Display for EndpointTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}
