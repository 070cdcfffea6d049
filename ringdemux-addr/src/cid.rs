use std::fmt;

/// Connection identifier.
///
/// The value `0` is reserved: a connection created with it has no
/// identifier and is only reachable through its endpoint tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The unassigned identifier.
    pub const NONE: ConnectionId = ConnectionId(0);

    /// Returns `false` for [`ConnectionId::NONE`].
    #[inline]
    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(v: u64) -> Self {
        ConnectionId(v)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
