use ringdemux_addr::{ConnectionId, EndpointTuple};

/// Errors returned by [`Registry`](crate::Registry) operations.
///
/// None of these are retried internally. A duplicate key usually means the
/// dispatch loop raced another creator and should route to the existing
/// connection instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("connection id {0} already registered")]
    DuplicateIdentifier(ConnectionId),

    #[error("endpoint {0} already registered")]
    DuplicateEndpoint(EndpointTuple),

    #[error("connection limit reached ({limit})")]
    ResourceExhausted { limit: usize },

    /// The connection was deleted (or never registered with this registry).
    #[error("connection not registered")]
    NotRegistered,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
