use ringdemux_addr::{ConnectionId, EndpointTuple};

use crate::connection::Connection;

/// Protocol-layer callbacks invoked by the [`Registry`](crate::Registry).
///
/// The registry stores `State` and hands it back, but never looks inside.
pub trait ConnectionHooks: Send + Sync {
    /// Opaque per-connection protocol state.
    type State: Send + Sync;

    /// Extra arguments forwarded from [`Registry::create`](crate::Registry::create)
    /// to [`build`](Self::build).
    type Params;

    /// Construct the protocol state for a new connection.
    ///
    /// Runs while the registry's write lock is held, after the duplicate and
    /// capacity checks passed. Must not call back into the registry.
    fn build(&self, cid: ConnectionId, remote: &EndpointTuple, params: Self::Params)
    -> Self::State;

    /// Called once per deleted connection, after it has left every index and
    /// before the registry drops its reference. The registry lock is not held.
    fn teardown(&self, _conn: &Connection<Self::State>) {}
}
