use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use ringdemux_addr::{ConnectionId, EndpointTuple};

/// A registered connection context.
///
/// Created only by [`Registry::create`](crate::Registry::create) and shared as
/// `Arc<Connection<S>>`. Holding an `Arc` does not keep the connection
/// registered; check [`is_registered`](Self::is_registered).
pub struct Connection<S> {
    /// Slab key inside the owning registry.
    pub(crate) key: usize,
    cid: ConnectionId,
    /// Only written by the registry while its write lock is held.
    remote: Mutex<EndpointTuple>,
    registered: AtomicBool,
    state: S,
}

impl<S> Connection<S> {
    pub(crate) fn new(key: usize, cid: ConnectionId, remote: EndpointTuple, state: S) -> Self {
        Self {
            key,
            cid,
            remote: Mutex::new(remote),
            registered: AtomicBool::new(true),
            state,
        }
    }

    /// Connection identifier; [`ConnectionId::NONE`] if none was assigned.
    #[inline]
    pub fn cid(&self) -> ConnectionId {
        self.cid
    }

    /// Remote endpoint the connection is currently keyed under.
    pub fn remote(&self) -> EndpointTuple {
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Protocol state built by [`ConnectionHooks::build`](crate::ConnectionHooks::build).
    #[inline]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Whether the connection is still present in the registry's indices.
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn set_remote(&self, remote: EndpointTuple) {
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner) = remote;
    }

    pub(crate) fn mark_unregistered(&self) {
        self.registered.store(false, Ordering::Release);
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("cid", &self.cid)
            .field("remote", &self.remote())
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}
