use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ringdemux_addr::{ConnectionId, EndpointTuple};
use slab::Slab;

use crate::config::RegistryConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::hooks::ConnectionHooks;
use crate::metrics;

/// Slab of live contexts plus both lookup indices. Always locked as a unit.
struct Tables<S> {
    slots: Slab<Arc<Connection<S>>>,
    /// Assigned identifiers only; `ConnectionId::NONE` never appears here.
    by_cid: HashMap<ConnectionId, usize>,
    by_remote: HashMap<EndpointTuple, usize>,
}

impl<S> Tables<S> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            by_cid: HashMap::with_capacity(capacity),
            by_remote: HashMap::with_capacity(capacity),
        }
    }

    /// Whether `conn` is the context currently stored in its slot. Slab keys
    /// are reused, so a deleted handle may point at someone else's slot.
    fn holds(&self, conn: &Arc<Connection<S>>) -> bool {
        self.slots
            .get(conn.key)
            .is_some_and(|slot| Arc::ptr_eq(slot, conn))
    }

    fn remove(&mut self, conn: &Arc<Connection<S>>) -> Arc<Connection<S>> {
        if conn.cid().is_assigned() {
            self.by_cid.remove(&conn.cid());
        }
        self.by_remote.remove(&conn.remote());
        conn.mark_unregistered();
        self.slots.remove(conn.key)
    }
}

/// Directory of live connections, keyed by connection id and by remote
/// endpoint.
///
/// Every mutation takes one write lock covering the slab and both indices,
/// so a successful [`create`](Self::create) is visible to any lookup that
/// starts after it returns, and no lookup ever sees a half-registered or
/// half-deleted connection. Lookups share the read side of the same lock.
pub struct Registry<H: ConnectionHooks> {
    hooks: H,
    max_connections: usize,
    tables: RwLock<Tables<H::State>>,
}

impl<H: ConnectionHooks> Registry<H> {
    pub fn new(hooks: H, config: RegistryConfig) -> Result<Self, Error> {
        config.validate()?;
        let capacity = config.initial_capacity.min(config.max_connections);
        Ok(Self {
            hooks,
            max_connections: config.max_connections,
            tables: RwLock::new(Tables::with_capacity(capacity)),
        })
    }

    /// The protocol hooks this registry was built with.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Register a new connection under `remote` and, if assigned, `cid`.
    ///
    /// Fails without touching either index when `cid` or `remote` is already
    /// taken, or when the connection limit is reached.
    pub fn create(
        &self,
        cid: ConnectionId,
        remote: EndpointTuple,
        params: H::Params,
    ) -> Result<Arc<Connection<H::State>>, Error> {
        let mut tables = self.write();

        let rejected = if cid.is_assigned() && tables.by_cid.contains_key(&cid) {
            Some(Error::DuplicateIdentifier(cid))
        } else if tables.by_remote.contains_key(&remote) {
            Some(Error::DuplicateEndpoint(remote))
        } else if tables.slots.len() >= self.max_connections {
            Some(Error::ResourceExhausted {
                limit: self.max_connections,
            })
        } else {
            None
        };
        if let Some(err) = rejected {
            drop(tables);
            metrics::CONNECTIONS_REJECTED.increment();
            tracing::debug!(%cid, %remote, error = %err, "connection create rejected");
            return Err(err);
        }

        let state = self.hooks.build(cid, &remote, params);

        let entry = tables.slots.vacant_entry();
        let key = entry.key();
        let conn = Arc::new(Connection::new(key, cid, remote, state));
        entry.insert(Arc::clone(&conn));
        if cid.is_assigned() {
            tables.by_cid.insert(cid, key);
        }
        tables.by_remote.insert(remote, key);
        drop(tables);

        metrics::CONNECTIONS_CREATED.increment();
        metrics::CONNECTIONS_ACTIVE.increment();
        tracing::debug!(%cid, %remote, "connection registered");
        Ok(conn)
    }

    /// Find a connection by identifier. [`ConnectionId::NONE`] never matches.
    pub fn lookup_by_id(&self, cid: ConnectionId) -> Option<Arc<Connection<H::State>>> {
        if !cid.is_assigned() {
            return None;
        }
        let tables = self.read();
        let key = *tables.by_cid.get(&cid)?;
        tables.slots.get(key).cloned()
    }

    /// Find the connection registered under exactly this remote endpoint.
    pub fn lookup_by_endpoint(
        &self,
        remote: &EndpointTuple,
    ) -> Option<Arc<Connection<H::State>>> {
        let tables = self.read();
        let key = *tables.by_remote.get(remote)?;
        tables.slots.get(key).cloned()
    }

    /// Route a datagram: try the identifier first (it survives path
    /// migration), then fall back to the remote endpoint.
    ///
    /// Both probes happen under one read lock. A hit by identifier is returned
    /// even if the connection is keyed under a different endpoint; deciding
    /// whether to [`rekey`](Self::rekey) is up to the caller.
    pub fn lookup(
        &self,
        cid: ConnectionId,
        remote: &EndpointTuple,
    ) -> Option<Arc<Connection<H::State>>> {
        let tables = self.read();
        let by_cid = if cid.is_assigned() {
            tables.by_cid.get(&cid)
        } else {
            None
        };
        let key = *by_cid.or_else(|| tables.by_remote.get(remote))?;
        tables.slots.get(key).cloned()
    }

    /// Move a registered connection to a new remote endpoint.
    ///
    /// The identifier index is untouched. Fails with
    /// [`Error::DuplicateEndpoint`] if another connection owns `new_remote`,
    /// and with [`Error::NotRegistered`] if `conn` was already deleted.
    pub fn rekey(
        &self,
        conn: &Arc<Connection<H::State>>,
        new_remote: EndpointTuple,
    ) -> Result<(), Error> {
        let mut tables = self.write();
        if !tables.holds(conn) {
            return Err(Error::NotRegistered);
        }

        let old_remote = conn.remote();
        if old_remote == new_remote {
            // Same key; only refresh the carried scope id.
            conn.set_remote(new_remote);
            return Ok(());
        }
        if tables.by_remote.contains_key(&new_remote) {
            return Err(Error::DuplicateEndpoint(new_remote));
        }

        tables.by_remote.remove(&old_remote);
        tables.by_remote.insert(new_remote, conn.key);
        conn.set_remote(new_remote);
        drop(tables);

        tracing::debug!(
            cid = %conn.cid(),
            from = %old_remote,
            to = %new_remote,
            "connection rekeyed"
        );
        Ok(())
    }

    /// Remove `conn` from every index, run the teardown hook, and release the
    /// registry's reference.
    ///
    /// Returns `false` (and does nothing) when `conn` is not currently
    /// registered, e.g. because it was already deleted.
    pub fn delete(&self, conn: &Arc<Connection<H::State>>) -> bool {
        let released = {
            let mut tables = self.write();
            if !tables.holds(conn) {
                return false;
            }
            tables.remove(conn)
        };

        metrics::CONNECTIONS_DELETED.increment();
        metrics::CONNECTIONS_ACTIVE.decrement();
        tracing::debug!(cid = %released.cid(), remote = %released.remote(), "connection deleted");

        self.hooks.teardown(&released);
        true
    }

    /// Delete every live connection, running teardown for each. Returns how
    /// many were removed.
    pub fn shutdown(&self) -> usize {
        let released: Vec<_> = {
            let mut tables = self.write();
            let all: Vec<_> = tables.slots.iter().map(|(_, c)| Arc::clone(c)).collect();
            all.iter().map(|c| tables.remove(c)).collect()
        };

        for conn in &released {
            metrics::CONNECTIONS_DELETED.increment();
            metrics::CONNECTIONS_ACTIVE.decrement();
            self.hooks.teardown(conn);
        }
        tracing::debug!(count = released.len(), "registry shut down");
        released.len()
    }

    /// Walk the live connections.
    ///
    /// The iterator re-acquires the read lock for every step, so it never
    /// blocks writers for long but is not a snapshot: connections created or
    /// deleted while iterating may or may not be yielded. Each live
    /// connection that stays registered for the whole walk is yielded once.
    pub fn enumerate(&self) -> Iter<'_, H> {
        Iter {
            registry: self,
            next_key: 0,
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while the lock is held can only come from `ConnectionHooks::build`,
    // which runs before any table is modified, so the tables are still
    // consistent after poisoning.
    fn read(&self) -> RwLockReadGuard<'_, Tables<H::State>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables<H::State>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lazy iterator over live connections, returned by [`Registry::enumerate`].
pub struct Iter<'a, H: ConnectionHooks> {
    registry: &'a Registry<H>,
    next_key: usize,
}

impl<H: ConnectionHooks> Iterator for Iter<'_, H> {
    type Item = Arc<Connection<H::State>>;

    fn next(&mut self) -> Option<Self::Item> {
        let tables = self.registry.read();
        // Slab keys never exceed its capacity.
        while self.next_key < tables.slots.capacity() {
            let key = self.next_key;
            self.next_key += 1;
            if let Some(conn) = tables.slots.get(key) {
                return Some(Arc::clone(conn));
            }
        }
        None
    }
}
