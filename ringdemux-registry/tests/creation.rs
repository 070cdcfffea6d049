//! Integration tests: connection creation, lookup and deletion.
//!
//! Mirrors the classic creation test: five connections over IPv4 and IPv6
//! endpoints, one of them without an identifier, then deletion of the
//! first, middle and last entries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use ringdemux_registry::{
    Connection, ConnectionHooks, ConnectionId, EndpointTuple, Error, Registry, RegistryConfig,
};

// ── Protocol stand-in ───────────────────────────────────────────────

/// Per-connection state the "protocol layer" builds.
#[derive(Debug)]
struct Session {
    label: String,
}

#[derive(Default)]
struct SessionHooks {
    torn_down: Mutex<Vec<ConnectionId>>,
}

impl ConnectionHooks for SessionHooks {
    type State = Session;
    type Params = &'static str;

    fn build(&self, _cid: ConnectionId, _remote: &EndpointTuple, label: &'static str) -> Session {
        Session {
            label: label.to_string(),
        }
    }

    fn teardown(&self, conn: &Connection<Session>) {
        self.torn_down.lock().unwrap().push(conn.cid());
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

const CIDS: [u64; 5] = [0, 1, 2, 3, 4];

fn v4(i: u8) -> EndpointTuple {
    EndpointTuple::v4([192, 0, 2, if i == 0 { 1 } else { 2 }], 1000 + i as u16)
}

fn v6(i: u8) -> EndpointTuple {
    let mut octets = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    octets[15] = i + 1;
    EndpointTuple::v6(octets, 1000 + i as u16)
}

fn endpoints() -> [EndpointTuple; 5] {
    [v4(0), v4(1), v4(2), v6(0), v6(1)]
}

fn populated() -> (Registry<SessionHooks>, Vec<Arc<Connection<Session>>>) {
    let registry = Registry::new(SessionHooks::default(), RegistryConfig::default()).unwrap();
    let conns = CIDS
        .iter()
        .zip(endpoints())
        .map(|(&cid, remote)| registry.create(ConnectionId(cid), remote, "test").unwrap())
        .collect();
    (registry, conns)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn all_connections_retrievable() {
    let (registry, conns) = populated();
    assert_eq!(registry.len(), 5);

    for (conn, remote) in conns.iter().zip(endpoints()) {
        let found = registry.lookup_by_endpoint(&remote).expect("by endpoint");
        assert!(Arc::ptr_eq(&found, conn));
        assert_eq!(found.state().label, "test");
    }

    for (conn, &cid) in conns.iter().zip(CIDS.iter()) {
        let found = registry.lookup_by_id(ConnectionId(cid));
        if cid == 0 {
            assert!(found.is_none(), "zero id must never be indexed");
        } else {
            assert!(Arc::ptr_eq(&found.unwrap(), conn));
        }
    }
}

#[test]
fn unregistered_keys_not_found() {
    let (registry, _conns) = populated();
    assert!(registry.lookup_by_id(ConnectionId(123456789)).is_none());
    assert!(registry.lookup_by_endpoint(&v4(3)).is_none());
    assert!(registry.lookup_by_id(ConnectionId::NONE).is_none());
}

#[test]
fn delete_first_middle_last() {
    let (registry, conns) = populated();

    for i in (0..5).step_by(2) {
        assert!(registry.delete(&conns[i]));
    }

    for (i, &cid) in CIDS.iter().enumerate() {
        if cid == 0 {
            continue;
        }
        let found = registry.lookup_by_id(ConnectionId(cid));
        assert_eq!(found.is_some(), i % 2 == 1, "cid {cid}");
    }

    for (i, remote) in endpoints().iter().enumerate() {
        let found = registry.lookup_by_endpoint(remote);
        assert_eq!(found.is_some(), i % 2 == 1, "endpoint {remote}");
        if let Some(conn) = found {
            assert!(Arc::ptr_eq(&conn, &conns[i]));
        }
    }

    assert_eq!(registry.len(), 2);
    let mut torn_down = registry.hooks().torn_down.lock().unwrap().clone();
    torn_down.sort();
    assert_eq!(torn_down, vec![ConnectionId(0), ConnectionId(2), ConnectionId(4)]);
}

#[test]
fn delete_order_does_not_matter() {
    for order in [[4, 0, 2], [2, 4, 0], [0, 2, 4]] {
        let (registry, conns) = populated();
        for i in order {
            registry.delete(&conns[i]);
        }
        for i in [1, 3] {
            let remote = endpoints()[i];
            assert!(Arc::ptr_eq(&registry.lookup_by_endpoint(&remote).unwrap(), &conns[i]));
            assert!(Arc::ptr_eq(
                &registry.lookup_by_id(ConnectionId(CIDS[i])).unwrap(),
                &conns[i]
            ));
        }
    }
}

#[test]
fn deleting_twice_is_a_no_op() {
    let (registry, conns) = populated();
    assert!(registry.delete(&conns[1]));
    assert!(!registry.delete(&conns[1]));
    assert_eq!(registry.len(), 4);
    assert_eq!(registry.hooks().torn_down.lock().unwrap().len(), 1);
}

#[test]
fn duplicate_create_routes_to_existing() {
    let (registry, conns) = populated();
    let remote = endpoints()[3];
    match registry.create(ConnectionId(99), remote, "again") {
        Err(Error::DuplicateEndpoint(t)) => {
            let existing = registry.lookup_by_endpoint(&t).unwrap();
            assert!(Arc::ptr_eq(&existing, &conns[3]));
        }
        other => panic!("expected DuplicateEndpoint, got {other:?}"),
    }
    assert!(registry.lookup_by_id(ConnectionId(99)).is_none());
}

#[test]
fn migration_keeps_identifier() {
    let (registry, conns) = populated();
    let migrated = v4(9);
    registry.rekey(&conns[2], migrated).unwrap();

    let hit = registry.lookup(ConnectionId(2), &migrated).unwrap();
    assert!(Arc::ptr_eq(&hit, &conns[2]));
    assert!(registry.lookup_by_endpoint(&endpoints()[2]).is_none());
}

#[test]
fn shutdown_tears_down_all() {
    let (registry, conns) = populated();
    assert_eq!(registry.shutdown(), 5);
    assert!(registry.is_empty());
    assert!(conns.iter().all(|c| !c.is_registered()));
    assert_eq!(registry.hooks().torn_down.lock().unwrap().len(), 5);
}

#[test]
fn create_visible_across_threads() {
    let registry = Arc::new(
        Registry::new(SessionHooks::default(), RegistryConfig::default()).unwrap(),
    );
    let threads = 4;
    let per_thread = 250u64;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads as u64)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let cid = ConnectionId(t * per_thread + i + 1);
                    let port = (t * per_thread + i) as u16;
                    let remote = EndpointTuple::v4([203, 0, 113, t as u8], port);
                    let conn = registry.create(cid, remote, "thread").unwrap();
                    // Visible immediately after create returns, by both keys.
                    let by_id = registry.lookup_by_id(cid).unwrap();
                    let by_remote = registry.lookup_by_endpoint(&remote).unwrap();
                    assert!(Arc::ptr_eq(&by_id, &conn));
                    assert!(Arc::ptr_eq(&by_remote, &conn));
                    if i % 2 == 0 {
                        assert!(registry.delete(&conn));
                        assert!(registry.lookup_by_id(cid).is_none());
                        assert!(registry.lookup_by_endpoint(&remote).is_none());
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(registry.len(), threads * per_thread as usize / 2);
    for conn in registry.enumerate() {
        assert_eq!(conn.cid().get() % 2, 0, "odd-indexed survivors have even cids");
        let by_id = registry.lookup_by_id(conn.cid()).unwrap();
        assert!(Arc::ptr_eq(&by_id, &conn));
    }
}

#[test]
fn concurrent_duplicate_creates_admit_exactly_one() {
    let registry = Arc::new(
        Registry::new(SessionHooks::default(), RegistryConfig::default()).unwrap(),
    );
    let winners = Arc::new(AtomicUsize::new(0));
    let remote = v6(7);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let winners = Arc::clone(&winners);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                match registry.create(ConnectionId(t + 100), remote, "race") {
                    Ok(_) => {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(Error::DuplicateEndpoint(_)) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::Relaxed), 1);
    assert_eq!(registry.len(), 1);
}
