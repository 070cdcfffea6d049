//! ringdemux-registry — the directory of live connections.
//!
//! A [`Registry`] keeps every live [`Connection`] reachable under two
//! independent keys: its [`ConnectionId`] (when one is assigned) and the
//! remote [`EndpointTuple`] it talks to. Both indices sit behind a single
//! lock so they never disagree about which connections exist.
//!
//! The per-connection protocol state is opaque here: the protocol layer
//! supplies it through [`ConnectionHooks`].
//!
//! # Example
//!
//! ```rust
//! use ringdemux_registry::{ConnectionHooks, Registry, RegistryConfig};
//! use ringdemux_addr::{ConnectionId, EndpointTuple};
//!
//! struct Hooks;
//!
//! impl ConnectionHooks for Hooks {
//!     type State = ();
//!     type Params = ();
//!     fn build(&self, _cid: ConnectionId, _remote: &EndpointTuple, _params: ()) {}
//! }
//!
//! let registry = Registry::new(Hooks, RegistryConfig::default()).unwrap();
//! let peer = EndpointTuple::v4([192, 0, 2, 1], 4433);
//! let conn = registry.create(ConnectionId(7), peer, ()).unwrap();
//!
//! // Identifiers win over tuples when the dispatch loop has both.
//! let found = registry.lookup(ConnectionId(7), &peer).unwrap();
//! assert!(std::sync::Arc::ptr_eq(&conn, &found));
//!
//! registry.delete(&conn);
//! assert!(registry.lookup_by_endpoint(&peer).is_none());
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
pub(crate) mod metrics;
pub mod registry;

pub use config::RegistryConfig;
pub use connection::Connection;
pub use error::Error;
pub use hooks::ConnectionHooks;
pub use registry::{Iter, Registry};

pub use ringdemux_addr::{AddressFamily, ConnectionId, EndpointTuple};
