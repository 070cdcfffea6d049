//! ringdemux-addr — value types shared by the socket multiplexer and the
//! connection registry.
//!
//! - [`EndpointTuple`]: a remote or local UDP endpoint, compared by address
//!   family, address bytes and port.
//! - [`ConnectionId`]: the scalar connection identifier. Zero means "no
//!   identifier assigned".
//! - [`resolve`]: turn address text (literal or host name) into an
//!   [`EndpointTuple`].

pub mod cid;
pub mod resolve;
pub mod tuple;

pub use cid::ConnectionId;
pub use resolve::{Resolved, resolve};
pub use tuple::{AddressFamily, EndpointTuple};
