//! ringdemux — io_uring UDP socket multiplexer.
//!
//! A [`Multiplexer`] binds one UDP socket per configured local address and
//! services all of them from a single io_uring. Each received datagram comes
//! with the metadata a QUIC endpoint needs to route it and to answer on the
//! same path: remote address, the local address it was sent to (even on
//! wildcard-bound sockets), the arrival interface and the socket index.
//!
//! Routing datagrams to connections is the job of `ringdemux-registry`; this
//! crate only moves bytes.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ringdemux::{Config, Multiplexer, Recv};
//!
//! fn main() -> Result<(), ringdemux::Error> {
//!     let mut mux = Multiplexer::open(&Config::dual_stack(4433))?;
//!     loop {
//!         match mux.receive(Some(Duration::from_secs(1)))? {
//!             Recv::Datagram(dgram) => {
//!                 let path = dgram.meta.reply_path();
//!                 mux.send(&dgram.meta.source, Some(&path), &dgram.payload)?;
//!             }
//!             Recv::TimedOut => {}
//!         }
//!     }
//! }
//! ```
//!
//! # Platform
//!
//! Linux 5.19+ (io_uring with `IORING_ENTER_EXT_ARG` timeouts and
//! `IORING_SETUP_COOP_TASKRUN`).

pub(crate) mod completion;
pub mod config;
pub mod error;
pub mod meta;
pub(crate) mod metrics;
pub mod multiplexer;
pub(crate) mod ring;
pub(crate) mod socket;

pub use config::{Config, DEFAULT_RECV_BUFFER_SIZE};
pub use error::Error;
pub use meta::{Datagram, LocalPath, Recv, RecvMeta, SocketIndex};
pub use multiplexer::{CloseHandle, Multiplexer};

pub use ringdemux_addr::{AddressFamily, EndpointTuple};
