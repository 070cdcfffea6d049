//! Server address resolution.
//!
//! Literal IPv4/IPv6 text is parsed directly; anything else is handed to the
//! system resolver. Callers learn which path was taken through
//! [`Resolved::is_name`].

use std::io;
use std::net::{IpAddr, ToSocketAddrs};

use crate::tuple::EndpointTuple;

/// Result of [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub endpoint: EndpointTuple,
    /// `true` when `text` was a host name rather than an address literal.
    pub is_name: bool,
}

/// Resolve `text` (an address literal or a host name) and `port` to an
/// endpoint.
///
/// Bracketed IPv6 literals (`[::1]`) are accepted. For names, the first
/// address returned by the resolver wins.
pub fn resolve(text: &str, port: u16) -> io::Result<Resolved> {
    let literal = text
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(text);

    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(Resolved {
            endpoint: EndpointTuple::new(ip, port),
            is_name: false,
        });
    }

    let addr = (text, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {text}"),
        )
    })?;

    Ok(Resolved {
        endpoint: addr.into(),
        is_name: true,
    })
}
