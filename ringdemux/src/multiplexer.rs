use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ringdemux_addr::{AddressFamily, EndpointTuple};

use crate::completion::{OpTag, UserData};
use crate::config::Config;
use crate::error::Error;
use crate::meta::{Datagram, LocalPath, Recv, SocketIndex};
use crate::metrics;
use crate::ring::Ring;
use crate::socket::UdpSocketState;

/// Upper bound on one wait while draining cancelled ops on close.
const DRAIN_WAIT: Duration = Duration::from_millis(50);
const DRAIN_ROUNDS: usize = 40;

/// State shared between a [`Multiplexer`] and its [`CloseHandle`]s.
struct Shared {
    closed: AtomicBool,
    eventfd: OwnedFd,
}

impl Shared {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Complete the pending eventfd read so a blocked receive wakes up.
        let val: u64 = 1;
        unsafe {
            libc::write(
                self.eventfd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                mem::size_of::<u64>(),
            );
        }
        true
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Closes a [`Multiplexer`] from any thread.
///
/// A receive blocked on the owning thread returns [`Error::Closed`] promptly.
/// The sockets themselves are released by the owner on its next call, or
/// when it is dropped.
#[derive(Clone)]
pub struct CloseHandle {
    shared: Arc<Shared>,
}

impl CloseHandle {
    pub fn close(&self) {
        if self.shared.close() {
            tracing::debug!("multiplexer close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// A set of bound UDP sockets serviced by one io_uring.
///
/// Each socket keeps exactly one recvmsg in flight. Completions are queued in
/// the order the ring reports them and handed out one per
/// [`receive`](Multiplexer::receive) call, so one busy socket cannot starve
/// the others.
pub struct Multiplexer {
    // Declared first so it drops before the buffers its SQEs point into.
    ring: Ring,
    sockets: Vec<UdpSocketState>,
    shared: Arc<Shared>,
    eventfd_buf: Box<[u8; 8]>,
    eventfd_armed: bool,
    ready: VecDeque<io::Result<Datagram>>,
    cqes: Vec<(UserData, i32)>,
    released: bool,
}

// SAFETY: the raw pointers inside each socket's msghdr point into boxes owned
// by that same socket, and the ring is only driven through `&mut self`.
// Moving the whole multiplexer to another thread moves all of it together.
unsafe impl Send for Multiplexer {}

impl Multiplexer {
    /// Bind one socket per configured address and start receiving.
    ///
    /// All or nothing: if any address fails to bind, every socket opened so
    /// far is closed and [`Error::BindFailed`] names the failing address.
    pub fn open(config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let ring = Ring::setup(config).map_err(|e| Error::RingSetup(e.to_string()))?;
        let eventfd = create_eventfd().map_err(|e| Error::RingSetup(format!("eventfd: {e}")))?;

        let mut sockets = Vec::with_capacity(config.bind.len());
        for addr in &config.bind {
            match UdpSocketState::bind(*addr, config) {
                Ok(sock) => sockets.push(sock),
                Err(e) => {
                    tracing::debug!(error = %e, opened = sockets.len(), "multiplexer open failed");
                    return Err(e);
                }
            }
        }
        metrics::SOCKETS_OPEN.add(sockets.len() as i64);

        let mut mux = Multiplexer {
            ring,
            sockets,
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                eventfd,
            }),
            eventfd_buf: Box::new([0u8; 8]),
            eventfd_armed: false,
            ready: VecDeque::new(),
            cqes: Vec::new(),
            released: false,
        };
        mux.arm_idle()?;
        mux.ring.flush()?;

        tracing::debug!(sockets = ?mux.local_addrs(), "multiplexer open");
        Ok(mux)
    }

    /// Wait for the next datagram on any socket.
    ///
    /// `None` waits until a datagram arrives or the multiplexer is closed.
    /// `Some(t)` returns [`Recv::TimedOut`] once `t` has fully elapsed with
    /// nothing received; signals do not cut the wait short.
    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<Recv, Error> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            if self.shared.is_closed() {
                self.release();
                return Err(Error::Closed);
            }
            if let Some(item) = self.ready.pop_front() {
                return item.map(Recv::Datagram).map_err(Error::Io);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Recv::TimedOut);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            self.arm_idle()?;
            self.ring.wait(remaining)?;
            self.harvest();
        }
    }

    /// Send one datagram to `dest`.
    ///
    /// `path` picks the socket, source address and interface, typically
    /// [`RecvMeta::reply_path`](crate::RecvMeta::reply_path) of the datagram
    /// being answered. Without it the first socket of the destination's
    /// family is used and routing picks the source.
    pub fn send(
        &self,
        dest: &EndpointTuple,
        path: Option<&LocalPath>,
        payload: &[u8],
    ) -> Result<usize, Error> {
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }
        let idx = self.select_socket(dest, path)?;
        let sock = &self.sockets[idx];

        let family = dest.family();
        let pktinfo = path.and_then(|p| {
            let source = p.source.filter(|ip| AddressFamily::of(ip) == family);
            match (source, p.if_index) {
                (None, 0) => None,
                (source, if_index) => Some((source.unwrap_or(family.unspecified()), if_index)),
            }
        });

        let sent = sock.send_to(dest, pktinfo, payload)?;
        if sent != payload.len() {
            metrics::SHORT_WRITES.increment();
            tracing::warn!(%dest, sent, expected = payload.len(), "short write");
            return Err(Error::ShortWrite {
                sent,
                expected: payload.len(),
            });
        }

        metrics::DATAGRAMS_SENT.increment();
        metrics::BYTES_SENT.add(sent as u64);
        tracing::trace!(%dest, socket = idx, len = sent, "datagram sent");
        Ok(sent)
    }

    /// Stop receiving and release every socket. Idempotent.
    pub fn close(&mut self) {
        self.shared.close();
        self.release();
    }

    /// A handle that can close this multiplexer from another thread.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Bound addresses in configuration order, with kernel-assigned ports.
    /// Empty once released.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets.iter().map(|s| s.local_addr).collect()
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    fn select_socket(&self, dest: &EndpointTuple, path: Option<&LocalPath>) -> Result<usize, Error> {
        let family = dest.family();

        if let Some(idx) = path.and_then(|p| p.socket).map(SocketIndex::index) {
            match self.sockets.get(idx) {
                Some(sock) if sock.family() == family => return Ok(idx),
                Some(sock) => tracing::debug!(
                    socket = idx,
                    local = %sock.local_addr,
                    %dest,
                    "socket hint has the wrong family, ignoring"
                ),
                None => tracing::debug!(
                    socket = idx,
                    sockets = self.sockets.len(),
                    %dest,
                    "socket hint out of range, ignoring"
                ),
            }
        }

        // Prefer the socket bound to the requested source, then a wildcard,
        // then the first of the right family.
        let source = path.and_then(|p| p.source);
        let mut fallback = None;
        for (idx, sock) in self.sockets.iter().enumerate() {
            if sock.family() != family {
                continue;
            }
            let local = sock.local_addr.ip();
            if source == Some(local) {
                return Ok(idx);
            }
            match fallback {
                None => fallback = Some((idx, local.is_unspecified())),
                Some((_, false)) if source.is_some() && local.is_unspecified() => {
                    fallback = Some((idx, true))
                }
                _ => {}
            }
        }
        fallback.map(|(idx, _)| idx).ok_or(Error::NoSocket(family))
    }

    /// Put a recvmsg on every socket that has none in flight, and re-arm the
    /// wakeup eventfd.
    fn arm_idle(&mut self) -> io::Result<()> {
        if !self.eventfd_armed {
            let fd = self.shared.eventfd.as_raw_fd();
            self.ring
                .submit_eventfd_read(fd, self.eventfd_buf.as_mut_ptr())?;
            self.eventfd_armed = true;
        }
        for (idx, sock) in self.sockets.iter_mut().enumerate() {
            if sock.armed {
                continue;
            }
            sock.reset_recv();
            self.ring
                .submit_recvmsg(sock.raw_fd(), sock.msghdr_ptr(), idx as u32)?;
            sock.armed = true;
        }
        Ok(())
    }

    /// Turn every available completion into a ready-queue entry.
    fn harvest(&mut self) {
        let mut cqes = mem::take(&mut self.cqes);
        cqes.clear();
        self.ring.reap(&mut cqes);

        for &(user_data, result) in &cqes {
            match user_data.tag() {
                Some(OpTag::RecvMsg) => self.complete_recv(user_data.socket() as usize, result),
                Some(OpTag::EventFdRead) => self.eventfd_armed = false,
                Some(OpTag::Cancel) | None => {}
            }
        }
        self.cqes = cqes;
    }

    fn complete_recv(&mut self, idx: usize, result: i32) {
        let Some(sock) = self.sockets.get_mut(idx) else {
            return;
        };
        sock.armed = false;

        if result < 0 {
            match -result {
                libc::ECANCELED | libc::EAGAIN | libc::EINTR => {}
                errno => {
                    let err = io::Error::from_raw_os_error(errno);
                    metrics::RECV_ERRORS.increment();
                    tracing::warn!(local = %sock.local_addr, error = %err, "recvmsg failed");
                    self.ready.push_back(Err(err));
                }
            }
            return;
        }

        let datagram = sock.take_datagram(result as usize, SocketIndex(idx as u32));
        let meta = &datagram.meta;
        if meta.truncated {
            metrics::DATAGRAMS_TRUNCATED.increment();
            tracing::warn!(
                source = %meta.source,
                kept = datagram.payload.len(),
                "datagram truncated to receive buffer"
            );
        }
        metrics::DATAGRAMS_RECEIVED.increment();
        metrics::BYTES_RECEIVED.add(datagram.payload.len() as u64);
        tracing::trace!(
            source = %meta.source,
            destination = %meta.destination,
            if_index = meta.if_index,
            socket = idx,
            len = datagram.payload.len(),
            "datagram received"
        );
        self.ready.push_back(Ok(datagram));
    }

    /// Cancel in-flight ops, wait for the kernel to finish with our buffers,
    /// then close the sockets.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.closed.store(true, Ordering::Release);

        if self.eventfd_armed {
            let _ = self
                .ring
                .submit_async_cancel(UserData::encode(OpTag::EventFdRead, 0));
        }
        for (idx, sock) in self.sockets.iter().enumerate() {
            if sock.armed {
                let _ = self
                    .ring
                    .submit_async_cancel(UserData::encode(OpTag::RecvMsg, idx as u32));
            }
        }

        let mut rounds = 0;
        while self.in_flight() && rounds < DRAIN_ROUNDS {
            rounds += 1;
            if self.ring.wait(Some(DRAIN_WAIT)).is_err() {
                break;
            }
            let mut cqes = mem::take(&mut self.cqes);
            cqes.clear();
            self.ring.reap(&mut cqes);
            for &(user_data, _) in &cqes {
                match user_data.tag() {
                    Some(OpTag::RecvMsg) => {
                        if let Some(sock) = self.sockets.get_mut(user_data.socket() as usize) {
                            sock.armed = false;
                        }
                    }
                    Some(OpTag::EventFdRead) => self.eventfd_armed = false,
                    _ => {}
                }
            }
            self.cqes = cqes;
        }

        let count = self.sockets.len();
        if self.in_flight() {
            // The kernel may still write into these buffers; leak them.
            tracing::warn!("ops still in flight after close, leaking receive buffers");
            for sock in self.sockets.drain(..) {
                mem::forget(sock);
            }
            mem::forget(mem::replace(&mut self.eventfd_buf, Box::new([0u8; 8])));
        } else {
            self.sockets.clear();
        }
        self.ready.clear();
        metrics::SOCKETS_OPEN.sub(count as i64);
        tracing::debug!(sockets = count, "multiplexer closed");
    }

    fn in_flight(&self) -> bool {
        self.eventfd_armed || self.sockets.iter().any(|s| s.armed)
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.release();
    }
}

fn create_eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, UdpSocket};

    fn loopback(count: usize) -> Config {
        let mut config = Config::default();
        for _ in 0..count {
            config = config.bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0));
        }
        config
    }

    #[test]
    fn open_assigns_ports() {
        let mux = Multiplexer::open(&loopback(2)).unwrap();
        let addrs = mux.local_addrs();
        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().all(|a| a.port() != 0));
        assert_ne!(addrs[0].port(), addrs[1].port());
    }

    #[test]
    fn send_without_matching_family() {
        let mux = Multiplexer::open(&loopback(1)).unwrap();
        let dest = EndpointTuple::v6([0; 16], 9);
        assert!(matches!(
            mux.send(&dest, None, b"x"),
            Err(Error::NoSocket(AddressFamily::V6))
        ));
    }

    #[test]
    fn socket_hint_selects_socket() {
        let mux = Multiplexer::open(&loopback(2)).unwrap();
        let dest = EndpointTuple::v4([127, 0, 0, 1], 9);
        let path = LocalPath {
            socket: Some(SocketIndex(1)),
            ..LocalPath::default()
        };
        assert_eq!(mux.select_socket(&dest, Some(&path)).unwrap(), 1);
        let bogus = LocalPath {
            socket: Some(SocketIndex(7)),
            ..LocalPath::default()
        };
        assert_eq!(mux.select_socket(&dest, Some(&bogus)).unwrap(), 0);
    }

    #[test]
    fn wrong_family_hint_falls_back_to_family_match() {
        if UdpSocket::bind("[::1]:0").is_err() {
            return;
        }
        let config = loopback(1).bind("[::1]:0".parse().unwrap());
        let mux = Multiplexer::open(&config).unwrap();

        let v4_dest = EndpointTuple::v4([127, 0, 0, 1], 9);
        let v6_hint = LocalPath {
            socket: Some(SocketIndex(1)),
            ..LocalPath::default()
        };
        assert_eq!(mux.select_socket(&v4_dest, Some(&v6_hint)).unwrap(), 0);

        let v6_dest = EndpointTuple::new("::1".parse().unwrap(), 9);
        let v4_hint = LocalPath {
            socket: Some(SocketIndex(0)),
            ..LocalPath::default()
        };
        assert_eq!(mux.select_socket(&v6_dest, Some(&v4_hint)).unwrap(), 1);
    }

    #[test]
    fn queued_datagrams_come_out_in_order() {
        let mut mux = Multiplexer::open(&loopback(1)).unwrap();
        let target = mux.local_addrs()[0];
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        for i in 0..5u8 {
            peer.send_to(&[i], target).unwrap();
        }
        for i in 0..5u8 {
            let dgram = mux
                .receive(Some(Duration::from_secs(5)))
                .unwrap()
                .datagram()
                .expect("datagram");
            assert_eq!(&dgram.payload[..], &[i]);
        }
    }

    #[test]
    fn close_is_idempotent() {
        let mut mux = Multiplexer::open(&loopback(1)).unwrap();
        mux.close();
        mux.close();
        assert!(mux.is_closed());
        assert!(mux.local_addrs().is_empty());
        assert!(matches!(mux.receive(None), Err(Error::Closed)));
    }
}
