use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Instant;

use bytes::Bytes;
use ringdemux_addr::{AddressFamily, EndpointTuple};

use crate::config::Config;
use crate::error::Error;
use crate::meta::{Datagram, RecvMeta, SocketIndex};

/// Control buffer size in 8-byte words. Fits one pktinfo cmsg of either
/// family with room to spare.
const CONTROL_WORDS: usize = 16;
const CONTROL_LEN: usize = CONTROL_WORDS * mem::size_of::<u64>();

/// One bound UDP socket plus the recvmsg state the ring writes into.
///
/// Everything the kernel touches during an in-flight recvmsg is boxed so the
/// addresses stay put when the owning `Vec` reallocates.
pub(crate) struct UdpSocketState {
    pub fd: OwnedFd,
    /// Bound address, with the kernel-chosen port filled in.
    pub local_addr: SocketAddr,
    /// A recvmsg SQE referencing this socket's buffers is in flight.
    pub armed: bool,
    recv_buf: Box<[u8]>,
    recv_addr: Box<libc::sockaddr_storage>,
    recv_iov: Box<libc::iovec>,
    // u64 words keep the cmsg headers aligned.
    recv_control: Box<[u64; CONTROL_WORDS]>,
    recv_msghdr: Box<libc::msghdr>,
}

impl UdpSocketState {
    /// Create a non-blocking UDP socket with packet-info reporting and bind it.
    ///
    /// Any failure is reported as [`Error::BindFailed`] for `bind_addr`; the
    /// descriptor is closed on the way out.
    pub fn bind(bind_addr: SocketAddr, config: &Config) -> Result<Self, Error> {
        let fail = |source: io::Error| Error::BindFailed {
            addr: bind_addr,
            source,
        };

        let domain = if bind_addr.is_ipv4() {
            libc::AF_INET
        } else {
            libc::AF_INET6
        };
        let raw = unsafe {
            libc::socket(
                domain,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::IPPROTO_UDP,
            )
        };
        if raw < 0 {
            return Err(fail(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        if config.reuse_port {
            set_int_opt(raw, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1).map_err(fail)?;
        }
        if bind_addr.is_ipv4() {
            set_int_opt(raw, libc::IPPROTO_IP, libc::IP_PKTINFO, 1).map_err(fail)?;
        } else {
            // v4 and v6 sockets must be able to share a port.
            set_int_opt(raw, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 1).map_err(fail)?;
            set_int_opt(raw, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1).map_err(fail)?;
        }

        let (storage, len) = to_sockaddr(&bind_addr);
        let ret = unsafe { libc::bind(raw, &storage as *const _ as *const libc::sockaddr, len) };
        if ret < 0 {
            return Err(fail(io::Error::last_os_error()));
        }
        let local_addr = local_addr(raw).map_err(fail)?;

        let mut recv_buf = vec![0u8; config.recv_buffer_size].into_boxed_slice();
        let mut recv_addr: Box<libc::sockaddr_storage> = Box::new(unsafe { mem::zeroed() });
        let mut recv_iov = Box::new(libc::iovec {
            iov_base: recv_buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: recv_buf.len(),
        });
        let recv_control = Box::new([0u64; CONTROL_WORDS]);
        let mut recv_msghdr: Box<libc::msghdr> = Box::new(unsafe { mem::zeroed() });
        recv_msghdr.msg_name = &mut *recv_addr as *mut _ as *mut libc::c_void;
        recv_msghdr.msg_iov = &mut *recv_iov as *mut libc::iovec;
        recv_msghdr.msg_iovlen = 1;

        let mut state = UdpSocketState {
            fd,
            local_addr,
            armed: false,
            recv_buf,
            recv_addr,
            recv_iov,
            recv_control,
            recv_msghdr,
        };
        state.reset_recv();
        Ok(state)
    }

    #[inline]
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    #[inline]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.local_addr.ip())
    }

    /// Restore the in/out fields recvmsg overwrote, before re-arming.
    pub fn reset_recv(&mut self) {
        self.recv_msghdr.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        self.recv_msghdr.msg_control = self.recv_control.as_mut_ptr() as *mut libc::c_void;
        self.recv_msghdr.msg_controllen = CONTROL_LEN as _;
        self.recv_msghdr.msg_flags = 0;
        self.recv_iov.iov_len = self.recv_buf.len();
    }

    pub fn msghdr_ptr(&mut self) -> *mut libc::msghdr {
        &mut *self.recv_msghdr as *mut libc::msghdr
    }

    /// Copy out a completed recvmsg of `len` bytes with its metadata.
    pub fn take_datagram(&self, len: usize, socket: SocketIndex) -> Datagram {
        let received_at = Instant::now();
        let len = len.min(self.recv_buf.len());
        let truncated = self.recv_msghdr.msg_flags & libc::MSG_TRUNC != 0;

        let source = from_sockaddr(&self.recv_addr, self.recv_msghdr.msg_namelen)
            .map(EndpointTuple::from)
            .unwrap_or_else(|| EndpointTuple::new(self.family().unspecified(), 0));

        let (dest_ip, if_index) = self
            .packet_info()
            .unwrap_or((self.local_addr.ip(), 0));
        let destination = EndpointTuple::new(dest_ip, self.local_addr.port());

        Datagram {
            payload: Bytes::copy_from_slice(&self.recv_buf[..len]),
            meta: RecvMeta {
                source,
                destination,
                if_index,
                socket,
                received_at,
                truncated,
            },
        }
    }

    /// Header destination address and arrival interface from the
    /// `IP_PKTINFO` / `IPV6_PKTINFO` control message, if the kernel sent one.
    fn packet_info(&self) -> Option<(IpAddr, u32)> {
        let msghdr: &libc::msghdr = &self.recv_msghdr;
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(msghdr);
            while !cmsg.is_null() {
                let hdr = &*cmsg;
                match (hdr.cmsg_level, hdr.cmsg_type) {
                    (libc::IPPROTO_IP, libc::IP_PKTINFO) => {
                        let info: libc::in_pktinfo =
                            ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                        let ip = Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr));
                        return Some((IpAddr::V4(ip), info.ipi_ifindex as u32));
                    }
                    (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                        let info: libc::in6_pktinfo = ptr::read_unaligned(
                            libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo,
                        );
                        let ip = Ipv6Addr::from(info.ipi6_addr.s6_addr);
                        return Some((IpAddr::V6(ip), info.ipi6_ifindex as u32));
                    }
                    _ => {}
                }
                cmsg = libc::CMSG_NXTHDR(msghdr, cmsg);
            }
        }
        None
    }

    /// Send one datagram with a direct `sendmsg` call.
    ///
    /// With `source` set, a pktinfo control message pins the source address
    /// and, when non-zero, the outgoing interface.
    pub fn send_to(
        &self,
        dest: &EndpointTuple,
        source: Option<(IpAddr, u32)>,
        payload: &[u8],
    ) -> io::Result<usize> {
        let (dest_storage, dest_len) = to_sockaddr(&dest.socket_addr());
        let mut iov = libc::iovec {
            iov_base: payload.as_ptr() as *mut libc::c_void,
            iov_len: payload.len(),
        };
        let mut control = [0u64; CONTROL_WORDS];

        let mut msghdr: libc::msghdr = unsafe { mem::zeroed() };
        msghdr.msg_name = &dest_storage as *const _ as *mut libc::c_void;
        msghdr.msg_namelen = dest_len;
        msghdr.msg_iov = &mut iov;
        msghdr.msg_iovlen = 1;
        if let Some((ip, if_index)) = source {
            msghdr.msg_control = control.as_mut_ptr() as *mut libc::c_void;
            msghdr.msg_controllen = CONTROL_LEN as _;
            let used = unsafe { write_packet_info(&msghdr, ip, if_index) };
            msghdr.msg_controllen = used as _;
        }

        loop {
            let ret = unsafe { libc::sendmsg(self.raw_fd(), &msghdr, 0) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

/// Fill the first cmsg of `msghdr` with source-address pktinfo. Returns the
/// control length actually used.
///
/// # Safety
/// `msghdr.msg_control` must point to at least `CONTROL_LEN` writable,
/// 8-byte-aligned bytes and `msg_controllen` must be set to that length.
unsafe fn write_packet_info(msghdr: &libc::msghdr, ip: IpAddr, if_index: u32) -> usize {
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(msghdr);
        match ip {
            IpAddr::V4(v4) => {
                let info = libc::in_pktinfo {
                    ipi_ifindex: if_index as libc::c_int,
                    ipi_spec_dst: libc::in_addr {
                        s_addr: u32::from_ne_bytes(v4.octets()),
                    },
                    ipi_addr: libc::in_addr { s_addr: 0 },
                };
                let data_len = mem::size_of::<libc::in_pktinfo>() as libc::c_uint;
                (*cmsg).cmsg_level = libc::IPPROTO_IP;
                (*cmsg).cmsg_type = libc::IP_PKTINFO;
                (*cmsg).cmsg_len = libc::CMSG_LEN(data_len) as _;
                ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut libc::in_pktinfo, info);
                libc::CMSG_SPACE(data_len) as usize
            }
            IpAddr::V6(v6) => {
                let mut info: libc::in6_pktinfo = mem::zeroed();
                info.ipi6_addr.s6_addr = v6.octets();
                info.ipi6_ifindex = if_index as _;
                let data_len = mem::size_of::<libc::in6_pktinfo>() as libc::c_uint;
                (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
                (*cmsg).cmsg_type = libc::IPV6_PKTINFO;
                (*cmsg).cmsg_len = libc::CMSG_LEN(data_len) as _;
                ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut libc::in6_pktinfo, info);
                libc::CMSG_SPACE(data_len) as usize
            }
        }
    }
}

fn set_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    from_sockaddr(&storage, len)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unexpected address family"))
}

/// Encode a socket address for the kernel.
pub(crate) fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Decode a kernel socket address. `None` for other families or short lengths.
pub(crate) fn from_sockaddr(
    storage: &libc::sockaddr_storage,
    len: libc::socklen_t,
) -> Option<SocketAddr> {
    let len = len as usize;
    match storage.ss_family as libc::c_int {
        libc::AF_INET if len >= mem::size_of::<libc::sockaddr_in>() => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 if len >= mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_v4_round_trip() {
        let addr: SocketAddr = "192.0.2.7:4433".parse().unwrap();
        let (storage, len) = to_sockaddr(&addr);
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(from_sockaddr(&storage, len), Some(addr));
    }

    #[test]
    fn sockaddr_v6_keeps_scope() {
        let addr: SocketAddr = "[fe80::1%2]:443".parse().unwrap();
        let (storage, len) = to_sockaddr(&addr);
        assert_eq!(from_sockaddr(&storage, len), Some(addr));
    }

    #[test]
    fn short_length_rejected() {
        let addr: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        let (storage, _) = to_sockaddr(&addr);
        assert_eq!(from_sockaddr(&storage, 8), None);
    }

    #[test]
    fn port_zero_gets_a_real_port() {
        let config = Config::default();
        let sock = UdpSocketState::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        assert_ne!(sock.local_addr.port(), 0);
        assert_eq!(sock.family(), AddressFamily::V4);
    }

    #[test]
    fn bind_conflict_reports_address() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        match UdpSocketState::bind(addr, &Config::default()) {
            Err(Error::BindFailed { addr: failed, source }) => {
                assert_eq!(failed, addr);
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("bind should have failed"),
        }
    }

    #[test]
    fn pktinfo_written_for_v4_source() {
        let mut control = [0u64; CONTROL_WORDS];
        let mut msghdr: libc::msghdr = unsafe { mem::zeroed() };
        msghdr.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msghdr.msg_controllen = CONTROL_LEN as _;
        let used = unsafe { write_packet_info(&msghdr, IpAddr::V4(Ipv4Addr::LOCALHOST), 1) };
        assert!(used > 0 && used <= CONTROL_LEN);

        let cmsg = unsafe { &*libc::CMSG_FIRSTHDR(&msghdr) };
        assert_eq!(cmsg.cmsg_level, libc::IPPROTO_IP);
        assert_eq!(cmsg.cmsg_type, libc::IP_PKTINFO);
    }
}
