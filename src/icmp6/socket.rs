
use super::packet;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use std::ffi::c_int;
use std::net::Ipv6Addr;
use libc::socket;
use libc::setsockopt;
use std::os::fd::AsRawFd;
use std::sync::Arc;

/// Control message buffer, `u64` for `cmsghdr` alignment.
type CmsgBuffer = [u64; 32];

/// Kernel-side ICMPv6 type filter (RFC 3542 `struct icmp6_filter`).
/// A set bit blocks the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Icmp6Filter {
    data: [u32; 8],
}

impl Icmp6Filter {
    pub fn block_all() -> Self {
        Self { data: [u32::MAX; 8] }
    }

    /// Passes only Router/Neighbor Solicitation and Advertisement.
    pub fn ndp() -> Self {
        let mut filter = Self::block_all();
        for icmp_type in super::ICMP6_TYPE_ROUTER_SOLICITATION..=super::ICMP6_TYPE_NEIGHBOR_ADVERTISEMENT {
            filter.pass(icmp_type);
        }
        filter
    }

    fn slot(icmp_type: u8) -> (usize, u32) {
        ((icmp_type >> 5) as usize, 1u32 << (icmp_type & 31))
    }

    pub fn pass(&mut self, icmp_type: u8) {
        let (index, bit) = Self::slot(icmp_type);
        self.data[index] &= !bit;
    }

    pub fn will_pass(&self, icmp_type: u8) -> bool {
        let (index, bit) = Self::slot(icmp_type);
        self.data[index] & bit == 0
    }
}

#[derive(Debug)]
pub struct RawIcmp6Socket {
    socket: c_int,
}

impl RawIcmp6Socket {
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = unsafe { socket(libc::AF_INET6, libc::SOCK_RAW, libc::IPPROTO_ICMPV6) };
        if socket < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { socket })
    }

    /// Socket set up for NDP on one interface: bound to `::`, NDP types only,
    /// hop limit 255 both ways, member of the all-routers group.
    pub fn open_ndp(if_index: libc::c_uint) -> Result<Self, std::io::Error> {
        let socket = Self::new()?;
        socket.bind_unspecified()?;
        socket.set_icmp_filter(&Icmp6Filter::ndp())?;
        socket.set_unicast_hops(super::NDP_HOP_LIMIT as u32)?;
        socket.set_multicast_hops(super::NDP_HOP_LIMIT as u32)?;
        socket.set_multicast_loop(false)?;
        socket.set_recv_pktinfo(true)?;
        socket.set_recv_hoplimit(true)?;
        socket.join_multicast(super::ALL_ROUTERS_MULTICAST, if_index)?;
        Ok(socket)
    }

    pub fn bind_unspecified(&self) -> Result<(), std::io::Error> {
        let addr = sockaddr_in6(Ipv6Addr::UNSPECIFIED, 0);
        let code = unsafe {
            libc::bind(self.socket, &addr as *const _ as *const libc::sockaddr, std::mem::size_of_val(&addr) as libc::socklen_t)
        };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), std::io::Error> {
        let flags = unsafe { libc::fcntl(self.socket, libc::F_GETFL, 0) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let oldflags = flags;

        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };

        if flags == oldflags {
            return Ok(());
        }

        let code = unsafe { libc::fcntl(self.socket, libc::F_SETFL, flags) };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    unsafe fn setsockopt<T: Sized, O: SocketOpt>(&self, opt: O, optval: &T) -> Result<(), std::io::Error> {
        let level = opt.level();
        let optname = opt.optname();
        let code = unsafe {
            setsockopt(self.socket, level, optname, optval as *const _ as *const libc::c_void, std::mem::size_of::<T>() as libc::socklen_t)
        };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn set_icmp_filter(&self, filter: &Icmp6Filter) -> Result<(), std::io::Error> {
        unsafe { self.setsockopt(Icmp6Opt::ICMP6_FILTER, filter) }
    }

    pub fn join_multicast(&self, group: Ipv6Addr, if_index: libc::c_uint) -> Result<(), std::io::Error> {
        let mreq = libc::ipv6_mreq {
            ipv6mr_multiaddr: libc::in6_addr { s6_addr: group.octets() },
            ipv6mr_interface: if_index,
        };
        unsafe { self.setsockopt(Ipv6Opt::IPV6_ADD_MEMBERSHIP, &mreq) }
    }

    pub fn set_unicast_hops(&self, hops: u32) -> Result<(), std::io::Error> {
        let hops = hops as c_int;
        unsafe { self.setsockopt(Ipv6Opt::IPV6_UNICAST_HOPS, &hops) }
    }

    pub fn set_multicast_hops(&self, hops: u32) -> Result<(), std::io::Error> {
        let hops = hops as c_int;
        unsafe { self.setsockopt(Ipv6Opt::IPV6_MULTICAST_HOPS, &hops) }
    }

    pub fn set_multicast_loop(&self, loopback: bool) -> Result<(), std::io::Error> {
        let loopback: c_int = if loopback { 1 } else { 0 };
        unsafe { self.setsockopt(Ipv6Opt::IPV6_MULTICAST_LOOP, &loopback) }
    }

    pub fn set_recv_pktinfo(&self, recv_pktinfo: bool) -> Result<(), std::io::Error> {
        let recv_pktinfo: c_int = if recv_pktinfo { 1 } else { 0 };
        unsafe { self.setsockopt(Ipv6Opt::IPV6_RECVPKTINFO, &recv_pktinfo) }
    }

    pub fn set_recv_hoplimit(&self, recv_hoplimit: bool) -> Result<(), std::io::Error> {
        let recv_hoplimit: c_int = if recv_hoplimit { 1 } else { 0 };
        unsafe { self.setsockopt(Ipv6Opt::IPV6_RECVHOPLIMIT, &recv_hoplimit) }
    }

    pub fn recv(&self, packet: &mut packet::Packet) -> Result<(), std::io::Error> {
        unsafe {
            let mut cmsg: CmsgBuffer = [0; 32];
            let mut src: libc::sockaddr_in6 = std::mem::zeroed();
            let mut info: libc::msghdr = std::mem::zeroed();
            let len = {
                info.msg_name = &mut src as *mut _ as *mut libc::c_void;
                info.msg_namelen = std::mem::size_of_val(&src) as libc::socklen_t;

                let mut iov = [std::io::IoSliceMut::new(&mut packet.data[..])];
                info.msg_iov = iov.as_mut_ptr() as *mut libc::iovec;
                info.msg_iovlen = iov.len();

                info.msg_control = cmsg.as_mut_ptr() as *mut libc::c_void;
                info.msg_controllen = std::mem::size_of_val(&cmsg);

                let code = libc::recvmsg(self.socket, &mut info, 0);
                if code < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                code as usize
            };

            packet.data_len = received_len(len, packet.data.len(), info.msg_flags);
            if packet.data_len == 0 && len != 0 {
                log::debug!("dropping truncated ICMPv6 datagram from {}", Ipv6Addr::from(src.sin6_addr.s6_addr));
            }

            packet.target_addr = src.sin6_addr.s6_addr.into();
            packet.scope_id = src.sin6_scope_id;

            packet.info = None;
            packet.hop_limit = None;

            let mut cmsg = libc::CMSG_FIRSTHDR(&info as *const libc::msghdr).as_ref();

            #[allow(clippy::cast_ptr_alignment)]
            while let Some(chdr) = cmsg {
                let data = libc::CMSG_DATA(chdr as *const _);
                match (chdr.cmsg_level, chdr.cmsg_type) {
                    (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                        let pktinfo = std::ptr::read_unaligned(data as *const libc::in6_pktinfo);
                        let dst: Ipv6Addr = pktinfo.ipi6_addr.s6_addr.into();
                        let ifindex = pktinfo.ipi6_ifindex;
                        packet.info = Some(packet::PacketInfo { addr: dst, if_index: ifindex });
                    }

                    (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT) => {
                        let hoplimit = std::ptr::read_unaligned(data as *const libc::c_int);
                        packet.hop_limit = Some(packet::PacketHopLimit { hop_limit: hoplimit as u8 });
                    }

                    _ => {
                        log::warn!("unknown control message: level={} type={}", chdr.cmsg_level, chdr.cmsg_type);
                    }
                }

                cmsg = libc::CMSG_NXTHDR(&info as *const libc::msghdr, chdr as *const _).as_ref();
            }
        }

        Ok(())
    }

    pub fn send(&self, packet: &packet::Packet) -> Result<(), std::io::Error> {
        let dst = sockaddr_in6(packet.target_addr, packet.scope_id);
        let data = packet.data();

        let mut info: libc::msghdr = unsafe { std::mem::zeroed() };
        info.msg_name = &dst as *const _ as *mut _;
        info.msg_namelen = std::mem::size_of_val(&dst) as libc::socklen_t;

        let mut iov = [libc::iovec {
            iov_base: data.as_ptr() as *mut _,
            iov_len: data.len() as libc::size_t,
        }];

        info.msg_iov = iov.as_mut_ptr() as *mut _;
        info.msg_iovlen = iov.len();

        let mut cmsg_buf: CmsgBuffer = [0; 32];
        let mut cmsg_len: usize = 0;

        if packet.info.is_some() || packet.hop_limit.is_some() {
            info.msg_control = cmsg_buf.as_mut_ptr() as *mut _;
            info.msg_controllen = std::mem::size_of_val(&cmsg_buf);

            let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&info) };

            if let Some(pktinfo) = &packet.info {
                let value = libc::in6_pktinfo {
                    ipi6_addr: libc::in6_addr { s6_addr: pktinfo.addr.octets() },
                    ipi6_ifindex: pktinfo.if_index,
                };
                cmsg = unsafe { put_cmsg(&info, cmsg, libc::IPV6_PKTINFO, value)? };
                cmsg_len += cmsg_space::<libc::in6_pktinfo>();
            }

            if let Some(hop_limit) = &packet.hop_limit {
                let value = hop_limit.hop_limit as libc::c_int;
                unsafe { put_cmsg(&info, cmsg, libc::IPV6_HOPLIMIT, value)? };
                cmsg_len += cmsg_space::<libc::c_int>();
            }
        }

        info.msg_controllen = cmsg_len;
        if cmsg_len == 0 {
            info.msg_control = std::ptr::null_mut();
        }

        let code = unsafe { libc::sendmsg(self.socket, &info, 0) };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    pub fn into_async(self) -> Result<AsyncIcmp6Socket, std::io::Error> {
        AsyncIcmp6Socket::new(self)
    }
}

/// Usable length of a received datagram. A datagram cut off by the buffer
/// (`MSG_TRUNC`) is dropped as empty.
fn received_len(len: usize, buf_len: usize, msg_flags: c_int) -> usize {
    if msg_flags & libc::MSG_TRUNC != 0 || len > buf_len {
        return 0;
    }
    len
}

fn sockaddr_in6(addr: Ipv6Addr, scope_id: u32) -> libc::sockaddr_in6 {
    let mut sockaddr: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    sockaddr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sockaddr.sin6_addr = libc::in6_addr { s6_addr: addr.octets() };
    sockaddr.sin6_scope_id = scope_id;
    sockaddr
}

fn cmsg_space<T>() -> usize {
    unsafe { libc::CMSG_SPACE(std::mem::size_of::<T>() as libc::c_uint) as usize }
}

/// Writes one IPv6-level control message at `cmsg` and returns the next slot.
unsafe fn put_cmsg<T: Copy>(info: &libc::msghdr, cmsg: *mut libc::cmsghdr, cmsg_type: c_int, value: T) -> Result<*mut libc::cmsghdr, std::io::Error> {
    let hdr = unsafe { cmsg.as_mut() }
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "control message buffer exhausted"))?;
    hdr.cmsg_level = libc::IPPROTO_IPV6;
    hdr.cmsg_type = cmsg_type;
    hdr.cmsg_len = unsafe { libc::CMSG_LEN(std::mem::size_of::<T>() as libc::c_uint) } as _;
    unsafe {
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut T, value);
        Ok(libc::CMSG_NXTHDR(info, cmsg))
    }
}

impl Drop for RawIcmp6Socket {
    fn drop(&mut self) {
        if self.socket < 0 {
            return;
        }
        unsafe { libc::close(self.socket) };
    }
}

impl AsRawFd for RawIcmp6Socket {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.socket
    }
}

#[derive(Debug, Clone)]
pub struct AsyncIcmp6Socket {
    inner: Arc<AsyncFd<RawIcmp6Socket>>,
}

impl AsyncIcmp6Socket {
    pub fn new(socket: RawIcmp6Socket) -> Result<Self, std::io::Error> {
        socket.set_nonblocking(true)?;
        let inner = Arc::new(AsyncFd::with_interest(socket, Interest::READABLE | Interest::WRITABLE)?);
        Ok(Self { inner })
    }

    pub async fn recv(&self, packet: &mut packet::Packet) -> Result<(), std::io::Error> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv(packet)) {
                Ok(res) => {
                    return res;
                }

                Err(_) => continue,
            }
        }
    }

    pub async fn send(&self, packet: &packet::Packet) -> Result<(), std::io::Error> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send(packet)) {
                Ok(res) => {
                    return res;
                }

                Err(_) => continue,
            }
        }
    }
}

pub trait SocketOpt {
    fn level(&self) -> c_int;
    fn optname(&self) -> c_int;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Opt(c_int);

impl SocketOpt for Ipv6Opt {
    fn level(&self) -> c_int {
        libc::IPPROTO_IPV6
    }

    fn optname(&self) -> c_int {
        self.0
    }
}

impl Ipv6Opt {
    pub const IPV6_ADD_MEMBERSHIP: Self = Self(libc::IPV6_ADD_MEMBERSHIP);
    pub const IPV6_UNICAST_HOPS: Self = Self(libc::IPV6_UNICAST_HOPS);
    pub const IPV6_MULTICAST_HOPS: Self = Self(libc::IPV6_MULTICAST_HOPS);
    pub const IPV6_MULTICAST_LOOP: Self = Self(libc::IPV6_MULTICAST_LOOP);
    pub const IPV6_RECVPKTINFO: Self = Self(libc::IPV6_RECVPKTINFO);
    pub const IPV6_RECVHOPLIMIT: Self = Self(libc::IPV6_RECVHOPLIMIT);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icmp6Opt(c_int);

impl SocketOpt for Icmp6Opt {
    fn level(&self) -> c_int {
        libc::IPPROTO_ICMPV6
    }

    fn optname(&self) -> c_int {
        self.0
    }
}

impl Icmp6Opt {
    /// `ICMPV6_FILTER` in linux/icmpv6.h
    pub const ICMP6_FILTER: Self = Self(1);
}
