use std::fmt::Debug;
use std::net::Ipv6Addr;

/// Receive buffer size. NDP messages on Ethernet fit in one MTU.
pub const RECV_BUFFER_LEN: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// source address for sending, or destination address for receiving
    pub addr: Ipv6Addr,

    /// interface index where the packet is sent or received
    pub if_index: libc::c_uint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHopLimit {
    pub hop_limit: u8,
}

pub struct Packet {
    /// destination address for sending, or source address for receiving
    pub target_addr: Ipv6Addr,

    /// scope of `target_addr`, needed for link-local peers
    pub scope_id: u32,

    /// packet data
    pub data: Vec<u8>,

    /// length of packet data
    pub data_len: usize,

    /// packet information
    pub info: Option<PacketInfo>,

    /// hop limit
    pub hop_limit: Option<PacketHopLimit>,
}

impl Packet {
    pub fn new() -> Self {
        Self {
            target_addr: Ipv6Addr::UNSPECIFIED,
            scope_id: 0,
            data: vec![0; RECV_BUFFER_LEN],
            data_len: 0,
            info: None,
            hop_limit: None,
        }
    }

    /// Outgoing NDP packet: hop limit 255, sent on `if_index` with a kernel-chosen source.
    pub fn outgoing(target_addr: Ipv6Addr, if_index: libc::c_uint, data: Vec<u8>) -> Self {
        let data_len = data.len();
        Self {
            target_addr,
            scope_id: if_index,
            data,
            data_len,
            info: Some(PacketInfo { addr: Ipv6Addr::UNSPECIFIED, if_index }),
            hop_limit: Some(PacketHopLimit { hop_limit: crate::icmp6::NDP_HOP_LIMIT }),
        }
    }

    pub fn data(&self) -> &[u8] {
        let len = self.data_len;
        if len > self.data.len() {
            &self.data
        } else {
            &self.data[..len]
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Packet");
        let mut debug = debug.field("target_addr", &self.target_addr)
            .field("scope_id", &self.scope_id)
            .field("data_len", &self.data_len);
        if let Some(info) = &self.info {
            debug = debug.field("info", &info);
        }
        if let Some(hop_limit) = &self.hop_limit {
            debug = debug.field("hop_limit", &hop_limit);
        }
        debug.finish()
    }
}
