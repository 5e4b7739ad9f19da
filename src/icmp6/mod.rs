
pub mod socket;
pub mod packet;
pub mod ndp;

pub use socket::RawIcmp6Socket;
pub use socket::AsyncIcmp6Socket;

use std::net::Ipv6Addr;

use ndp::*;

pub const ICMP6_TYPE_ROUTER_SOLICITATION: u8 = 133;
pub const ICMP6_TYPE_ROUTER_ADVERTISEMENT: u8 = 134;
pub const ICMP6_TYPE_NEIGHBOR_SOLICITATION: u8 = 135;
pub const ICMP6_TYPE_NEIGHBOR_ADVERTISEMENT: u8 = 136;

/// RFC 4861 section 4: every NDP message is sent with this hop limit.
pub const NDP_HOP_LIMIT: u8 = 255;

pub const ALL_NODES_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
pub const ALL_ROUTERS_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RouterSolicitation,
    RouterAdvertisement,
    NeighborSolicitation,
    NeighborAdvertisement,
    Unhandled,
}

impl MessageKind {
    /// Length of the fixed part of the message, ICMPv6 header included.
    pub fn header_len(&self) -> Option<usize> {
        match self {
            MessageKind::RouterSolicitation => Some(8),
            MessageKind::RouterAdvertisement => Some(16),
            MessageKind::NeighborSolicitation | MessageKind::NeighborAdvertisement => Some(24),
            MessageKind::Unhandled => None,
        }
    }
}

pub fn classify(icmp_type: u8) -> MessageKind {
    match icmp_type {
        ICMP6_TYPE_ROUTER_SOLICITATION => MessageKind::RouterSolicitation,
        ICMP6_TYPE_ROUTER_ADVERTISEMENT => MessageKind::RouterAdvertisement,
        ICMP6_TYPE_NEIGHBOR_SOLICITATION => MessageKind::NeighborSolicitation,
        ICMP6_TYPE_NEIGHBOR_ADVERTISEMENT => MessageKind::NeighborAdvertisement,
        _ => MessageKind::Unhandled,
    }
}

fn read_ipv6(data: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[..16]);
    Ipv6Addr::from(octets)
}

/// A received NDP message, decoded once and dropped after handling.
#[derive(Clone)]
pub struct IncomingMessage {
    pub icmp_type: u8,
    pub code: u8,
    pub source_address: Ipv6Addr,

    /// hop limit from ancillary data, if the socket reported one
    pub hop_limit: Option<u8>,

    /// NS/NA target
    pub target_address: Option<Ipv6Addr>,

    pub options: Vec<NdpOption>,
}

impl IncomingMessage {
    pub fn kind(&self) -> MessageKind {
        classify(self.icmp_type)
    }

    pub fn parse(source_address: Ipv6Addr, hop_limit: Option<u8>, data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 4 {
            return Err(DecodeError::TruncatedHeader {
                icmp_type: data.first().copied().unwrap_or(0),
                expected: 4,
                actual: data.len(),
            });
        }
        let icmp_type = data[0];
        let code = data[1];
        let kind = classify(icmp_type);

        let header_len = kind.header_len().unwrap_or(4);
        if data.len() < header_len {
            return Err(DecodeError::TruncatedHeader { icmp_type, expected: header_len, actual: data.len() });
        }

        let target_address = match kind {
            MessageKind::NeighborSolicitation | MessageKind::NeighborAdvertisement => Some(read_ipv6(&data[8..24])),
            _ => None,
        };

        let options = match kind {
            MessageKind::Unhandled => Vec::new(),
            _ => decode_options(&data[header_len..])?,
        };

        Ok(Self {
            icmp_type,
            code,
            source_address,
            hop_limit,
            target_address,
            options,
        })
    }

    pub fn source_link_layer_address(&self) -> Option<MacAddr> {
        self.options.iter().find_map(|option| match option {
            NdpOption::SourceLinkLayerAddress(addr) => Some(*addr),
            _ => None,
        })
    }
}

impl std::fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "NDP {:?} from {}", self.kind(), self.source_address)?;
        if let Some(target) = self.target_address {
            write!(f, " target={}", target)?;
        }
        if let Some(hop_limit) = self.hop_limit {
            write!(f, " hop_limit={}", hop_limit)?;
        }
        write!(f, " ")?;
        fmt_option_list(f, &self.options)
    }
}

#[derive(Clone, PartialEq, Eq, Default)]
pub struct RouterAdvertisement {
    pub hop_limit: u8,
    pub managed_address_configuration: bool,
    pub other_configuration: bool,
    pub router_lifetime: u16,
    pub reachable_time: u32,
    pub retrans_timer: u32,
    pub options: Vec<NdpOption>,
}

impl RouterAdvertisement {
    /// ICMPv6 bytes with a zero checksum; the kernel fills it in on raw ICMPv6 sockets.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = vec![0u8; 16];
        data[0] = ICMP6_TYPE_ROUTER_ADVERTISEMENT;
        data[1] = 0;
        data[4] = self.hop_limit;
        data[5] = if self.managed_address_configuration { 0x80 } else { 0x00 };
        data[5] |= if self.other_configuration { 0x40 } else { 0x00 };
        data[6..8].copy_from_slice(&self.router_lifetime.to_be_bytes());
        data[8..12].copy_from_slice(&self.reachable_time.to_be_bytes());
        data[12..16].copy_from_slice(&self.retrans_timer.to_be_bytes());

        data.extend_from_slice(&encode_options(&self.options));
        data
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 16 {
            return Err(DecodeError::TruncatedHeader {
                icmp_type: ICMP6_TYPE_ROUTER_ADVERTISEMENT,
                expected: 16,
                actual: data.len(),
            });
        }
        Ok(Self {
            hop_limit: data[4],
            managed_address_configuration: data[5] & 0x80 != 0,
            other_configuration: data[5] & 0x40 != 0,
            router_lifetime: u16::from_be_bytes([data[6], data[7]]),
            reachable_time: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            retrans_timer: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            options: decode_options(&data[16..])?,
        })
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &PrefixInformation> {
        self.options.iter().filter_map(|option| match option {
            NdpOption::PrefixInformation(info) => Some(info),
            _ => None,
        })
    }
}

impl std::fmt::Debug for RouterAdvertisement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "NDP RouterAdvertisement: flags=")?;
        if self.managed_address_configuration {
            write!(f, "M")?;
        }
        if self.other_configuration {
            write!(f, "O")?;
        }

        write!(f, " hop_limit={}, ", self.hop_limit)?;
        write!(f, "router_lifetime={}, ", self.router_lifetime)?;
        write!(f, "reachable_time={}, ", self.reachable_time)?;
        write!(f, "retrans_timer={}, ", self.retrans_timer)?;
        fmt_option_list(f, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(133), MessageKind::RouterSolicitation);
        assert_eq!(classify(134), MessageKind::RouterAdvertisement);
        assert_eq!(classify(135), MessageKind::NeighborSolicitation);
        assert_eq!(classify(136), MessageKind::NeighborAdvertisement);
        assert_eq!(classify(128), MessageKind::Unhandled);
        assert_eq!(classify(137), MessageKind::Unhandled);
    }

    #[test]
    fn test_parse_router_solicitation() {
        let data = [0x85, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let msg = IncomingMessage::parse(src, Some(255), &data).unwrap();
        assert_eq!(msg.kind(), MessageKind::RouterSolicitation);
        assert_eq!(msg.source_address, src);
        assert_eq!(msg.target_address, None);
        assert_eq!(msg.source_link_layer_address(), Some(MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])));
    }

    #[test]
    fn test_parse_neighbor_solicitation() {
        let target: Ipv6Addr = "2001:db8::42".parse().unwrap();
        let mut data = vec![135, 0, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(&target.octets());
        data.extend_from_slice(&[0x01, 0x01, 2, 0, 0, 0, 0, 1]);
        let msg = IncomingMessage::parse(Ipv6Addr::UNSPECIFIED, None, &data).unwrap();
        assert_eq!(msg.kind(), MessageKind::NeighborSolicitation);
        assert_eq!(msg.target_address, Some(target));
        assert_eq!(msg.options, vec![NdpOption::SourceLinkLayerAddress(MacAddr([2, 0, 0, 0, 0, 1]))]);
    }

    #[test]
    fn test_parse_short_header() {
        let data = [135, 0, 0, 0, 0, 0, 0, 0, 0xfe, 0x80];
        assert_eq!(
            IncomingMessage::parse(Ipv6Addr::UNSPECIFIED, None, &data).unwrap_err(),
            DecodeError::TruncatedHeader { icmp_type: 135, expected: 24, actual: 10 },
        );
        assert!(matches!(
            IncomingMessage::parse(Ipv6Addr::UNSPECIFIED, None, &[0x85]),
            Err(DecodeError::TruncatedHeader { expected: 4, actual: 1, .. })
        ));
    }

    #[test]
    fn test_parse_unhandled_skips_options() {
        let data = [128, 0, 0, 0, 0x12, 0x34, 0x00, 0x01, 0x00];
        let msg = IncomingMessage::parse(Ipv6Addr::LOCALHOST, None, &data).unwrap();
        assert_eq!(msg.kind(), MessageKind::Unhandled);
        assert!(msg.options.is_empty());
    }

    #[test]
    fn test_router_advertisement_header() {
        let ra = RouterAdvertisement {
            hop_limit: 64,
            managed_address_configuration: true,
            other_configuration: false,
            router_lifetime: 1800,
            reachable_time: 30000,
            retrans_timer: 1000,
            options: vec![NdpOption::Mtu(1500)],
        };
        let data = ra.encode();
        assert_eq!(&data[..16], &[134, 0, 0, 0, 64, 0x80, 0x07, 0x08, 0, 0, 0x75, 0x30, 0, 0, 0x03, 0xe8]);
        assert_eq!(data.len(), 24);
        assert_eq!(RouterAdvertisement::decode(&data).unwrap(), ra);
    }
}
