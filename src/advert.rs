use std::net::Ipv6Addr;

use crate::config::{AdvertisementConfig, RouterAdvertisementConfig};
use crate::icmp6::ndp::{MacAddr, NdpOption, PrefixInformation};
use crate::icmp6::{RouterAdvertisement, ALL_NODES_MULTICAST};

/// A Router Advertisement ready to be handed to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub destination: Ipv6Addr,

    /// link-layer address the requester announced, if any
    pub destination_lla: Option<MacAddr>,

    pub advertisement: RouterAdvertisement,
}

impl OutgoingMessage {
    pub fn with_destination(mut self, destination: Ipv6Addr) -> Self {
        self.destination = destination;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        self.advertisement.encode()
    }
}

/// Clears every bit of `addr` past the first `len` bits.
pub fn mask_prefix(addr: Ipv6Addr, len: u8) -> Ipv6Addr {
    let len = len.min(128) as u32;
    let mask = u128::MAX.checked_shl(128 - len).unwrap_or(0);
    Ipv6Addr::from(u128::from(addr) & mask)
}

/// Everything needed to answer a solicitation, fixed at startup and shared
/// read-only by all packet handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementBuilder {
    config: RouterAdvertisementConfig,
    header: AdvertisementConfig,
    own_lla: Option<MacAddr>,
}

impl AdvertisementBuilder {
    pub fn new(config: RouterAdvertisementConfig, header: AdvertisementConfig, own_lla: Option<MacAddr>) -> Self {
        Self { config, header, own_lla }
    }

    pub fn config(&self) -> &RouterAdvertisementConfig {
        &self.config
    }

    fn prefix_options(&self) -> Vec<NdpOption> {
        let config = &self.config;
        let prefix = |prefix_length: u8, flags: u8| {
            NdpOption::PrefixInformation(PrefixInformation {
                prefix_length,
                flags,
                valid_lifetime: config.valid_lifetime,
                preferred_lifetime: config.preferred_lifetime,
                prefix: mask_prefix(self.header.prefix, prefix_length),
            })
        };

        if config.on_link_prefix_length == config.assigned_prefix_length {
            return vec![prefix(config.on_link_prefix_length, PrefixInformation::FLAG_ON_LINK | PrefixInformation::FLAG_AUTONOMOUS)];
        }
        vec![
            prefix(config.on_link_prefix_length, PrefixInformation::FLAG_ON_LINK),
            prefix(config.assigned_prefix_length, PrefixInformation::FLAG_AUTONOMOUS),
        ]
    }

    /// Assembles a Router Advertisement addressed to all nodes.
    /// The output depends only on the builder and `requester_lla`.
    pub fn build(&self, requester_lla: Option<MacAddr>) -> OutgoingMessage {
        let mut options = self.prefix_options();
        if let Some(mtu) = self.header.mtu {
            options.push(NdpOption::Mtu(mtu));
        }
        if let Some(lla) = self.own_lla {
            options.push(NdpOption::TargetLinkLayerAddress(lla));
        }

        let advertisement = RouterAdvertisement {
            hop_limit: self.header.hop_limit,
            managed_address_configuration: self.header.managed,
            other_configuration: self.header.other,
            router_lifetime: self.header.router_lifetime,
            reachable_time: self.header.reachable_time,
            retrans_timer: self.header.retrans_timer,
            options,
        };

        OutgoingMessage {
            destination: ALL_NODES_MULTICAST,
            destination_lla: requester_lla,
            advertisement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp6::ndp::decode_options;

    const OWN: MacAddr = MacAddr([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]);

    fn builder() -> AdvertisementBuilder {
        let header = AdvertisementConfig {
            prefix: "2001:db8:1234:5678::".parse().unwrap(),
            ..AdvertisementConfig::default()
        };
        AdvertisementBuilder::new(RouterAdvertisementConfig::default(), header, Some(OWN))
    }

    #[test]
    fn test_mask_prefix() {
        let addr: Ipv6Addr = "2001:db8:1234:5678:9abc::1".parse().unwrap();
        assert_eq!(mask_prefix(addr, 48), "2001:db8:1234::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(mask_prefix(addr, 64), "2001:db8:1234:5678::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(mask_prefix(addr, 0), Ipv6Addr::UNSPECIFIED);
        assert_eq!(mask_prefix(addr, 128), addr);
        assert_eq!(mask_prefix(addr, 200), addr);
    }

    #[test]
    fn test_build_default_config() {
        let msg = builder().build(None);
        assert_eq!(msg.destination, ALL_NODES_MULTICAST);
        assert_eq!(msg.destination_lla, None);

        let prefixes: Vec<_> = msg.advertisement.prefixes().copied().collect();
        assert_eq!(prefixes.len(), 2);

        let on_link = prefixes[0];
        assert_eq!(on_link.prefix_length, 48);
        assert!(on_link.on_link());
        assert!(!on_link.autonomous());
        assert_eq!(on_link.valid_lifetime, 86400);
        assert_eq!(on_link.preferred_lifetime, 14400);
        assert_eq!(on_link.prefix, "2001:db8:1234::".parse::<Ipv6Addr>().unwrap());

        let assigned = prefixes[1];
        assert_eq!(assigned.prefix_length, 64);
        assert!(assigned.autonomous());
        assert!(!assigned.on_link());
        assert_eq!(assigned.prefix, "2001:db8:1234:5678::".parse::<Ipv6Addr>().unwrap());

        assert_eq!(msg.advertisement.options.last(), Some(&NdpOption::TargetLinkLayerAddress(OWN)));
    }

    #[test]
    fn test_build_single_prefix_when_lengths_match() {
        let config = RouterAdvertisementConfig { on_link_prefix_length: 64, ..RouterAdvertisementConfig::default() };
        let builder = AdvertisementBuilder::new(config, AdvertisementConfig::default(), None);
        let msg = builder.build(None);
        let prefixes: Vec<_> = msg.advertisement.prefixes().collect();
        assert_eq!(prefixes.len(), 1);
        assert!(prefixes[0].on_link() && prefixes[0].autonomous());
        assert_eq!(msg.advertisement.options.len(), 1);
    }

    #[test]
    fn test_build_with_header_and_mtu() {
        let header = AdvertisementConfig {
            hop_limit: 64,
            managed: true,
            other: true,
            router_lifetime: 1800,
            mtu: Some(1480),
            ..AdvertisementConfig::default()
        };
        let builder = AdvertisementBuilder::new(RouterAdvertisementConfig::default(), header, Some(OWN));
        let requester = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let msg = builder.build(Some(requester));

        assert_eq!(msg.destination_lla, Some(requester));
        let ra = &msg.advertisement;
        assert_eq!(ra.hop_limit, 64);
        assert!(ra.managed_address_configuration && ra.other_configuration);
        assert_eq!(ra.router_lifetime, 1800);
        assert!(ra.options.contains(&NdpOption::Mtu(1480)));
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = builder();
        assert_eq!(builder.build(None), builder.build(None));
        assert_eq!(builder.build(None).encode(), builder.build(None).encode());
    }

    #[test]
    fn test_encoded_golden_bytes() {
        let config = RouterAdvertisementConfig { on_link_prefix_length: 64, ..RouterAdvertisementConfig::default() };
        let header = AdvertisementConfig { prefix: "2001:db8::".parse().unwrap(), ..AdvertisementConfig::default() };
        let data = AdvertisementBuilder::new(config, header, Some(OWN)).build(None).encode();

        let mut expected = vec![134, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        expected.extend_from_slice(&[0x03, 0x04, 64, 0xc0]);
        expected.extend_from_slice(&[0x00, 0x01, 0x51, 0x80]);
        expected.extend_from_slice(&[0x00, 0x00, 0x38, 0x40]);
        expected.extend_from_slice(&[0, 0, 0, 0]);
        expected.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        expected.extend_from_slice(&[0x02, 0x01, 0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]);
        assert_eq!(data, expected);
        assert_eq!(decode_options(&data[16..]).unwrap().len(), 2);
    }
}
