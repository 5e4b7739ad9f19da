use std::net::Ipv6Addr;

use fahrrad::advert::AdvertisementBuilder;
use fahrrad::config::{AdvertisementConfig, Config, RouterAdvertisementConfig};
use fahrrad::icmp6::ndp::{decode_options, DecodeError, MacAddr, NdpOption};
use fahrrad::icmp6::{IncomingMessage, RouterAdvertisement, ALL_NODES_MULTICAST};
use fahrrad::responder::handle_packet;
use fahrrad::store::{bootstrap, MemoryConfigStore, FIELD_ASSIGNED_PREFIX_LENGTH};

const SOLICITATION: [u8; 16] = [0x85, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

fn host() -> Ipv6Addr {
    "fe80::1".parse().unwrap()
}

#[test]
fn solicitation_decodes_to_source_link_layer_address() {
    let message = IncomingMessage::parse(host(), Some(255), &SOLICITATION).unwrap();
    assert_eq!(message.options, vec![NdpOption::SourceLinkLayerAddress(MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]))]);
    assert_eq!(message.source_link_layer_address().unwrap().to_string(), "aa:bb:cc:dd:ee:ff");
}

#[tokio::test]
async fn default_store_produces_expected_prefix() {
    let mut store = MemoryConfigStore::new();
    let config = bootstrap(&mut store, "fahrrad/config").await;
    let builder = AdvertisementBuilder::new(config, AdvertisementConfig::default(), None);

    let reply = handle_packet(&builder, host(), Some(255), &SOLICITATION).unwrap().unwrap();
    assert_eq!(reply.destination, host());

    let wire = reply.encode();
    let advertisement = RouterAdvertisement::decode(&wire).unwrap();
    assert!(advertisement
        .prefixes()
        .any(|p| p.prefix_length == 48 && p.valid_lifetime == 86400 && p.preferred_lifetime == 14400));
}

#[tokio::test]
async fn operator_value_survives_restart() {
    let mut store = MemoryConfigStore::new();
    store.insert("fahrrad/config", FIELD_ASSIGNED_PREFIX_LENGTH, 72);

    let first = bootstrap(&mut store, "fahrrad/config").await;
    let second = bootstrap(&mut store, "fahrrad/config").await;
    assert_eq!(first.assigned_prefix_length, 72);
    assert_eq!(first, second);

    let builder = AdvertisementBuilder::new(second, AdvertisementConfig::default(), None);
    assert!(builder.build(None).advertisement.prefixes().any(|p| p.prefix_length == 72 && p.autonomous()));
}

#[test]
fn advertisement_round_trips_through_the_wire() {
    let header = AdvertisementConfig {
        prefix: "2001:db8:a::".parse().unwrap(),
        hop_limit: 64,
        router_lifetime: 1800,
        mtu: Some(1500),
        ..AdvertisementConfig::default()
    };
    let own = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    let message = AdvertisementBuilder::new(RouterAdvertisementConfig::default(), header, Some(own)).build(None);
    assert_eq!(message.destination, ALL_NODES_MULTICAST);

    let wire = message.encode();
    assert_eq!(wire.len() % 8, 0);
    assert_eq!(RouterAdvertisement::decode(&wire).unwrap(), message.advertisement);
}

#[test]
fn malformed_options_never_panic() {
    let mut data = SOLICITATION.to_vec();
    for len in 0..data.len() {
        let _ = handle_packet(
            &AdvertisementBuilder::new(RouterAdvertisementConfig::default(), AdvertisementConfig::default(), None),
            host(),
            Some(255),
            &data[..len],
        );
    }

    data[9] = 0;
    assert_eq!(decode_options(&data[8..]), Err(DecodeError::ZeroLengthOption { offset: 0 }));

    data[9] = 2;
    assert!(matches!(decode_options(&data[8..]), Err(DecodeError::TruncatedOption { .. })));
}

#[test]
fn config_file_sections() {
    let config = Config::from_toml(
        r#"
        [global]
        interface = "eth1"

        [store]
        url = "redis://127.0.0.1:6379/"

        [advertisement]
        prefix = "2001:db8:1::"
        router_lifetime = 1800
        "#,
    )
    .unwrap();

    assert_eq!(config.global.interface.as_deref(), Some("eth1"));
    assert_eq!(config.store.unwrap().namespace, "fahrrad/config");
    assert_eq!(config.advertisement.router_lifetime, 1800);
    assert_eq!(config.advertisement.mtu, None);
}
