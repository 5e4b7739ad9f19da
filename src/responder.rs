//! Per-packet decisions and the receive loop.
//!
//! Each received packet is handled by its own task; the receive loop never
//! waits for one to finish. Fan-out is unbounded, which is acceptable at
//! Neighbor Discovery rates but is the first thing to bound if the responder
//! ever faces a flood.

use std::net::Ipv6Addr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::advert::{AdvertisementBuilder, OutgoingMessage};
use crate::icmp6::ndp::{DecodeError, NdpOption};
use crate::icmp6::packet::Packet;
use crate::icmp6::{classify, AsyncIcmp6Socket, IncomingMessage, MessageKind, NDP_HOP_LIMIT};
use crate::interface::Interface;

/// Answers a Router Solicitation.
///
/// A missing source link-layer address is not an error; the reply is built
/// without one. Returns `None` only for a solicitation RFC 4861 requires us
/// to discard (unspecified source carrying a source link-layer address).
pub fn handle_router_solicitation(source: Ipv6Addr, options: &[NdpOption], builder: &AdvertisementBuilder) -> Option<OutgoingMessage> {
    let lla = options.iter().find_map(|option| match option {
        NdpOption::SourceLinkLayerAddress(addr) => Some(*addr),
        _ => None,
    });

    match lla {
        Some(lla) => log::debug!("Router Solicitation from {} ({})", source, lla),
        None => log::info!("Router Solicitation from {} has no source link-layer address option", source),
    }

    if source.is_unspecified() {
        if lla.is_some() {
            log::debug!("Discarding Router Solicitation from :: with a source link-layer address");
            return None;
        }
        // no address to reply to yet, advertise to all nodes
        return Some(builder.build(None));
    }

    Some(builder.build(lla).with_destination(source))
}

/// Classifies, validates, and decodes one ICMPv6 message and decides the reply.
pub fn handle_packet(builder: &AdvertisementBuilder, source: Ipv6Addr, hop_limit: Option<u8>, data: &[u8]) -> Result<Option<OutgoingMessage>, DecodeError> {
    let Some(&icmp_type) = data.first() else {
        return Err(DecodeError::TruncatedHeader { icmp_type: 0, expected: 4, actual: 0 });
    };

    let kind = classify(icmp_type);
    if kind == MessageKind::Unhandled {
        log::debug!("Ignoring ICMPv6 type {} from {}", icmp_type, source);
        return Ok(None);
    }

    let message = IncomingMessage::parse(source, hop_limit, data)?;
    log::debug!("{:?}", message);

    if message.code != 0 {
        log::debug!("Dropping {:?} from {} with code {}", kind, source, message.code);
        return Ok(None);
    }
    if let Some(hop_limit) = message.hop_limit {
        if hop_limit != NDP_HOP_LIMIT {
            log::debug!("Dropping {:?} from {} with hop limit {}", kind, source, hop_limit);
            return Ok(None);
        }
    }

    match kind {
        MessageKind::RouterSolicitation => {
            Ok(handle_router_solicitation(message.source_address, &message.options, builder))
        }

        MessageKind::RouterAdvertisement => {
            log::info!("Router Advertisement from another router {}: {:?}", source, message.options);
            Ok(None)
        }

        MessageKind::NeighborSolicitation | MessageKind::NeighborAdvertisement => Ok(None),

        MessageKind::Unhandled => Ok(None),
    }
}

async fn send_message(socket: &AsyncIcmp6Socket, if_index: libc::c_uint, message: &OutgoingMessage) -> Result<(), std::io::Error> {
    let packet = Packet::outgoing(message.destination, if_index, message.encode());
    log::debug!("Sending Router Advertisement to {}: {:?}", message.destination, message.advertisement);
    socket.send(&packet).await
}

/// Whether a received packet should be handled: it must name our interface in
/// its packet info and carry a payload.
fn accept_packet(packet: &Packet, if_index: libc::c_uint) -> bool {
    let Some(info) = packet.info else {
        log::debug!("Ignoring packet from {} without packet info", packet.target_addr);
        return false;
    };
    if info.if_index != if_index {
        log::debug!("Ignoring packet from {} on interface index {}", packet.target_addr, info.if_index);
        return false;
    }
    if packet.data().is_empty() {
        log::debug!("Ignoring empty packet from {}", packet.target_addr);
        return false;
    }
    true
}

/// Hands a failed send to the receive loop. Returns true if `result` was an error.
fn report_send_failure(result: Result<(), std::io::Error>, fatal: &mpsc::Sender<std::io::Error>) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            // the loop only needs the first failure
            let _ = fatal.try_send(e);
            true
        }
    }
}

pub struct Responder {
    socket: AsyncIcmp6Socket,
    interface: Interface,
    builder: Arc<AdvertisementBuilder>,
}

impl Responder {
    pub fn new(socket: AsyncIcmp6Socket, interface: Interface, builder: AdvertisementBuilder) -> Self {
        Self {
            socket,
            interface,
            builder: Arc::new(builder),
        }
    }

    /// Runs until the socket fails. Send errors from handler tasks are
    /// reported back here and end the loop as well.
    pub async fn run(self) -> Result<(), crate::Error> {
        let (fatal_sender, mut fatal_receiver) = mpsc::channel::<std::io::Error>(1);
        let ticker = self.spawn_unsolicited(fatal_sender.clone());

        log::info!("Answering Router Solicitations on {} (index {})", self.interface.if_name, self.interface.if_index);

        let mut packet = Packet::new();
        let result = loop {
            tokio::select! {
                res = self.socket.recv(&mut packet) => {
                    if let Err(e) = res {
                        log::error!("Failed to receive packet: {}", e);
                        break Err(e);
                    }
                    self.dispatch(&packet, &fatal_sender);
                }

                Some(e) = fatal_receiver.recv() => {
                    log::error!("Failed to send Router Advertisement: {}", e);
                    break Err(e);
                }
            }
        };

        ticker.abort();
        result.map_err(Into::into)
    }

    fn dispatch(&self, packet: &Packet, fatal: &mpsc::Sender<std::io::Error>) {
        if !accept_packet(packet, self.interface.if_index) {
            return;
        }

        let source = packet.target_addr;
        let hop_limit = packet.hop_limit.map(|hop_limit| hop_limit.hop_limit);
        let data = packet.data().to_vec();
        let builder = self.builder.clone();
        let socket = self.socket.clone();
        let if_index = self.interface.if_index;
        let fatal = fatal.clone();

        tokio::spawn(async move {
            let reply = match handle_packet(&builder, source, hop_limit, &data) {
                Ok(Some(reply)) => reply,
                Ok(None) => return,
                Err(e) => {
                    log::debug!("Dropping packet from {}: {}", source, e);
                    return;
                }
            };

            report_send_failure(send_message(&socket, if_index, &reply).await, &fatal);
        });
    }

    fn spawn_unsolicited(&self, fatal: mpsc::Sender<std::io::Error>) -> JoinHandle<()> {
        let builder = self.builder.clone();
        let socket = self.socket.clone();
        let if_index = self.interface.if_index;
        let period = builder.config().advertisement_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let message = builder.build(None);
                if report_send_failure(send_message(&socket, if_index, &message).await, &fatal) {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdvertisementConfig, RouterAdvertisementConfig};
    use crate::icmp6::ndp::MacAddr;
    use crate::icmp6::ALL_NODES_MULTICAST;

    const REQUESTER: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    fn builder() -> AdvertisementBuilder {
        AdvertisementBuilder::new(
            RouterAdvertisementConfig::default(),
            AdvertisementConfig::default(),
            Some(MacAddr([0x02, 0, 0, 0, 0, 0x01])),
        )
    }

    fn host() -> Ipv6Addr {
        "fe80::a8bb:ccff:fedd:eeff".parse().unwrap()
    }

    #[test]
    fn test_solicitation_without_lla_is_answered() {
        let reply = handle_router_solicitation(host(), &[], &builder()).unwrap();
        assert_eq!(reply.destination, host());
        assert_eq!(reply.destination_lla, None);
        assert!(reply.advertisement.prefixes().next().is_some());
    }

    #[test]
    fn test_solicitation_with_only_other_options() {
        let options = [NdpOption::Mtu(1500), NdpOption::TargetLinkLayerAddress(REQUESTER)];
        let reply = handle_router_solicitation(host(), &options, &builder()).unwrap();
        assert_eq!(reply.destination_lla, None);
    }

    #[test]
    fn test_solicitation_with_lla() {
        let options = [NdpOption::SourceLinkLayerAddress(REQUESTER)];
        let reply = handle_router_solicitation(host(), &options, &builder()).unwrap();
        assert_eq!(reply.destination, host());
        assert_eq!(reply.destination_lla, Some(REQUESTER));
    }

    #[test]
    fn test_unspecified_source_goes_to_all_nodes() {
        let reply = handle_router_solicitation(Ipv6Addr::UNSPECIFIED, &[], &builder()).unwrap();
        assert_eq!(reply.destination, ALL_NODES_MULTICAST);
    }

    #[test]
    fn test_unspecified_source_with_lla_is_discarded() {
        let options = [NdpOption::SourceLinkLayerAddress(REQUESTER)];
        assert!(handle_router_solicitation(Ipv6Addr::UNSPECIFIED, &options, &builder()).is_none());
    }

    #[test]
    fn test_handle_packet_router_solicitation() {
        let data = [0x85, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let reply = handle_packet(&builder(), host(), Some(255), &data).unwrap().unwrap();
        assert_eq!(reply.destination, host());
        assert_eq!(reply.destination_lla, Some(REQUESTER));
    }

    #[test]
    fn test_handle_packet_rejects_wrong_hop_limit() {
        let data = [0x85, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(handle_packet(&builder(), host(), Some(64), &data).unwrap(), None);
        assert!(handle_packet(&builder(), host(), None, &data).unwrap().is_some());
    }

    #[test]
    fn test_handle_packet_rejects_nonzero_code() {
        let data = [0x85, 1, 0, 0, 0, 0, 0, 0];
        assert_eq!(handle_packet(&builder(), host(), Some(255), &data).unwrap(), None);
    }

    #[test]
    fn test_handle_packet_decode_errors() {
        let zero_length = [0x85, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x00];
        assert_eq!(
            handle_packet(&builder(), host(), Some(255), &zero_length),
            Err(DecodeError::ZeroLengthOption { offset: 0 }),
        );
        assert!(matches!(handle_packet(&builder(), host(), None, &[]), Err(DecodeError::TruncatedHeader { .. })));
    }

    #[test]
    fn test_handle_packet_ignores_other_messages() {
        let echo = [128, 0, 0, 0, 0, 1, 0, 1];
        assert_eq!(handle_packet(&builder(), host(), Some(255), &echo).unwrap(), None);

        let advertisement = crate::icmp6::RouterAdvertisement::default().encode();
        assert_eq!(handle_packet(&builder(), host(), Some(255), &advertisement).unwrap(), None);

        let mut solicitation = vec![135, 0, 0, 0, 0, 0, 0, 0];
        solicitation.extend_from_slice(&host().octets());
        assert_eq!(handle_packet(&builder(), host(), Some(255), &solicitation).unwrap(), None);
    }

    fn received(if_index: Option<libc::c_uint>, data: &[u8]) -> Packet {
        let mut packet = Packet::new();
        packet.target_addr = host();
        packet.data[..data.len()].copy_from_slice(data);
        packet.data_len = data.len();
        packet.info = if_index.map(|if_index| crate::icmp6::packet::PacketInfo {
            addr: crate::icmp6::ALL_ROUTERS_MULTICAST,
            if_index,
        });
        packet
    }

    #[test]
    fn test_accept_packet_on_own_interface() {
        assert!(accept_packet(&received(Some(3), &[0x85, 0, 0, 0, 0, 0, 0, 0]), 3));
    }

    #[test]
    fn test_accept_packet_rejects_other_interface() {
        assert!(!accept_packet(&received(Some(4), &[0x85, 0, 0, 0, 0, 0, 0, 0]), 3));
    }

    #[test]
    fn test_accept_packet_requires_packet_info() {
        assert!(!accept_packet(&received(None, &[0x85, 0, 0, 0, 0, 0, 0, 0]), 3));
    }

    #[test]
    fn test_accept_packet_rejects_dropped_datagram() {
        assert!(!accept_packet(&received(Some(3), &[]), 3));
    }

    #[tokio::test]
    async fn test_send_failure_reaches_receive_loop() {
        let (sender, mut receiver) = mpsc::channel(1);
        assert!(!report_send_failure(Ok(()), &sender));
        assert!(receiver.try_recv().is_err());

        let failure = std::io::Error::from(std::io::ErrorKind::NetworkUnreachable);
        assert!(report_send_failure(Err(failure), &sender));
        // a second failure while the first is pending must not block
        assert!(report_send_failure(Err(std::io::ErrorKind::BrokenPipe.into()), &sender));

        let e = receiver.recv().await.unwrap();
        assert_eq!(e.kind(), std::io::ErrorKind::NetworkUnreachable);
        assert!(receiver.try_recv().is_err());
    }
}
