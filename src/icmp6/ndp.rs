
use std::net::Ipv6Addr;

pub const OPTION_SOURCE_LINK_LAYER_ADDRESS: u8 = 1;
pub const OPTION_TARGET_LINK_LAYER_ADDRESS: u8 = 2;
pub const OPTION_PREFIX_INFORMATION: u8 = 3;
pub const OPTION_MTU: u8 = 5;

const OPTION_HEADER_LEN: usize = 2;
const OPTION_UNIT: usize = 8;
const PREFIX_INFORMATION_PAYLOAD_LEN: usize = 30;
const MTU_PAYLOAD_LEN: usize = 6;
const MAX_OPTION_LEN: usize = u8::MAX as usize * OPTION_UNIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// option at `offset` declares a length of zero
    #[error("NDP option at offset {offset} has zero length")]
    ZeroLengthOption { offset: usize },

    #[error("NDP option at offset {offset} needs {needed} bytes, {remaining} remaining")]
    TruncatedOption { offset: usize, needed: usize, remaining: usize },

    #[error("prefix information option at offset {offset} has a {len}-byte payload")]
    MalformedPrefixOption { offset: usize, len: usize },

    #[error("{remaining} trailing byte(s) after the last NDP option")]
    TrailingGarbage { remaining: usize },

    #[error("ICMPv6 type {icmp_type} needs a {expected}-byte header, got {actual}")]
    TruncatedHeader { icmp_type: u8, expected: usize, actual: usize },
}

/// Ethernet link-layer address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const LEN: usize = 6;

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = data.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(octets))
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl std::fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixInformation {
    pub prefix_length: u8,

    /// raw L/A/R flag byte
    pub flags: u8,

    /// seconds, `u32::MAX` is infinity
    pub valid_lifetime: u32,

    /// seconds, `u32::MAX` is infinity
    pub preferred_lifetime: u32,

    pub prefix: Ipv6Addr,
}

impl PrefixInformation {
    pub const FLAG_ON_LINK: u8 = 0x80;
    pub const FLAG_AUTONOMOUS: u8 = 0x40;

    pub fn on_link(&self) -> bool {
        self.flags & Self::FLAG_ON_LINK != 0
    }

    pub fn autonomous(&self) -> bool {
        self.flags & Self::FLAG_AUTONOMOUS != 0
    }

    fn parse(payload: &[u8], offset: usize) -> Result<Self, DecodeError> {
        if payload.len() != PREFIX_INFORMATION_PAYLOAD_LEN {
            return Err(DecodeError::MalformedPrefixOption { offset, len: payload.len() });
        }
        let prefix_length = payload[0];
        let flags = payload[1];
        let valid_lifetime = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
        let preferred_lifetime = u32::from_be_bytes([payload[6], payload[7], payload[8], payload[9]]);
        // payload[10..14] is reserved
        let mut prefix = [0u8; 16];
        prefix.copy_from_slice(&payload[14..30]);
        Ok(Self {
            prefix_length,
            flags,
            valid_lifetime,
            preferred_lifetime,
            prefix: Ipv6Addr::from(prefix),
        })
    }

    fn payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(PREFIX_INFORMATION_PAYLOAD_LEN);
        data.push(self.prefix_length);
        data.push(self.flags);
        data.extend_from_slice(&self.valid_lifetime.to_be_bytes());
        data.extend_from_slice(&self.preferred_lifetime.to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&self.prefix.octets());
        data
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum NdpOption {
    /// type 1
    SourceLinkLayerAddress(MacAddr),

    /// type 2
    TargetLinkLayerAddress(MacAddr),

    /// type 3
    PrefixInformation(PrefixInformation),

    /// type 5
    Mtu(u32),

    /// any other type, payload kept as received
    Unknown { option_type: u8, data: Vec<u8> },
}

impl NdpOption {
    pub fn option_type(&self) -> u8 {
        match self {
            NdpOption::SourceLinkLayerAddress(_) => OPTION_SOURCE_LINK_LAYER_ADDRESS,
            NdpOption::TargetLinkLayerAddress(_) => OPTION_TARGET_LINK_LAYER_ADDRESS,
            NdpOption::PrefixInformation(_) => OPTION_PREFIX_INFORMATION,
            NdpOption::Mtu(_) => OPTION_MTU,
            NdpOption::Unknown { option_type, .. } => *option_type,
        }
    }

    /// Encoded length in units of 8 octets, header included.
    /// Saturates at 255 for payloads too large to encode.
    pub fn length_units(&self) -> u8 {
        let units = padded_len(self.payload_len()) / OPTION_UNIT;
        units.min(u8::MAX as usize) as u8
    }

    fn payload_len(&self) -> usize {
        match self {
            NdpOption::SourceLinkLayerAddress(_) | NdpOption::TargetLinkLayerAddress(_) => MacAddr::LEN,
            NdpOption::PrefixInformation(_) => PREFIX_INFORMATION_PAYLOAD_LEN,
            NdpOption::Mtu(_) => MTU_PAYLOAD_LEN,
            NdpOption::Unknown { data, .. } => data.len(),
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            NdpOption::SourceLinkLayerAddress(addr) | NdpOption::TargetLinkLayerAddress(addr) => addr.0.to_vec(),
            NdpOption::PrefixInformation(info) => info.payload(),
            NdpOption::Mtu(mtu) => {
                let mut data = vec![0u8; 2];
                data.extend_from_slice(&mtu.to_be_bytes());
                data
            }
            NdpOption::Unknown { data, .. } => data.clone(),
        }
    }
}

impl std::fmt::Debug for NdpOption {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NdpOption::SourceLinkLayerAddress(addr) => write!(f, "src LL: {}", addr),
            NdpOption::TargetLinkLayerAddress(addr) => write!(f, "tgt LL: {}", addr),
            NdpOption::PrefixInformation(info) => {
                write!(f, "prefix {}/{} flags=", info.prefix, info.prefix_length)?;
                if info.on_link() {
                    write!(f, "L")?;
                }
                if info.autonomous() {
                    write!(f, "A")?;
                }
                write!(f, " valid={} preferred={}", info.valid_lifetime, info.preferred_lifetime)
            }
            NdpOption::Mtu(mtu) => write!(f, "MTU {}", mtu),
            NdpOption::Unknown { option_type, data } => {
                write!(f, "NdpOption({:#02x}) [{}]", option_type, data.len())
            }
        }
    }
}

fn padded_len(payload_len: usize) -> usize {
    let len = OPTION_HEADER_LEN + payload_len;
    len.div_ceil(OPTION_UNIT) * OPTION_UNIT
}

/// Decodes the TLV option sequence that follows an NDP message header.
///
/// The whole buffer must be consumed. A zero or overlong length field stops
/// decoding, since the position of every following option depends on it.
pub fn decode_options(buf: &[u8]) -> Result<Vec<NdpOption>, DecodeError> {
    let mut options = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < OPTION_HEADER_LEN {
            return Err(DecodeError::TrailingGarbage { remaining });
        }

        let option_type = buf[offset];
        let length_units = buf[offset + 1];
        if length_units == 0 {
            return Err(DecodeError::ZeroLengthOption { offset });
        }

        let total_len = length_units as usize * OPTION_UNIT;
        if total_len > remaining {
            return Err(DecodeError::TruncatedOption { offset, needed: total_len, remaining });
        }

        let payload = &buf[(offset + OPTION_HEADER_LEN)..(offset + total_len)];
        let option = match option_type {
            OPTION_SOURCE_LINK_LAYER_ADDRESS | OPTION_TARGET_LINK_LAYER_ADDRESS => {
                // minimum payload is 6 bytes, anything past the address is padding
                let addr = MacAddr::from_slice(payload)
                    .ok_or(DecodeError::TruncatedOption { offset, needed: OPTION_HEADER_LEN + MacAddr::LEN, remaining })?;
                if option_type == OPTION_SOURCE_LINK_LAYER_ADDRESS {
                    NdpOption::SourceLinkLayerAddress(addr)
                } else {
                    NdpOption::TargetLinkLayerAddress(addr)
                }
            }

            OPTION_PREFIX_INFORMATION => {
                NdpOption::PrefixInformation(PrefixInformation::parse(payload, offset)?)
            }

            OPTION_MTU if payload.len() == MTU_PAYLOAD_LEN => {
                NdpOption::Mtu(u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]))
            }

            _ => {
                NdpOption::Unknown { option_type, data: payload.to_vec() }
            }
        };
        options.push(option);
        offset += total_len;
    }
    Ok(options)
}

/// Encodes options, zero-padding each to a multiple of 8 octets.
pub fn encode_options(options: &[NdpOption]) -> Vec<u8> {
    let mut data = Vec::new();
    for option in options {
        let total_len = padded_len(option.payload_len());
        if total_len > MAX_OPTION_LEN {
            log::warn!("skipping oversized NDP option: {:?}", option);
            continue;
        }

        let start = data.len();
        data.push(option.option_type());
        data.push((total_len / OPTION_UNIT) as u8);
        data.extend_from_slice(&option.payload());
        data.resize(start + total_len, 0);
    }
    data
}

pub(crate) fn fmt_option_list(f: &mut std::fmt::Formatter, options: &[NdpOption]) -> std::fmt::Result {
    let mut debug = f.debug_list();
    for option in options {
        debug.entry(&option);
    }
    debug.finish()
}
