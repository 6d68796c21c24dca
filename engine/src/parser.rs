use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use flowsentry_capture::LinkType;
use thiserror::Error;

use crate::flow::{L3Type, TcpFlags};

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_ICMPV6: u8 = 58;

const ETHERNET_HEADER_LEN: usize = 14;
const NULL_HEADER_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_ARP: u16 = 0x0806;

/// Per-packet decode failures (spec.md §7 "Per-packet decode" kind): the
/// caller logs a warning carrying `(packets_captured, shard_index)` and
/// drops the packet, never propagating past the parser.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short for its declared headers")]
    TooShort,
    #[error("unsupported link type {0}")]
    UnsupportedLinkType(i32),
    #[error("ARP packet")]
    Arp,
    #[error("unknown ethertype 0x{0:x}")]
    UnknownEthertype(u16),
    #[error("malformed L4 header for protocol {0}")]
    MalformedL4(u8),
}

/// The decoded `(l3_type, src/dst addr, l4_protocol, src/dst port, l4
/// payload length, TCP flag subset)` tuple spec.md §4.1 describes, plus a
/// borrow of the raw L3 datagram for the DPI driver to inspect.
pub struct ParsedPacket<'a> {
    pub l3_type: L3Type,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub l4_protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4_len: u32,
    pub tcp_flags: Option<TcpFlags>,
    pub l3_buffer: &'a [u8],
}

/// Decode one captured frame. `link_type` selects the datalink framing;
/// anything other than null-loopback or Ethernet is rejected outright
/// (spec.md §4.1).
pub fn parse(data: &[u8], link_type: LinkType) -> Result<ParsedPacket<'_>, ParseError> {
    match link_type {
        LinkType::NullLoopback => {
            if data.len() < NULL_HEADER_LEN {
                return Err(ParseError::TooShort);
            }
            let family = u32::from_ne_bytes(data[0..4].try_into().unwrap());
            let kind = if family == 2 { L3Type::Ipv4 } else { L3Type::Ipv6 };
            parse_l3(&data[NULL_HEADER_LEN..], kind)
        }
        LinkType::Ethernet => {
            if data.len() < ETHERNET_HEADER_LEN {
                return Err(ParseError::TooShort);
            }
            let ethertype = u16::from_be_bytes([data[12], data[13]]);
            match ethertype {
                ETHERTYPE_IPV4 => parse_l3(&data[ETHERNET_HEADER_LEN..], L3Type::Ipv4),
                ETHERTYPE_IPV6 => parse_l3(&data[ETHERNET_HEADER_LEN..], L3Type::Ipv6),
                ETHERTYPE_ARP => Err(ParseError::Arp),
                other => Err(ParseError::UnknownEthertype(other)),
            }
        }
        LinkType::Other(dl) => Err(ParseError::UnsupportedLinkType(dl)),
    }
}

fn parse_l3(l3: &[u8], kind: L3Type) -> Result<ParsedPacket<'_>, ParseError> {
    match kind {
        L3Type::Ipv4 => parse_ipv4(l3),
        L3Type::Ipv6 => parse_ipv6(l3),
    }
}

fn parse_ipv4(l3: &[u8]) -> Result<ParsedPacket<'_>, ParseError> {
    if l3.len() < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::TooShort);
    }
    let ihl = ((l3[0] & 0x0F) as usize) * 4;
    if ihl < IPV4_MIN_HEADER_LEN || l3.len() < ihl {
        return Err(ParseError::TooShort);
    }
    let protocol = l3[9];
    let src = Ipv4Addr::new(l3[12], l3[13], l3[14], l3[15]);
    let dst = Ipv4Addr::new(l3[16], l3[17], l3[18], l3[19]);
    let total_len = u16::from_be_bytes([l3[2], l3[3]]) as usize;
    let l3_end = total_len.clamp(ihl, l3.len());
    let l4 = &l3[ihl..l3_end];

    let (src_port, dst_port, l4_len, tcp_flags) = parse_l4(protocol, l4)?;

    Ok(ParsedPacket {
        l3_type: L3Type::Ipv4,
        src_addr: IpAddr::V4(src),
        dst_addr: IpAddr::V4(dst),
        l4_protocol: protocol,
        src_port,
        dst_port,
        l4_len,
        tcp_flags,
        l3_buffer: &l3[..l3_end],
    })
}

fn parse_ipv6(l3: &[u8]) -> Result<ParsedPacket<'_>, ParseError> {
    if l3.len() < IPV6_HEADER_LEN {
        return Err(ParseError::TooShort);
    }
    let next_header = l3[6];
    let payload_len = u16::from_be_bytes([l3[4], l3[5]]) as usize;
    let src = Ipv6Addr::from(<[u8; 16]>::try_from(&l3[8..24]).unwrap());
    let dst = Ipv6Addr::from(<[u8; 16]>::try_from(&l3[24..40]).unwrap());
    let l3_end = (IPV6_HEADER_LEN + payload_len).clamp(IPV6_HEADER_LEN, l3.len());
    let l4 = &l3[IPV6_HEADER_LEN..l3_end];

    let (src_port, dst_port, l4_len, tcp_flags) = parse_l4(next_header, l4)?;

    Ok(ParsedPacket {
        l3_type: L3Type::Ipv6,
        src_addr: IpAddr::V6(src),
        dst_addr: IpAddr::V6(dst),
        l4_protocol: next_header,
        src_port,
        dst_port,
        l4_len,
        tcp_flags,
        l3_buffer: &l3[..l3_end],
    })
}

/// Reads ports (and, for TCP, the flag subset spec.md §4.1 wants) from the
/// L4 header. Other protocols (ICMP, ICMPv6, hop-by-hop, ...) are accepted
/// with ports left at zero, per spec.md §4.1.
fn parse_l4(protocol: u8, l4: &[u8]) -> Result<(u16, u16, u32, Option<TcpFlags>), ParseError> {
    match protocol {
        IPPROTO_TCP => {
            if l4.len() < TCP_MIN_HEADER_LEN {
                return Err(ParseError::MalformedL4(protocol));
            }
            let data_offset = ((l4[12] >> 4) as usize) * 4;
            if data_offset < TCP_MIN_HEADER_LEN || l4.len() < data_offset {
                return Err(ParseError::MalformedL4(protocol));
            }
            let src_port = u16::from_be_bytes([l4[0], l4[1]]);
            let dst_port = u16::from_be_bytes([l4[2], l4[3]]);
            let flags_byte = l4[13];
            let flags = TcpFlags {
                fin: flags_byte & 0x01 != 0,
                syn: flags_byte & 0x02 != 0,
                ack: flags_byte & 0x10 != 0,
            };
            let payload_len = (l4.len() - data_offset) as u32;
            Ok((src_port, dst_port, payload_len, Some(flags)))
        }
        IPPROTO_UDP => {
            if l4.len() < UDP_HEADER_LEN {
                return Err(ParseError::MalformedL4(protocol));
            }
            let src_port = u16::from_be_bytes([l4[0], l4[1]]);
            let dst_port = u16::from_be_bytes([l4[2], l4[3]]);
            let payload_len = (l4.len() - UDP_HEADER_LEN) as u32;
            Ok((src_port, dst_port, payload_len, None))
        }
        _ => Ok((0, 0, l4.len() as u32, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_v4_packet(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut eth = vec![0u8; 14];
        eth[12] = 0x08;
        eth[13] = 0x00;

        let udp_len = 8 + payload.len();
        let total_len = 20 + udp_len;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[9] = IPPROTO_UDP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&src_port.to_be_bytes());
        udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());

        let mut out = eth;
        out.extend_from_slice(&ip);
        out.extend_from_slice(&udp);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn decodes_udp_v4_over_ethernet() {
        let payload = vec![0xAB; 40];
        let frame = udp_v4_packet(1000, 53, &payload);
        let parsed = parse(&frame, LinkType::Ethernet).unwrap();
        assert_eq!(parsed.l3_type, L3Type::Ipv4);
        assert_eq!(parsed.src_port, 1000);
        assert_eq!(parsed.dst_port, 53);
        assert_eq!(parsed.l4_len, 40);
        assert!(parsed.tcp_flags.is_none());
    }

    #[test]
    fn rejects_arp() {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x06;
        assert!(matches!(parse(&frame, LinkType::Ethernet), Err(ParseError::Arp)));
    }

    #[test]
    fn rejects_short_ethernet_frame() {
        let frame = vec![0u8; 10];
        assert!(matches!(parse(&frame, LinkType::Ethernet), Err(ParseError::TooShort)));
    }

    #[test]
    fn tcp_fin_ack_sets_both_flags() {
        let mut eth = vec![0u8; 14];
        eth[12] = 0x08;
        eth[13] = 0x00;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = IPPROTO_TCP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&1000u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = 0x01 | 0x10; // FIN | ACK
        ip[2..4].copy_from_slice(&(20u16 + 20).to_be_bytes());

        let mut frame = eth;
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&tcp);

        let parsed = parse(&frame, LinkType::Ethernet).unwrap();
        let flags = parsed.tcp_flags.unwrap();
        assert!(flags.fin);
        assert!(flags.ack);
        assert!(!flags.syn);
    }
}
