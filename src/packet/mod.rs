//! Packet codec.
//!
//! Decoding turns a received frame into a borrowed, layered view
//! (`EthernetFrame`) over the original bytes; nothing is allocated and
//! nothing is copied. The result taxonomy matters: `UnknownProtocol`
//! is a well-formed frame the emulator does not care about (counted,
//! not an error), `Malformed` is a truncated or self-inconsistent
//! frame (counted as protocol error).
//!
//! Encoding goes the other way through nested `Payload` builders, one
//! per layer, writing into a caller-provided buffer. See the `bbl`,
//! `ethernet`, `ip`, `arp`, `icmp` and `pppoe` submodules.

use pnet::packet::arp::ArpPacket;
use pnet::packet::ipv4::{self, Ipv4Packet};
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::udp::UdpPacket;
use pnet::util::MacAddr;

use std::net::{Ipv4Addr, Ipv6Addr};

use timer::Timestamp;
use {DecodeError, DecodeResult};

pub mod arp;
pub mod bbl;
pub mod ethernet;
pub mod icmp;
pub mod ip;
pub mod pppoe;

pub use self::arp::ArpBuilder;
pub use self::bbl::{BblDirection, BblHeader, BblPayload, BblSubType, BblType};
pub use self::ethernet::{EthernetBuilder, EthernetPayload};
pub use self::icmp::{IcmpEchoReplyBuilder, Icmpv6Builder, Icmpv6Message};
pub use self::ip::{ipv4_multicast_mac, Ipv4Builder, Ipv4Payload, Ipv6Builder, Ipv6Payload,
                   UdpBuilder};
pub use self::pppoe::{L2tpDataBuilder, PppPayload, PppoeSessionBuilder};

pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_VLAN: u16 = 0x8100;
pub const ETH_TYPE_QINQ: u16 = 0x88a8;
pub const ETH_TYPE_IPV6: u16 = 0x86dd;
pub const ETH_TYPE_MPLS: u16 = 0x8847;
pub const ETH_TYPE_PPPOE_DISCOVERY: u16 = 0x8863;
pub const ETH_TYPE_PPPOE_SESSION: u16 = 0x8864;

pub const PPP_PROTOCOL_IPV4: u16 = 0x0021;
pub const PPP_PROTOCOL_IPV6: u16 = 0x0057;

/// LLC DSAP/SSAP value carried by IS-IS over 802.3 framing.
pub const ISIS_LLC_SAP: u8 = 0xfe;

pub const VLAN_ID_MAX: u16 = 4095;

/// One entry of an MPLS label stack.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MplsLabel {
    pub label: u32,
    pub exp: u8,
    pub ttl: u8,
}

/// Up to two parsed labels of a label stack. Deeper stacks are walked
/// to the bottom but only the first two entries are recorded, which is
/// all the flow verifier compares against.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MplsStack {
    labels: [MplsLabel; 2],
    depth: u8,
}

impl MplsStack {
    pub fn push(&mut self, label: MplsLabel) {
        if (self.depth as usize) < self.labels.len() {
            self.labels[self.depth as usize] = label;
        }
        self.depth += 1;
    }

    pub fn outer(&self) -> Option<&MplsLabel> {
        if self.depth > 0 {
            Some(&self.labels[0])
        } else {
            None
        }
    }

    pub fn inner(&self) -> Option<&MplsLabel> {
        if self.depth > 1 {
            Some(&self.labels[1])
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }
}

/// Borrowed layered view of one decoded frame. The RX timestamp is
/// attached by the I/O layer after decoding.
pub struct EthernetFrame<'p> {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub qinq: bool,
    pub vlan_outer: u16,
    pub vlan_outer_priority: u8,
    pub vlan_inner: u16,
    pub vlan_inner_priority: u8,
    pub vlan_three: u16,
    pub mpls: MplsStack,
    /// Total frame length on the wire.
    pub length: usize,
    pub timestamp: Timestamp,
    /// TOS / traffic class lifted out of the innermost IP header.
    pub tos: u8,
    /// Present when the frame carries the embedded test payload, at
    /// whatever encapsulation depth it was found.
    pub bbl: Option<BblHeader>,
    pub payload: L3<'p>,
}

pub enum L3<'p> {
    Arp(ArpFields),
    Ipv4(Ipv4Fields<'p>),
    Ipv6(Ipv6Fields<'p>),
    PppoeSession(PppoeSessionFields<'p>),
    PppoeDiscovery(&'p [u8]),
    Isis(&'p [u8]),
}

pub struct ArpFields {
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

pub const ARP_REQUEST: u16 = 1;
pub const ARP_REPLY: u16 = 2;

pub struct Ipv4Fields<'p> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tos: u8,
    pub ttl: u8,
    pub payload: L4<'p>,
}

pub struct Ipv6Fields<'p> {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub traffic_class: u8,
    pub hop_limit: u8,
    pub payload: L4<'p>,
}

pub enum L4<'p> {
    Udp(UdpFields<'p>),
    Icmp(IcmpFields<'p>),
    Icmpv6(Icmpv6Fields<'p>),
    Tcp(&'p [u8]),
    Other(u8, &'p [u8]),
}

pub struct UdpFields<'p> {
    pub src: u16,
    pub dst: u16,
    pub payload: UdpPayload<'p>,
}

pub enum UdpPayload<'p> {
    Bbl(BblHeader),
    L2tp(L2tpFields<'p>),
    QmxLi(&'p [u8]),
    Dhcp(&'p [u8]),
    Dhcpv6(&'p [u8]),
    Unknown(&'p [u8]),
}

pub struct L2tpFields<'p> {
    pub control: bool,
    pub tunnel_id: u16,
    pub session_id: u16,
    /// PPP protocol of the tunnelled frame, zero for control messages.
    pub ppp_protocol: u16,
    pub payload: &'p [u8],
}

pub struct IcmpFields<'p> {
    pub icmp_type: u8,
    pub icmp_code: u8,
    /// The complete ICMP message including its header, for in-place
    /// reflection of echo requests.
    pub message: &'p [u8],
}

pub struct Icmpv6Fields<'p> {
    pub icmpv6_type: u8,
    pub icmpv6_code: u8,
    /// Target address of neighbor solicitations/advertisements.
    pub target: Option<Ipv6Addr>,
    pub message: &'p [u8],
}

pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;

pub const ICMPV6_TYPE_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_TYPE_ECHO_REPLY: u8 = 129;
pub const ICMPV6_TYPE_ROUTER_SOLICITATION: u8 = 133;
pub const ICMPV6_TYPE_ROUTER_ADVERTISEMENT: u8 = 134;
pub const ICMPV6_TYPE_NEIGHBOR_SOLICITATION: u8 = 135;
pub const ICMPV6_TYPE_NEIGHBOR_ADVERTISEMENT: u8 = 136;

impl<'p> EthernetFrame<'p> {
    /// Restores the outer VLAN tag the kernel stripped on receive:
    /// the decoded outer tag (if any) shifts inward, the stripped TCI
    /// becomes the outer tag again.
    pub fn restore_vlan(&mut self, vlan_tci: u16, vlan_tpid: u16) {
        let vlan = vlan_tci & VLAN_ID_MAX;
        if vlan != 0 && self.vlan_outer != vlan {
            self.vlan_inner = self.vlan_outer;
            self.vlan_inner_priority = self.vlan_outer_priority;
            self.vlan_outer = vlan;
            self.vlan_outer_priority = (vlan_tci >> 13) as u8;
            if vlan_tpid == ETH_TYPE_QINQ {
                self.qinq = true;
            }
        }
    }

    /// The IPv4 view of this frame, if it is one.
    pub fn ipv4(&self) -> Option<&Ipv4Fields<'p>> {
        match self.payload {
            L3::Ipv4(ref fields) => Some(fields),
            _ => None,
        }
    }

    pub fn ipv6(&self) -> Option<&Ipv6Fields<'p>> {
        match self.payload {
            L3::Ipv6(ref fields) => Some(fields),
            _ => None,
        }
    }
}

fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    (data[offset] as u16) << 8 | data[offset + 1] as u16
}

/// Decodes one frame into a layered view over `data`.
///
/// `data` must start at the Ethernet header. VLAN tags stripped by the
/// kernel are restored by the I/O layer before this is called.
pub fn decode_ethernet<'p>(data: &'p [u8]) -> DecodeResult<EthernetFrame<'p>> {
    if data.len() < 14 {
        return Err(DecodeError::Malformed);
    }
    let dst = MacAddr::new(data[0], data[1], data[2], data[3], data[4], data[5]);
    let src = MacAddr::new(data[6], data[7], data[8], data[9], data[10], data[11]);

    let mut frame = EthernetFrame {
        dst: dst,
        src: src,
        qinq: false,
        vlan_outer: 0,
        vlan_outer_priority: 0,
        vlan_inner: 0,
        vlan_inner_priority: 0,
        vlan_three: 0,
        mpls: MplsStack::default(),
        length: data.len(),
        timestamp: Timestamp::default(),
        tos: 0,
        bbl: None,
        payload: L3::Isis(&[]),
    };

    let mut offset = 12;
    let mut ether_type = read_u16_be(data, offset);
    offset += 2;

    // Up to three VLAN tags, QinQ on the outermost.
    let mut vlans = 0;
    while ether_type == ETH_TYPE_VLAN || ether_type == ETH_TYPE_QINQ {
        if data.len() < offset + 4 {
            return Err(DecodeError::Malformed);
        }
        if ether_type == ETH_TYPE_QINQ {
            if vlans != 0 {
                return Err(DecodeError::Malformed);
            }
            frame.qinq = true;
        }
        let tci = read_u16_be(data, offset);
        let id = tci & VLAN_ID_MAX;
        let priority = (tci >> 13) as u8;
        match vlans {
            0 => {
                frame.vlan_outer = id;
                frame.vlan_outer_priority = priority;
            }
            1 => {
                frame.vlan_inner = id;
                frame.vlan_inner_priority = priority;
            }
            2 => frame.vlan_three = id,
            _ => return Err(DecodeError::Malformed),
        }
        vlans += 1;
        ether_type = read_u16_be(data, offset + 2);
        offset += 4;
    }

    // 802.3 length field: the only LLC payload of interest is IS-IS.
    if ether_type < 0x0600 {
        if data.len() < offset + 3 {
            return Err(DecodeError::Malformed);
        }
        if data[offset] == ISIS_LLC_SAP && data[offset + 1] == ISIS_LLC_SAP {
            frame.payload = L3::Isis(&data[offset + 3..]);
            return Ok(frame);
        }
        return Err(DecodeError::UnknownProtocol);
    }

    if ether_type == ETH_TYPE_MPLS {
        loop {
            if data.len() < offset + 4 {
                return Err(DecodeError::Malformed);
            }
            let entry = (data[offset] as u32) << 24 | (data[offset + 1] as u32) << 16 |
                        (data[offset + 2] as u32) << 8 |
                        data[offset + 3] as u32;
            frame.mpls.push(MplsLabel {
                label: entry >> 12,
                exp: ((entry >> 9) & 0x7) as u8,
                ttl: (entry & 0xff) as u8,
            });
            offset += 4;
            if entry & 0x100 != 0 {
                break;
            }
        }
        // Peek the version nibble to find the payload protocol.
        if data.len() <= offset {
            return Err(DecodeError::Malformed);
        }
        ether_type = match data[offset] >> 4 {
            4 => ETH_TYPE_IPV4,
            6 => ETH_TYPE_IPV6,
            _ => return Err(DecodeError::UnknownProtocol),
        };
    }

    let payload = &data[offset..];
    frame.payload = match ether_type {
        ETH_TYPE_ARP => L3::Arp(decode_arp(payload)?),
        ETH_TYPE_IPV4 => {
            let fields = decode_ipv4(payload, &mut frame.bbl)?;
            frame.tos = fields.tos;
            L3::Ipv4(fields)
        }
        ETH_TYPE_IPV6 => {
            let fields = decode_ipv6(payload, &mut frame.bbl)?;
            frame.tos = fields.traffic_class;
            L3::Ipv6(fields)
        }
        ETH_TYPE_PPPOE_SESSION => {
            let fields = decode_pppoe_session(payload, &mut frame.tos, &mut frame.bbl)?;
            L3::PppoeSession(fields)
        }
        ETH_TYPE_PPPOE_DISCOVERY => L3::PppoeDiscovery(payload),
        0xfefe => L3::Isis(payload),
        _ => return Err(DecodeError::UnknownProtocol),
    };
    Ok(frame)
}

fn decode_arp(data: &[u8]) -> DecodeResult<ArpFields> {
    let pkg = ArpPacket::new(data).ok_or(DecodeError::Malformed)?;
    if pkg.get_hw_addr_len() != 6 || pkg.get_proto_addr_len() != 4 {
        return Err(DecodeError::Malformed);
    }
    Ok(ArpFields {
        operation: pkg.get_operation().0,
        sender_mac: pkg.get_sender_hw_addr(),
        sender_ip: pkg.get_sender_proto_addr(),
        target_mac: pkg.get_target_hw_addr(),
        target_ip: pkg.get_target_proto_addr(),
    })
}

fn decode_ipv4<'p>(data: &'p [u8], bbl: &mut Option<BblHeader>) -> DecodeResult<Ipv4Fields<'p>> {
    if data.len() < Ipv4Packet::minimum_packet_size() {
        return Err(DecodeError::Malformed);
    }
    let pkg = Ipv4Packet::new(data).ok_or(DecodeError::Malformed)?;
    if pkg.get_version() != 4 {
        return Err(DecodeError::Malformed);
    }
    let header_len = pkg.get_header_length() as usize * 4;
    let total_len = pkg.get_total_length() as usize;
    if header_len < Ipv4Packet::minimum_packet_size() || total_len < header_len ||
       total_len > data.len() {
        return Err(DecodeError::Malformed);
    }
    if pkg.get_checksum() != ipv4::checksum(&pkg) {
        return Err(DecodeError::Malformed);
    }
    let l4_data = &data[header_len..total_len];
    let protocol = pkg.get_next_level_protocol().0;
    Ok(Ipv4Fields {
        src: pkg.get_source(),
        dst: pkg.get_destination(),
        tos: pkg.get_dscp() << 2 | pkg.get_ecn(),
        ttl: pkg.get_ttl(),
        payload: decode_l4(protocol, l4_data, bbl)?,
    })
}

fn decode_ipv6<'p>(data: &'p [u8], bbl: &mut Option<BblHeader>) -> DecodeResult<Ipv6Fields<'p>> {
    if data.len() < Ipv6Packet::minimum_packet_size() {
        return Err(DecodeError::Malformed);
    }
    let pkg = Ipv6Packet::new(data).ok_or(DecodeError::Malformed)?;
    if pkg.get_version() != 6 {
        return Err(DecodeError::Malformed);
    }
    let payload_len = pkg.get_payload_length() as usize;
    if 40 + payload_len > data.len() {
        return Err(DecodeError::Malformed);
    }
    let l4_data = &data[40..40 + payload_len];
    let protocol = pkg.get_next_header().0;
    Ok(Ipv6Fields {
        src: pkg.get_source(),
        dst: pkg.get_destination(),
        traffic_class: pkg.get_traffic_class(),
        hop_limit: pkg.get_hop_limit(),
        payload: decode_l4(protocol, l4_data, bbl)?,
    })
}

fn decode_l4<'p>(protocol: u8,
                 data: &'p [u8],
                 bbl: &mut Option<BblHeader>)
                 -> DecodeResult<L4<'p>> {
    match protocol {
        // UDP
        17 => {
            let pkg = UdpPacket::new(data).ok_or(DecodeError::Malformed)?;
            let src = pkg.get_source();
            let dst = pkg.get_destination();
            let udp_len = pkg.get_length() as usize;
            if udp_len < 8 || udp_len > data.len() {
                return Err(DecodeError::Malformed);
            }
            let payload = &data[8..udp_len];
            Ok(L4::Udp(UdpFields {
                src: src,
                dst: dst,
                payload: decode_udp_payload(src, dst, payload, bbl)?,
            }))
        }
        // ICMP
        1 => {
            if data.len() < 8 {
                return Err(DecodeError::Malformed);
            }
            Ok(L4::Icmp(IcmpFields {
                icmp_type: data[0],
                icmp_code: data[1],
                message: data,
            }))
        }
        // ICMPv6
        58 => {
            if data.len() < 4 {
                return Err(DecodeError::Malformed);
            }
            let icmpv6_type = data[0];
            let target = match icmpv6_type {
                ICMPV6_TYPE_NEIGHBOR_SOLICITATION | ICMPV6_TYPE_NEIGHBOR_ADVERTISEMENT => {
                    if data.len() < 24 {
                        return Err(DecodeError::Malformed);
                    }
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&data[8..24]);
                    Some(Ipv6Addr::from(octets))
                }
                _ => None,
            };
            Ok(L4::Icmpv6(Icmpv6Fields {
                icmpv6_type: icmpv6_type,
                icmpv6_code: data[1],
                target: target,
                message: data,
            }))
        }
        // TCP
        6 => {
            if data.len() < 20 {
                return Err(DecodeError::Malformed);
            }
            Ok(L4::Tcp(data))
        }
        other => Ok(L4::Other(other, data)),
    }
}

fn decode_udp_payload<'p>(src: u16,
                          dst: u16,
                          data: &'p [u8],
                          bbl: &mut Option<BblHeader>)
                          -> DecodeResult<UdpPayload<'p>> {
    if dst == ::BBL_UDP_PORT || src == ::BBL_UDP_PORT {
        let header = bbl::BblHeader::decode(data)?;
        *bbl = Some(header);
        return Ok(UdpPayload::Bbl(header));
    }
    if dst == ::L2TP_UDP_PORT || src == ::L2TP_UDP_PORT {
        return decode_l2tp(data, bbl);
    }
    if dst == ::QMX_LI_UDP_PORT {
        return Ok(UdpPayload::QmxLi(data));
    }
    match dst {
        67 | 68 => Ok(UdpPayload::Dhcp(data)),
        546 | 547 => Ok(UdpPayload::Dhcpv6(data)),
        _ => Ok(UdpPayload::Unknown(data)),
    }
}

fn decode_l2tp<'p>(data: &'p [u8],
                   bbl: &mut Option<BblHeader>)
                   -> DecodeResult<UdpPayload<'p>> {
    if data.len() < 6 {
        return Err(DecodeError::Malformed);
    }
    let flags = read_u16_be(data, 0);
    if flags & 0x000f != 2 {
        // Only L2TPv2 is understood.
        return Err(DecodeError::UnknownProtocol);
    }
    let control = flags & 0x8000 != 0;
    let mut offset = 2;
    let mut remaining_check = data.len();
    if flags & 0x4000 != 0 {
        // Length field present.
        if data.len() < offset + 2 {
            return Err(DecodeError::Malformed);
        }
        let length = read_u16_be(data, offset) as usize;
        if length > data.len() {
            return Err(DecodeError::Malformed);
        }
        remaining_check = length;
        offset += 2;
    }
    if data.len() < offset + 4 {
        return Err(DecodeError::Malformed);
    }
    let tunnel_id = read_u16_be(data, offset);
    let session_id = read_u16_be(data, offset + 2);
    offset += 4;
    if flags & 0x0800 != 0 {
        // Ns/Nr present.
        offset += 4;
    }
    if flags & 0x0200 != 0 {
        // Offset size present, skip it plus the pad it names.
        if data.len() < offset + 2 {
            return Err(DecodeError::Malformed);
        }
        offset += 2 + read_u16_be(data, offset) as usize;
    }
    if offset > remaining_check || data.len() < offset {
        return Err(DecodeError::Malformed);
    }

    let mut ppp_protocol = 0;
    let mut payload = &data[offset..remaining_check.min(data.len())];
    if !control {
        if payload.len() >= 2 && payload[0] == 0xff && payload[1] == 0x03 {
            // HDLC address/control framing, optional on the wire.
            payload = &payload[2..];
        }
        if payload.len() < 2 {
            return Err(DecodeError::Malformed);
        }
        ppp_protocol = read_u16_be(payload, 0);
        payload = &payload[2..];
        // Tunnelled test traffic is measured like native traffic.
        if ppp_protocol == PPP_PROTOCOL_IPV4 {
            let mut inner_bbl = None;
            if decode_ipv4(payload, &mut inner_bbl).is_ok() {
                if inner_bbl.is_some() {
                    *bbl = inner_bbl;
                }
            }
        }
    }
    Ok(UdpPayload::L2tp(L2tpFields {
        control: control,
        tunnel_id: tunnel_id,
        session_id: session_id,
        ppp_protocol: ppp_protocol,
        payload: payload,
    }))
}

fn decode_pppoe_session<'p>(data: &'p [u8],
                            tos: &mut u8,
                            bbl: &mut Option<BblHeader>)
                            -> DecodeResult<PppoeSessionFields<'p>> {
    if data.len() < 8 {
        return Err(DecodeError::Malformed);
    }
    if data[0] != 0x11 || data[1] != 0x00 {
        return Err(DecodeError::Malformed);
    }
    let session_id = read_u16_be(data, 2);
    let length = read_u16_be(data, 4) as usize;
    if length < 2 || 6 + length > data.len() {
        return Err(DecodeError::Malformed);
    }
    let ppp_protocol = read_u16_be(data, 6);
    let payload = &data[8..6 + length];
    let ppp = match ppp_protocol {
        PPP_PROTOCOL_IPV4 => {
            let fields = decode_ipv4(payload, bbl)?;
            *tos = fields.tos;
            PppPayloadFields::Ipv4(fields)
        }
        PPP_PROTOCOL_IPV6 => {
            let fields = decode_ipv6(payload, bbl)?;
            *tos = fields.traffic_class;
            PppPayloadFields::Ipv6(fields)
        }
        other => PppPayloadFields::Other(other, payload),
    };
    Ok(PppoeSessionFields {
        session_id: session_id,
        ppp_protocol: ppp_protocol,
        payload: ppp,
    })
}

pub struct PppoeSessionFields<'p> {
    pub session_id: u16,
    pub ppp_protocol: u16,
    pub payload: PppPayloadFields<'p>,
}

pub enum PppPayloadFields<'p> {
    Ipv4(Ipv4Fields<'p>),
    Ipv6(Ipv6Fields<'p>),
    /// LCP, IPCP, IP6CP and friends, handled by the PPP engine.
    Other(u16, &'p [u8]),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_frame_is_malformed() {
        assert_eq!(decode_ethernet(&[0; 10]).err(),
                   Some(::DecodeError::Malformed));
    }

    #[test]
    fn unhandled_ether_type_is_unknown() {
        let mut frame = vec![0u8; 60];
        frame[12] = 0x88;
        frame[13] = 0xcc; // LLDP
        assert_eq!(decode_ethernet(&frame).err(),
                   Some(::DecodeError::UnknownProtocol));
    }

    #[test]
    fn vlan_tags_are_unwrapped() {
        let mut frame = vec![0u8; 64];
        frame[12] = 0x81;
        frame[13] = 0x00;
        // pcp 5, vid 7
        frame[14] = 0xa0;
        frame[15] = 0x07;
        frame[16] = 0x88;
        frame[17] = 0xcc;
        match decode_ethernet(&frame) {
            Err(::DecodeError::UnknownProtocol) => {}
            _ => panic!("expected unknown protocol below the tag"),
        }
        // Same frame with an ARP payload parses and keeps the tag.
        frame[16] = 0x08;
        frame[17] = 0x06;
        frame[18] = 0x00;
        frame[19] = 0x01; // hardware type ethernet
        frame[20] = 0x08;
        frame[21] = 0x00;
        frame[22] = 6;
        frame[23] = 4;
        frame[25] = 0x01; // request
        let decoded = decode_ethernet(&frame).unwrap();
        assert_eq!(decoded.vlan_outer, 7);
        assert_eq!(decoded.vlan_outer_priority, 5);
        match decoded.payload {
            L3::Arp(ref arp) => assert_eq!(arp.operation, ARP_REQUEST),
            _ => panic!("expected arp"),
        }
    }
}
