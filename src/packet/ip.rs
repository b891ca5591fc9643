//! IPv4, IPv6 and UDP payload builders, plus multicast address
//! derivation helpers.

use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::udp::MutableUdpPacket;
use pnet::packet::MutablePacket;
use pnet::util::MacAddr;

use std::net::{Ipv4Addr, Ipv6Addr};

use packet::ethernet::EthernetPayload;
use packet::{ETH_TYPE_IPV4, ETH_TYPE_IPV6};
use Payload;

/// Trait for anything wishing to be the payload of an IPv4 packet.
pub trait Ipv4Payload: Payload {
    fn protocol(&self) -> u8;
}

/// Trait for anything wishing to be the payload of an IPv6 packet.
pub trait Ipv6Payload: Payload {
    fn next_header(&self) -> u8;
}

/// Builder for IPv4 headers around any `Ipv4Payload`.
pub struct Ipv4Builder<P: Ipv4Payload> {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    tos: u8,
    ttl: u8,
    identification: u16,
    dont_fragment: bool,
    payload: P,
}

impl<P: Ipv4Payload> Ipv4Builder<P> {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, payload: P) -> Self {
        Ipv4Builder {
            src: src,
            dst: dst,
            tos: 0,
            ttl: 64,
            identification: 0,
            dont_fragment: false,
            payload: payload,
        }
    }

    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn identification(mut self, identification: u16) -> Self {
        self.identification = identification;
        self
    }

    pub fn dont_fragment(mut self, df: bool) -> Self {
        self.dont_fragment = df;
        self
    }
}

impl<P: Ipv4Payload> Payload for Ipv4Builder<P> {
    fn len(&self) -> usize {
        MutableIpv4Packet::minimum_packet_size() + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let total_length = buffer.len() as u16;
        {
            let mut pkg = MutableIpv4Packet::new(buffer).unwrap();
            pkg.set_version(4);
            pkg.set_header_length(5);
            pkg.set_dscp(self.tos >> 2);
            pkg.set_ecn(self.tos & 0x3);
            pkg.set_total_length(total_length);
            pkg.set_identification(self.identification);
            pkg.set_flags(if self.dont_fragment { 0b010 } else { 0 });
            pkg.set_fragment_offset(0);
            pkg.set_ttl(self.ttl);
            pkg.set_next_level_protocol(IpNextHeaderProtocol(self.payload.protocol()));
            pkg.set_source(self.src);
            pkg.set_destination(self.dst);
            self.payload.build(pkg.payload_mut());
            let checksum = ipv4::checksum(&pkg.to_immutable());
            pkg.set_checksum(checksum);
        }
    }
}

impl<P: Ipv4Payload> EthernetPayload for Ipv4Builder<P> {
    fn ether_type(&self) -> u16 {
        ETH_TYPE_IPV4
    }
}

/// Builder for IPv6 headers around any `Ipv6Payload`.
pub struct Ipv6Builder<P: Ipv6Payload> {
    src: Ipv6Addr,
    dst: Ipv6Addr,
    traffic_class: u8,
    hop_limit: u8,
    payload: P,
}

impl<P: Ipv6Payload> Ipv6Builder<P> {
    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, payload: P) -> Self {
        Ipv6Builder {
            src: src,
            dst: dst,
            traffic_class: 0,
            hop_limit: 64,
            payload: payload,
        }
    }

    pub fn traffic_class(mut self, tc: u8) -> Self {
        self.traffic_class = tc;
        self
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn src(&self) -> Ipv6Addr {
        self.src
    }

    pub fn dst(&self) -> Ipv6Addr {
        self.dst
    }
}

impl<P: Ipv6Payload> Payload for Ipv6Builder<P> {
    fn len(&self) -> usize {
        MutableIpv6Packet::minimum_packet_size() + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let payload_length = self.payload.len() as u16;
        let mut pkg = MutableIpv6Packet::new(buffer).unwrap();
        pkg.set_version(6);
        pkg.set_traffic_class(self.traffic_class);
        pkg.set_flow_label(0);
        pkg.set_payload_length(payload_length);
        pkg.set_next_header(IpNextHeaderProtocol(self.payload.next_header()));
        pkg.set_hop_limit(self.hop_limit);
        pkg.set_source(self.src);
        pkg.set_destination(self.dst);
        self.payload.build(pkg.payload_mut());
    }
}

impl<P: Ipv6Payload> EthernetPayload for Ipv6Builder<P> {
    fn ether_type(&self) -> u16 {
        ETH_TYPE_IPV6
    }
}

/// Builder for UDP datagrams.
///
/// The checksum is left at zero: stream payloads are rewritten per
/// packet after the template is built, and the embedded record carries
/// its own sequence integrity.
pub struct UdpBuilder<P: Payload> {
    src: u16,
    dst: u16,
    payload: P,
}

impl<P: Payload> UdpBuilder<P> {
    pub fn new(src: u16, dst: u16, payload: P) -> Self {
        UdpBuilder {
            src: src,
            dst: dst,
            payload: payload,
        }
    }
}

impl<P: Payload> Payload for UdpBuilder<P> {
    fn len(&self) -> usize {
        MutableUdpPacket::minimum_packet_size() + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let length = buffer.len() as u16;
        let mut pkg = MutableUdpPacket::new(buffer).unwrap();
        pkg.set_source(self.src);
        pkg.set_destination(self.dst);
        pkg.set_length(length);
        pkg.set_checksum(0);
        self.payload.build(pkg.payload_mut());
    }
}

impl<P: Payload> Ipv4Payload for UdpBuilder<P> {
    fn protocol(&self) -> u8 {
        17
    }
}

impl<P: Payload> Ipv6Payload for UdpBuilder<P> {
    fn next_header(&self) -> u8 {
        17
    }
}

/// Derived destination MAC for an IPv4 multicast group:
/// `01:00:5e` followed by the low 23 bits of the group address.
pub fn ipv4_multicast_mac(group: Ipv4Addr) -> MacAddr {
    let octets = group.octets();
    MacAddr::new(0x01, 0x00, 0x5e, octets[1] & 0x7f, octets[2], octets[3])
}

/// Solicited-node multicast address for neighbor solicitation of
/// `target`: `ff02::1:ffXX:XXXX` with the low 24 bits of the target.
pub fn ipv6_solicited_node_multicast(target: &Ipv6Addr) -> Ipv6Addr {
    let octets = target.octets();
    Ipv6Addr::new(0xff02,
                  0,
                  0,
                  0,
                  0,
                  1,
                  0xff00 | octets[13] as u16,
                  (octets[14] as u16) << 8 | octets[15] as u16)
}

/// Derived destination MAC for an IPv6 multicast address:
/// `33:33` followed by the low 32 bits.
pub fn ipv6_multicast_mac(group: &Ipv6Addr) -> MacAddr {
    let octets = group.octets();
    MacAddr::new(0x33, 0x33, octets[12], octets[13], octets[14], octets[15])
}
