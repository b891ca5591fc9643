//! ICMP and ICMPv6 builders for the control-plane replies a network
//! interface produces itself: echo reflection and neighbor discovery.

use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::{icmp, icmpv6};
use pnet::util::MacAddr;

use std::net::Ipv6Addr;

use packet::ip::{Ipv4Payload, Ipv6Payload};
use packet::{ICMPV6_TYPE_ECHO_REPLY, ICMPV6_TYPE_ECHO_REQUEST,
             ICMPV6_TYPE_NEIGHBOR_ADVERTISEMENT, ICMPV6_TYPE_NEIGHBOR_SOLICITATION,
             ICMP_TYPE_ECHO_REPLY};
use Payload;

/// Reflects a received echo request: the entire ICMP message is
/// copied, only the type changes and the checksum is recomputed, so
/// identifier, sequence number and payload survive untouched.
pub struct IcmpEchoReplyBuilder<'a> {
    message: &'a [u8],
}

impl<'a> IcmpEchoReplyBuilder<'a> {
    pub fn new(message: &'a [u8]) -> Self {
        IcmpEchoReplyBuilder { message: message }
    }
}

impl<'a> Payload for IcmpEchoReplyBuilder<'a> {
    fn len(&self) -> usize {
        self.message.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        buffer.copy_from_slice(self.message);
        buffer[0] = ICMP_TYPE_ECHO_REPLY;
        buffer[2] = 0;
        buffer[3] = 0;
        let checksum = icmp::checksum(&IcmpPacket::new(buffer).unwrap());
        buffer[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
}

impl<'a> Ipv4Payload for IcmpEchoReplyBuilder<'a> {
    fn protocol(&self) -> u8 {
        1
    }
}

pub enum Icmpv6Message<'a> {
    /// Who-has for `target`, with our MAC as source link-layer option.
    NeighborSolicitation {
        target: Ipv6Addr,
        source_mac: MacAddr,
    },
    /// Answer to a solicitation for `target`, carrying our MAC as the
    /// target link-layer option.
    NeighborAdvertisement {
        target: Ipv6Addr,
        mac: MacAddr,
    },
    /// Reflected echo request, identifier/sequence/payload untouched.
    EchoReply { message: &'a [u8] },
    EchoRequest {
        identifier: u16,
        sequence: u16,
    },
}

/// ICMPv6 builder. Source and destination address are needed up front
/// because the checksum covers the IPv6 pseudo header.
pub struct Icmpv6Builder<'a> {
    src: Ipv6Addr,
    dst: Ipv6Addr,
    message: Icmpv6Message<'a>,
}

impl<'a> Icmpv6Builder<'a> {
    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, message: Icmpv6Message<'a>) -> Self {
        Icmpv6Builder {
            src: src,
            dst: dst,
            message: message,
        }
    }
}

impl<'a> Payload for Icmpv6Builder<'a> {
    fn len(&self) -> usize {
        match self.message {
            // type/code/checksum + reserved + target + lladdr option
            Icmpv6Message::NeighborSolicitation { .. } |
            Icmpv6Message::NeighborAdvertisement { .. } => 4 + 4 + 16 + 8,
            Icmpv6Message::EchoReply { message } => message.len(),
            Icmpv6Message::EchoRequest { .. } => 8,
        }
    }

    fn build(&mut self, buffer: &mut [u8]) {
        match self.message {
            Icmpv6Message::NeighborSolicitation { ref target, ref source_mac } => {
                for byte in buffer.iter_mut() {
                    *byte = 0;
                }
                buffer[0] = ICMPV6_TYPE_NEIGHBOR_SOLICITATION;
                buffer[8..24].copy_from_slice(&target.octets());
                buffer[24] = 1; // source link-layer address
                buffer[25] = 1;
                buffer[26..32].copy_from_slice(&source_mac.octets());
            }
            Icmpv6Message::NeighborAdvertisement { ref target, ref mac } => {
                for byte in buffer.iter_mut() {
                    *byte = 0;
                }
                buffer[0] = ICMPV6_TYPE_NEIGHBOR_ADVERTISEMENT;
                buffer[8..24].copy_from_slice(&target.octets());
                buffer[24] = 2; // target link-layer address
                buffer[25] = 1;
                buffer[26..32].copy_from_slice(&mac.octets());
            }
            Icmpv6Message::EchoReply { message } => {
                buffer.copy_from_slice(message);
                buffer[0] = ICMPV6_TYPE_ECHO_REPLY;
                buffer[2] = 0;
                buffer[3] = 0;
            }
            Icmpv6Message::EchoRequest { identifier, sequence } => {
                for byte in buffer.iter_mut() {
                    *byte = 0;
                }
                buffer[0] = ICMPV6_TYPE_ECHO_REQUEST;
                buffer[4..6].copy_from_slice(&identifier.to_be_bytes());
                buffer[6..8].copy_from_slice(&sequence.to_be_bytes());
            }
        }
        let checksum = icmpv6::checksum(&Icmpv6Packet::new(buffer).unwrap(),
                                        &self.src,
                                        &self.dst);
        buffer[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
}

impl<'a> Ipv6Payload for Icmpv6Builder<'a> {
    fn next_header(&self) -> u8 {
        58
    }
}
