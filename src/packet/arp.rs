//! ARP request/reply builder.

use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket,
                        MutableArpPacket};
use pnet::packet::ethernet::EtherTypes;
use pnet::util::MacAddr;

use std::net::Ipv4Addr;

use packet::ethernet::EthernetPayload;
use packet::ETH_TYPE_ARP;
use Payload;

pub struct ArpBuilder {
    operation: ArpOperation,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
}

impl ArpBuilder {
    /// Constructs a new `ArpBuilder` for an Ethernet/IPv4 request.
    pub fn new_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpBuilder {
            operation: ArpOperations::Request,
            sender_mac: sender_mac,
            sender_ip: sender_ip,
            target_mac: MacAddr::zero(),
            target_ip: target_ip,
        }
    }

    pub fn new_reply(sender_mac: MacAddr,
                     sender_ip: Ipv4Addr,
                     target_mac: MacAddr,
                     target_ip: Ipv4Addr)
                     -> Self {
        ArpBuilder {
            operation: ArpOperations::Reply,
            sender_mac: sender_mac,
            sender_ip: sender_ip,
            target_mac: target_mac,
            target_ip: target_ip,
        }
    }
}

impl EthernetPayload for ArpBuilder {
    fn ether_type(&self) -> u16 {
        ETH_TYPE_ARP
    }
}

impl Payload for ArpBuilder {
    fn len(&self) -> usize {
        ArpPacket::minimum_packet_size()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let mut arp_pkg = MutableArpPacket::new(buffer).unwrap();
        arp_pkg.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_pkg.set_protocol_type(EtherTypes::Ipv4);
        arp_pkg.set_hw_addr_len(6);
        arp_pkg.set_proto_addr_len(4);
        arp_pkg.set_operation(self.operation);
        arp_pkg.set_sender_hw_addr(self.sender_mac);
        arp_pkg.set_sender_proto_addr(self.sender_ip);
        arp_pkg.set_target_hw_addr(self.target_mac);
        arp_pkg.set_target_proto_addr(self.target_ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packet::{decode_ethernet, EthernetBuilder, L3, ARP_REPLY, ARP_REQUEST};

    #[test]
    fn request_roundtrip() {
        let sender_mac = MacAddr::new(2, 0, 0, 0, 0, 1);
        let builder = ArpBuilder::new_request(sender_mac,
                                              Ipv4Addr::new(10, 0, 0, 1),
                                              Ipv4Addr::new(10, 0, 0, 254));
        let mut eth = EthernetBuilder::new(sender_mac, MacAddr::broadcast(), builder);
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let frame = decode_ethernet(&buffer).unwrap();
        match frame.payload {
            L3::Arp(ref arp) => {
                assert_eq!(arp.operation, ARP_REQUEST);
                assert_eq!(arp.sender_mac, sender_mac);
                assert_eq!(arp.sender_ip, Ipv4Addr::new(10, 0, 0, 1));
                assert_eq!(arp.target_mac, MacAddr::zero());
                assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 254));
            }
            _ => panic!("expected arp"),
        }
    }

    #[test]
    fn reply_carries_both_endpoints() {
        let sender_mac = MacAddr::new(2, 0, 0, 0, 0, 1);
        let target_mac = MacAddr::new(2, 0, 0, 0, 0, 2);
        let builder = ArpBuilder::new_reply(sender_mac,
                                            Ipv4Addr::new(10, 0, 0, 1),
                                            target_mac,
                                            Ipv4Addr::new(10, 0, 0, 2));
        let mut eth = EthernetBuilder::new(sender_mac, target_mac, builder);
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let frame = decode_ethernet(&buffer).unwrap();
        match frame.payload {
            L3::Arp(ref arp) => {
                assert_eq!(arp.operation, ARP_REPLY);
                assert_eq!(arp.target_mac, target_mac);
            }
            _ => panic!("expected arp"),
        }
    }
}
