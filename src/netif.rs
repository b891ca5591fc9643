//! Emulated interfaces and their control-plane behavior.
//!
//! A `NetworkInterface` is an upstream-facing L2/L3 port peering with
//! the device under test: it resolves its gateway via ARP/ND, answers
//! ARP requests, ICMP echo and neighbor solicitations addressed to it,
//! and demuxes everything else into the external protocol engines.
//! Replies are queued on the per-interface control TXQ, which the I/O
//! layer drains ahead of stream traffic.
//!
//! `AccessInterface` and `A10nspInterface` are the subscriber-facing
//! counterparts; their protocol machinery lives outside the core, so
//! they carry little more than counters and identity here.

use pnet::util::MacAddr;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use handlers::ProtocolHandlers;
use packet::icmp::{Icmpv6Builder, Icmpv6Message, IcmpEchoReplyBuilder};
use packet::ip::{ipv6_multicast_mac, ipv6_solicited_node_multicast, Ipv4Builder, Ipv6Builder};
use packet::{ArpBuilder, EthernetBuilder, EthernetFrame, EthernetPayload, IcmpFields,
             Icmpv6Fields, Ipv4Fields, Ipv6Fields, L2tpFields, MplsLabel, L3, L4,
             ARP_REQUEST, ICMPV6_TYPE_ECHO_REQUEST, ICMPV6_TYPE_NEIGHBOR_SOLICITATION,
             ICMP_TYPE_ECHO_REQUEST, UdpPayload};
use stats::{InterfaceRates, InterfaceStats};
use txq::Txq;
use Payload;

/// Pending outgoing control packets, armed by configuration or the
/// protocol engines and drained by the interface control job.
pub const SEND_ARP_REQUEST: u32 = 1 << 0;
pub const SEND_ICMPV6_NS: u32 = 1 << 1;
pub const SEND_ISIS_HELLO: u32 = 1 << 2;
pub const SEND_OSPF_HELLO: u32 = 1 << 3;

pub struct NetifIpv4 {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
}

pub struct NetifIpv6 {
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    pub gateway: Ipv6Addr,
}

pub struct NetworkInterface {
    pub name: String,
    /// Index of the parent physical port.
    pub ifindex: u32,
    pub vlan: u16,
    pub mac: MacAddr,
    pub ipv4: Option<NetifIpv4>,
    pub ipv6: Option<NetifIpv6>,
    /// Derived from the MAC via modified EUI-64.
    pub ipv6_ll: Ipv6Addr,
    /// Label pushed in front of all transmitted control traffic.
    pub tx_label: Option<MplsLabel>,
    pub gateway_resolve_wait: bool,
    gateway_mac: Mutex<Option<MacAddr>>,
    pub arp_resolved: AtomicBool,
    pub nd_resolved: AtomicBool,
    pub send_requests: AtomicU32,
    /// Control packets waiting for the next TX burst.
    pub txq: Txq,
    pub stats: InterfaceStats,
    pub rates: Mutex<InterfaceRates>,
}

/// Modified EUI-64 link-local address for a MAC.
pub fn link_local_address(mac: MacAddr) -> Ipv6Addr {
    let octets = mac.octets();
    Ipv6Addr::new(0xfe80,
                  0,
                  0,
                  0,
                  ((octets[0] ^ 0x02) as u16) << 8 | octets[1] as u16,
                  (octets[2] as u16) << 8 | 0xff,
                  0xfe00 | octets[3] as u16,
                  (octets[4] as u16) << 8 | octets[5] as u16)
}

impl NetworkInterface {
    pub fn new(name: String,
               ifindex: u32,
               vlan: u16,
               mac: MacAddr,
               gateway_mac: Option<MacAddr>,
               ipv4: Option<NetifIpv4>,
               ipv6: Option<NetifIpv6>,
               tx_label: Option<MplsLabel>,
               gateway_resolve_wait: bool,
               txq_slots: usize)
               -> NetworkInterface {
        let mut send_requests = 0;
        if ipv4.is_some() {
            send_requests |= SEND_ARP_REQUEST;
        }
        if ipv6.is_some() {
            send_requests |= SEND_ICMPV6_NS;
        }
        NetworkInterface {
            name: name,
            ifindex: ifindex,
            vlan: vlan,
            mac: mac,
            ipv4: ipv4,
            ipv6: ipv6,
            ipv6_ll: link_local_address(mac),
            tx_label: tx_label,
            gateway_resolve_wait: gateway_resolve_wait,
            gateway_mac: Mutex::new(gateway_mac),
            arp_resolved: AtomicBool::new(false),
            nd_resolved: AtomicBool::new(false),
            send_requests: AtomicU32::new(send_requests),
            txq: Txq::new(txq_slots),
            stats: InterfaceStats::default(),
            rates: Mutex::new(InterfaceRates::default()),
        }
    }

    pub fn gateway_mac(&self) -> Option<MacAddr> {
        *self.gateway_mac.lock().unwrap()
    }

    /// Learns the gateway MAC if it is still unknown. Receiving the
    /// same answer twice leaves the first learned value untouched.
    fn learn_gateway_mac(&self, mac: MacAddr) {
        let mut gateway_mac = self.gateway_mac.lock().unwrap();
        if gateway_mac.is_none() {
            info!("interface {} resolved gateway to {}", self.name, mac);
            *gateway_mac = Some(mac);
        }
    }

    /// The MAC outbound traffic may be sent to right now. `None` while
    /// the gateway is unresolved and `gateway_resolve_wait` demands
    /// holding traffic back.
    pub fn effective_gateway_mac(&self) -> Option<MacAddr> {
        match self.gateway_mac() {
            Some(mac) => Some(mac),
            None => {
                if self.gateway_resolve_wait {
                    None
                } else {
                    Some(MacAddr::zero())
                }
            }
        }
    }

    pub fn request_send(&self, bits: u32) {
        self.send_requests.fetch_or(bits, Ordering::Relaxed);
    }

    /// Base ethernet builder for control frames originated here.
    fn control_eth<P: EthernetPayload>(&self, dst: MacAddr, payload: P) -> EthernetBuilder<P> {
        let mut eth = EthernetBuilder::new(self.mac, dst, payload).vlan_outer(self.vlan, 0);
        if let Some(label) = self.tx_label {
            eth = eth.mpls(label);
        }
        eth
    }

    /// Builds a frame into the control TXQ. Drops the frame when the
    /// ring is full; control traffic is re-armed by its timers.
    fn queue_control<P: Payload>(&self, mut builder: P) {
        let len = builder.len();
        match self.txq.write_slot() {
            Some(slot) => {
                if len > slot.packet.len() {
                    warn!("control frame on {} exceeds slot size ({} bytes)", self.name, len);
                    return;
                }
                builder.build(&mut slot.packet[..len]);
                slot.len = len as u16;
                self.txq.write_next();
            }
            None => {
                debug!("control txq full on {}", self.name);
            }
        }
    }

    /// Converts armed send-request bits into queued control packets.
    /// Called from the per-interface control job on the main thread.
    pub fn process_send_requests(&self) {
        let bits = self.send_requests.swap(0, Ordering::Relaxed);
        if bits == 0 {
            return;
        }
        if bits & SEND_ARP_REQUEST != 0 {
            if let Some(ref ipv4) = self.ipv4 {
                debug!("interface {} sending ARP request for {}", self.name, ipv4.gateway);
                let arp = ArpBuilder::new_request(self.mac, ipv4.address, ipv4.gateway);
                let eth = self.control_eth(MacAddr::broadcast(), arp);
                self.queue_control(eth);
            }
        }
        if bits & SEND_ICMPV6_NS != 0 {
            if let Some(ref ipv6) = self.ipv6 {
                debug!("interface {} sending NS for {}", self.name, ipv6.gateway);
                let group = ipv6_solicited_node_multicast(&ipv6.gateway);
                let ns = Icmpv6Builder::new(self.ipv6_ll,
                                            group,
                                            Icmpv6Message::NeighborSolicitation {
                                                target: ipv6.gateway,
                                                source_mac: self.mac,
                                            });
                let ip = Ipv6Builder::new(self.ipv6_ll, group, ns).hop_limit(255);
                let eth = self.control_eth(ipv6_multicast_mac(&group), ip);
                self.queue_control(eth);
            }
        }
        // Routing protocol hellos are built by their engines; the bits
        // only exist so engines can piggyback on the control job.
        if bits & (SEND_ISIS_HELLO | SEND_OSPF_HELLO) != 0 {
            trace!("interface {} has routing hello bits pending", self.name);
        }
    }

    /// Re-arms unanswered resolution requests. Runs once per second
    /// until the gateway answers.
    pub fn retry_resolution(&self) {
        if self.ipv4.is_some() && !self.arp_resolved.load(Ordering::Relaxed) {
            self.request_send(SEND_ARP_REQUEST);
        }
        if self.ipv6.is_some() && !self.nd_resolved.load(Ordering::Relaxed) {
            self.request_send(SEND_ICMPV6_NS);
        }
    }

    pub fn update_rates(&self) {
        self.rates.lock().unwrap().update(&self.stats);
    }
}

/// Subscriber-facing access port. Sessions terminate here; the access
/// protocol engines own its behavior.
pub struct AccessInterface {
    pub name: String,
    pub ifindex: u32,
    pub stats: InterfaceStats,
    pub rates: Mutex<InterfaceRates>,
}

impl AccessInterface {
    pub fn new(name: String, ifindex: u32) -> AccessInterface {
        AccessInterface {
            name: name,
            ifindex: ifindex,
            stats: InterfaceStats::default(),
            rates: Mutex::new(InterfaceRates::default()),
        }
    }

    pub fn update_rates(&self) {
        self.rates.lock().unwrap().update(&self.stats);
    }
}

/// A10NSP cross-connect port: access traffic short-circuited to a
/// second access leg without upstream routing.
pub struct A10nspInterface {
    pub name: String,
    pub ifindex: u32,
    pub qinq: bool,
    pub stats: InterfaceStats,
    pub rates: Mutex<InterfaceRates>,
}

impl A10nspInterface {
    pub fn new(name: String, ifindex: u32, qinq: bool) -> A10nspInterface {
        A10nspInterface {
            name: name,
            ifindex: ifindex,
            qinq: qinq,
            stats: InterfaceStats::default(),
            rates: Mutex::new(InterfaceRates::default()),
        }
    }

    pub fn update_rates(&self) {
        self.rates.lock().unwrap().update(&self.stats);
    }
}

/// Handles every control frame received on a network interface.
pub fn rx_handler(interface: &Arc<NetworkInterface>,
                  handlers: &ProtocolHandlers,
                  secondary_ipv4: &[Ipv4Addr],
                  secondary_ipv6: &[Ipv6Addr],
                  frame: &EthernetFrame) {
    match frame.payload {
        L3::Arp(ref arp) => {
            rx_arp(interface, secondary_ipv4, frame, arp);
        }
        L3::Ipv4(ref ipv4) => {
            if frame.dst != interface.mac {
                // Wrong MAC, not ours.
                return;
            }
            match ipv4.payload {
                L4::Udp(ref udp) => {
                    match udp.payload {
                        UdpPayload::L2tp(ref l2tp) => {
                            rx_l2tp(interface, handlers, frame, l2tp);
                        }
                        UdpPayload::QmxLi(_) => {
                            handlers.handle_qmx_li(interface, frame);
                        }
                        _ => {
                            interface.stats.unknown.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                L4::Icmp(ref icmp) => {
                    interface.stats.icmp_rx.fetch_add(1, Ordering::Relaxed);
                    rx_icmp(interface, frame, ipv4, icmp);
                }
                L4::Tcp(_) => {
                    interface.stats.tcp_rx.fetch_add(1, Ordering::Relaxed);
                    handlers.handle_tcp_ipv4(interface, frame);
                }
                _ => {
                    interface.stats.unknown.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        L3::Ipv6(ref ipv6) => {
            match ipv6.payload {
                L4::Icmpv6(ref icmpv6) => {
                    rx_icmpv6(interface, secondary_ipv6, frame, ipv6, icmpv6);
                }
                _ => {
                    interface.stats.unknown.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        L3::Isis(_) => {
            handlers.handle_isis(interface, frame);
        }
        _ => {
            interface.stats.unknown.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn rx_arp(interface: &Arc<NetworkInterface>,
          secondary_ipv4: &[Ipv4Addr],
          frame: &EthernetFrame,
          arp: &::packet::ArpFields) {
    let gateway = match interface.ipv4 {
        Some(ref ipv4) => ipv4.gateway,
        None => return,
    };
    if arp.sender_ip == gateway {
        interface.arp_resolved.store(true, Ordering::Relaxed);
        interface.learn_gateway_mac(arp.sender_mac);
    }
    if arp.operation == ARP_REQUEST {
        let local = interface.ipv4.as_ref().map(|ipv4| ipv4.address);
        let answer = local == Some(arp.target_ip) ||
                     secondary_ipv4.contains(&arp.target_ip);
        if answer {
            let reply = ArpBuilder::new_reply(interface.mac,
                                              arp.target_ip,
                                              arp.sender_mac,
                                              arp.sender_ip);
            let eth = interface.control_eth(frame.src, reply);
            interface.queue_control(eth);
        }
    }
}

fn rx_icmp(interface: &Arc<NetworkInterface>,
           frame: &EthernetFrame,
           ipv4: &Ipv4Fields,
           icmp: &IcmpFields) {
    if icmp.icmp_type != ICMP_TYPE_ECHO_REQUEST {
        return;
    }
    // Reflect: addresses swapped, identifier/sequence/payload kept.
    let reply = IcmpEchoReplyBuilder::new(icmp.message);
    let ip = Ipv4Builder::new(ipv4.dst, ipv4.src, reply).ttl(64);
    let eth = interface.control_eth(frame.src, ip);
    interface.queue_control(eth);
}

fn rx_icmpv6(interface: &Arc<NetworkInterface>,
             secondary_ipv6: &[Ipv6Addr],
             frame: &EthernetFrame,
             ipv6: &Ipv6Fields,
             icmpv6: &Icmpv6Fields) {
    if let Some(ref netif_ipv6) = interface.ipv6 {
        if ipv6.src == netif_ipv6.gateway {
            interface.nd_resolved.store(true, Ordering::Relaxed);
            interface.learn_gateway_mac(frame.src);
        }
    }
    match icmpv6.icmpv6_type {
        ICMPV6_TYPE_NEIGHBOR_SOLICITATION => {
            let target = match icmpv6.target {
                Some(target) => target,
                None => return,
            };
            let ours = Some(target) == interface.ipv6.as_ref().map(|i| i.address) ||
                       target == interface.ipv6_ll ||
                       secondary_ipv6.contains(&target);
            if ours {
                let na = Icmpv6Builder::new(target,
                                            ipv6.src,
                                            Icmpv6Message::NeighborAdvertisement {
                                                target: target,
                                                mac: interface.mac,
                                            });
                let ip = Ipv6Builder::new(target, ipv6.src, na).hop_limit(255);
                let eth = interface.control_eth(frame.src, ip);
                interface.queue_control(eth);
            }
        }
        ICMPV6_TYPE_ECHO_REQUEST => {
            let reply = Icmpv6Builder::new(ipv6.dst,
                                           ipv6.src,
                                           Icmpv6Message::EchoReply { message: icmpv6.message });
            let ip = Ipv6Builder::new(ipv6.dst, ipv6.src, reply).hop_limit(255);
            let eth = interface.control_eth(frame.src, ip);
            interface.queue_control(eth);
        }
        _ => {}
    }
}

fn rx_l2tp(interface: &Arc<NetworkInterface>,
           handlers: &ProtocolHandlers,
           frame: &EthernetFrame,
           l2tp: &L2tpFields) {
    if l2tp.control {
        handlers.handle_l2tp_control(interface, frame);
    } else {
        // Tunnelled data without an embedded test payload still
        // belongs to the L2TP engine (e.g. tunnelled subscriber PPP).
        interface.stats.l2tp_data_rx.fetch_add(1, Ordering::Relaxed);
        handlers.handle_l2tp_control(interface, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handlers::NullHandlers;
    use packet::decode_ethernet;
    use packet::ip::UdpBuilder;
    use std::net::Ipv4Addr;

    fn test_interface() -> Arc<NetworkInterface> {
        Arc::new(NetworkInterface::new("eth0:100".to_owned(),
                                       1,
                                       100,
                                       MacAddr::new(2, 0, 0, 0, 0, 1),
                                       None,
                                       Some(NetifIpv4 {
                                           address: Ipv4Addr::new(10, 0, 0, 2),
                                           prefix_len: 24,
                                           gateway: Ipv4Addr::new(10, 0, 0, 1),
                                       }),
                                       Some(NetifIpv6 {
                                           address: "2001:db8::2".parse().unwrap(),
                                           prefix_len: 64,
                                           gateway: "2001:db8::1".parse().unwrap(),
                                       }),
                                       None,
                                       false,
                                       64))
    }

    fn drain_one(interface: &NetworkInterface) -> Vec<u8> {
        let slot = interface.txq.read_slot().expect("no frame queued");
        let bytes = slot.bytes().to_vec();
        interface.txq.read_next();
        bytes
    }

    #[test]
    fn link_local_is_modified_eui64() {
        let ll = link_local_address(MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff));
        assert_eq!(ll, "fe80::a8bb:ccff:fedd:eeff".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn arp_reply_learns_gateway_once() {
        let interface = test_interface();
        let gateway_mac = MacAddr::new(2, 0, 0, 0, 0, 0xfe);
        let other_mac = MacAddr::new(2, 0, 0, 0, 0, 0xff);

        let mut eth = EthernetBuilder::new(gateway_mac,
                                           interface.mac,
                                           ArpBuilder::new_reply(gateway_mac,
                                                                 Ipv4Addr::new(10, 0, 0, 1),
                                                                 interface.mac,
                                                                 Ipv4Addr::new(10, 0, 0, 2)));
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let frame = decode_ethernet(&buffer).unwrap();

        rx_handler(&interface, &NullHandlers, &[], &[], &frame);
        assert!(interface.arp_resolved.load(Ordering::Relaxed));
        assert_eq!(interface.gateway_mac(), Some(gateway_mac));

        // A second answer from a different MAC does not overwrite.
        let mut eth = EthernetBuilder::new(other_mac,
                                           interface.mac,
                                           ArpBuilder::new_reply(other_mac,
                                                                 Ipv4Addr::new(10, 0, 0, 1),
                                                                 interface.mac,
                                                                 Ipv4Addr::new(10, 0, 0, 2)));
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let frame = decode_ethernet(&buffer).unwrap();
        rx_handler(&interface, &NullHandlers, &[], &[], &frame);
        assert_eq!(interface.gateway_mac(), Some(gateway_mac));
    }

    #[test]
    fn arp_request_for_us_is_answered() {
        let interface = test_interface();
        let requester = MacAddr::new(2, 0, 0, 0, 0, 0xfe);
        let mut eth = EthernetBuilder::new(requester,
                                           MacAddr::broadcast(),
                                           ArpBuilder::new_request(requester,
                                                                   Ipv4Addr::new(10, 0, 0, 1),
                                                                   Ipv4Addr::new(10, 0, 0, 2)));
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let frame = decode_ethernet(&buffer).unwrap();
        rx_handler(&interface, &NullHandlers, &[], &[], &frame);

        let reply = drain_one(&interface);
        let reply = decode_ethernet(&reply).unwrap();
        assert_eq!(reply.dst, requester);
        assert_eq!(reply.vlan_outer, 100);
        match reply.payload {
            L3::Arp(ref arp) => {
                assert_eq!(arp.operation, ::packet::ARP_REPLY);
                assert_eq!(arp.sender_mac, interface.mac);
                assert_eq!(arp.sender_ip, Ipv4Addr::new(10, 0, 0, 2));
                assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 1));
            }
            _ => panic!("expected arp reply"),
        }
    }

    #[test]
    fn icmp_echo_is_reflected() {
        let interface = test_interface();
        let peer = MacAddr::new(2, 0, 0, 0, 0, 0xfe);
        // Echo request id 7 seq 9 from the gateway address.
        let mut message = vec![ICMP_TYPE_ECHO_REQUEST, 0, 0, 0, 0, 7, 0, 9, 1, 2, 3];
        let checksum =
            ::pnet::packet::icmp::checksum(&::pnet::packet::icmp::IcmpPacket::new(&message)
                .unwrap());
        message[2..4].copy_from_slice(&checksum.to_be_bytes());

        struct Raw(Vec<u8>);
        impl Payload for Raw {
            fn len(&self) -> usize {
                self.0.len()
            }
            fn build(&mut self, buffer: &mut [u8]) {
                buffer.copy_from_slice(&self.0);
            }
        }
        impl ::packet::Ipv4Payload for Raw {
            fn protocol(&self) -> u8 {
                1
            }
        }

        let ip = Ipv4Builder::new(Ipv4Addr::new(10, 0, 0, 1),
                                  Ipv4Addr::new(10, 0, 0, 2),
                                  Raw(message));
        let mut eth = EthernetBuilder::new(peer, interface.mac, ip);
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let frame = decode_ethernet(&buffer).unwrap();
        rx_handler(&interface, &NullHandlers, &[], &[], &frame);

        let reply_bytes = drain_one(&interface);
        let reply = decode_ethernet(&reply_bytes).unwrap();
        match reply.payload {
            L3::Ipv4(ref ipv4) => {
                assert_eq!(ipv4.src, Ipv4Addr::new(10, 0, 0, 2));
                assert_eq!(ipv4.dst, Ipv4Addr::new(10, 0, 0, 1));
                assert_eq!(ipv4.ttl, 64);
                match ipv4.payload {
                    L4::Icmp(ref icmp) => {
                        assert_eq!(icmp.icmp_type, ::packet::ICMP_TYPE_ECHO_REPLY);
                        assert_eq!(&icmp.message[4..8], &[0, 7, 0, 9]);
                    }
                    _ => panic!("expected icmp"),
                }
            }
            _ => panic!("expected ipv4"),
        }
    }

    #[test]
    fn neighbor_solicitation_for_link_local_is_answered() {
        let interface = test_interface();
        let peer = MacAddr::new(2, 0, 0, 0, 0, 0xfe);
        let peer_ip: Ipv6Addr = "fe80::1".parse().unwrap();
        let target = interface.ipv6_ll;
        let ns = Icmpv6Builder::new(peer_ip,
                                    target,
                                    Icmpv6Message::NeighborSolicitation {
                                        target: target,
                                        source_mac: peer,
                                    });
        let ip = Ipv6Builder::new(peer_ip, target, ns).hop_limit(255);
        let mut eth = EthernetBuilder::new(peer, interface.mac, ip);
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let frame = decode_ethernet(&buffer).unwrap();
        rx_handler(&interface, &NullHandlers, &[], &[], &frame);

        let reply_bytes = drain_one(&interface);
        let reply = decode_ethernet(&reply_bytes).unwrap();
        match reply.payload {
            L3::Ipv6(ref ipv6) => {
                assert_eq!(ipv6.dst, peer_ip);
                assert_eq!(ipv6.src, target);
                match ipv6.payload {
                    L4::Icmpv6(ref icmpv6) => {
                        assert_eq!(icmpv6.icmpv6_type,
                                   ::packet::ICMPV6_TYPE_NEIGHBOR_ADVERTISEMENT);
                        assert_eq!(icmpv6.target, Some(target));
                    }
                    _ => panic!("expected icmpv6"),
                }
            }
            _ => panic!("expected ipv6"),
        }
    }

    #[test]
    fn send_requests_emit_arp_and_ns() {
        let interface = test_interface();
        interface.process_send_requests();
        let first_bytes = drain_one(&interface);
        let first = decode_ethernet(&first_bytes).unwrap();
        match first.payload {
            L3::Arp(ref arp) => {
                assert_eq!(arp.operation, ARP_REQUEST);
                assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 1));
            }
            _ => panic!("expected arp request first"),
        }
        let second_bytes = drain_one(&interface);
        let second = decode_ethernet(&second_bytes).unwrap();
        match second.payload {
            L3::Ipv6(ref ipv6) => {
                match ipv6.payload {
                    L4::Icmpv6(ref icmpv6) => {
                        assert_eq!(icmpv6.icmpv6_type, ICMPV6_TYPE_NEIGHBOR_SOLICITATION);
                        assert_eq!(icmpv6.target,
                                   Some("2001:db8::1".parse().unwrap()));
                    }
                    _ => panic!("expected ns"),
                }
            }
            _ => panic!("expected ipv6 ns"),
        }
        // Bits were consumed.
        assert!(interface.txq.read_slot().is_none());
        interface.process_send_requests();
        assert!(interface.txq.read_slot().is_none());
    }
}
