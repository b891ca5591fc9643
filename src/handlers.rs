//! Seams to the control-plane protocol engines.
//!
//! The traffic core does not implement PPP, DHCP, DHCPv6, IGMP, L2TP
//! control, IS-IS or OSPF; it hands decoded frames (with the interface
//! or session they arrived on) to whatever implements
//! `ProtocolHandlers`. Engines feed state back through the session
//! model and the per-interface pending-send request bits.

use std::sync::Arc;

use netif::{AccessInterface, NetworkInterface};
use packet::EthernetFrame;
use session::Session;
use timer::Timestamp;

/// Callbacks into the external protocol engines. Every method has a
/// no-op default so partial emulations only implement what they use.
#[allow(unused_variables)]
pub trait ProtocolHandlers: Send + Sync {
    fn handle_dhcp(&self, interface: &Arc<AccessInterface>, frame: &EthernetFrame) {}

    fn handle_dhcpv6(&self, session: &Arc<Session>, frame: &EthernetFrame) {}

    fn handle_pppoe_discovery(&self, interface: &Arc<AccessInterface>, frame: &EthernetFrame) {}

    /// PPPoE session frames whose PPP protocol is not IPv4/IPv6
    /// (LCP, IPCP, IP6CP, PAP/CHAP and friends).
    fn handle_pppoe_session(&self, session: &Arc<Session>, frame: &EthernetFrame) {}

    fn handle_ppp_lcp(&self, session: &Arc<Session>, frame: &EthernetFrame) {}

    fn handle_ppp_ipcp(&self, session: &Arc<Session>, frame: &EthernetFrame) {}

    fn handle_ppp_ip6cp(&self, session: &Arc<Session>, frame: &EthernetFrame) {}

    fn handle_icmpv6_ra(&self, session: &Arc<Session>, frame: &EthernetFrame) {}

    fn handle_igmp(&self, session: &Arc<Session>, frame: &EthernetFrame) {}

    fn handle_l2tp_control(&self, interface: &Arc<NetworkInterface>, frame: &EthernetFrame) {}

    fn handle_qmx_li(&self, interface: &Arc<NetworkInterface>, frame: &EthernetFrame) {}

    fn handle_tcp_ipv4(&self, interface: &Arc<NetworkInterface>, frame: &EthernetFrame) {}

    fn handle_isis(&self, interface: &Arc<NetworkInterface>, frame: &EthernetFrame) {}

    fn handle_ospf_v2(&self, interface: &Arc<NetworkInterface>, frame: &EthernetFrame) {}

    fn handle_ospf_v3(&self, interface: &Arc<NetworkInterface>, frame: &EthernetFrame) {}
}

/// Handler set that drops everything. Used when the emulator runs pure
/// traffic scenarios without control-plane engines attached.
pub struct NullHandlers;

impl ProtocolHandlers for NullHandlers {}

/// Sink for packet capture. The actual pcapng writer lives outside the
/// core; the I/O layer pushes copies of interesting frames here.
pub trait PcapSink: Send + Sync {
    fn push(&self, timestamp: &Timestamp, packet: &[u8], ifindex: u32, outbound: bool);

    /// Called once per drain cycle after at least one push.
    fn flush(&self) {}
}
