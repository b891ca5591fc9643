//! Shared fixtures: a context, an emulated port with one network
//! interface and hand-built streams, all without touching a real NIC.

use bngen::config::Config;
use bngen::netif::{NetifIpv4, NetifIpv6, NetworkInterface};
use bngen::packet::bbl::BblDirection;
use bngen::stack::{Context, Interface, TxAttachment};
use bngen::stream::{Scheduler, Stream, StreamConfig};

use pnet::util::MacAddr;

use std::net::Ipv4Addr;
use std::sync::Arc;

pub const GATEWAY_MAC: MacAddr = MacAddr(2, 0, 0, 0, 0, 0xfe);
pub const NETIF_MAC: MacAddr = MacAddr(2, 0, 0, 0, 0, 1);

pub fn test_context() -> Arc<Context> {
    Arc::new(Context::new(Config::default()))
}

/// A network interface on VLAN 100 with a resolved gateway, so stream
/// templates build immediately.
pub fn test_netif() -> Arc<NetworkInterface> {
    Arc::new(NetworkInterface::new("veth0:100".to_owned(),
                                   1,
                                   100,
                                   NETIF_MAC,
                                   Some(GATEWAY_MAC),
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

/// A physical port carrying `netif`, with one main-loop egress
/// attachment whose scheduler is returned for direct driving.
pub fn test_interface(netif: &Arc<NetworkInterface>) -> (Arc<Interface>, Arc<Scheduler>) {
    let interface = Interface::new("veth0".to_owned(), 1, NETIF_MAC);
    interface.network_guard().insert(netif.vlan, netif.clone());
    let scheduler = Arc::new(Scheduler::new());
    interface.tx_attachments.lock().unwrap().push(TxAttachment {
        scheduler: scheduler.clone(),
        thread: None,
    });
    (Arc::new(interface), scheduler)
}

/// Registers a raw downstream stream on `netif` the way the stack
/// builds them at startup.
pub fn raw_stream(ctx: &Context,
                  netif: &Arc<NetworkInterface>,
                  scheduler: &Scheduler,
                  config: StreamConfig)
                  -> Arc<Stream> {
    let flow_id = ctx.flows().allocate_flow_id();
    let mut stream = Stream::new(flow_id, Arc::new(config), BblDirection::Down, None);
    stream.network_interface = Some(netif.clone());
    let stream = Arc::new(stream);
    ctx.flows().insert(stream.clone()).unwrap();
    scheduler.add_stream(stream.clone());
    stream
}
