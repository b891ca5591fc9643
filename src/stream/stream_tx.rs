//! Stream transmit path: sendability gate, packet template builders,
//! send-window pacing and the round-robin scheduler the I/O layer
//! pulls packets from.

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use rand;

use packet::bbl::{BblDirection, BblHeader, BblPayload, BblSubType, BblType, BBL_HEADER_LEN};
use packet::ip::{ipv4_multicast_mac, Ipv4Builder, Ipv6Builder, UdpBuilder};
use packet::pppoe::{L2tpDataBuilder, PppoeSessionBuilder};
use packet::{EthernetBuilder, EthernetPayload};
use session::{AccessType, NcpState, Session, SessionState};
use stack::Context;
use stream::{Stream, StreamConfig, StreamTxState};
use timer::Timestamp;
use {EncodeError, EncodeResult, Payload};

/// Base lengths of a test packet at L3: IP header + UDP header + the
/// embedded record. Configured lengths above this become padding.
const BASE_LEN_IPV4: usize = 76;
const BASE_LEN_IPV6: usize = 96;

/// Local endpoint address of an A10NSP cross-connect, which has no
/// routed network side to borrow an address from.
const A10NSP_IPV4_LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

pub struct Template {
    pub buf: Vec<u8>,
    pub bbl_offset: usize,
}

/// Whether this stream may transmit right now. Consumes a pending
/// reset. When the gate closes after having been open the cached
/// template is freed so changed addressing rebuilds it.
pub fn can_send(ctx: &Context, stream: &Stream, tx: &mut StreamTxState) -> bool {
    if ctx.init_phase() {
        return false;
    }
    if stream.take_reset() {
        tx.flow_seq = 1;
        tx.free_template();
        return false;
    }
    if stream.is_raw() {
        return true;
    }
    if let Some(ref session) = stream.session {
        if session_ready(session, stream.stream_type) {
            return true;
        }
    }
    tx.free_template();
    false
}

fn session_ready(session: &Session, stream_type: BblSubType) -> bool {
    let inner = session.inner();
    if inner.state != SessionState::Established {
        return false;
    }
    match session.access_type {
        AccessType::Pppoe => {
            if inner.l2tp && inner.l2tp_binding.is_none() {
                return false;
            }
            match stream_type {
                BblSubType::Ipv4 => inner.ipcp_state == NcpState::Opened,
                BblSubType::Ipv6 => {
                    inner.ip6cp_state == NcpState::Opened && inner.icmpv6_ra_received &&
                    inner.ipv6_address.is_some()
                }
                BblSubType::Ipv6Pd => {
                    inner.ip6cp_state == NcpState::Opened && inner.icmpv6_ra_received &&
                    inner.delegated_ipv6_address.is_some() &&
                    inner.dhcpv6_bound
                }
            }
        }
        AccessType::Ipoe => {
            match stream_type {
                BblSubType::Ipv4 => inner.ip_address.is_some(),
                BblSubType::Ipv6 => inner.ipv6_address.is_some() && inner.icmpv6_ra_received,
                BblSubType::Ipv6Pd => {
                    inner.delegated_ipv6_address.is_some() && inner.icmpv6_ra_received &&
                    inner.dhcpv6_bound
                }
            }
        }
    }
}

/// Pacing: how many packets this stream owes right now.
///
/// The window anchor `send_window_start` and counter
/// `send_window_packets` drift-correct against wall time: lost ticks
/// are made up within the window, but a single pass never grants more
/// than `max_ppi`. An optional start delay runs as a one-shot wait
/// window; the anchor is captured on the first call, so the first
/// packet leaves one tick after the delay expires.
pub fn send_window(config: &StreamConfig,
                   tx: &mut StreamTxState,
                   packets_tx: u64,
                   now: &Timestamp,
                   max_ppi: u64)
                   -> u64 {
    if config.start_delay > 0 && packets_tx == 0 {
        if tx.wait {
            if now.saturating_nanos_since(&tx.wait_start) < config.start_delay * 1_000_000_000 {
                return 0;
            }
        } else {
            tx.wait = true;
            tx.wait_start = *now;
            return 0;
        }
    }

    let mut packets;
    if tx.send_window_packets == 0 {
        tx.send_window_start = *now;
        packets = 1;
    } else {
        let elapsed = now.secs_since(&tx.send_window_start);
        let expected = (config.pps * elapsed) as u64;
        packets = expected.saturating_sub(tx.send_window_packets);
        if packets > max_ppi {
            packets = max_ppi;
        }
    }

    if config.max_packets > 0 {
        if packets_tx + packets > config.max_packets {
            packets = config.max_packets.saturating_sub(packets_tx);
        }
    }
    packets
}

/// Builds the cached packet template of a stream from its session and
/// interface state.
pub fn build_template(ctx: &Context, stream: &Stream) -> EncodeResult<Template> {
    if stream.is_raw() {
        return build_network(stream);
    }
    let session = match stream.session {
        Some(ref session) => session.clone(),
        None => return Err(EncodeError::Incomplete("stream without session")),
    };
    match session.access_type {
        AccessType::Pppoe => {
            let (l2tp, a10nsp) = {
                let inner = session.inner();
                (inner.l2tp_binding.is_some(), inner.a10nsp_binding.is_some())
            };
            if l2tp {
                match stream.direction {
                    BblDirection::Up => build_access_pppoe(ctx, stream, &session),
                    BblDirection::Down => build_l2tp(stream, &session),
                }
            } else if a10nsp {
                build_a10nsp(stream, &session, true)
            } else {
                match stream.direction {
                    BblDirection::Up => build_access_pppoe(ctx, stream, &session),
                    BblDirection::Down => build_network(stream),
                }
            }
        }
        AccessType::Ipoe => {
            let a10nsp = session.inner().a10nsp_binding.is_some();
            if a10nsp {
                build_a10nsp(stream, &session, false)
            } else {
                match stream.direction {
                    BblDirection::Up => build_access_ipoe(ctx, stream, &session),
                    BblDirection::Down => build_network(stream),
                }
            }
        }
    }
}

fn bbl_padding(config: &StreamConfig, base: usize) -> usize {
    if config.length > base {
        config.length - base
    } else {
        0
    }
}

fn base_header(stream: &Stream, session: Option<&Session>) -> BblHeader {
    let mut header = BblHeader::unicast(stream.stream_type, stream.direction);
    header.tos = stream.config.priority;
    header.flow_id = stream.flow_id;
    if let Some(session) = session {
        header.session_id = session.session_id;
        header.ifindex = session.key.ifindex;
        header.outer_vlan = session.key.outer_vlan;
        header.inner_vlan = session.key.inner_vlan;
    }
    header
}

fn finish<P: Payload>(mut builder: P, bbl_len: usize) -> EncodeResult<Template> {
    let len = builder.len();
    if len > ::MAX_PACKET_LEN {
        return Err(EncodeError::TooSmall);
    }
    let mut buf = vec![0; len];
    builder.build(&mut buf);
    Ok(Template {
        bbl_offset: len - bbl_len,
        buf: buf,
    })
}

fn ipv4_identification(config: &StreamConfig) -> u16 {
    if config.ipv4_df {
        0
    } else {
        rand::random()
    }
}

/// Downstream (or raw) template leaving a network interface towards
/// the gateway, with optional MPLS stack and multicast derivation.
fn build_network(stream: &Stream) -> EncodeResult<Template> {
    let config = &stream.config;
    let interface = match stream.network_interface {
        Some(ref interface) => interface.clone(),
        None => return Err(EncodeError::Incomplete("missing network interface")),
    };
    let gateway_mac = match interface.effective_gateway_mac() {
        Some(mac) => mac,
        None => return Err(EncodeError::Incomplete("gateway unresolved")),
    };
    let session = stream.session.as_ref();
    let mut header = base_header(stream, session.map(|s| &**s));

    match stream.stream_type {
        BblSubType::Ipv4 => {
            let src = config.ipv4_network_address
                .or(interface.ipv4.as_ref().map(|i| i.address))
                .ok_or(EncodeError::Incomplete("no ipv4 source"))?;
            let mut eth_dst = gateway_mac;
            let dst = match config.ipv4_destination_address {
                Some(dst) => {
                    if dst.is_multicast() {
                        eth_dst = ipv4_multicast_mac(dst);
                        header.bbl_type = BblType::Multicast;
                        header.mc_source = src;
                        header.mc_group = dst;
                    }
                    dst
                }
                None => {
                    match session.and_then(|s| s.inner().ip_address) {
                        Some(address) => address,
                        None => return Err(EncodeError::Incomplete("no ipv4 destination")),
                    }
                }
            };
            let padding = bbl_padding(config, BASE_LEN_IPV4);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv4Builder::new(src, dst, udp)
                .tos(config.priority)
                .identification(ipv4_identification(config))
                .dont_fragment(config.ipv4_df);
            let eth = network_eth(&interface, config, eth_dst, ip);
            finish(eth, BBL_HEADER_LEN + padding)
        }
        BblSubType::Ipv6 | BblSubType::Ipv6Pd => {
            let src = config.ipv6_network_address
                .or(interface.ipv6.as_ref().map(|i| i.address))
                .ok_or(EncodeError::Incomplete("no ipv6 source"))?;
            let dst = match config.ipv6_destination_address {
                Some(dst) => dst,
                None => {
                    let address = session.and_then(|s| {
                        let inner = s.inner();
                        if stream.stream_type == BblSubType::Ipv6 {
                            inner.ipv6_address
                        } else {
                            inner.delegated_ipv6_address
                        }
                    });
                    match address {
                        Some(address) => address,
                        None => return Err(EncodeError::Incomplete("no ipv6 destination")),
                    }
                }
            };
            let padding = bbl_padding(config, BASE_LEN_IPV6);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv6Builder::new(src, dst, udp).traffic_class(config.priority);
            let eth = network_eth(&interface, config, gateway_mac, ip);
            finish(eth, BBL_HEADER_LEN + padding)
        }
    }
}

fn network_eth<P: EthernetPayload>(interface: &::netif::NetworkInterface,
                                   config: &StreamConfig,
                                   dst: ::pnet::util::MacAddr,
                                   payload: P)
                                   -> EthernetBuilder<P> {
    let mut eth = EthernetBuilder::new(interface.mac, dst, payload)
        .vlan_outer(interface.vlan, config.vlan_priority);
    if let Some(mpls1) = config.tx_mpls1 {
        eth = eth.mpls(mpls1);
        if let Some(mpls2) = config.tx_mpls2 {
            eth = eth.mpls(mpls2);
        }
    }
    eth
}

/// Upstream template of a PPPoE session.
fn build_access_pppoe(ctx: &Context, stream: &Stream, session: &Arc<Session>) -> EncodeResult<Template> {
    let config = &stream.config;
    let interface = ctx.network_interface(config.network_interface.as_ref().map(|n| &n[..]))
        .or_else(|| session.network_interface.clone());
    let interface = match interface {
        Some(interface) => interface,
        None => return Err(EncodeError::Incomplete("missing network interface")),
    };
    let inner = session.inner();
    let server_mac = match inner.server_mac {
        Some(mac) => mac,
        None => return Err(EncodeError::Incomplete("server mac unknown")),
    };
    let header = base_header(stream, Some(session));

    match stream.stream_type {
        BblSubType::Ipv4 => {
            let src = config.ipv4_access_src_address
                .or(inner.ip_address)
                .ok_or(EncodeError::Incomplete("no access ipv4 address"))?;
            let dst = config.ipv4_destination_address
                .or(config.ipv4_network_address)
                .or(interface.ipv4.as_ref().map(|i| i.address))
                .ok_or(EncodeError::Incomplete("no ipv4 destination"))?;
            let padding = bbl_padding(config, BASE_LEN_IPV4);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv4Builder::new(src, dst, udp)
                .tos(config.priority)
                .identification(ipv4_identification(config))
                .dont_fragment(config.ipv4_df);
            let pppoe = PppoeSessionBuilder::new(inner.pppoe_session_id, ip);
            let eth = access_eth(stream, session, server_mac, inner.client_mac, inner.qinq,
                                 inner.third_vlan, pppoe);
            finish(eth, BBL_HEADER_LEN + padding)
        }
        BblSubType::Ipv6 | BblSubType::Ipv6Pd => {
            let session_src = if stream.stream_type == BblSubType::Ipv6 {
                inner.ipv6_address
            } else {
                inner.delegated_ipv6_address
            };
            let src = config.ipv6_access_src_address
                .or(session_src)
                .ok_or(EncodeError::Incomplete("no access ipv6 address"))?;
            let dst = config.ipv6_destination_address
                .or(config.ipv6_network_address)
                .or(interface.ipv6.as_ref().map(|i| i.address))
                .ok_or(EncodeError::Incomplete("no ipv6 destination"))?;
            let padding = bbl_padding(config, BASE_LEN_IPV6);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv6Builder::new(src, dst, udp).traffic_class(config.priority);
            let pppoe = PppoeSessionBuilder::new(inner.pppoe_session_id, ip);
            let eth = access_eth(stream, session, server_mac, inner.client_mac, inner.qinq,
                                 inner.third_vlan, pppoe);
            finish(eth, BBL_HEADER_LEN + padding)
        }
    }
}

/// Upstream template of an IPoE session.
fn build_access_ipoe(ctx: &Context, stream: &Stream, session: &Arc<Session>) -> EncodeResult<Template> {
    let config = &stream.config;
    let interface = ctx.network_interface(config.network_interface.as_ref().map(|n| &n[..]))
        .or_else(|| session.network_interface.clone());
    let interface = match interface {
        Some(interface) => interface,
        None => return Err(EncodeError::Incomplete("missing network interface")),
    };
    let inner = session.inner();
    let server_mac = match inner.server_mac {
        Some(mac) => mac,
        None => return Err(EncodeError::Incomplete("server mac unknown")),
    };
    let header = base_header(stream, Some(session));

    match stream.stream_type {
        BblSubType::Ipv4 => {
            let src = config.ipv4_access_src_address
                .or(inner.ip_address)
                .ok_or(EncodeError::Incomplete("no access ipv4 address"))?;
            let dst = config.ipv4_destination_address
                .or(config.ipv4_network_address)
                .or(interface.ipv4.as_ref().map(|i| i.address))
                .ok_or(EncodeError::Incomplete("no ipv4 destination"))?;
            let padding = bbl_padding(config, BASE_LEN_IPV4);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv4Builder::new(src, dst, udp)
                .tos(config.priority)
                .identification(ipv4_identification(config))
                .dont_fragment(config.ipv4_df);
            let eth = access_eth(stream, session, server_mac, inner.client_mac, inner.qinq,
                                 inner.third_vlan, ip);
            finish(eth, BBL_HEADER_LEN + padding)
        }
        BblSubType::Ipv6 | BblSubType::Ipv6Pd => {
            let session_src = if stream.stream_type == BblSubType::Ipv6 {
                inner.ipv6_address
            } else {
                inner.delegated_ipv6_address
            };
            let src = config.ipv6_access_src_address
                .or(session_src)
                .ok_or(EncodeError::Incomplete("no access ipv6 address"))?;
            let dst = config.ipv6_destination_address
                .or(config.ipv6_network_address)
                .or(interface.ipv6.as_ref().map(|i| i.address))
                .ok_or(EncodeError::Incomplete("no ipv6 destination"))?;
            let padding = bbl_padding(config, BASE_LEN_IPV6);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv6Builder::new(src, dst, udp).traffic_class(config.priority);
            let eth = access_eth(stream, session, server_mac, inner.client_mac, inner.qinq,
                                 inner.third_vlan, ip);
            finish(eth, BBL_HEADER_LEN + padding)
        }
    }
}

fn access_eth<P: EthernetPayload>(stream: &Stream,
                                  session: &Session,
                                  server_mac: ::pnet::util::MacAddr,
                                  client_mac: ::pnet::util::MacAddr,
                                  qinq: bool,
                                  third_vlan: u16,
                                  payload: P)
                                  -> EthernetBuilder<P> {
    let priority = stream.config.vlan_priority;
    EthernetBuilder::new(client_mac, server_mac, payload)
        .qinq(qinq)
        .vlan_outer(session.key.outer_vlan, priority)
        .vlan_inner(session.key.inner_vlan, priority)
        .vlan_three(third_vlan)
}

/// A10NSP cross-connect template, both directions, PPPoE or IPoE.
fn build_a10nsp(stream: &Stream,
                session: &Arc<Session>,
                pppoe: bool)
                -> EncodeResult<Template> {
    let config = &stream.config;
    let inner = session.inner();
    let binding = match inner.a10nsp_binding {
        Some(ref binding) => binding,
        None => return Err(EncodeError::Incomplete("no a10nsp binding")),
    };
    let server_mac = match inner.server_mac {
        Some(mac) => mac,
        None => return Err(EncodeError::Incomplete("server mac unknown")),
    };
    let header = base_header(stream, Some(session));
    let priority = config.vlan_priority;

    // Direction decides which leg of the cross-connect we source from.
    let (eth_src, eth_dst, qinq, outer_vlan) = match stream.direction {
        BblDirection::Up => {
            (inner.client_mac, server_mac, inner.qinq, session.key.outer_vlan)
        }
        BblDirection::Down => (server_mac, inner.client_mac, binding.qinq, binding.s_vlan),
    };

    match stream.stream_type {
        BblSubType::Ipv4 => {
            let src = inner.ip_address
                .ok_or(EncodeError::Incomplete("no access ipv4 address"))?;
            let dst = config.ipv4_destination_address
                .or(config.ipv4_network_address)
                .unwrap_or(A10NSP_IPV4_LOCAL);
            let padding = bbl_padding(config, BASE_LEN_IPV4);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv4Builder::new(src, dst, udp)
                .tos(config.priority)
                .identification(ipv4_identification(config))
                .dont_fragment(config.ipv4_df);
            if pppoe {
                let pppoe = PppoeSessionBuilder::new(inner.pppoe_session_id, ip);
                let eth = EthernetBuilder::new(eth_src, eth_dst, pppoe)
                    .qinq(qinq)
                    .vlan_outer(outer_vlan, priority)
                    .vlan_inner(session.key.inner_vlan, priority)
                    .vlan_three(inner.third_vlan);
                finish(eth, BBL_HEADER_LEN + padding)
            } else {
                let eth = EthernetBuilder::new(eth_src, eth_dst, ip)
                    .qinq(qinq)
                    .vlan_outer(outer_vlan, priority)
                    .vlan_inner(session.key.inner_vlan, priority)
                    .vlan_three(inner.third_vlan);
                finish(eth, BBL_HEADER_LEN + padding)
            }
        }
        BblSubType::Ipv6 | BblSubType::Ipv6Pd => {
            // The cross-connect stays on link scope; the link-local
            // address wins as source over the session addressing.
            let src = inner.link_local_ipv6_address;
            let dst = config.ipv6_destination_address
                .or(config.ipv6_network_address)
                .unwrap_or(inner.link_local_ipv6_address);
            let padding = bbl_padding(config, BASE_LEN_IPV6);
            let udp = UdpBuilder::new(config.src_port,
                                      config.dst_port,
                                      BblPayload::new(header, padding));
            let ip = Ipv6Builder::new(src, dst, udp).traffic_class(config.priority);
            if pppoe {
                let pppoe = PppoeSessionBuilder::new(inner.pppoe_session_id, ip);
                let eth = EthernetBuilder::new(eth_src, eth_dst, pppoe)
                    .qinq(qinq)
                    .vlan_outer(outer_vlan, priority)
                    .vlan_inner(session.key.inner_vlan, priority)
                    .vlan_three(inner.third_vlan);
                finish(eth, BBL_HEADER_LEN + padding)
            } else {
                let eth = EthernetBuilder::new(eth_src, eth_dst, ip)
                    .qinq(qinq)
                    .vlan_outer(outer_vlan, priority)
                    .vlan_inner(session.key.inner_vlan, priority)
                    .vlan_three(inner.third_vlan);
                finish(eth, BBL_HEADER_LEN + padding)
            }
        }
    }
}

/// Downstream template towards an L2TP tunnelled PPPoE session: a full
/// outer IPv4/UDP/L2TP wrapper around the inner IPv4/UDP/record frame.
fn build_l2tp(stream: &Stream, session: &Arc<Session>) -> EncodeResult<Template> {
    let config = &stream.config;
    let inner = session.inner();
    let binding = match inner.l2tp_binding {
        Some(ref binding) => binding.clone(),
        None => return Err(EncodeError::Incomplete("no l2tp binding")),
    };
    let interface = &binding.network_interface;
    let gateway_mac = match interface.effective_gateway_mac() {
        Some(mac) => mac,
        None => return Err(EncodeError::Incomplete("gateway unresolved")),
    };
    let ip_address = inner.ip_address
        .ok_or(EncodeError::Incomplete("no session ipv4 address"))?;
    let header = base_header(stream, Some(session));

    let padding = bbl_padding(config, BASE_LEN_IPV4);
    let udp = UdpBuilder::new(config.src_port,
                              config.dst_port,
                              BblPayload::new(header, padding));
    let inner_ip = Ipv4Builder::new(binding.server_ip, ip_address, udp)
        .tos(config.priority)
        .identification(ipv4_identification(config))
        .dont_fragment(config.ipv4_df);
    let l2tp = L2tpDataBuilder::new(binding.peer_tunnel_id, binding.peer_session_id, inner_ip)
        .with_length(binding.data_length)
        .with_offset(binding.data_offset);
    let outer_udp = UdpBuilder::new(::L2TP_UDP_PORT, ::L2TP_UDP_PORT, l2tp);
    let outer_ip = Ipv4Builder::new(binding.server_ip, binding.peer_ip, outer_udp)
        .tos(config.priority)
        .identification(ipv4_identification(config));
    let eth = EthernetBuilder::new(interface.mac, gateway_mac, outer_ip)
        .vlan_outer(interface.vlan, config.vlan_priority);
    finish(eth, BBL_HEADER_LEN + padding)
}

/// Round-robin stream scheduler of one egress I/O context. Streams are
/// attached by the main thread; the owning I/O context pulls packets.
pub struct Scheduler {
    inner: Mutex<SchedulerInner>,
}

struct SchedulerInner {
    streams: Vec<Arc<Stream>>,
    cursor: usize,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            inner: Mutex::new(SchedulerInner {
                streams: Vec::new(),
                cursor: 0,
            }),
        }
    }

    pub fn add_stream(&self, stream: Arc<Stream>) {
        self.inner.lock().unwrap().streams.push(stream);
    }

    pub fn stream_count(&self) -> usize {
        self.inner.lock().unwrap().streams.len()
    }

    /// Closes every send window, e.g. when global traffic is disabled
    /// or the owning interface went down.
    pub fn stop_windows(&self) {
        let inner = self.inner.lock().unwrap();
        for stream in &inner.streams {
            let mut tx = stream.tx.lock().unwrap();
            tx.send_window_packets = 0;
            tx.tokens = 0;
        }
    }

    /// Pulls the next due stream packet and hands its bytes to `emit`.
    /// Returns `false` when no stream owes a packet right now; the TX
    /// burst loop stops on that.
    pub fn send_iter<F>(&self, ctx: &Context, now: &Timestamp, mut emit: F) -> bool
        where F: FnMut(&[u8])
    {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.streams.len();
        if count == 0 {
            return false;
        }
        for _ in 0..count {
            if inner.cursor >= count {
                inner.cursor = 0;
            }
            let stream = inner.streams[inner.cursor].clone();
            let mut tx = stream.tx.lock().unwrap();

            if stream.stop.load(Ordering::Relaxed) {
                tx.send_window_packets = 0;
                tx.tokens = 0;
                inner.cursor += 1;
                continue;
            }

            if tx.tokens == 0 {
                if !can_send(ctx, &stream, &mut tx) {
                    inner.cursor += 1;
                    continue;
                }
                if tx.buf.is_none() {
                    match build_template(ctx, &stream) {
                        Ok(template) => {
                            stream.tx_len.store(template.buf.len(), Ordering::Relaxed);
                            tx.len = template.buf.len();
                            tx.bbl_offset = template.bbl_offset;
                            tx.buf = Some(template.buf);
                        }
                        Err(e) => {
                            debug!("failed to build template for stream {}: {:?}",
                                   stream.config.name,
                                   e);
                            inner.cursor += 1;
                            continue;
                        }
                    }
                }
                if let Some(ref session) = stream.session {
                    let active = if stream.session_traffic {
                        session.session_traffic_active()
                    } else {
                        session.streams_active()
                    };
                    if !active {
                        tx.send_window_packets = 0;
                        inner.cursor += 1;
                        continue;
                    }
                }
                let packets_tx = stream.packets_tx.load(Ordering::Relaxed);
                tx.tokens =
                    send_window(&stream.config, &mut tx, packets_tx, now, ctx.io_stream_max_ppi());
                if tx.tokens == 0 {
                    inner.cursor += 1;
                    continue;
                }
            }

            // One packet out of the granted window.
            let flow_seq = tx.flow_seq;
            let bbl_offset = tx.bbl_offset;
            match tx.buf {
                Some(ref mut buf) => {
                    BblHeader::patch(&mut buf[bbl_offset..], flow_seq, now);
                    emit(&buf[..]);
                }
                None => {
                    inner.cursor += 1;
                    continue;
                }
            }
            tx.flow_seq += 1;
            tx.tokens -= 1;
            tx.send_window_packets += 1;
            stream.packets_tx.fetch_add(1, Ordering::Relaxed);
            if tx.tokens == 0 {
                inner.cursor += 1;
            }
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::StreamTxState;

    fn state() -> StreamTxState {
        StreamTxState {
            buf: None,
            len: 0,
            bbl_offset: 0,
            flow_seq: 1,
            send_window_start: Timestamp::default(),
            send_window_packets: 0,
            tokens: 0,
            wait: false,
            wait_start: Timestamp::default(),
        }
    }

    fn at(sec: u64, nsec: u32) -> Timestamp {
        Timestamp {
            sec: sec,
            nsec: nsec,
        }
    }

    #[test]
    fn first_call_opens_window_with_one_packet() {
        let config = StreamConfig {
            pps: 1000.0,
            ..StreamConfig::default()
        };
        let mut tx = state();
        let granted = send_window(&config, &mut tx, 0, &at(100, 0), 32);
        assert_eq!(granted, 1);
        assert_eq!(tx.send_window_start, at(100, 0));
    }

    #[test]
    fn window_drift_corrects_missed_ticks() {
        let config = StreamConfig {
            pps: 1000.0,
            ..StreamConfig::default()
        };
        let mut tx = state();
        send_window(&config, &mut tx, 0, &at(100, 0), 1000);
        tx.send_window_packets = 1;
        // 10 ms later 10 packets are expected in total.
        let granted = send_window(&config, &mut tx, 1, &at(100, 10_000_000), 1000);
        assert_eq!(granted, 9);
        // A stalled tick catches up but is clamped by max ppi.
        let granted = send_window(&config, &mut tx, 1, &at(100, 500_000_000), 32);
        assert_eq!(granted, 32);
    }

    #[test]
    fn window_grants_nothing_when_ahead() {
        let config = StreamConfig {
            pps: 10.0,
            ..StreamConfig::default()
        };
        let mut tx = state();
        send_window(&config, &mut tx, 0, &at(100, 0), 32);
        tx.send_window_packets = 5;
        // 100 ms in, only one packet was expected; we are ahead.
        let granted = send_window(&config, &mut tx, 5, &at(100, 100_000_000), 32);
        assert_eq!(granted, 0);
    }

    #[test]
    fn start_delay_uses_wait_window() {
        let config = StreamConfig {
            pps: 500.0,
            start_delay: 3,
            ..StreamConfig::default()
        };
        let mut tx = state();
        // First call only arms the wait window.
        assert_eq!(send_window(&config, &mut tx, 0, &at(10, 0), 32), 0);
        assert!(tx.wait);
        // Still waiting just before expiry.
        assert_eq!(send_window(&config, &mut tx, 0, &at(12, 999_999_999), 32), 0);
        // First packet on the first call at/after expiry.
        assert_eq!(send_window(&config, &mut tx, 0, &at(13, 0), 32), 1);
    }

    #[test]
    fn max_packets_is_exact() {
        let config = StreamConfig {
            pps: 1000.0,
            max_packets: 10,
            ..StreamConfig::default()
        };
        let mut tx = state();
        let mut sent = 0;
        let mut now = at(100, 0);
        for _ in 0..100 {
            let granted = send_window(&config, &mut tx, sent, &now, 32);
            sent += granted;
            tx.send_window_packets += granted;
            now.nsec += 50_000_000;
            if now.nsec >= 1_000_000_000 {
                now.nsec -= 1_000_000_000;
                now.sec += 1;
            }
        }
        assert_eq!(sent, 10);
    }
}
