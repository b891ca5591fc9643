//! Subscriber session model.
//!
//! The access-side protocol engines (PPP, DHCP, DHCPv6, router
//! advertisement handling) live outside this crate; what the traffic
//! engine needs from them is the addressing a session has negotiated
//! and the readiness state that gates whether a stream bound to the
//! session may transmit. Both are collected here. The protocol engines
//! update a session through `inner_mut`, the traffic engine reads it.

use pnet::util::MacAddr;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use netif::NetworkInterface;
use stream::Stream;

/// Key identifying a session by its access VLAN binding.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SessionKey {
    pub ifindex: u32,
    pub outer_vlan: u16,
    pub inner_vlan: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessType {
    Pppoe,
    Ipoe,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Pending,
    Established,
    Terminating,
    Terminated,
}

/// State of a PPP network control protocol (IPCP or IP6CP).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NcpState {
    Closed,
    Negotiating,
    Opened,
}

/// L2TP binding of a tunnelled PPPoE session, filled in by the L2TP
/// control engine once the data session is up.
pub struct L2tpBinding {
    /// Tunnel id assigned by the LAC (used on transmit).
    pub peer_tunnel_id: u16,
    pub peer_session_id: u16,
    /// LNS endpoint addresses of the data channel.
    pub server_ip: Ipv4Addr,
    pub peer_ip: Ipv4Addr,
    /// Whether data messages carry the optional length / offset words.
    pub data_length: bool,
    pub data_offset: bool,
    /// Network interface the tunnel runs over.
    pub network_interface: Arc<NetworkInterface>,
}

/// A10NSP cross-connect binding of a session.
pub struct A10nspBinding {
    pub s_vlan: u16,
    pub qinq: bool,
}

/// Addressing and protocol readiness, written by the control engines.
pub struct SessionInner {
    pub state: SessionState,
    pub client_mac: MacAddr,
    /// MAC of the BNG side, learned during discovery.
    pub server_mac: Option<MacAddr>,
    pub qinq: bool,
    pub third_vlan: u16,
    pub pppoe_session_id: u16,
    pub ip_address: Option<Ipv4Addr>,
    pub ipv6_address: Option<Ipv6Addr>,
    pub delegated_ipv6_address: Option<Ipv6Addr>,
    pub link_local_ipv6_address: Ipv6Addr,
    pub ipcp_state: NcpState,
    pub ip6cp_state: NcpState,
    pub icmpv6_ra_received: bool,
    pub dhcpv6_bound: bool,
    /// Session is expected to be tunnelled; streams hold off until the
    /// binding below appears.
    pub l2tp: bool,
    pub l2tp_binding: Option<Arc<L2tpBinding>>,
    pub a10nsp_binding: Option<A10nspBinding>,
}

/// Aggregated per-session counters, reconciled once per second from
/// the per-stream counters.
#[derive(Default)]
pub struct SessionStats {
    pub packets_tx: AtomicU64,
    pub packets_rx: AtomicU64,
    pub bytes_tx: AtomicU64,
    pub bytes_rx: AtomicU64,
}

pub struct Session {
    pub session_id: u32,
    pub access_type: AccessType,
    pub key: SessionKey,
    /// Stream group whose configurations attach to this session.
    pub stream_group_id: u16,
    pub network_interface: Option<Arc<NetworkInterface>>,
    /// Session traffic pacing can be toggled at runtime without
    /// touching the per-stream configuration.
    pub streams_active: AtomicBool,
    pub session_traffic_active: AtomicBool,
    pub stats: SessionStats,
    pub flows_verified: AtomicU64,
    streams: Mutex<Vec<Arc<Stream>>>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(session_id: u32,
               access_type: AccessType,
               key: SessionKey,
               stream_group_id: u16,
               client_mac: MacAddr,
               network_interface: Option<Arc<NetworkInterface>>)
               -> Session {
        Session {
            session_id: session_id,
            access_type: access_type,
            key: key,
            stream_group_id: stream_group_id,
            network_interface: network_interface,
            streams_active: AtomicBool::new(true),
            session_traffic_active: AtomicBool::new(true),
            stats: SessionStats::default(),
            flows_verified: AtomicU64::new(0),
            streams: Mutex::new(Vec::new()),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                client_mac: client_mac,
                server_mac: None,
                qinq: false,
                third_vlan: 0,
                pppoe_session_id: 0,
                ip_address: None,
                ipv6_address: None,
                delegated_ipv6_address: None,
                link_local_ipv6_address: Ipv6Addr::UNSPECIFIED,
                ipcp_state: NcpState::Closed,
                ip6cp_state: NcpState::Closed,
                icmpv6_ra_received: false,
                dhcpv6_bound: false,
                l2tp: false,
                l2tp_binding: None,
                a10nsp_binding: None,
            }),
        }
    }

    pub fn inner(&self) -> MutexGuard<SessionInner> {
        self.inner.lock().unwrap()
    }

    /// Entry point for the external control engines.
    pub fn inner_mut(&self) -> MutexGuard<SessionInner> {
        self.inner.lock().unwrap()
    }

    pub fn is_established(&self) -> bool {
        self.inner().state == SessionState::Established
    }

    pub fn add_stream(&self, stream: Arc<Stream>) {
        self.streams.lock().unwrap().push(stream);
    }

    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.lock().unwrap().clone()
    }

    pub fn streams_active(&self) -> bool {
        self.streams_active.load(Ordering::Relaxed)
    }

    pub fn session_traffic_active(&self) -> bool {
        self.session_traffic_active.load(Ordering::Relaxed)
    }
}
