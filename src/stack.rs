//! Orchestration: context, physical interfaces, startup validation,
//! stream and worker lifecycle, the main timer loop and teardown.
//!
//! There is no ambient global state; everything lives in a `Context`
//! value created at startup and threaded through the I/O and stream
//! engines by reference.

use ipnetwork::{Ipv4Network, Ipv6Network};
use pnet::datalink;
use pnet::util::MacAddr;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use config::{Config, IoModeConfig};
use handlers::{NullHandlers, PcapSink, ProtocolHandlers};
use io::{self, IoBackend, IoDirection, IoHandle, IoThread, MmapRing, RawLink};
use netif::{self, A10nspInterface, AccessInterface, NetifIpv4, NetifIpv6, NetworkInterface};
use packet::bbl::{BblDirection, BblSubType};
use packet::{EthernetFrame, Icmpv6Fields, L3, L4, PppPayloadFields, UdpPayload,
             ICMPV6_TYPE_ROUTER_ADVERTISEMENT};
use session::{Session, SessionKey};
use stats::InterfaceStats;
use stream::{self, DirectionConfig, FlowRegistry, Scheduler, Stream, StreamConfig};
use timer::TimerRoot;
use {config, ConfigError};

/// Error returned upon invalid usage or state of the stack.
#[derive(Debug)]
pub enum StackError {
    Config(ConfigError),
    DuplicateFlow(u64),
    InvalidInterface(String),
    IoError(::std::io::Error),
}

impl From<ConfigError> for StackError {
    fn from(e: ConfigError) -> StackError {
        StackError::Config(e)
    }
}

impl From<::std::io::Error> for StackError {
    fn from(e: ::std::io::Error) -> StackError {
        StackError::IoError(e)
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StackError::Config(ref e) => write!(f, "configuration error: {}", e),
            StackError::DuplicateFlow(flow_id) => write!(f, "duplicate flow id {}", flow_id),
            StackError::InvalidInterface(ref name) => write!(f, "invalid interface {}", name),
            StackError::IoError(ref e) => write!(f, "io error: {}", e),
        }
    }
}

pub type StackResult<T> = Result<T, StackError>;

/// Egress attachment point for streams on one physical port: either a
/// TX worker or the main-loop TX job, with the scheduler that feeds
/// it.
pub struct TxAttachment {
    pub scheduler: Arc<Scheduler>,
    pub thread: Option<Arc<IoThread>>,
}

/// One physical port with its emulated sub-interfaces.
pub struct Interface {
    pub name: String,
    pub ifindex: u32,
    pub mac: MacAddr,
    up: AtomicBool,
    network: Mutex<HashMap<u16, Arc<NetworkInterface>>>,
    pub access: Option<Arc<AccessInterface>>,
    pub a10nsp: Option<Arc<A10nspInterface>>,
    pub tx_attachments: Mutex<Vec<TxAttachment>>,
    pub stats: InterfaceStats,
}

impl Interface {
    pub fn new(name: String, ifindex: u32, mac: MacAddr) -> Interface {
        Interface {
            name: name,
            ifindex: ifindex,
            mac: mac,
            up: AtomicBool::new(true),
            network: Mutex::new(HashMap::new()),
            access: None,
            a10nsp: None,
            tx_attachments: Mutex::new(Vec::new()),
            stats: InterfaceStats::default(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }

    pub fn network_guard(&self) -> MutexGuard<HashMap<u16, Arc<NetworkInterface>>> {
        self.network.lock().unwrap()
    }

    pub fn network_by_vlan(&self, vlan: u16) -> Option<Arc<NetworkInterface>> {
        self.network.lock().unwrap().get(&vlan).cloned()
    }

    /// Picks the least loaded TX worker for a new stream, falling back
    /// to the main-loop attachment, and credits it with the stream's
    /// rate.
    pub fn attach_stream(&self, stream: Arc<Stream>) -> StackResult<()> {
        let pps = stream.config.pps;
        let attachments = self.tx_attachments.lock().unwrap();
        if attachments.is_empty() {
            return Err(StackError::InvalidInterface(self.name.clone()));
        }
        let mut choice: Option<(f64, &TxAttachment)> = None;
        for attachment in attachments.iter() {
            if let Some(ref thread) = attachment.thread {
                let reserved = thread.pps_reserved();
                let better = match choice {
                    None => true,
                    Some((best, _)) => reserved < best,
                };
                if better {
                    choice = Some((reserved, attachment));
                }
            }
        }
        match choice {
            Some((_, attachment)) => {
                if let Some(ref thread) = attachment.thread {
                    thread.reserve_pps(pps);
                }
                attachment.scheduler.add_stream(stream);
            }
            None => attachments[0].scheduler.add_stream(stream),
        }
        Ok(())
    }
}

/// Process-wide state, created once at startup and passed by
/// reference. Replaces a global context.
pub struct Context {
    pub config: Config,
    init_phase: AtomicBool,
    traffic: AtomicBool,
    teardown: AtomicBool,
    flows: FlowRegistry,
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    network_interfaces: Mutex<Vec<Arc<NetworkInterface>>>,
    a10nsp_interfaces: Mutex<Vec<Arc<A10nspInterface>>>,
    handlers: Box<ProtocolHandlers>,
    pcap: Option<Box<PcapSink>>,
    pub secondary_ipv4: Vec<::std::net::Ipv4Addr>,
    pub secondary_ipv6: Vec<::std::net::Ipv6Addr>,
}

impl Context {
    pub fn new(config: Config) -> Context {
        Context::with_handlers(config, Box::new(NullHandlers), None)
    }

    pub fn with_handlers(config: Config,
                         handlers: Box<ProtocolHandlers>,
                         pcap: Option<Box<PcapSink>>)
                         -> Context {
        let secondary_ipv4 = config.secondary_ip_addresses.clone();
        let secondary_ipv6 = config.secondary_ip6_addresses.clone();
        Context {
            config: config,
            init_phase: AtomicBool::new(true),
            traffic: AtomicBool::new(true),
            teardown: AtomicBool::new(false),
            flows: FlowRegistry::new(),
            sessions: Mutex::new(HashMap::new()),
            network_interfaces: Mutex::new(Vec::new()),
            a10nsp_interfaces: Mutex::new(Vec::new()),
            handlers: handlers,
            pcap: pcap,
            secondary_ipv4: secondary_ipv4,
            secondary_ipv6: secondary_ipv6,
        }
    }

    pub fn init_phase(&self) -> bool {
        self.init_phase.load(Ordering::Relaxed)
    }

    pub fn set_init_phase(&self, init: bool) {
        self.init_phase.store(init, Ordering::Relaxed);
    }

    pub fn traffic_enabled(&self) -> bool {
        self.traffic.load(Ordering::Relaxed)
    }

    /// Global traffic switch; disabling closes every send window on
    /// the next scheduler pass.
    pub fn set_traffic(&self, enabled: bool) {
        self.traffic.store(enabled, Ordering::Relaxed);
    }

    pub fn teardown(&self) -> bool {
        self.teardown.load(Ordering::Relaxed)
    }

    pub fn request_teardown(&self) {
        self.teardown.store(true, Ordering::Relaxed);
    }

    pub fn io_stream_max_ppi(&self) -> u64 {
        self.config.interfaces.io_stream_max_ppi
    }

    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    pub fn handlers(&self) -> &ProtocolHandlers {
        &*self.handlers
    }

    pub fn pcap(&self) -> Option<&PcapSink> {
        match self.pcap {
            Some(ref sink) => Some(&**sink),
            None => None,
        }
    }

    pub fn add_network_interface(&self, interface: Arc<NetworkInterface>) {
        self.network_interfaces.lock().unwrap().push(interface);
    }

    /// Network interface by name, or the first configured one when no
    /// name is given.
    pub fn network_interface(&self, name: Option<&str>) -> Option<Arc<NetworkInterface>> {
        let interfaces = self.network_interfaces.lock().unwrap();
        match name {
            Some(name) => interfaces.iter().find(|interface| interface.name == name).cloned(),
            None => interfaces.first().cloned(),
        }
    }

    pub fn network_interfaces(&self) -> Vec<Arc<NetworkInterface>> {
        self.network_interfaces.lock().unwrap().clone()
    }

    pub fn add_a10nsp_interface(&self, interface: Arc<A10nspInterface>) {
        self.a10nsp_interfaces.lock().unwrap().push(interface);
    }

    pub fn a10nsp_interface(&self, name: &str) -> Option<Arc<A10nspInterface>> {
        self.a10nsp_interfaces
            .lock()
            .unwrap()
            .iter()
            .find(|interface| interface.name == name)
            .cloned()
    }

    pub fn add_session(&self, session: Arc<Session>) {
        self.sessions.lock().unwrap().insert(session.key, session);
    }

    pub fn session(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(key).cloned()
    }
}

/// Routes one decoded frame received on a physical port: test packets
/// into the flow matcher (with the receiving session for mis-delivery
/// classification), control frames into the sub-interface handlers.
pub fn rx_frame(ctx: &Context, interface: &Interface, frame: &EthernetFrame) {
    if let Some(ref bbl) = frame.bbl {
        let session = if interface.access.is_some() {
            ctx.session(&SessionKey {
                ifindex: interface.ifindex,
                outer_vlan: frame.vlan_outer,
                inner_vlan: frame.vlan_inner,
            })
        } else {
            None
        };
        stream::stream_rx(&ctx.flows,
                          frame,
                          bbl,
                          session.as_ref(),
                          ctx.config.traffic_stop_verified);
        return;
    }

    if let Some(netif) = interface.network_by_vlan(frame.vlan_outer) {
        netif.stats.add_rx(1, frame.length as u64);
        netif::rx_handler(&netif,
                          ctx.handlers(),
                          &ctx.secondary_ipv4,
                          &ctx.secondary_ipv6,
                          frame);
        return;
    }
    if let Some(ref access) = interface.access {
        access.stats.add_rx(1, frame.length as u64);
        access_rx(ctx, interface, access, frame);
        return;
    }
    interface.stats.unknown.fetch_add(1, Ordering::Relaxed);
}

/// Control traffic on the subscriber side. The access protocol
/// machinery is external; this only routes frames to it.
fn access_rx(ctx: &Context,
             interface: &Interface,
             access: &Arc<AccessInterface>,
             frame: &EthernetFrame) {
    let session = ctx.session(&SessionKey {
        ifindex: interface.ifindex,
        outer_vlan: frame.vlan_outer,
        inner_vlan: frame.vlan_inner,
    });
    match frame.payload {
        L3::PppoeDiscovery(_) => {
            ctx.handlers().handle_pppoe_discovery(access, frame);
        }
        L3::PppoeSession(ref pppoe) => {
            let session = match session {
                Some(session) => session,
                None => {
                    access.stats.unknown.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };
            match pppoe.payload {
                PppPayloadFields::Ipv6(ref ipv6) => {
                    if is_router_advertisement(&ipv6.payload) {
                        ctx.handlers().handle_icmpv6_ra(&session, frame);
                    } else {
                        ctx.handlers().handle_pppoe_session(&session, frame);
                    }
                }
                _ => {
                    ctx.handlers().handle_pppoe_session(&session, frame);
                }
            }
        }
        L3::Ipv4(ref ipv4) => {
            match ipv4.payload {
                L4::Udp(ref udp) => {
                    match udp.payload {
                        UdpPayload::Dhcp(_) => ctx.handlers().handle_dhcp(access, frame),
                        _ => {
                            access.stats.unknown.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                // IGMP
                L4::Other(2, _) => {
                    if let Some(ref session) = session {
                        ctx.handlers().handle_igmp(session, frame);
                    }
                }
                _ => {
                    access.stats.unknown.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        L3::Ipv6(ref ipv6) => {
            match ipv6.payload {
                L4::Udp(ref udp) => {
                    match udp.payload {
                        UdpPayload::Dhcpv6(_) => {
                            if let Some(ref session) = session {
                                ctx.handlers().handle_dhcpv6(session, frame);
                            }
                        }
                        _ => {
                            access.stats.unknown.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                L4::Icmpv6(ref icmpv6) => {
                    if icmpv6.icmpv6_type == ICMPV6_TYPE_ROUTER_ADVERTISEMENT {
                        if let Some(ref session) = session {
                            ctx.handlers().handle_icmpv6_ra(session, frame);
                        }
                    }
                }
                _ => {
                    access.stats.unknown.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        _ => {
            access.stats.unknown.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn is_router_advertisement(payload: &L4) -> bool {
    match *payload {
        L4::Icmpv6(Icmpv6Fields { icmpv6_type, .. }) => {
            icmpv6_type == ICMPV6_TYPE_ROUTER_ADVERTISEMENT
        }
        _ => false,
    }
}

/// Session traffic stream configurations synthesized from the
/// `session-traffic` section, one per type and direction.
struct SessionTrafficConfigs {
    ipv4_up: Option<Arc<StreamConfig>>,
    ipv4_down: Option<Arc<StreamConfig>>,
    ipv6_up: Option<Arc<StreamConfig>>,
    ipv6_down: Option<Arc<StreamConfig>>,
    ipv6pd_up: Option<Arc<StreamConfig>>,
    ipv6pd_down: Option<Arc<StreamConfig>>,
}

/// The emulator core. Owns the timer root, physical interfaces and
/// worker threads; everything else hangs off the shared context.
pub struct Stack {
    ctx: Arc<Context>,
    timer: TimerRoot,
    interfaces: Vec<Arc<Interface>>,
    threads: Vec<Arc<IoThread>>,
    stream_configs: Vec<Arc<StreamConfig>>,
    session_traffic: SessionTrafficConfigs,
}

impl Stack {
    pub fn new(config: Config) -> StackResult<Stack> {
        Stack::with_handlers(config, Box::new(NullHandlers), None)
    }

    /// Builds and validates the stack without touching any sockets.
    /// Fatal configuration errors surface here with a named reason.
    pub fn with_handlers(config: Config,
                         handlers: Box<ProtocolHandlers>,
                         pcap: Option<Box<PcapSink>>)
                         -> StackResult<Stack> {
        let ctx = Arc::new(Context::with_handlers(config, handlers, pcap));
        let mut interfaces: Vec<Arc<Interface>> = Vec::new();

        for link in &ctx.config.interfaces.links {
            let (ifindex, link_mac) = resolve_physical(&link.interface)?;
            let mac = match link.mac {
                Some(ref mac) => config::parse_mac(mac)?,
                None => link_mac,
            };
            let mut interface = Interface::new(link.interface.clone(), ifindex, mac);
            if ctx.config
                .interfaces
                .access
                .iter()
                .any(|access| access.interface == link.interface) {
                interface.access =
                    Some(Arc::new(AccessInterface::new(link.interface.clone(), ifindex)));
            }
            if let Some(a10nsp) = ctx.config
                .interfaces
                .a10nsp
                .iter()
                .find(|a10nsp| a10nsp.interface == link.interface) {
                let a10nsp =
                    Arc::new(A10nspInterface::new(link.interface.clone(), ifindex, a10nsp.qinq));
                ctx.add_a10nsp_interface(a10nsp.clone());
                interface.a10nsp = Some(a10nsp);
            }
            interfaces.push(Arc::new(interface));
        }

        for network in &ctx.config.interfaces.network {
            let interface = interfaces.iter()
                .find(|interface| interface.name == network.interface)
                .ok_or_else(|| ConfigError::MissingInterface(network.interface.clone()))?;
            if network.vlan == 0 && interface.access.is_some() {
                return Err(ConfigError::UntaggedOnAccess(network.interface.clone()).into());
            }
            if interface.network_by_vlan(network.vlan).is_some() {
                return Err(ConfigError::DuplicateVlan(network.interface.clone(), network.vlan)
                    .into());
            }
            if network.isis_instance_id != 0 || network.ospf_instance_id != 0 {
                // Routing engines register themselves through the
                // handler seam; an id without an engine is a typo.
                return Err(ConfigError::Invalid(format!("routing instance on {} not found",
                                                        network.interface))
                    .into());
            }
            let name = if network.vlan != 0 {
                format!("{}:{}", network.interface, network.vlan)
            } else {
                network.interface.clone()
            };
            let mac = match network.mac {
                Some(ref mac) => config::parse_mac(mac)?,
                None => interface.mac,
            };
            let gateway_mac = match network.gateway_mac {
                Some(ref mac) => Some(config::parse_mac(mac)?),
                None => None,
            };
            let ipv4 = match network.ipv4 {
                Some(ref ipv4) => {
                    Ipv4Network::new(ipv4.address, ipv4.len).map_err(|_| {
                            ConfigError::Invalid(format!("ipv4 prefix {}/{}",
                                                         ipv4.address,
                                                         ipv4.len))
                        })?;
                    Some(NetifIpv4 {
                        address: ipv4.address,
                        prefix_len: ipv4.len,
                        gateway: ipv4.gateway,
                    })
                }
                None => None,
            };
            let ipv6 = match network.ipv6 {
                Some(ref ipv6) => {
                    Ipv6Network::new(ipv6.address, ipv6.len).map_err(|_| {
                            ConfigError::Invalid(format!("ipv6 prefix {}/{}",
                                                         ipv6.address,
                                                         ipv6.len))
                        })?;
                    Some(NetifIpv6 {
                        address: ipv6.address,
                        prefix_len: ipv6.len,
                        gateway: ipv6.gateway,
                    })
                }
                None => None,
            };
            let netif = Arc::new(NetworkInterface::new(name,
                                                       interface.ifindex,
                                                       network.vlan,
                                                       mac,
                                                       gateway_mac,
                                                       ipv4,
                                                       ipv6,
                                                       network.tx_label
                                                           .as_ref()
                                                           .map(|label| label.to_label()),
                                                       network.gateway_resolve_wait,
                                                       ctx.config.interfaces.txq_slots));
            interface.network_guard().insert(network.vlan, netif.clone());
            ctx.add_network_interface(netif);
            debug!("added network interface {}:{}", network.interface, network.vlan);
        }

        let stream_configs = ctx.config
            .streams
            .iter()
            .map(|section| Arc::new(section.to_stream_config()))
            .collect();
        let session_traffic = build_session_traffic_configs(&ctx.config);

        Ok(Stack {
            ctx: ctx,
            timer: TimerRoot::new(),
            interfaces: interfaces,
            threads: Vec::new(),
            stream_configs: stream_configs,
            session_traffic: session_traffic,
        })
    }

    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn interface(&self, name: &str) -> Option<&Arc<Interface>> {
        self.interfaces.iter().find(|interface| interface.name == name)
    }

    fn interface_by_ifindex(&self, ifindex: u32) -> Option<&Arc<Interface>> {
        self.interfaces.iter().find(|interface| interface.ifindex == ifindex)
    }

    /// Opens the packet I/O, spawns workers, registers all periodic
    /// jobs and builds the raw streams. After this the stack is live;
    /// call `run` to drive it.
    pub fn start(&mut self) -> StackResult<()> {
        let io_mode = self.ctx.config.interfaces.io_mode;
        let burst = self.ctx.config.interfaces.io_burst;
        let io_slots = self.ctx.config.interfaces.io_slots;
        let txq_slots = self.ctx.config.interfaces.txq_slots;
        let rx_interval = Duration::from_millis(self.ctx.config.interfaces.rx_interval_ms);
        let tx_interval = Duration::from_millis(self.ctx.config.interfaces.tx_interval_ms);

        for index in 0..self.ctx.config.interfaces.links.len() {
            let link_name = self.ctx.config.interfaces.links[index].interface.clone();
            let rx_threaded = self.ctx.config.interfaces.links[index].rx_threads > 0;
            let tx_threads = self.ctx.config.interfaces.links[index].tx_threads;
            let rx_cpu = self.ctx.config.interfaces.links[index].rx_cpuset.first().cloned();
            let tx_cpuset = self.ctx.config.interfaces.links[index].tx_cpuset.clone();
            let interface = self.interface(&link_name)
                .cloned()
                .ok_or_else(|| StackError::InvalidInterface(link_name.clone()))?;

            // RX side: one worker, or a main-loop job.
            let rx_io = open_io(io_mode, &interface, IoDirection::Ingress, io_slots, burst)?;
            if rx_threaded {
                let thread = IoThread::new(format!("rx:{}", link_name),
                                           IoDirection::Ingress,
                                           txq_slots,
                                           rx_io.stats.clone(),
                                           rx_io.scheduler.clone(),
                                           rx_cpu);
                IoThread::start(&thread, self.ctx.clone(), interface.clone(), rx_io);
                self.threads.push(thread.clone());
                // Main-loop job draining the worker's redirect ring.
                let ctx = self.ctx.clone();
                let job_interface = interface.clone();
                self.timer.add_periodic(&format!("RX {}", link_name),
                                        rx_interval.as_secs(),
                                        rx_interval.subsec_nanos(),
                                        move |_| {
                    io::drain_redirect(&ctx, &job_interface, &thread);
                });
            } else {
                let handle = Arc::new(Mutex::new(rx_io));
                let ctx = self.ctx.clone();
                let job_interface = interface.clone();
                self.timer.add_periodic(&format!("RX {}", link_name),
                                        rx_interval.as_secs(),
                                        rx_interval.subsec_nanos(),
                                        move |timestamp| {
                    handle.lock().unwrap().rx_once(&ctx, &job_interface, timestamp);
                });
            }

            // TX side: n workers, or one main-loop job.
            if tx_threads > 0 {
                for worker in 0..tx_threads {
                    let tx_io =
                        open_io(io_mode, &interface, IoDirection::Egress, io_slots, burst)?;
                    let cpu = if tx_cpuset.is_empty() {
                        None
                    } else {
                        tx_cpuset.get(worker as usize % tx_cpuset.len()).cloned()
                    };
                    let thread = IoThread::new(format!("tx:{}:{}", link_name, worker),
                                               IoDirection::Egress,
                                               txq_slots,
                                               tx_io.stats.clone(),
                                               tx_io.scheduler.clone(),
                                               cpu);
                    interface.tx_attachments.lock().unwrap().push(TxAttachment {
                        scheduler: tx_io.scheduler.clone(),
                        thread: Some(thread.clone()),
                    });
                    IoThread::start(&thread, self.ctx.clone(), interface.clone(), tx_io);
                    self.threads.push(thread);
                }
            } else {
                let tx_io = open_io(io_mode, &interface, IoDirection::Egress, io_slots, burst)?;
                interface.tx_attachments.lock().unwrap().push(TxAttachment {
                    scheduler: tx_io.scheduler.clone(),
                    thread: None,
                });
                let handle = Arc::new(Mutex::new(tx_io));
                let ctx = self.ctx.clone();
                let job_interface = interface.clone();
                self.timer.add_periodic(&format!("TX {}", link_name),
                                        tx_interval.as_secs(),
                                        tx_interval.subsec_nanos(),
                                        move |timestamp| {
                    handle.lock().unwrap().tx_once(&ctx, &job_interface, timestamp);
                });
            }
        }

        self.register_interface_jobs(tx_interval);
        self.build_raw_streams()?;

        self.ctx.set_init_phase(false);
        info!("stack started with {} interfaces and {} workers",
              self.interfaces.len(),
              self.threads.len());
        Ok(())
    }

    fn register_interface_jobs(&mut self, tx_interval: Duration) {
        for netif in self.ctx.network_interfaces() {
            // Pending control requests become queued packets at TX
            // pace; resolution retries re-arm them once per second
            // until the gateway answers.
            let control_netif = netif.clone();
            self.timer.add_periodic(&format!("CTRL {}", netif.name),
                                    tx_interval.as_secs(),
                                    tx_interval.subsec_nanos(),
                                    move |_| {
                control_netif.process_send_requests();
            });
            let retry_netif = netif.clone();
            self.timer.add_periodic(&format!("RESOLVE {}", netif.name), 1, 0, move |_| {
                retry_netif.retry_resolution();
            });
            let rate_netif = netif.clone();
            self.timer.add_periodic(&format!("RATE {}", netif.name), 1, 0, move |_| {
                rate_netif.update_rates();
            });
        }
        for interface in &self.interfaces {
            if let Some(ref access) = interface.access {
                let access = access.clone();
                self.timer.add_periodic(&format!("RATE {}", access.name), 1, 0, move |_| {
                    access.update_rates();
                });
            }
            if let Some(ref a10nsp) = interface.a10nsp {
                let a10nsp = a10nsp.clone();
                self.timer.add_periodic(&format!("RATE {}", a10nsp.name), 1, 0, move |_| {
                    a10nsp.update_rates();
                });
            }
        }
        // Once per second every stream reconciles counters and rates.
        let ctx = self.ctx.clone();
        self.timer.add_periodic("STREAM-CTRL", 1, 0, move |_| {
            for stream in ctx.flows().all() {
                stream::stream_ctrl(&stream);
            }
        });
    }

    /// Raw streams only need a network interface and exist for the
    /// whole run.
    fn build_raw_streams(&mut self) -> StackResult<()> {
        let configs: Vec<Arc<StreamConfig>> = self.stream_configs
            .iter()
            .filter(|config| config.stream_group_id == 0)
            .cloned()
            .collect();
        for config in configs {
            if config.direction.has_down() {
                self.add_stream(config.clone(), None, BblDirection::Down)?;
            }
        }
        Ok(())
    }

    /// Builds the streams of a freshly established session: the
    /// autogenerated session traffic plus every stream configuration
    /// of the session's group.
    ///
    /// A session that re-establishes after renegotiation keeps its
    /// flow ids: the existing streams are reset (flow sequence back to
    /// one, receive state and verification cleared, template freed)
    /// instead of minting new flows.
    pub fn session_established(&self, session: &Arc<Session>) -> StackResult<()> {
        let existing = session.streams();
        if !existing.is_empty() {
            debug!("session {} re-established, resetting {} streams",
                   session.session_id,
                   existing.len());
            for stream in existing {
                self.ctx.flows.reset_stream(&stream);
            }
            return Ok(());
        }
        {
            let traffic = [(&self.session_traffic.ipv4_up, BblDirection::Up),
                           (&self.session_traffic.ipv4_down, BblDirection::Down),
                           (&self.session_traffic.ipv6_up, BblDirection::Up),
                           (&self.session_traffic.ipv6_down, BblDirection::Down),
                           (&self.session_traffic.ipv6pd_up, BblDirection::Up),
                           (&self.session_traffic.ipv6pd_down, BblDirection::Down)];
            for &(config, direction) in traffic.iter() {
                if let Some(ref config) = *config {
                    self.add_stream(config.clone(), Some(session.clone()), direction)?;
                }
            }
        }
        if session.stream_group_id != 0 {
            let configs: Vec<Arc<StreamConfig>> = self.stream_configs
                .iter()
                .filter(|config| config.stream_group_id == session.stream_group_id)
                .cloned()
                .collect();
            for config in configs {
                if config.direction.has_up() {
                    self.add_stream(config.clone(), Some(session.clone()), BblDirection::Up)?;
                }
                if config.direction.has_down() {
                    self.add_stream(config.clone(), Some(session.clone()), BblDirection::Down)?;
                }
            }
        }
        Ok(())
    }

    /// Creates one stream, registers its flow and attaches it to the
    /// least loaded egress of the right physical port.
    pub fn add_stream(&self,
                      config: Arc<StreamConfig>,
                      session: Option<Arc<Session>>,
                      direction: BblDirection)
                      -> StackResult<Arc<Stream>> {
        let a10nsp_interface = match config.a10nsp_interface {
            Some(ref name) => self.ctx.a10nsp_interface(name),
            None => None,
        };
        let network_interface = self.ctx
            .network_interface(config.network_interface.as_ref().map(|name| &name[..]))
            .or_else(|| session.as_ref().and_then(|session| session.network_interface.clone()));

        let flow_id = self.ctx.flows.allocate_flow_id();
        let mut stream = Stream::new(flow_id, config.clone(), direction, session.clone());
        stream.network_interface = network_interface;
        stream.a10nsp_interface = a10nsp_interface;

        let interface = match direction {
            BblDirection::Up => {
                let session = session.as_ref()
                    .ok_or_else(|| StackError::InvalidInterface(config.name.clone()))?;
                let interface = self.interface_by_ifindex(session.key.ifindex)
                    .ok_or_else(|| StackError::InvalidInterface(config.name.clone()))?;
                stream.access_interface = interface.access.clone();
                interface
            }
            BblDirection::Down => {
                if let Some(ref a10nsp) = stream.a10nsp_interface {
                    let ifindex = a10nsp.ifindex;
                    self.interface_by_ifindex(ifindex)
                        .ok_or_else(|| StackError::InvalidInterface(config.name.clone()))?
                } else {
                    let netif = stream.network_interface.clone().ok_or_else(|| {
                        StackError::Config(ConfigError::MissingInterface(config.name.clone()))
                    })?;
                    stream.access_interface = session.as_ref()
                        .and_then(|s| self.interface_by_ifindex(s.key.ifindex))
                        .and_then(|i| i.access.clone());
                    self.interface_by_ifindex(netif.ifindex)
                        .ok_or_else(|| StackError::InvalidInterface(config.name.clone()))?
                }
            }
        };

        let stream = Arc::new(stream);
        self.ctx
            .flows
            .insert(stream.clone())
            .map_err(|_| StackError::DuplicateFlow(flow_id))?;
        if let Some(ref session) = session {
            session.add_stream(stream.clone());
        }
        interface.attach_stream(stream.clone())?;
        debug!("stream {} (flow {}) added on {} with {} pps",
               config.name,
               flow_id,
               interface.name,
               config.pps);
        Ok(stream)
    }

    /// Drives the timer root until teardown is requested, then stops
    /// the workers.
    pub fn run(&mut self) {
        info!("entering main loop");
        while !self.ctx.teardown() {
            let next = self.timer.process();
            let now = Instant::now();
            let sleep = match next {
                Some(deadline) if deadline > now => {
                    ::std::cmp::min(deadline - now, Duration::from_millis(10))
                }
                Some(_) => Duration::new(0, 0),
                None => Duration::from_millis(10),
            };
            if sleep > Duration::new(0, 0) {
                ::std::thread::sleep(sleep);
            }
        }
        self.stop_workers();
        info!("main loop finished");
    }

    /// Stops all workers cooperatively and joins them. Ring memory is
    /// released when the handles drop with their threads.
    pub fn stop_workers(&mut self) {
        for thread in &self.threads {
            thread.stop();
        }
        for thread in &self.threads {
            thread.join();
        }
        self.threads.clear();
    }

    /// All per-stream observability records.
    pub fn stream_report(&self) -> ::serde_json::Value {
        let records: Vec<::serde_json::Value> = self.ctx
            .flows
            .all()
            .iter()
            .map(|stream| stream.json_record())
            .collect();
        json!({ "streams": records })
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.ctx.request_teardown();
        self.stop_workers();
    }
}

fn build_session_traffic_configs(config: &Config) -> SessionTrafficConfigs {
    let section = &config.session_traffic;
    let mut configs = SessionTrafficConfigs {
        ipv4_up: None,
        ipv4_down: None,
        ipv6_up: None,
        ipv6_down: None,
        ipv6pd_up: None,
        ipv6pd_down: None,
    };
    if section.ipv4_pps > 0.0 {
        let (mut up, mut down) = session_traffic_pair("session-traffic-ipv4",
                                                      BblSubType::Ipv4,
                                                      section.ipv4_pps);
        up.ipv4_network_address = section.ipv4_address;
        down.ipv4_network_address = section.ipv4_address;
        if let Some(label) = section.ipv4_label {
            down.tx_mpls1 = Some(::packet::MplsLabel {
                label: label,
                exp: 0,
                ttl: 255,
            });
        }
        configs.ipv4_up = Some(Arc::new(up));
        configs.ipv4_down = Some(Arc::new(down));
    }
    if section.ipv6_pps > 0.0 {
        let (mut up, mut down) = session_traffic_pair("session-traffic-ipv6",
                                                      BblSubType::Ipv6,
                                                      section.ipv6_pps);
        up.ipv6_network_address = section.ipv6_address;
        down.ipv6_network_address = section.ipv6_address;
        if let Some(label) = section.ipv6_label {
            down.tx_mpls1 = Some(::packet::MplsLabel {
                label: label,
                exp: 0,
                ttl: 255,
            });
        }
        configs.ipv6_up = Some(Arc::new(up));
        configs.ipv6_down = Some(Arc::new(down));
    }
    if section.ipv6pd_pps > 0.0 {
        let (mut up, mut down) = session_traffic_pair("session-traffic-ipv6pd",
                                                      BblSubType::Ipv6Pd,
                                                      section.ipv6pd_pps);
        up.ipv6_network_address = section.ipv6_address;
        down.ipv6_network_address = section.ipv6_address;
        configs.ipv6pd_up = Some(Arc::new(up));
        configs.ipv6pd_down = Some(Arc::new(down));
    }
    configs
}

fn session_traffic_pair(name: &str,
                        stream_type: BblSubType,
                        pps: f64)
                        -> (StreamConfig, StreamConfig) {
    let mut up = StreamConfig::default();
    up.name = format!("{}-up", name);
    up.stream_group_id = ::std::u16::MAX;
    up.stream_type = stream_type;
    up.direction = DirectionConfig::Up;
    up.session_traffic = true;
    up.pps = pps;
    let mut down = StreamConfig::default();
    down.name = format!("{}-down", name);
    down.stream_group_id = ::std::u16::MAX;
    down.stream_type = stream_type;
    down.direction = DirectionConfig::Down;
    down.session_traffic = true;
    down.pps = pps;
    (up, down)
}

fn resolve_physical(name: &str) -> StackResult<(u32, MacAddr)> {
    let interface = datalink::interfaces()
        .into_iter()
        .find(|interface| interface.name == name)
        .ok_or_else(|| ConfigError::MissingInterface(name.to_owned()))?;
    let mac = interface.mac
        .ok_or_else(|| ConfigError::Invalid(format!("interface {} has no mac", name)))?;
    Ok((interface.index, mac))
}

fn open_io(mode: IoModeConfig,
           interface: &Interface,
           direction: IoDirection,
           io_slots: u32,
           burst: u16)
           -> StackResult<IoHandle> {
    let backend = match mode {
        IoModeConfig::PacketMmap => {
            IoBackend::Mmap(MmapRing::open(interface.ifindex, direction, io_slots)?)
        }
        IoModeConfig::Raw => IoBackend::Link(Box::new(RawLink::open(&interface.name)?)),
    };
    Ok(IoHandle::new(direction, backend, burst))
}
