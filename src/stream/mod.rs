//! Traffic streams: one unidirectional paced flow of test packets.
//!
//! A stream owns a cached packet template, a send window for pacing
//! and the receive-side measurement state of its flow. Streams are
//! created on the main thread (raw streams at startup, session bound
//! streams when their session establishes) and registered in the flow
//! map keyed by their dense 64 bit flow id; the hot paths only read
//! the map and bump per-stream counters.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use netif::{A10nspInterface, AccessInterface, NetworkInterface};
use packet::bbl::{BblDirection, BblSubType};
use packet::MplsLabel;
use session::Session;
use stats::Rate;
use timer::Timestamp;

mod stream_rx;
mod stream_tx;

pub use self::stream_rx::stream_rx;
pub use self::stream_tx::{build_template, can_send, send_window, Scheduler, Template};

/// Direction selector in stream configuration; each direction becomes
/// its own `Stream` at creation time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DirectionConfig {
    Up,
    Down,
    Both,
}

impl DirectionConfig {
    pub fn has_up(&self) -> bool {
        *self != DirectionConfig::Down
    }

    pub fn has_down(&self) -> bool {
        *self != DirectionConfig::Up
    }
}

/// Immutable per-stream configuration, shared between the up and down
/// instances of a `both` stream.
pub struct StreamConfig {
    pub name: String,
    /// Zero binds the stream to no session ("raw"), everything else
    /// attaches it to the sessions of that group.
    pub stream_group_id: u16,
    pub stream_type: BblSubType,
    pub direction: DirectionConfig,
    pub pps: f64,
    /// L3 length of the generated packet.
    pub length: usize,
    pub priority: u8,
    pub vlan_priority: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub network_interface: Option<String>,
    pub a10nsp_interface: Option<String>,
    pub ipv4_destination_address: Option<Ipv4Addr>,
    pub ipv4_network_address: Option<Ipv4Addr>,
    pub ipv4_access_src_address: Option<Ipv4Addr>,
    pub ipv6_destination_address: Option<Ipv6Addr>,
    pub ipv6_network_address: Option<Ipv6Addr>,
    pub ipv6_access_src_address: Option<Ipv6Addr>,
    pub tx_mpls1: Option<MplsLabel>,
    pub tx_mpls2: Option<MplsLabel>,
    pub rx_mpls1_label: Option<u32>,
    pub rx_mpls2_label: Option<u32>,
    /// Seconds to hold off after the stream first becomes sendable.
    pub start_delay: u64,
    /// Zero means unlimited.
    pub max_packets: u64,
    pub ipv4_df: bool,
    pub session_traffic: bool,
}

impl Default for StreamConfig {
    fn default() -> StreamConfig {
        StreamConfig {
            name: String::new(),
            stream_group_id: 0,
            stream_type: BblSubType::Ipv4,
            direction: DirectionConfig::Down,
            pps: 1.0,
            length: 128,
            priority: 0,
            vlan_priority: 0,
            src_port: ::BBL_UDP_PORT,
            dst_port: ::BBL_UDP_PORT,
            network_interface: None,
            a10nsp_interface: None,
            ipv4_destination_address: None,
            ipv4_network_address: None,
            ipv4_access_src_address: None,
            ipv6_destination_address: None,
            ipv6_network_address: None,
            ipv6_access_src_address: None,
            tx_mpls1: None,
            tx_mpls2: None,
            rx_mpls1_label: None,
            rx_mpls2_label: None,
            start_delay: 0,
            max_packets: 0,
            ipv4_df: false,
            session_traffic: false,
        }
    }
}

/// Transmit-side hot state, owned by whatever I/O context schedules
/// the stream (main loop job or TX worker).
pub struct StreamTxState {
    /// Cached packet template; freed whenever the sendability gate
    /// closes so addressing changes rebuild it.
    pub buf: Option<Vec<u8>>,
    pub len: usize,
    /// Offset of the embedded test record inside the template.
    pub bbl_offset: usize,
    /// Next sequence number to transmit, strictly monotonic from 1.
    pub flow_seq: u64,
    pub send_window_start: Timestamp,
    pub send_window_packets: u64,
    /// Packets granted by the send window and not yet emitted.
    pub tokens: u64,
    pub wait: bool,
    pub wait_start: Timestamp,
}

impl StreamTxState {
    fn new() -> StreamTxState {
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

    /// Drops the cached template and zeroes the window.
    pub fn free_template(&mut self) {
        self.buf = None;
        self.len = 0;
        self.bbl_offset = 0;
        self.send_window_packets = 0;
        self.tokens = 0;
    }
}

/// Receive-side measurement state, owned by the RX context of the
/// interface the flow arrives on.
#[derive(Default)]
pub struct StreamRxState {
    /// First matching sequence number; zero means nothing received
    /// (sequence numbers start at one).
    pub first_seq: u64,
    pub last_seq: u64,
    pub priority: u8,
    pub outer_vlan_pbit: u8,
    pub inner_vlan_pbit: u8,
    pub mpls1: Option<MplsLabel>,
    pub mpls2: Option<MplsLabel>,
    /// First-sample initialized; zero means no sample yet.
    pub min_delay_ns: u64,
    pub max_delay_ns: u64,
    pub verified: bool,
}

/// Rates and last-sync shadows, touched only by the per-second
/// control job on the main thread.
#[derive(Default)]
pub struct StreamCtrlState {
    pub rate_packets_tx: Rate,
    pub rate_packets_rx: Rate,
    pub last_sync_packets_tx: u64,
    pub last_sync_packets_rx: u64,
    pub last_sync_loss: u64,
    pub last_sync_wrong_session: u64,
}

pub struct Stream {
    pub flow_id: u64,
    pub config: Arc<StreamConfig>,
    pub stream_type: BblSubType,
    pub direction: BblDirection,
    pub session_traffic: bool,
    pub session: Option<Arc<Session>>,
    pub network_interface: Option<Arc<NetworkInterface>>,
    pub access_interface: Option<Arc<AccessInterface>>,
    pub a10nsp_interface: Option<Arc<A10nspInterface>>,
    /// Cooperative stop; the next scheduler pass closes the window.
    pub stop: AtomicBool,
    reset: AtomicBool,
    pub packets_tx: AtomicU64,
    pub packets_rx: AtomicU64,
    pub loss: AtomicU64,
    pub wrong_session: AtomicU64,
    pub tx_len: AtomicUsize,
    pub rx_len: AtomicUsize,
    pub tx: Mutex<StreamTxState>,
    pub rx: Mutex<StreamRxState>,
    pub ctrl: Mutex<StreamCtrlState>,
}

impl Stream {
    pub fn new(flow_id: u64,
               config: Arc<StreamConfig>,
               direction: BblDirection,
               session: Option<Arc<Session>>)
               -> Stream {
        Stream {
            flow_id: flow_id,
            stream_type: config.stream_type,
            direction: direction,
            session_traffic: config.session_traffic,
            session: session,
            network_interface: None,
            access_interface: None,
            a10nsp_interface: None,
            config: config,
            stop: AtomicBool::new(false),
            reset: AtomicBool::new(false),
            packets_tx: AtomicU64::new(0),
            packets_rx: AtomicU64::new(0),
            loss: AtomicU64::new(0),
            wrong_session: AtomicU64::new(0),
            tx_len: AtomicUsize::new(0),
            rx_len: AtomicUsize::new(0),
            tx: Mutex::new(StreamTxState::new()),
            rx: Mutex::new(StreamRxState::default()),
            ctrl: Mutex::new(StreamCtrlState::default()),
        }
    }

    /// Resets flow sequence and receive state. The template is freed
    /// by the scheduler when it consumes the flag; counters stay
    /// monotonic so the sync deltas keep working. Returns whether the
    /// flow had been verified, so the caller can retire it from the
    /// verified counts (see `FlowRegistry::reset_stream`).
    pub fn reset(&self) -> bool {
        let was_verified = {
            let mut rx = self.rx.lock().unwrap();
            let was_verified = rx.verified;
            *rx = StreamRxState::default();
            was_verified
        };
        self.stop.store(false, Ordering::Relaxed);
        self.reset.store(true, Ordering::Relaxed);
        was_verified
    }

    pub fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::Relaxed)
    }

    pub fn is_raw(&self) -> bool {
        self.config.stream_group_id == 0
    }

    /// Per-stream observability record.
    pub fn json_record(&self) -> ::serde_json::Value {
        let rx = self.rx.lock().unwrap();
        let ctrl = self.ctrl.lock().unwrap();
        let tx_len = self.tx_len.load(Ordering::Relaxed) as u64;
        let rx_len = self.rx_len.load(Ordering::Relaxed) as u64;
        let tx_pps = ctrl.rate_packets_tx.avg;
        let rx_pps = ctrl.rate_packets_rx.avg;
        let mut record = json!({
            "name": self.config.name,
            "direction": match self.direction {
                BblDirection::Up => "upstream",
                BblDirection::Down => "downstream",
            },
            "flow-id": self.flow_id,
            "rx-first-seq": rx.first_seq,
            "rx-last-seq": rx.last_seq,
            "rx-tos-tc": rx.priority,
            "rx-outer-vlan-pbit": rx.outer_vlan_pbit,
            "rx-inner-vlan-pbit": rx.inner_vlan_pbit,
            "rx-len": rx_len,
            "tx-len": tx_len,
            "rx-packets": self.packets_rx.load(Ordering::Relaxed),
            "tx-packets": self.packets_tx.load(Ordering::Relaxed),
            "rx-loss": self.loss.load(Ordering::Relaxed),
            "rx-delay-nsec-min": rx.min_delay_ns,
            "rx-delay-nsec-max": rx.max_delay_ns,
            "rx-pps": rx_pps,
            "tx-pps": tx_pps,
            "tx-bps-l2": tx_pps * tx_len as f64 * 8.0,
            "rx-bps-l2": rx_pps * rx_len as f64 * 8.0,
            "rx-bps-l3": rx_pps * self.config.length as f64 * 8.0,
            "tx-mbps-l2": tx_pps * tx_len as f64 * 8.0 / 1_000_000.0,
            "rx-mbps-l2": rx_pps * rx_len as f64 * 8.0 / 1_000_000.0,
            "rx-mbps-l3": rx_pps * self.config.length as f64 * 8.0 / 1_000_000.0,
        });
        if let Some(expected) = self.config.rx_mpls1_label {
            record["rx-mpls1-expected"] = json!(expected);
        }
        if let Some(ref mpls1) = rx.mpls1 {
            record["rx-mpls1-label"] = json!(mpls1.label);
            record["rx-mpls1-exp"] = json!(mpls1.exp);
            record["rx-mpls1-ttl"] = json!(mpls1.ttl);
        }
        if let Some(expected) = self.config.rx_mpls2_label {
            record["rx-mpls2-expected"] = json!(expected);
        }
        if let Some(ref mpls2) = rx.mpls2 {
            record["rx-mpls2-label"] = json!(mpls2.label);
            record["rx-mpls2-exp"] = json!(mpls2.exp);
            record["rx-mpls2-ttl"] = json!(mpls2.ttl);
        }
        record
    }
}

/// Global flow map plus verification bookkeeping. Written only at
/// stream creation/teardown from the main thread, read from the RX
/// hot paths.
pub struct FlowRegistry {
    flows: Mutex<HashMap<u64, Arc<Stream>>>,
    next_flow_id: AtomicU64,
    pub stream_flows: AtomicU64,
    pub stream_flows_verified: AtomicU64,
    pub session_flows: AtomicU64,
    pub session_flows_verified: AtomicU64,
}

impl FlowRegistry {
    pub fn new() -> FlowRegistry {
        FlowRegistry {
            flows: Mutex::new(HashMap::new()),
            next_flow_id: AtomicU64::new(1),
            stream_flows: AtomicU64::new(0),
            stream_flows_verified: AtomicU64::new(0),
            session_flows: AtomicU64::new(0),
            session_flows_verified: AtomicU64::new(0),
        }
    }

    /// Flow ids are assigned densely, starting at one.
    pub fn allocate_flow_id(&self) -> u64 {
        self.next_flow_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, stream: Arc<Stream>) -> Result<(), ()> {
        let mut flows = self.flows.lock().unwrap();
        if flows.contains_key(&stream.flow_id) {
            return Err(());
        }
        if stream.session_traffic {
            self.session_flows.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stream_flows.fetch_add(1, Ordering::Relaxed);
        }
        flows.insert(stream.flow_id, stream);
        Ok(())
    }

    pub fn get(&self, flow_id: u64) -> Option<Arc<Stream>> {
        self.flows.lock().unwrap().get(&flow_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Stream>> {
        let mut streams: Vec<Arc<Stream>> = self.flows.lock().unwrap().values().cloned().collect();
        streams.sort_by_key(|stream| stream.flow_id);
        streams
    }

    pub fn len(&self) -> usize {
        self.flows.lock().unwrap().len()
    }

    /// Resets a stream and takes its verification back out of the
    /// flow bookkeeping, so the flow is verified (and announced) anew
    /// once traffic comes back.
    pub fn reset_stream(&self, stream: &Stream) {
        if stream.reset() {
            if stream.session_traffic {
                if let Some(ref session) = stream.session {
                    session.flows_verified.fetch_sub(1, Ordering::Relaxed);
                }
                self.session_flows_verified.fetch_sub(1, Ordering::Relaxed);
            } else {
                self.stream_flows_verified.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

/// Once-per-second reconciliation of one stream: rate smoothing and
/// delta aggregation into the interface and session counters.
/// Verification itself happens on the receive path; until the flow is
/// verified only the wrong-session counter is synced here. Main
/// thread only.
pub fn stream_ctrl(stream: &Stream) {
    if stream.wrong_session.load(Ordering::Relaxed) != 0 {
        sync_wrong_session(stream);
    }
    if !stream.rx.lock().unwrap().verified {
        return;
    }

    let packets_tx = stream.packets_tx.load(Ordering::Relaxed);
    let packets_rx = stream.packets_rx.load(Ordering::Relaxed);
    let loss = stream.loss.load(Ordering::Relaxed);

    let mut ctrl = stream.ctrl.lock().unwrap();
    ctrl.rate_packets_tx.update(packets_tx);
    ctrl.rate_packets_rx.update(packets_rx);

    let tx_delta = packets_tx - ctrl.last_sync_packets_tx;
    ctrl.last_sync_packets_tx = packets_tx;
    let tx_bytes = tx_delta * stream.tx_len.load(Ordering::Relaxed) as u64;
    let rx_delta = packets_rx - ctrl.last_sync_packets_rx;
    ctrl.last_sync_packets_rx = packets_rx;
    let rx_bytes = rx_delta * stream.rx_len.load(Ordering::Relaxed) as u64;
    let loss_delta = loss - ctrl.last_sync_loss;
    ctrl.last_sync_loss = loss;
    drop(ctrl);

    aggregate_tx(stream, tx_delta, tx_bytes);
    aggregate_rx(stream, rx_delta, rx_bytes, loss_delta);
}

fn sync_wrong_session(stream: &Stream) {
    let packets = stream.wrong_session.load(Ordering::Relaxed);
    let mut ctrl = stream.ctrl.lock().unwrap();
    let delta = packets - ctrl.last_sync_wrong_session;
    ctrl.last_sync_wrong_session = packets;
    drop(ctrl);
    if delta == 0 {
        return;
    }
    if let Some(ref access) = stream.access_interface {
        let counter = match stream.stream_type {
            BblSubType::Ipv4 => &access.stats.session_ipv4_wrong_session,
            BblSubType::Ipv6 => &access.stats.session_ipv6_wrong_session,
            BblSubType::Ipv6Pd => &access.stats.session_ipv6pd_wrong_session,
        };
        counter.fetch_add(delta, Ordering::Relaxed);
    }
}

fn aggregate_tx(stream: &Stream, packets: u64, bytes: u64) {
    if packets == 0 {
        return;
    }
    match stream.direction {
        BblDirection::Up => {
            if let Some(ref access) = stream.access_interface {
                access.stats.add_tx(packets, bytes);
                access.stats.stream_tx.fetch_add(packets, Ordering::Relaxed);
                if stream.session_traffic {
                    session_counter_tx(&access.stats, stream).fetch_add(packets, Ordering::Relaxed);
                }
            }
            if let Some(ref session) = stream.session {
                session.stats.packets_tx.fetch_add(packets, Ordering::Relaxed);
                session.stats.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
            }
        }
        BblDirection::Down => {
            if let Some(ref network) = stream.network_interface {
                network.stats.add_tx(packets, bytes);
                network.stats.stream_tx.fetch_add(packets, Ordering::Relaxed);
                if let Some(ref session) = stream.session {
                    if session.inner().l2tp_binding.is_some() {
                        network.stats.l2tp_data_tx.fetch_add(packets, Ordering::Relaxed);
                    }
                }
                if stream.session_traffic {
                    session_counter_tx(&network.stats, stream)
                        .fetch_add(packets, Ordering::Relaxed);
                }
            } else if let Some(ref a10nsp) = stream.a10nsp_interface {
                a10nsp.stats.add_tx(packets, bytes);
                a10nsp.stats.stream_tx.fetch_add(packets, Ordering::Relaxed);
                if stream.session_traffic {
                    session_counter_tx(&a10nsp.stats, stream).fetch_add(packets, Ordering::Relaxed);
                }
            }
        }
    }
}

fn aggregate_rx(stream: &Stream, packets: u64, bytes: u64, loss: u64) {
    if packets == 0 && loss == 0 {
        return;
    }
    // Downstream flows are received on the access side, upstream flows
    // on the network/a10nsp side.
    match stream.direction {
        BblDirection::Down => {
            if let Some(ref access) = stream.access_interface {
                access.stats.add_rx(packets, bytes);
                access.stats.stream_rx.fetch_add(packets, Ordering::Relaxed);
                access.stats.stream_loss.fetch_add(loss, Ordering::Relaxed);
                if stream.session_traffic {
                    session_counter_rx(&access.stats, stream).fetch_add(packets, Ordering::Relaxed);
                    session_counter_loss(&access.stats, stream).fetch_add(loss, Ordering::Relaxed);
                }
            }
            if let Some(ref session) = stream.session {
                session.stats.packets_rx.fetch_add(packets, Ordering::Relaxed);
                session.stats.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
            }
        }
        BblDirection::Up => {
            if let Some(ref network) = stream.network_interface {
                network.stats.add_rx(packets, bytes);
                network.stats.stream_rx.fetch_add(packets, Ordering::Relaxed);
                network.stats.stream_loss.fetch_add(loss, Ordering::Relaxed);
                if let Some(ref session) = stream.session {
                    if session.inner().l2tp_binding.is_some() {
                        network.stats.l2tp_data_rx.fetch_add(packets, Ordering::Relaxed);
                    }
                }
                if stream.session_traffic {
                    session_counter_rx(&network.stats, stream)
                        .fetch_add(packets, Ordering::Relaxed);
                    session_counter_loss(&network.stats, stream)
                        .fetch_add(loss, Ordering::Relaxed);
                }
            } else if let Some(ref a10nsp) = stream.a10nsp_interface {
                a10nsp.stats.add_rx(packets, bytes);
                a10nsp.stats.stream_rx.fetch_add(packets, Ordering::Relaxed);
                a10nsp.stats.stream_loss.fetch_add(loss, Ordering::Relaxed);
            }
        }
    }
}

fn session_counter_tx<'a>(stats: &'a ::stats::InterfaceStats,
                          stream: &Stream)
                          -> &'a AtomicU64 {
    match stream.stream_type {
        BblSubType::Ipv4 => &stats.session_ipv4_tx,
        BblSubType::Ipv6 => &stats.session_ipv6_tx,
        BblSubType::Ipv6Pd => &stats.session_ipv6pd_tx,
    }
}

fn session_counter_rx<'a>(stats: &'a ::stats::InterfaceStats,
                          stream: &Stream)
                          -> &'a AtomicU64 {
    match stream.stream_type {
        BblSubType::Ipv4 => &stats.session_ipv4_rx,
        BblSubType::Ipv6 => &stats.session_ipv6_rx,
        BblSubType::Ipv6Pd => &stats.session_ipv6pd_rx,
    }
}

fn session_counter_loss<'a>(stats: &'a ::stats::InterfaceStats,
                            stream: &Stream)
                            -> &'a AtomicU64 {
    match stream.stream_type {
        BblSubType::Ipv4 => &stats.session_ipv4_loss,
        BblSubType::Ipv6 => &stats.session_ipv6_loss,
        BblSubType::Ipv6Pd => &stats.session_ipv6pd_loss,
    }
}
