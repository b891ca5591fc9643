//! Packet I/O layer.
//!
//! Every bound direction of a physical port is an `IoHandle`: either a
//! memory-mapped kernel ring (`mmap` module) or a per-packet ethernet
//! link (`raw` module, and the loopback link used by tests). A handle
//! is driven either by main-loop timer jobs or by a dedicated worker
//! thread (`thread` module).
//!
//! The RX pass decodes frames and classifies them: test packets update
//! their flow wherever they arrive, everything else is control traffic
//! for the main loop. The TX pass is burst-bounded and strictly
//! prioritized: per-interface control queues drain first, then the
//! stream scheduler fills what is left of the burst.

use libc;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use packet;
use stack::{self, Context, Interface};
use stream::Scheduler;
use timer::Timestamp;
use txq::Txq;
use DecodeError;

pub mod mmap;
pub mod raw;
pub mod thread;

pub use self::mmap::MmapRing;
pub use self::raw::RawLink;
pub use self::thread::IoThread;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoMode {
    PacketMmap,
    Raw,
    Disabled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoDirection {
    Ingress,
    Egress,
}

/// Counters of one I/O handle. Owned by the driving context, read by
/// reporting.
#[derive(Default)]
pub struct IoStats {
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
    pub unknown: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub io_errors: AtomicU64,
    pub no_buffer: AtomicU64,
    pub polled: AtomicU64,
}

/// A duplex or simplex per-packet ethernet transport: the raw-socket
/// mode and the in-memory test link implement this.
pub trait EthernetLink: Send {
    /// Transmits one frame; `false` counts as an I/O error.
    fn send_frame(&mut self, bytes: &[u8]) -> bool;

    /// Fetches one received frame if available. Must not block beyond
    /// a short poll timeout.
    fn recv_frame(&mut self) -> Option<Vec<u8>>;
}

pub enum IoBackend {
    Mmap(MmapRing),
    Link(Box<EthernetLink>),
}

/// A bound instance of packet I/O on one direction of one port.
pub struct IoHandle {
    pub direction: IoDirection,
    pub backend: IoBackend,
    pub stats: Arc<IoStats>,
    /// Stream scheduler attached to this egress; empty on ingress.
    pub scheduler: Arc<Scheduler>,
    pub burst: u16,
}

impl IoHandle {
    pub fn new(direction: IoDirection, backend: IoBackend, burst: u16) -> IoHandle {
        IoHandle {
            direction: direction,
            backend: backend,
            stats: Arc::new(IoStats::default()),
            scheduler: Arc::new(Scheduler::new()),
            burst: burst,
        }
    }

    pub fn mode(&self) -> IoMode {
        match self.backend {
            IoBackend::Mmap(_) => IoMode::PacketMmap,
            IoBackend::Link(_) => IoMode::Raw,
        }
    }

    /// One main-loop RX pass: drain everything the kernel handed us,
    /// then give the ring back and prod the kernel if it was empty.
    pub fn rx_once(&mut self, ctx: &Context, interface: &Interface, timestamp: &Timestamp) {
        let stats = self.stats.clone();
        match self.backend {
            IoBackend::Mmap(ref mut ring) => {
                let mut drained = false;
                loop {
                    let processed = match ring.rx_slot() {
                        None => false,
                        Some((data, tci, tpid)) => {
                            rx_process(ctx, interface, &stats, data, tci, tpid, timestamp);
                            true
                        }
                    };
                    if !processed {
                        if !drained {
                            stats.polled.fetch_add(1, Ordering::Relaxed);
                            ring.poll_kernel(libc::POLLIN);
                        }
                        break;
                    }
                    drained = true;
                    ring.rx_release();
                }
            }
            IoBackend::Link(ref mut link) => {
                while let Some(frame) = link.recv_frame() {
                    rx_process(ctx, interface, &stats, &frame, 0, 0, timestamp);
                }
            }
        }
        if let Some(sink) = ctx.pcap() {
            sink.flush();
        }
    }

    /// One worker-thread RX pass. Test packets are handled in place;
    /// everything else crosses `redirect` to the main loop. Returns
    /// whether any frame moved (idle workers nanosleep).
    pub fn rx_once_thread(&mut self,
                          ctx: &Context,
                          interface: &Interface,
                          redirect: &Txq,
                          timestamp: &Timestamp)
                          -> bool {
        let stats = self.stats.clone();
        let mut worked = false;
        match self.backend {
            IoBackend::Mmap(ref mut ring) => {
                loop {
                    let outcome = match ring.rx_slot() {
                        None => RxOutcome::Empty,
                        Some((data, tci, tpid)) => {
                            rx_process_thread(ctx, interface, &stats, redirect, data, tci, tpid,
                                              timestamp)
                        }
                    };
                    match outcome {
                        RxOutcome::Empty => break,
                        // Redirect ring full: leave the frame with us
                        // and retry after the main loop drained some.
                        RxOutcome::Full => break,
                        RxOutcome::Consumed => {
                            ring.rx_release();
                            worked = true;
                        }
                    }
                }
            }
            IoBackend::Link(ref mut link) => {
                while let Some(frame) = link.recv_frame() {
                    let outcome = rx_process_thread(ctx, interface, &stats, redirect, &frame, 0,
                                                    0, timestamp);
                    if let RxOutcome::Full = outcome {
                        // Per-packet transports cannot hold the frame.
                        stats.no_buffer.fetch_add(1, Ordering::Relaxed);
                    }
                    worked = true;
                }
            }
        }
        worked
    }

    /// One TX pass: control queues first, stream traffic up to the
    /// remaining burst, one kernel notify for everything enqueued.
    pub fn tx_once(&mut self, ctx: &Context, interface: &Interface, now: &Timestamp) {
        let stats = self.stats.clone();
        let scheduler = self.scheduler.clone();
        let burst = self.burst;
        match self.backend {
            IoBackend::Mmap(ref mut ring) => {
                if !ring.tx_ready() {
                    stats.no_buffer.fetch_add(1, Ordering::Relaxed);
                    stats.polled.fetch_add(1, Ordering::Relaxed);
                    ring.poll_kernel(libc::POLLOUT);
                } else {
                    tx_run(ctx, interface, &scheduler, &stats, burst, now, ring);
                }
                if ring.queued() > 0 {
                    if let Err(e) = ring.notify() {
                        debug!("tx notify on {} failed: {}", interface.name, e);
                        stats.io_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            IoBackend::Link(ref mut link) => {
                let mut port = LinkPort {
                    link: &mut **link,
                    stats: &*stats,
                };
                tx_run(ctx, interface, &scheduler, &stats, burst, now, &mut port);
            }
        }
        if let Some(sink) = ctx.pcap() {
            sink.flush();
        }
    }
}

enum RxOutcome {
    Empty,
    Consumed,
    Full,
}

/// Full RX processing on the main loop: count, decode, restore the
/// kernel-stripped VLAN, capture, dispatch.
pub fn rx_process(ctx: &Context,
                  interface: &Interface,
                  stats: &IoStats,
                  data: &[u8],
                  vlan_tci: u16,
                  vlan_tpid: u16,
                  timestamp: &Timestamp) {
    stats.packets.fetch_add(1, Ordering::Relaxed);
    stats.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
    match packet::decode_ethernet(data) {
        Ok(mut frame) => {
            frame.restore_vlan(vlan_tci, vlan_tpid);
            frame.timestamp = *timestamp;
            if let Some(sink) = ctx.pcap() {
                if frame.bbl.is_none() || ctx.config.pcap_include_streams {
                    sink.push(timestamp, data, interface.ifindex, false);
                }
            }
            stack::rx_frame(ctx, interface, &frame);
        }
        Err(DecodeError::UnknownProtocol) => {
            if let Some(sink) = ctx.pcap() {
                sink.push(timestamp, data, interface.ifindex, false);
            }
            stats.unknown.fetch_add(1, Ordering::Relaxed);
        }
        Err(DecodeError::Malformed) => {
            if let Some(sink) = ctx.pcap() {
                sink.push(timestamp, data, interface.ifindex, false);
            }
            stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Worker-thread RX processing: test packets are matched here, all
/// other frames ship to the main loop untouched (it re-decodes and
/// keeps the quality counters, avoiding double counting).
fn rx_process_thread(ctx: &Context,
                     interface: &Interface,
                     stats: &IoStats,
                     redirect: &Txq,
                     data: &[u8],
                     vlan_tci: u16,
                     vlan_tpid: u16,
                     timestamp: &Timestamp)
                     -> RxOutcome {
    if let Ok(mut frame) = packet::decode_ethernet(data) {
        if frame.bbl.is_some() {
            stats.packets.fetch_add(1, Ordering::Relaxed);
            stats.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
            frame.restore_vlan(vlan_tci, vlan_tpid);
            frame.timestamp = *timestamp;
            stack::rx_frame(ctx, interface, &frame);
            return RxOutcome::Consumed;
        }
    }
    match redirect.write_slot() {
        Some(slot) => {
            if data.len() > slot.packet.len() {
                stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                return RxOutcome::Consumed;
            }
            slot.timestamp = *timestamp;
            slot.vlan_tci = vlan_tci;
            slot.vlan_tpid = vlan_tpid;
            slot.len = data.len() as u16;
            slot.packet[..data.len()].copy_from_slice(data);
            redirect.write_next();
            RxOutcome::Consumed
        }
        None => RxOutcome::Full,
    }
}

/// Main-loop job draining control frames an RX worker redirected.
pub fn drain_redirect(ctx: &Context, interface: &Interface, thread: &IoThread) {
    while let Some(slot) = thread.txq.read_slot() {
        rx_process(ctx,
                   interface,
                   &thread.stats,
                   slot.bytes(),
                   slot.vlan_tci,
                   slot.vlan_tpid,
                   &slot.timestamp);
        thread.txq.read_next();
    }
    if let Some(sink) = ctx.pcap() {
        sink.flush();
    }
}

/// Egress slot supplier: the mapped ring or a per-packet link.
pub trait TxPort {
    /// Whether a slot is free right now; counts and polls internally
    /// when not.
    fn tx_port_ready(&mut self) -> bool;

    fn tx_port_emit(&mut self, bytes: &[u8]);
}

impl TxPort for MmapRing {
    fn tx_port_ready(&mut self) -> bool {
        if self.tx_ready() {
            true
        } else {
            self.poll_kernel(libc::POLLOUT);
            false
        }
    }

    fn tx_port_emit(&mut self, bytes: &[u8]) {
        self.tx_emit(bytes);
    }
}

struct LinkPort<'a> {
    link: &'a mut EthernetLink,
    stats: &'a IoStats,
}

impl<'a> TxPort for LinkPort<'a> {
    fn tx_port_ready(&mut self) -> bool {
        true
    }

    fn tx_port_emit(&mut self, bytes: &[u8]) {
        if !self.link.send_frame(bytes) {
            self.stats.io_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The prioritized burst: control first, then stream traffic.
fn tx_run<P: TxPort>(ctx: &Context,
                     interface: &Interface,
                     scheduler: &Scheduler,
                     stats: &IoStats,
                     burst: u16,
                     now: &Timestamp,
                     port: &mut P) {
    let mut remaining = burst as u32;

    {
        let networks = interface.network_guard();
        for netif in networks.values() {
            loop {
                if remaining == 0 {
                    return;
                }
                let emitted = match netif.txq.read_slot() {
                    None => false,
                    Some(slot) => {
                        if !port.tx_port_ready() {
                            stats.no_buffer.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                        port.tx_port_emit(slot.bytes());
                        stats.packets.fetch_add(1, Ordering::Relaxed);
                        stats.bytes.fetch_add(slot.len as u64, Ordering::Relaxed);
                        netif.stats.add_tx(1, slot.len as u64);
                        if let Some(sink) = ctx.pcap() {
                            sink.push(now, slot.bytes(), interface.ifindex, true);
                        }
                        true
                    }
                };
                if !emitted {
                    break;
                }
                netif.txq.read_next();
                remaining -= 1;
            }
        }
    }

    if !(ctx.traffic_enabled() && !ctx.init_phase() && interface.is_up()) {
        scheduler.stop_windows();
        return;
    }
    while remaining > 0 {
        if !port.tx_port_ready() {
            stats.no_buffer.fetch_add(1, Ordering::Relaxed);
            break;
        }
        let mut sent_len = 0;
        let emitted = scheduler.send_iter(ctx, now, |bytes| {
            port.tx_port_emit(bytes);
            sent_len = bytes.len();
        });
        if !emitted {
            break;
        }
        stats.packets.fetch_add(1, Ordering::Relaxed);
        stats.bytes.fetch_add(sent_len as u64, Ordering::Relaxed);
        remaining -= 1;
    }
}
