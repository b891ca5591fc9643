//! Per-interface I/O worker threads.
//!
//! At most one RX worker and several TX workers can drive a physical
//! port. Workers never take locks on the hot path beyond their own
//! uncontended stream/slot state; they poll their ring, nanosleep
//! briefly when idle and exit cooperatively when `active` drops.

use libc;

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use io::{IoDirection, IoHandle, IoStats};
use stack::{Context, Interface};
use stream::Scheduler;
use timer::Timestamp;
use txq::Txq;

/// Idle nanosleep between worker poll cycles.
const IDLE_SLEEP_NS: u32 = 10_000;

pub struct IoThread {
    pub name: String,
    pub direction: IoDirection,
    pub active: Arc<AtomicBool>,
    /// Redirect ring towards the main loop (ingress workers).
    pub txq: Arc<Txq>,
    pub stats: Arc<IoStats>,
    pub scheduler: Arc<Scheduler>,
    /// Sum of the configured pps of all streams assigned here, used to
    /// balance new streams across TX workers.
    pps_reserved: Mutex<f64>,
    cpu: Option<usize>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl IoThread {
    pub fn new(name: String,
               direction: IoDirection,
               txq_slots: usize,
               stats: Arc<IoStats>,
               scheduler: Arc<Scheduler>,
               cpu: Option<usize>)
               -> Arc<IoThread> {
        Arc::new(IoThread {
            name: name,
            direction: direction,
            active: Arc::new(AtomicBool::new(false)),
            txq: Arc::new(Txq::new(txq_slots)),
            stats: stats,
            scheduler: scheduler,
            pps_reserved: Mutex::new(0.0),
            cpu: cpu,
            handle: Mutex::new(None),
        })
    }

    pub fn pps_reserved(&self) -> f64 {
        *self.pps_reserved.lock().unwrap()
    }

    pub fn reserve_pps(&self, pps: f64) {
        *self.pps_reserved.lock().unwrap() += pps;
    }

    /// Moves the I/O handle into a fresh worker thread and starts its
    /// run loop.
    pub fn start(thread: &Arc<IoThread>,
                 ctx: Arc<Context>,
                 interface: Arc<Interface>,
                 mut io: IoHandle) {
        thread.active.store(true, Ordering::Relaxed);
        let worker = thread.clone();
        debug!("starting {} worker {}",
               match thread.direction {
                   IoDirection::Ingress => "rx",
                   IoDirection::Egress => "tx",
               },
               thread.name);
        let handle = thread::spawn(move || {
            if let Some(cpu) = worker.cpu {
                set_cpu_affinity(cpu);
            }
            match worker.direction {
                IoDirection::Ingress => run_rx(&ctx, &interface, &worker, &mut io),
                IoDirection::Egress => run_tx(&ctx, &interface, &worker, &mut io),
            }
            debug!("worker {} stopped", worker.name);
        });
        *thread.handle.lock().unwrap() = Some(handle);
    }

    /// Cooperative stop: the run loop observes the flag at the top of
    /// its next cycle. In-flight ring slots finish first.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("worker {} panicked", self.name);
            }
        }
    }
}

fn run_rx(ctx: &Context, interface: &Interface, thread: &IoThread, io: &mut IoHandle) {
    let idle = Duration::new(0, IDLE_SLEEP_NS);
    while thread.active.load(Ordering::Relaxed) {
        let timestamp = Timestamp::now();
        if !io.rx_once_thread(ctx, interface, &thread.txq, &timestamp) {
            thread::sleep(idle);
        }
    }
}

fn run_tx(ctx: &Context, interface: &Interface, thread: &IoThread, io: &mut IoHandle) {
    let idle = Duration::new(0, IDLE_SLEEP_NS);
    while thread.active.load(Ordering::Relaxed) {
        thread::sleep(idle);
        let now = Timestamp::now();
        io.tx_once(ctx, interface, &now);
    }
}

fn set_cpu_affinity(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            error!("failed to pin worker to cpu {}", cpu);
        }
    }
}
