//! Timer root driving every paced activity in the emulator.
//!
//! All protocol work, rate jobs and main-thread I/O jobs are callbacks
//! registered here and fired from the main loop. Callbacks fired in
//! the same processing pass all observe one common timestamp, so a
//! burst of thousands of stream jobs agrees on "now". Ordering within
//! a pass is unspecified.

use libc;

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A CLOCK_MONOTONIC timestamp. This is also the format embedded in
/// the test payload on transmit, so it is kept as naked seconds and
/// nanoseconds rather than an opaque `Instant`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Timestamp {
    pub sec: u64,
    pub nsec: u32,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        Timestamp {
            sec: ts.tv_sec as u64,
            nsec: ts.tv_nsec as u32,
        }
    }

    pub fn nanos(&self) -> u64 {
        self.sec * 1_000_000_000 + self.nsec as u64
    }

    /// Nanoseconds from `earlier` to `self`, zero if `earlier` is in
    /// fact later (clock skew between two hosts' monotonic clocks).
    pub fn saturating_nanos_since(&self, earlier: &Timestamp) -> u64 {
        self.nanos().saturating_sub(earlier.nanos())
    }

    /// Seconds from `earlier` to `self` as a double.
    pub fn secs_since(&self, earlier: &Timestamp) -> f64 {
        self.saturating_nanos_since(earlier) as f64 / 1_000_000_000.0
    }
}

/// Handle returned by the add functions. Dropping it does *not* cancel
/// the timer; call `cancel` to take the entry out of rotation.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

struct Entry {
    deadline: Instant,
    period: Option<Duration>,
    name: String,
    cancelled: Arc<AtomicBool>,
    job: Box<FnMut(&Timestamp) + Send>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the `BinaryHeap` max-heap pops the earliest deadline.
    fn cmp(&self, other: &Entry) -> CmpOrdering {
        other.deadline.cmp(&self.deadline)
    }
}

/// Root of all periodic and one-shot timers. Owned and processed by
/// the main loop only.
pub struct TimerRoot {
    queue: BinaryHeap<Entry>,
}

impl TimerRoot {
    pub fn new() -> TimerRoot {
        TimerRoot { queue: BinaryHeap::new() }
    }

    /// Registers `job` to fire every `sec` seconds plus `nsec`
    /// nanoseconds, first firing one interval from now.
    pub fn add_periodic<F>(&mut self, name: &str, sec: u64, nsec: u32, job: F) -> TimerHandle
        where F: FnMut(&Timestamp) + Send + 'static
    {
        let period = Duration::new(sec, nsec);
        self.add(name, period, Some(period), job)
    }

    /// Registers `job` to fire once, `sec`+`nsec` from now.
    pub fn add_oneshot<F>(&mut self, name: &str, sec: u64, nsec: u32, job: F) -> TimerHandle
        where F: FnMut(&Timestamp) + Send + 'static
    {
        self.add(name, Duration::new(sec, nsec), None, job)
    }

    fn add<F>(&mut self,
              name: &str,
              delay: Duration,
              period: Option<Duration>,
              job: F)
              -> TimerHandle
        where F: FnMut(&Timestamp) + Send + 'static
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.queue.push(Entry {
            deadline: Instant::now() + delay,
            period: period,
            name: name.to_owned(),
            cancelled: cancelled.clone(),
            job: Box::new(job),
        });
        TimerHandle { cancelled: cancelled }
    }

    /// Fires every due entry. The tick timestamp is captured once and
    /// shared by all callbacks of this pass. Returns the deadline of
    /// the next pending entry, if any.
    pub fn process(&mut self) -> Option<Instant> {
        let now = Instant::now();
        let timestamp = Timestamp::now();
        while let Some(entry) = self.queue.peek() {
            if entry.deadline > now {
                break;
            }
            let mut entry = self.queue.pop().unwrap();
            if entry.cancelled.load(Ordering::Relaxed) {
                trace!("timer {} cancelled", entry.name);
                continue;
            }
            (entry.job)(&timestamp);
            if let Some(period) = entry.period {
                let mut next = entry.deadline + period;
                if next <= now {
                    // Fell behind by more than a period. Catch up to
                    // wall time instead of firing an avalanche.
                    next = now + period;
                }
                entry.deadline = next;
                self.queue.push(entry);
            }
        }
        self.queue.peek().map(|entry| entry.deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
