//! Counter and rate bookkeeping.
//!
//! Hot paths only ever bump raw monotonic counters; everything derived
//! (rates, per-interface and per-session aggregates) is computed by
//! once-per-second timer jobs on the main thread, keyed off "last
//! sync" shadow values. Cross-thread readers tolerate slightly stale
//! counter values.

use std::sync::atomic::{AtomicU64, Ordering};

/// Smoothing factor of the exponential rate average.
pub const RATE_ALPHA: f64 = 0.5;

/// Exponentially smoothed per-second rate of a monotonic counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Rate {
    pub avg: f64,
    last_value: u64,
}

impl Rate {
    /// Feeds the current counter value; must be called once per
    /// second. Freshly created rates report zero during their first
    /// interval.
    pub fn update(&mut self, current: u64) {
        let delta = current.saturating_sub(self.last_value);
        self.avg = RATE_ALPHA * delta as f64 + (1.0 - RATE_ALPHA) * self.avg;
        self.last_value = current;
    }

    pub fn reset(&mut self, current: u64) {
        self.avg = 0.0;
        self.last_value = current;
    }
}

/// Raw counters of one emulated interface. Single writer per field
/// from the owning I/O context; reporting readers accept staleness.
#[derive(Default)]
pub struct InterfaceStats {
    pub packets_tx: AtomicU64,
    pub packets_rx: AtomicU64,
    pub bytes_tx: AtomicU64,
    pub bytes_rx: AtomicU64,
    pub stream_tx: AtomicU64,
    pub stream_rx: AtomicU64,
    pub stream_loss: AtomicU64,
    pub session_ipv4_tx: AtomicU64,
    pub session_ipv4_rx: AtomicU64,
    pub session_ipv4_loss: AtomicU64,
    pub session_ipv4_wrong_session: AtomicU64,
    pub session_ipv6_tx: AtomicU64,
    pub session_ipv6_rx: AtomicU64,
    pub session_ipv6_loss: AtomicU64,
    pub session_ipv6_wrong_session: AtomicU64,
    pub session_ipv6pd_tx: AtomicU64,
    pub session_ipv6pd_rx: AtomicU64,
    pub session_ipv6pd_loss: AtomicU64,
    pub session_ipv6pd_wrong_session: AtomicU64,
    pub l2tp_data_tx: AtomicU64,
    pub l2tp_data_rx: AtomicU64,
    pub icmp_rx: AtomicU64,
    pub tcp_rx: AtomicU64,
    pub unknown: AtomicU64,
}

impl InterfaceStats {
    pub fn add_tx(&self, packets: u64, bytes: u64) {
        self.packets_tx.fetch_add(packets, Ordering::Relaxed);
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_rx(&self, packets: u64, bytes: u64) {
        self.packets_rx.fetch_add(packets, Ordering::Relaxed);
        self.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Smoothed rates of one interface, updated by its rate job.
#[derive(Default)]
pub struct InterfaceRates {
    pub packets_tx: Rate,
    pub packets_rx: Rate,
    pub bytes_tx: Rate,
    pub bytes_rx: Rate,
    pub stream_tx: Rate,
    pub stream_rx: Rate,
    pub l2tp_data_tx: Rate,
    pub l2tp_data_rx: Rate,
}

impl InterfaceRates {
    pub fn update(&mut self, stats: &InterfaceStats) {
        self.packets_tx.update(stats.packets_tx.load(Ordering::Relaxed));
        self.packets_rx.update(stats.packets_rx.load(Ordering::Relaxed));
        self.bytes_tx.update(stats.bytes_tx.load(Ordering::Relaxed));
        self.bytes_rx.update(stats.bytes_rx.load(Ordering::Relaxed));
        self.stream_tx.update(stats.stream_tx.load(Ordering::Relaxed));
        self.stream_rx.update(stats.stream_rx.load(Ordering::Relaxed));
        self.l2tp_data_tx.update(stats.l2tp_data_tx.load(Ordering::Relaxed));
        self.l2tp_data_rx.update(stats.l2tp_data_rx.load(Ordering::Relaxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_rate_reports_zero_first() {
        let mut rate = Rate::default();
        rate.update(0);
        assert_eq!(rate.avg, 0.0);
    }

    #[test]
    fn constant_input_converges() {
        let mut rate = Rate::default();
        let mut counter = 0;
        rate.reset(counter);
        for _ in 0..32 {
            counter += 1000;
            rate.update(counter);
        }
        assert!((rate.avg - 1000.0).abs() < 1.0);
    }

    #[test]
    fn rate_smooths_spikes() {
        let mut rate = Rate::default();
        rate.reset(0);
        rate.update(1000);
        rate.update(1000); // zero delta interval
        assert!(rate.avg > 0.0);
        assert!(rate.avg < 1000.0);
    }
}
