//! Lockless single-producer/single-consumer packet ring (TXQ).
//!
//! The TXQ is the only cross-thread data channel on the hot path. It
//! is used in two directions: RX worker threads redirect non-test
//! frames to the main loop through it, and the main loop queues
//! control frames through it for transmission ahead of stream
//! traffic. Both indices are word sized atomics with release/acquire
//! ordering; `None` is the backpressure signal, there is no blocking
//! and no spinning.

use timer::Timestamp;

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TXQ_DEFAULT_SLOTS: usize = 256;
pub const TXQ_BUFFER_LEN: usize = ::MAX_PACKET_LEN;

/// One fixed-size packet slot. Written in place by the producer, read
/// in place by the consumer; the ring owns all slot storage.
pub struct TxqSlot {
    pub timestamp: Timestamp,
    pub vlan_tci: u16,
    pub vlan_tpid: u16,
    pub len: u16,
    pub packet: [u8; TXQ_BUFFER_LEN],
}

impl TxqSlot {
    fn new() -> TxqSlot {
        TxqSlot {
            timestamp: Timestamp::default(),
            vlan_tci: 0,
            vlan_tpid: 0,
            len: 0,
            packet: [0; TXQ_BUFFER_LEN],
        }
    }

    /// The valid packet bytes of this slot.
    pub fn bytes(&self) -> &[u8] {
        &self.packet[..self.len as usize]
    }
}

/// Bounded SPSC ring of `TxqSlot`s.
///
/// Safety contract: exactly one thread calls `write_slot`/`write_next`
/// and exactly one thread calls `read_slot`/`read_next`. A slot
/// reference must not be held across the matching advance call.
pub struct Txq {
    slots: Vec<UnsafeCell<TxqSlot>>,
    mask: usize,
    /// Next slot the producer will write. Only the producer stores it.
    head: AtomicUsize,
    /// Next slot the consumer will read. Only the consumer stores it.
    tail: AtomicUsize,
}

unsafe impl Sync for Txq {}
unsafe impl Send for Txq {}

impl Txq {
    /// Creates a ring with at least `slots` slots, rounded up to the
    /// next power of two.
    pub fn new(slots: usize) -> Txq {
        let capacity = slots.next_power_of_two();
        let mut storage = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            storage.push(UnsafeCell::new(TxqSlot::new()));
        }
        Txq {
            slots: storage,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the next writable slot, or `None` if the ring is full.
    /// The write only becomes visible to the consumer after
    /// `write_next`.
    pub fn write_slot(&self) -> Option<&mut TxqSlot> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) == self.slots.len() {
            return None;
        }
        Some(unsafe { &mut *self.slots[head & self.mask].get() })
    }

    /// Publishes the slot obtained from the last `write_slot`.
    pub fn write_next(&self) {
        let head = self.head.load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
    }

    /// Returns the next readable slot, or `None` if the ring is empty.
    /// The slot stays owned by the ring until `read_next`.
    pub fn read_slot(&self) -> Option<&TxqSlot> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        Some(unsafe { &*self.slots[tail & self.mask].get() })
    }

    /// Releases the slot obtained from the last `read_slot`.
    pub fn read_next(&self) {
        let tail = self.tail.load(Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fills_up_and_drains() {
        let txq = Txq::new(4);
        for i in 0..4 {
            let slot = txq.write_slot().unwrap();
            slot.len = 1;
            slot.packet[0] = i as u8;
            txq.write_next();
        }
        assert!(txq.write_slot().is_none());
        for i in 0..4 {
            let slot = txq.read_slot().unwrap();
            assert_eq!(slot.packet[0], i as u8);
            txq.read_next();
        }
        assert!(txq.read_slot().is_none());
    }

    #[test]
    fn empty_is_backpressure_not_error() {
        let txq = Txq::new(8);
        assert!(txq.read_slot().is_none());
        assert!(txq.is_empty());
    }

    // Under one producer and one consumer the consumer observes
    // exactly the produced sequence, no duplicates, no drops.
    #[test]
    fn spsc_transfers_every_packet() {
        let txq = Arc::new(Txq::new(64));
        let total: u32 = 50_000;

        let producer_txq = txq.clone();
        let producer = thread::spawn(move || {
            let mut written: u32 = 0;
            while written < total {
                if let Some(slot) = producer_txq.write_slot() {
                    slot.len = 4;
                    slot.packet[..4].copy_from_slice(&written.to_le_bytes());
                    producer_txq.write_next();
                    written += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut read: u32 = 0;
        while read < total {
            if let Some(slot) = txq.read_slot() {
                let mut value = [0u8; 4];
                value.copy_from_slice(&slot.packet[..4]);
                assert_eq!(u32::from_le_bytes(value), read);
                txq.read_next();
                read += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert!(txq.read_slot().is_none());
        assert_eq!(read, total);
    }
}
