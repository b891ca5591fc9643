//! Test support: an in-memory ethernet link.
//!
//! `loopback_pair` returns two connected link endpoints; what one side
//! transmits the other receives. Tests wire one end into a stack (or
//! drive it by hand) to exercise complete TX to RX paths without any
//! NIC or elevated privileges.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use io::EthernetLink;

pub struct LoopbackLink {
    tx: Sender<Vec<u8>>,
    rx: Mutex<Receiver<Vec<u8>>>,
}

/// Two connected ethernet endpoints.
pub fn loopback_pair() -> (LoopbackLink, LoopbackLink) {
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    (LoopbackLink {
        tx: tx_a,
        rx: Mutex::new(rx_b),
    },
     LoopbackLink {
         tx: tx_b,
         rx: Mutex::new(rx_a),
     })
}

impl LoopbackLink {
    /// Pushes a frame towards the paired endpoint without needing the
    /// mutable trait receiver. Convenient for hand-driven test peers.
    pub fn push(&self, bytes: &[u8]) {
        let _ = self.tx.send(bytes.to_vec());
    }

    /// Pulls the next frame this endpoint received, if any.
    pub fn pull(&self) -> Option<Vec<u8>> {
        self.rx.lock().unwrap().try_recv().ok()
    }

    /// Drains and returns everything received so far.
    pub fn pull_all(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.pull() {
            frames.push(frame);
        }
        frames
    }
}

impl EthernetLink for LoopbackLink {
    fn send_frame(&mut self, bytes: &[u8]) -> bool {
        self.tx.send(bytes.to_vec()).is_ok()
    }

    fn recv_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.lock().unwrap().try_recv().ok()
    }
}
