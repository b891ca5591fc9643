//! Raw-socket I/O mode backed by `pnet::datalink` channels. Slower
//! than the mapped ring (one syscall per packet) but works everywhere
//! pnet does; selected per interface in the configuration.

use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender};

use std::io;
use std::time::Duration;

use io::EthernetLink;

pub struct RawLink {
    sender: Box<DataLinkSender>,
    receiver: Box<DataLinkReceiver>,
}

impl RawLink {
    /// Opens a duplex ethernet channel on the named physical port with
    /// a short read timeout so RX polling never blocks the loop.
    pub fn open(name: &str) -> io::Result<RawLink> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|interface| interface.name == name)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("interface {} not found", name))
            })?;
        let mut config = datalink::Config::default();
        config.read_timeout = Some(Duration::from_millis(1));
        config.write_buffer_size = ::MAX_PACKET_LEN * 64;
        config.read_buffer_size = ::MAX_PACKET_LEN * 64;
        match datalink::channel(&interface, config)? {
            Channel::Ethernet(sender, receiver) => {
                Ok(RawLink {
                    sender: sender,
                    receiver: receiver,
                })
            }
            _ => Err(io::Error::new(io::ErrorKind::Other, "not an ethernet channel")),
        }
    }
}

impl EthernetLink for RawLink {
    fn send_frame(&mut self, bytes: &[u8]) -> bool {
        match self.sender.send_to(bytes, None) {
            Some(Ok(())) => true,
            _ => false,
        }
    }

    fn recv_frame(&mut self) -> Option<Vec<u8>> {
        match self.receiver.next() {
            Ok(bytes) => Some(bytes.to_vec()),
            // Timeouts are the idle case, everything else is logged by
            // the caller through the io_errors counter.
            Err(_) => None,
        }
    }
}
