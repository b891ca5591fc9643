//! # bngen - BNG traffic emulator
//!
//! `bngen` emulates the two sides of a broadband network gateway under
//! test: a population of subscriber sessions (PPPoE/IPoE access) and
//! the upstream network peers they talk to. It drives bidirectional,
//! paced test traffic between both sides and measures per-flow loss,
//! one-way delay and mis-delivery.
//!
//! The crate is built from a small number of cooperating engines:
//!
//! - `io` - packet I/O on kernel memory-mapped rings (PACKET_MMAP,
//!   TPACKET_V2) with optional per-interface RX/TX worker threads, and
//!   a raw-socket fallback backed by `pnet::datalink`.
//! - `packet` - the codec. Decoding produces a borrowed layered view
//!   over the received bytes; encoding goes through nested `Payload`
//!   builders that write into caller-provided buffers.
//! - `stream` - the traffic engine: per-flow packet templates,
//!   send-window pacing, and the receive-side matcher that accounts
//!   loss, delay and wrong-session delivery.
//! - `netif` - emulated upstream network interfaces answering ARP,
//!   ICMP echo and ICMPv6 neighbor discovery, and dispatching
//!   everything else into external protocol handlers.
//! - `stack` - orchestration: configuration validation, interface and
//!   worker lifecycle, the main timer loop and teardown.
//!
//! ## Sending
//!
//! Packet construction follows a builder chain: every layer is a
//! struct implementing `Payload`, parameterized over the payload it
//! carries. An `EthernetBuilder<Ipv4Builder<UdpBuilder<BblPayload>>>`
//! knows its total length up front and writes the whole frame into a
//! single buffer, computing checksums on the way out. Stream templates
//! are built once with these builders and cached; the hot path only
//! patches the embedded sequence number and timestamp.
//!
//! ## Receiving
//!
//! The I/O layer drains the kernel ring and hands every frame to the
//! codec. Frames carrying the embedded test payload are matched
//! against their flow and measured where they arrive (worker thread or
//! main loop); everything else crosses a lockless SPSC ring to the
//! main loop, where the per-interface control handlers and the
//! external protocol engines run.

extern crate ipnetwork;
extern crate libc;
extern crate pnet;
extern crate rand;
extern crate serde;

#[macro_use]
extern crate serde_json;

#[macro_use]
extern crate log;

use std::fmt;

pub mod config;
pub mod handlers;
pub mod io;
pub mod netif;
pub mod packet;
pub mod session;
pub mod stack;
pub mod stats;
pub mod stream;
pub mod testing;
pub mod timer;
pub mod txq;

pub use stack::{Context, Stack, StackError, StackResult};

/// UDP port identifying embedded test traffic on both ends.
pub const BBL_UDP_PORT: u16 = 65056;
/// L2TPv2 well known port.
pub const L2TP_UDP_PORT: u16 = 1701;
/// Lawful-intercept (QMX-LI) port.
pub const QMX_LI_UDP_PORT: u16 = 49152;

/// Upper bound for a single frame in TXQ slots and ring frames.
pub const MAX_PACKET_LEN: usize = 2048;

/// Trait for anything wishing to be built as packet payload. Builders
/// for every layer implement this and nest the next layer inside.
pub trait Payload {
    /// Returns how many bytes this payload will occupy.
    fn len(&self) -> usize;

    /// Construct this payload into the given `buffer`. The caller
    /// hands in exactly `len()` bytes.
    fn build(&mut self, buffer: &mut [u8]);
}

/// Error returned when a frame could not be encoded.
#[derive(Debug, Eq, PartialEq)]
pub enum EncodeError {
    /// The target buffer is smaller than the frame being built.
    TooSmall,
    /// The template builder could not derive a complete frame from the
    /// current session/interface state.
    Incomplete(&'static str),
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Error returned by the decoder for frames that could not be turned
/// into a layered view.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Well formed, but not a protocol this emulator cares about.
    /// Counted, never treated as a failure.
    UnknownProtocol,
    /// Truncated or self-inconsistent frame.
    Malformed,
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Fatal configuration errors. These abort startup with a named
/// reason; nothing at runtime produces them.
#[derive(Debug)]
pub enum ConfigError {
    /// Referenced physical interface does not exist.
    MissingInterface(String),
    /// Two network interfaces on the same port share a VLAN.
    DuplicateVlan(String, u16),
    /// Untagged network interface on a port that also carries access
    /// sessions.
    UntaggedOnAccess(String),
    /// Any other invalid option, with the offending field named.
    Invalid(String),
    /// Reading or parsing the configuration file failed.
    Io(::std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigError::MissingInterface(ref name) => {
                write!(f, "interface {} not found", name)
            }
            ConfigError::DuplicateVlan(ref name, vlan) => {
                write!(f, "duplicate vlan {} on interface {}", vlan, name)
            }
            ConfigError::UntaggedOnAccess(ref name) => {
                write!(f,
                       "untagged network interface not allowed on access port {}",
                       name)
            }
            ConfigError::Invalid(ref what) => write!(f, "invalid configuration: {}", what),
            ConfigError::Io(ref e) => write!(f, "configuration file: {}", e),
        }
    }
}

impl From<::std::io::Error> for ConfigError {
    fn from(e: ::std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
