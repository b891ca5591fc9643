//! The embedded test payload ("BBL header").
//!
//! Every generated test packet carries this 48 byte record as its UDP
//! payload, padded out to the configured stream length. The receive
//! side identifies the flow by `flow_id`, computes loss from gaps in
//! `flow_seq` and one-way delay from the embedded transmit timestamp.
//! The layout is little-endian and wire-frozen; interoperating
//! implementations must agree on it byte for byte.
//!
//! ```text
//! +0    u8   type           1=unicast-session, 2=multicast
//! +1    u8   sub_type       1=IPv4, 2=IPv6, 3=IPv6-PD
//! +2    u8   direction      1=up, 2=down
//! +3    u8   tos
//! +4    u32  session_id
//! +8    u32  ifindex
//! +12   u16  outer_vlan
//! +14   u16  inner_vlan
//! +16   u32  mc_source      (multicast only)
//! +20   u32  mc_group       (multicast only)
//! +24   u64  flow_id
//! +32   u64  flow_seq
//! +40   u32  timestamp_sec  CLOCK_MONOTONIC at TX
//! +44   u32  timestamp_nsec
//! +48   padding to the requested length
//! ```

use std::net::Ipv4Addr;

use timer::Timestamp;
use {DecodeError, DecodeResult, Payload};

/// Size of the fixed part of the test payload.
pub const BBL_HEADER_LEN: usize = 48;

/// Offset of `flow_seq` within the record, patched per packet.
pub const BBL_FLOW_SEQ_OFFSET: usize = 32;
/// Offset of the transmit timestamp, patched per packet.
pub const BBL_TIMESTAMP_OFFSET: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BblType {
    UnicastSession,
    Multicast,
}

impl BblType {
    fn from_wire(value: u8) -> Option<BblType> {
        match value {
            1 => Some(BblType::UnicastSession),
            2 => Some(BblType::Multicast),
            _ => None,
        }
    }

    fn to_wire(&self) -> u8 {
        match *self {
            BblType::UnicastSession => 1,
            BblType::Multicast => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BblSubType {
    Ipv4,
    Ipv6,
    Ipv6Pd,
}

impl BblSubType {
    fn from_wire(value: u8) -> Option<BblSubType> {
        match value {
            1 => Some(BblSubType::Ipv4),
            2 => Some(BblSubType::Ipv6),
            3 => Some(BblSubType::Ipv6Pd),
            _ => None,
        }
    }

    fn to_wire(&self) -> u8 {
        match *self {
            BblSubType::Ipv4 => 1,
            BblSubType::Ipv6 => 2,
            BblSubType::Ipv6Pd => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BblDirection {
    Up,
    Down,
}

impl BblDirection {
    fn from_wire(value: u8) -> Option<BblDirection> {
        match value {
            1 => Some(BblDirection::Up),
            2 => Some(BblDirection::Down),
            _ => None,
        }
    }

    fn to_wire(&self) -> u8 {
        match *self {
            BblDirection::Up => 1,
            BblDirection::Down => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BblHeader {
    pub bbl_type: BblType,
    pub sub_type: BblSubType,
    pub direction: BblDirection,
    pub tos: u8,
    pub session_id: u32,
    pub ifindex: u32,
    pub outer_vlan: u16,
    pub inner_vlan: u16,
    pub mc_source: Ipv4Addr,
    pub mc_group: Ipv4Addr,
    pub flow_id: u64,
    pub flow_seq: u64,
    pub timestamp: Timestamp,
}

impl BblHeader {
    /// A unicast header with multicast fields zeroed.
    pub fn unicast(sub_type: BblSubType, direction: BblDirection) -> BblHeader {
        BblHeader {
            bbl_type: BblType::UnicastSession,
            sub_type: sub_type,
            direction: direction,
            tos: 0,
            session_id: 0,
            ifindex: 0,
            outer_vlan: 0,
            inner_vlan: 0,
            mc_source: Ipv4Addr::new(0, 0, 0, 0),
            mc_group: Ipv4Addr::new(0, 0, 0, 0),
            flow_id: 0,
            flow_seq: 0,
            timestamp: Timestamp::default(),
        }
    }

    pub fn decode(data: &[u8]) -> DecodeResult<BblHeader> {
        if data.len() < BBL_HEADER_LEN {
            return Err(DecodeError::Malformed);
        }
        let bbl_type = BblType::from_wire(data[0]).ok_or(DecodeError::Malformed)?;
        let sub_type = BblSubType::from_wire(data[1]).ok_or(DecodeError::Malformed)?;
        let direction = BblDirection::from_wire(data[2]).ok_or(DecodeError::Malformed)?;
        Ok(BblHeader {
            bbl_type: bbl_type,
            sub_type: sub_type,
            direction: direction,
            tos: data[3],
            session_id: read_u32(data, 4),
            ifindex: read_u32(data, 8),
            outer_vlan: read_u16(data, 12),
            inner_vlan: read_u16(data, 14),
            mc_source: Ipv4Addr::from(read_u32(data, 16).swap_bytes()),
            mc_group: Ipv4Addr::from(read_u32(data, 20).swap_bytes()),
            flow_id: read_u64(data, 24),
            flow_seq: read_u64(data, 32),
            timestamp: Timestamp {
                sec: read_u32(data, 40) as u64,
                nsec: read_u32(data, 44),
            },
        })
    }

    pub fn encode(&self, buffer: &mut [u8]) {
        buffer[0] = self.bbl_type.to_wire();
        buffer[1] = self.sub_type.to_wire();
        buffer[2] = self.direction.to_wire();
        buffer[3] = self.tos;
        write_u32(buffer, 4, self.session_id);
        write_u32(buffer, 8, self.ifindex);
        write_u16(buffer, 12, self.outer_vlan);
        write_u16(buffer, 14, self.inner_vlan);
        write_u32(buffer, 16, u32::from(self.mc_source).swap_bytes());
        write_u32(buffer, 20, u32::from(self.mc_group).swap_bytes());
        write_u64(buffer, 24, self.flow_id);
        write_u64(buffer, 32, self.flow_seq);
        write_u32(buffer, 40, self.timestamp.sec as u32);
        write_u32(buffer, 44, self.timestamp.nsec);
    }

    /// Rewrites sequence number and transmit timestamp of an already
    /// encoded record in place. This is the only per-packet work on a
    /// cached stream template.
    pub fn patch(buffer: &mut [u8], flow_seq: u64, timestamp: &Timestamp) {
        write_u64(buffer, BBL_FLOW_SEQ_OFFSET, flow_seq);
        write_u32(buffer, BBL_TIMESTAMP_OFFSET, timestamp.sec as u32);
        write_u32(buffer, BBL_TIMESTAMP_OFFSET + 4, timestamp.nsec);
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&data[offset..offset + 2]);
    u16::from_le_bytes(bytes)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// `Payload` builder for the test record: the header followed by zero
/// padding up to the configured stream length.
pub struct BblPayload {
    pub header: BblHeader,
    pub padding: usize,
}

impl BblPayload {
    pub fn new(header: BblHeader, padding: usize) -> BblPayload {
        BblPayload {
            header: header,
            padding: padding,
        }
    }
}

impl Payload for BblPayload {
    fn len(&self) -> usize {
        BBL_HEADER_LEN + self.padding
    }

    fn build(&mut self, buffer: &mut [u8]) {
        self.header.encode(buffer);
        for byte in &mut buffer[BBL_HEADER_LEN..] {
            *byte = 0;
        }
    }
}
