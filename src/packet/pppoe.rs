//! PPPoE session and L2TPv2 data encapsulation builders.
//!
//! Upstream access traffic of a PPPoE session travels inside a PPPoE
//! session frame; downstream traffic towards an L2TP-tunnelled
//! subscriber travels as an L2TPv2 data message wrapping the inner
//! PPP/IPv4 packet.

use packet::ip::{Ipv4Builder, Ipv4Payload, Ipv6Builder, Ipv6Payload};
use packet::{ETH_TYPE_PPPOE_SESSION, PPP_PROTOCOL_IPV4, PPP_PROTOCOL_IPV6};
use packet::ethernet::EthernetPayload;
use Payload;

/// Trait for anything that can travel as a PPP protocol payload.
pub trait PppPayload: Payload {
    fn ppp_protocol(&self) -> u16;
}

impl<P: Ipv4Payload> PppPayload for Ipv4Builder<P> {
    fn ppp_protocol(&self) -> u16 {
        PPP_PROTOCOL_IPV4
    }
}

impl<P: Ipv6Payload> PppPayload for Ipv6Builder<P> {
    fn ppp_protocol(&self) -> u16 {
        PPP_PROTOCOL_IPV6
    }
}

/// Builder for a PPPoE session frame (RFC 2516) around a PPP payload.
pub struct PppoeSessionBuilder<P: PppPayload> {
    session_id: u16,
    payload: P,
}

impl<P: PppPayload> PppoeSessionBuilder<P> {
    pub fn new(session_id: u16, payload: P) -> Self {
        PppoeSessionBuilder {
            session_id: session_id,
            payload: payload,
        }
    }
}

impl<P: PppPayload> Payload for PppoeSessionBuilder<P> {
    fn len(&self) -> usize {
        // ver/type, code, session id, length, ppp protocol
        8 + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let ppp_length = (self.payload.len() + 2) as u16;
        buffer[0] = 0x11;
        buffer[1] = 0x00;
        buffer[2..4].copy_from_slice(&self.session_id.to_be_bytes());
        buffer[4..6].copy_from_slice(&ppp_length.to_be_bytes());
        buffer[6..8].copy_from_slice(&self.payload.ppp_protocol().to_be_bytes());
        self.payload.build(&mut buffer[8..]);
    }
}

impl<P: PppPayload> EthernetPayload for PppoeSessionBuilder<P> {
    fn ether_type(&self) -> u16 {
        ETH_TYPE_PPPOE_SESSION
    }
}

/// Builder for an L2TPv2 data message (RFC 2661) around a PPP payload.
/// Travels as UDP payload on port 1701. Length and offset fields are
/// negotiated per tunnel and therefore optional.
pub struct L2tpDataBuilder<P: PppPayload> {
    tunnel_id: u16,
    session_id: u16,
    with_length: bool,
    with_offset: bool,
    payload: P,
}

impl<P: PppPayload> L2tpDataBuilder<P> {
    pub fn new(tunnel_id: u16, session_id: u16, payload: P) -> Self {
        L2tpDataBuilder {
            tunnel_id: tunnel_id,
            session_id: session_id,
            with_length: false,
            with_offset: false,
            payload: payload,
        }
    }

    pub fn with_length(mut self, with_length: bool) -> Self {
        self.with_length = with_length;
        self
    }

    pub fn with_offset(mut self, with_offset: bool) -> Self {
        self.with_offset = with_offset;
        self
    }

    fn header_len(&self) -> usize {
        let mut len = 6; // flags + tunnel id + session id
        if self.with_length {
            len += 2;
        }
        if self.with_offset {
            len += 2;
        }
        len
    }
}

impl<P: PppPayload> Payload for L2tpDataBuilder<P> {
    fn len(&self) -> usize {
        self.header_len() + 2 + self.payload.len()
    }

    fn build(&mut self, buffer: &mut [u8]) {
        let mut flags: u16 = 0x0002; // version 2, data message
        if self.with_length {
            flags |= 0x4000;
        }
        if self.with_offset {
            flags |= 0x0200;
        }
        buffer[0..2].copy_from_slice(&flags.to_be_bytes());
        let mut offset = 2;
        if self.with_length {
            let total = buffer.len() as u16;
            buffer[offset..offset + 2].copy_from_slice(&total.to_be_bytes());
            offset += 2;
        }
        buffer[offset..offset + 2].copy_from_slice(&self.tunnel_id.to_be_bytes());
        buffer[offset + 2..offset + 4].copy_from_slice(&self.session_id.to_be_bytes());
        offset += 4;
        if self.with_offset {
            buffer[offset] = 0;
            buffer[offset + 1] = 0;
            offset += 2;
        }
        buffer[offset..offset + 2].copy_from_slice(&self.payload.ppp_protocol().to_be_bytes());
        self.payload.build(&mut buffer[offset + 2..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packet::bbl::{BblDirection, BblHeader, BblPayload, BblSubType};
    use packet::ip::UdpBuilder;
    use packet::{decode_ethernet, EthernetBuilder, L3, L4, PppPayloadFields, UdpPayload};
    use pnet::util::MacAddr;
    use std::net::Ipv4Addr;

    #[test]
    fn pppoe_wrapped_test_payload_roundtrip() {
        let mut header = BblHeader::unicast(BblSubType::Ipv4, BblDirection::Up);
        header.flow_id = 17;
        header.session_id = 1;
        let udp = UdpBuilder::new(::BBL_UDP_PORT, ::BBL_UDP_PORT, BblPayload::new(header, 0));
        let ip = Ipv4Builder::new(Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 1), udp);
        let pppoe = PppoeSessionBuilder::new(0x0007, ip);
        let mut eth = EthernetBuilder::new(MacAddr::new(2, 0, 0, 0, 0, 1),
                                           MacAddr::new(2, 0, 0, 0, 0, 2),
                                           pppoe)
            .vlan_outer(100, 0);
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);

        let frame = decode_ethernet(&buffer).unwrap();
        let bbl = frame.bbl.expect("embedded payload not found");
        assert_eq!(bbl.flow_id, 17);
        match frame.payload {
            L3::PppoeSession(ref pppoe) => {
                assert_eq!(pppoe.session_id, 0x0007);
                match pppoe.payload {
                    PppPayloadFields::Ipv4(ref ipv4) => {
                        assert_eq!(ipv4.dst, Ipv4Addr::new(10, 0, 0, 1));
                        match ipv4.payload {
                            L4::Udp(ref udp) => {
                                assert_eq!(udp.dst, ::BBL_UDP_PORT);
                                match udp.payload {
                                    UdpPayload::Bbl(ref inner) => {
                                        assert_eq!(inner.flow_id, 17)
                                    }
                                    _ => panic!("expected embedded payload"),
                                }
                            }
                            _ => panic!("expected udp"),
                        }
                    }
                    _ => panic!("expected ipv4 in ppp"),
                }
            }
            _ => panic!("expected pppoe session frame"),
        }
    }

    #[test]
    fn l2tp_data_header_flags() {
        let mut header = BblHeader::unicast(BblSubType::Ipv4, BblDirection::Down);
        header.flow_id = 3;
        let udp = UdpBuilder::new(::BBL_UDP_PORT, ::BBL_UDP_PORT, BblPayload::new(header, 0));
        let inner = Ipv4Builder::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 10), udp);
        let mut l2tp = L2tpDataBuilder::new(0x0102, 0x0304, inner).with_length(true);
        let mut buffer = vec![0; l2tp.len()];
        l2tp.build(&mut buffer);
        assert_eq!(&buffer[0..2], &[0x40, 0x02]);
        let length = (buffer[2] as usize) << 8 | buffer[3] as usize;
        assert_eq!(length, buffer.len());
        assert_eq!(&buffer[4..6], &[0x01, 0x02]);
        assert_eq!(&buffer[6..8], &[0x03, 0x04]);
        // PPP protocol follows immediately.
        assert_eq!(&buffer[8..10], &[0x00, 0x21]);
    }
}
