//! Template build / decode round trips for every encapsulation the
//! traffic engine produces.

extern crate bngen;
extern crate pnet;

mod common;

use bngen::packet::bbl::{BblDirection, BblSubType, BblType};
use bngen::packet::{decode_ethernet, ipv4_multicast_mac, L3, L4, MplsLabel, UdpPayload};
use bngen::session::{AccessType, L2tpBinding, NcpState, Session, SessionKey, SessionState};
use bngen::stream::{build_template, Stream, StreamConfig};

use pnet::util::MacAddr;

use std::net::Ipv4Addr;
use std::sync::Arc;

#[test]
fn network_template_roundtrip_with_mpls() {
    let ctx = common::test_context();
    let netif = common::test_netif();

    let config = StreamConfig {
        name: "mpls-down".to_owned(),
        length: 256,
        priority: 0xb8,
        vlan_priority: 5,
        ipv4_destination_address: Some(Ipv4Addr::new(10, 0, 0, 99)),
        tx_mpls1: Some(MplsLabel {
            label: 100,
            exp: 3,
            ttl: 64,
        }),
        tx_mpls2: Some(MplsLabel {
            label: 200,
            exp: 0,
            ttl: 255,
        }),
        ipv4_df: true,
        ..StreamConfig::default()
    };
    let mut stream = Stream::new(7, Arc::new(config), BblDirection::Down, None);
    stream.network_interface = Some(netif.clone());

    let template = build_template(&ctx, &stream).unwrap();
    let frame = decode_ethernet(&template.buf).unwrap();

    assert_eq!(frame.src, common::NETIF_MAC);
    assert_eq!(frame.dst, common::GATEWAY_MAC);
    assert_eq!(frame.vlan_outer, 100);
    assert_eq!(frame.vlan_outer_priority, 5);
    assert_eq!(frame.mpls.outer().unwrap().label, 100);
    assert_eq!(frame.mpls.outer().unwrap().exp, 3);
    assert_eq!(frame.mpls.inner().unwrap().label, 200);

    let ipv4 = frame.ipv4().expect("ipv4 payload");
    assert_eq!(ipv4.src, Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(ipv4.dst, Ipv4Addr::new(10, 0, 0, 99));
    assert_eq!(ipv4.tos, 0xb8);

    let bbl = frame.bbl.expect("embedded record");
    assert_eq!(bbl.bbl_type, BblType::UnicastSession);
    assert_eq!(bbl.sub_type, BblSubType::Ipv4);
    assert_eq!(bbl.direction, BblDirection::Down);
    assert_eq!(bbl.flow_id, 7);
    assert_eq!(bbl.tos, 0xb8);
    // L3 length is the configured one: IP header to end of padding.
    assert_eq!(frame.length - 14 - 4 - 8, 256);
    // Offset points exactly at the record for per-packet patching.
    let payload_len = template.buf.len() - template.bbl_offset;
    assert_eq!(payload_len, 256 - 28);
}

#[test]
fn multicast_destination_derives_group_mac() {
    let ctx = common::test_context();
    let netif = common::test_netif();

    let group = Ipv4Addr::new(239, 0, 0, 1);
    let config = StreamConfig {
        name: "mc".to_owned(),
        ipv4_destination_address: Some(group),
        ..StreamConfig::default()
    };
    let mut stream = Stream::new(8, Arc::new(config), BblDirection::Down, None);
    stream.network_interface = Some(netif.clone());

    let template = build_template(&ctx, &stream).unwrap();
    let frame = decode_ethernet(&template.buf).unwrap();
    assert_eq!(frame.dst, ipv4_multicast_mac(group));
    assert_eq!(frame.dst, MacAddr(0x01, 0x00, 0x5e, 0, 0, 1));
    let bbl = frame.bbl.unwrap();
    assert_eq!(bbl.bbl_type, BblType::Multicast);
    assert_eq!(bbl.mc_group, group);
    assert_eq!(bbl.mc_source, Ipv4Addr::new(10, 0, 0, 2));
}

fn pppoe_session(netif: &Arc<bngen::netif::NetworkInterface>) -> Arc<Session> {
    let session = Session::new(1,
                               AccessType::Pppoe,
                               SessionKey {
                                   ifindex: 2,
                                   outer_vlan: 7,
                                   inner_vlan: 2000,
                               },
                               1,
                               MacAddr(2, 0, 0, 0, 1, 1),
                               Some(netif.clone()));
    {
        let mut inner = session.inner_mut();
        inner.state = SessionState::Established;
        inner.server_mac = Some(MacAddr(2, 0, 0, 0, 1, 2));
        inner.pppoe_session_id = 0x0042;
        inner.ip_address = Some(Ipv4Addr::new(100, 64, 0, 10));
        inner.ipcp_state = NcpState::Opened;
    }
    Arc::new(session)
}

#[test]
fn access_pppoe_template_roundtrip() {
    let ctx = common::test_context();
    let netif = common::test_netif();
    let session = pppoe_session(&netif);

    let config = StreamConfig {
        name: "pppoe-up".to_owned(),
        stream_group_id: 1,
        vlan_priority: 6,
        ..StreamConfig::default()
    };
    let mut stream = Stream::new(9, Arc::new(config), BblDirection::Up, Some(session.clone()));
    stream.network_interface = Some(netif.clone());

    let template = build_template(&ctx, &stream).unwrap();
    let frame = decode_ethernet(&template.buf).unwrap();

    assert_eq!(frame.src, MacAddr(2, 0, 0, 0, 1, 1));
    assert_eq!(frame.dst, MacAddr(2, 0, 0, 0, 1, 2));
    assert_eq!(frame.vlan_outer, 7);
    assert_eq!(frame.vlan_inner, 2000);
    assert_eq!(frame.vlan_outer_priority, 6);
    match frame.payload {
        L3::PppoeSession(ref pppoe) => {
            assert_eq!(pppoe.session_id, 0x0042);
        }
        _ => panic!("expected pppoe session frame"),
    }
    let bbl = frame.bbl.expect("embedded record");
    assert_eq!(bbl.direction, BblDirection::Up);
    assert_eq!(bbl.session_id, 1);
    assert_eq!(bbl.outer_vlan, 7);
    assert_eq!(bbl.inner_vlan, 2000);
}

#[test]
fn l2tp_template_wraps_inner_frame() {
    let ctx = common::test_context();
    let netif = common::test_netif();
    let session = pppoe_session(&netif);
    {
        let mut inner = session.inner_mut();
        inner.l2tp = true;
        inner.l2tp_binding = Some(Arc::new(L2tpBinding {
            peer_tunnel_id: 0x1111,
            peer_session_id: 0x2222,
            server_ip: Ipv4Addr::new(10, 0, 0, 2),
            peer_ip: Ipv4Addr::new(10, 99, 0, 1),
            data_length: true,
            data_offset: false,
            network_interface: netif.clone(),
        }));
    }

    let config = StreamConfig {
        name: "l2tp-down".to_owned(),
        stream_group_id: 1,
        ..StreamConfig::default()
    };
    let mut stream = Stream::new(10, Arc::new(config), BblDirection::Down, Some(session.clone()));
    stream.network_interface = Some(netif.clone());

    let template = build_template(&ctx, &stream).unwrap();
    let frame = decode_ethernet(&template.buf).unwrap();

    let ipv4 = frame.ipv4().expect("outer ipv4");
    assert_eq!(ipv4.src, Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(ipv4.dst, Ipv4Addr::new(10, 99, 0, 1));
    match ipv4.payload {
        L4::Udp(ref udp) => {
            assert_eq!(udp.dst, 1701);
            match udp.payload {
                UdpPayload::L2tp(ref l2tp) => {
                    assert!(!l2tp.control);
                    assert_eq!(l2tp.tunnel_id, 0x1111);
                    assert_eq!(l2tp.session_id, 0x2222);
                    assert_eq!(l2tp.ppp_protocol, 0x0021);
                }
                _ => panic!("expected l2tp payload"),
            }
        }
        _ => panic!("expected udp"),
    }
    // The embedded record of the tunnelled inner frame is still found.
    let bbl = frame.bbl.expect("embedded record inside the tunnel");
    assert_eq!(bbl.flow_id, 10);
    assert_eq!(bbl.direction, BblDirection::Down);
}
