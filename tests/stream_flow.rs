//! End-to-end stream path over the in-memory link: scheduler to
//! egress, frames on the wire, back through ingress into the flow
//! matcher.

extern crate bngen;
extern crate pnet;

mod common;

use bngen::io::{IoBackend, IoDirection, IoHandle};
use bngen::packet::{decode_ethernet, ARP_REQUEST, L3};
use bngen::stream::StreamConfig;
use bngen::testing::loopback_pair;
use bngen::timer::Timestamp;

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;

fn advance(now: &mut Timestamp, nanos: u64) {
    let total = now.nanos() + nanos;
    now.sec = total / 1_000_000_000;
    now.nsec = (total % 1_000_000_000) as u32;
}

#[test]
fn raw_stream_loopback_counts_and_sequences() {
    let ctx = common::test_context();
    ctx.set_init_phase(false);
    let netif = common::test_netif();
    let (interface, scheduler) = common::test_interface(&netif);

    let config = StreamConfig {
        name: "S1".to_owned(),
        pps: 1000.0,
        length: 128,
        ipv4_destination_address: Some(Ipv4Addr::new(10, 0, 0, 99)),
        ..StreamConfig::default()
    };
    let stream = common::raw_stream(&ctx, &netif, &scheduler, config);

    let (tx_end, tx_peer) = loopback_pair();
    let mut tx_io = IoHandle::new(IoDirection::Egress, IoBackend::Link(Box::new(tx_end)), 32);
    tx_io.scheduler = scheduler.clone();

    // Ten ticks, 10 ms apart: one packet opens the window, then ten
    // per tick at 1000 pps.
    let mut now = Timestamp::now();
    for _ in 0..10 {
        tx_io.tx_once(&ctx, &interface, &now);
        advance(&mut now, 10_000_000);
    }

    let frames = tx_peer.pull_all();
    let packets_tx = stream.packets_tx.load(Ordering::Relaxed);
    assert_eq!(frames.len() as u64, packets_tx);
    assert!(packets_tx >= 80 && packets_tx <= 100,
            "unexpected tx count {}",
            packets_tx);

    // Sequence numbers are strictly 1, 2, 3, ...
    for (index, frame) in frames.iter().enumerate() {
        let decoded = decode_ethernet(frame).unwrap();
        let bbl = decoded.bbl.expect("test packet without embedded record");
        assert_eq!(bbl.flow_seq, index as u64 + 1);
        assert_eq!(bbl.flow_id, stream.flow_id);
        assert_eq!(decoded.vlan_outer, 100);
    }

    // Loop them back into the receive side.
    let (rx_end, rx_peer) = loopback_pair();
    let mut rx_io = IoHandle::new(IoDirection::Ingress, IoBackend::Link(Box::new(rx_end)), 32);
    for frame in &frames {
        rx_peer.push(frame);
    }
    rx_io.rx_once(&ctx, &interface, &Timestamp::now());

    assert_eq!(stream.packets_rx.load(Ordering::Relaxed), packets_tx);
    assert_eq!(stream.loss.load(Ordering::Relaxed), 0);
    {
        let rx = stream.rx.lock().unwrap();
        assert_eq!(rx.first_seq, 1);
        assert_eq!(rx.last_seq, packets_tx);
        // The first matching packet already verified the flow.
        assert!(rx.verified);
    }
    assert_eq!(ctx.flows().stream_flows_verified.load(Ordering::Relaxed), 1);
}

#[test]
fn control_traffic_beats_stream_traffic() {
    let ctx = common::test_context();
    ctx.set_init_phase(false);
    let netif = common::test_netif();
    let (interface, scheduler) = common::test_interface(&netif);

    let config = StreamConfig {
        name: "bulk".to_owned(),
        pps: 100000.0,
        length: 128,
        ipv4_destination_address: Some(Ipv4Addr::new(10, 0, 0, 99)),
        ..StreamConfig::default()
    };
    common::raw_stream(&ctx, &netif, &scheduler, config);

    // Arm the initial ARP request / neighbor solicitation.
    netif.process_send_requests();

    let (tx_end, tx_peer) = loopback_pair();
    let mut tx_io = IoHandle::new(IoDirection::Egress, IoBackend::Link(Box::new(tx_end)), 32);
    tx_io.scheduler = scheduler.clone();
    tx_io.tx_once(&ctx, &interface, &Timestamp::now());

    let frames = tx_peer.pull_all();
    assert!(frames.len() >= 3);
    // Control first: the ARP request and the neighbor solicitation
    // leave before any stream packet.
    let first = decode_ethernet(&frames[0]).unwrap();
    match first.payload {
        L3::Arp(ref arp) => assert_eq!(arp.operation, ARP_REQUEST),
        _ => panic!("expected the ARP request first"),
    }
    let second = decode_ethernet(&frames[1]).unwrap();
    match second.payload {
        L3::Ipv6(_) => {}
        _ => panic!("expected the neighbor solicitation second"),
    }
    assert!(decode_ethernet(&frames[2]).unwrap().bbl.is_some());
}

// A downstream flow configured to expect MPLS label 100 ignores
// traffic arriving with label 200 and verifies once the right label
// shows up.
#[test]
fn mpls_expectation_blocks_until_label_matches() {
    use bngen::packet::bbl::{BblDirection, BblHeader, BblPayload, BblSubType};
    use bngen::packet::{EthernetBuilder, Ipv4Builder, MplsLabel, UdpBuilder};
    use bngen::stream::stream_rx;
    use bngen::Payload;
    use pnet::util::MacAddr;

    let ctx = common::test_context();
    let netif = common::test_netif();
    let (_interface, scheduler) = common::test_interface(&netif);
    let config = StreamConfig {
        name: "expect-mpls".to_owned(),
        rx_mpls1_label: Some(100),
        ..StreamConfig::default()
    };
    let stream = common::raw_stream(&ctx, &netif, &scheduler, config);

    let mut deliver = |label: u32, seq: u64| {
        let mut header = BblHeader::unicast(BblSubType::Ipv4, BblDirection::Down);
        header.flow_id = stream.flow_id;
        header.flow_seq = seq;
        let udp = UdpBuilder::new(bngen::BBL_UDP_PORT,
                                  bngen::BBL_UDP_PORT,
                                  BblPayload::new(header, 0));
        let ip = Ipv4Builder::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 99), udp);
        let mut eth = EthernetBuilder::new(MacAddr(2, 0, 0, 0, 0, 1),
                                           MacAddr(2, 0, 0, 0, 0, 2),
                                           ip)
            .mpls(MplsLabel {
                label: label,
                exp: 0,
                ttl: 64,
            });
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        let mut frame = decode_ethernet(&buffer).unwrap();
        frame.timestamp = Timestamp::now();
        let bbl = frame.bbl.unwrap();
        stream_rx(ctx.flows(), &frame, &bbl, None, false).is_some()
    };

    // Wrong label: never verified, nothing counted.
    assert!(!deliver(200, 1));
    assert!(!deliver(200, 2));
    assert_eq!(stream.packets_rx.load(Ordering::Relaxed), 0);
    assert_eq!(stream.rx.lock().unwrap().first_seq, 0);
    assert!(!stream.rx.lock().unwrap().verified);

    // Right label: the flow verifies and counts from here on.
    assert!(deliver(100, 3));
    assert!(deliver(100, 4));
    assert_eq!(stream.packets_rx.load(Ordering::Relaxed), 2);
    let rx = stream.rx.lock().unwrap();
    assert!(rx.verified);
    assert_eq!(rx.first_seq, 3);
    assert_eq!(rx.last_seq, 4);
    assert_eq!(rx.mpls1.unwrap().label, 100);
}

// A reset takes the flow back to sequence one with cleared receive
// state. Session re-establishment drives it through the registry so
// the verified-flow counts stay consistent.
#[test]
fn reset_restarts_the_flow_at_sequence_one() {
    let ctx = common::test_context();
    ctx.set_init_phase(false);
    let netif = common::test_netif();
    let (interface, scheduler) = common::test_interface(&netif);

    let config = StreamConfig {
        name: "resettable".to_owned(),
        pps: 1000.0,
        ipv4_destination_address: Some(Ipv4Addr::new(10, 0, 0, 99)),
        ..StreamConfig::default()
    };
    let stream = common::raw_stream(&ctx, &netif, &scheduler, config);

    let (tx_end, tx_peer) = loopback_pair();
    let mut tx_io = IoHandle::new(IoDirection::Egress, IoBackend::Link(Box::new(tx_end)), 32);
    tx_io.scheduler = scheduler.clone();

    let mut now = Timestamp::now();
    tx_io.tx_once(&ctx, &interface, &now);
    advance(&mut now, 10_000_000);
    tx_io.tx_once(&ctx, &interface, &now);
    let frames = tx_peer.pull_all();
    assert!(frames.len() > 1);

    // Loop the traffic back so the flow verifies.
    let (rx_end, rx_peer) = loopback_pair();
    let mut rx_io = IoHandle::new(IoDirection::Ingress, IoBackend::Link(Box::new(rx_end)), 32);
    for frame in &frames {
        rx_peer.push(frame);
    }
    rx_io.rx_once(&ctx, &interface, &Timestamp::now());
    assert!(stream.rx.lock().unwrap().verified);
    assert_eq!(ctx.flows().stream_flows_verified.load(Ordering::Relaxed), 1);

    ctx.flows().reset_stream(&stream);
    assert!(!stream.rx.lock().unwrap().verified);
    assert_eq!(stream.rx.lock().unwrap().first_seq, 0);
    assert_eq!(ctx.flows().stream_flows_verified.load(Ordering::Relaxed), 0);

    // The pass consuming the reset frees the template and emits
    // nothing; the one after starts over at sequence one.
    let sent_before = stream.packets_tx.load(Ordering::Relaxed);
    advance(&mut now, 10_000_000);
    tx_io.tx_once(&ctx, &interface, &now);
    assert_eq!(stream.packets_tx.load(Ordering::Relaxed), sent_before);
    assert!(stream.tx.lock().unwrap().buf.is_none());

    advance(&mut now, 10_000_000);
    tx_io.tx_once(&ctx, &interface, &now);
    let frames = tx_peer.pull_all();
    assert!(!frames.is_empty());
    let restarted = decode_ethernet(&frames[0]).unwrap();
    assert_eq!(restarted.bbl.unwrap().flow_seq, 1);
}

#[test]
fn stop_closes_the_stream() {
    let ctx = common::test_context();
    ctx.set_init_phase(false);
    let netif = common::test_netif();
    let (interface, scheduler) = common::test_interface(&netif);

    let config = StreamConfig {
        name: "stoppable".to_owned(),
        pps: 1000.0,
        ipv4_destination_address: Some(Ipv4Addr::new(10, 0, 0, 99)),
        ..StreamConfig::default()
    };
    let stream = common::raw_stream(&ctx, &netif, &scheduler, config);

    let (tx_end, tx_peer) = loopback_pair();
    let mut tx_io = IoHandle::new(IoDirection::Egress, IoBackend::Link(Box::new(tx_end)), 32);
    tx_io.scheduler = scheduler.clone();

    let mut now = Timestamp::now();
    tx_io.tx_once(&ctx, &interface, &now);
    assert!(stream.packets_tx.load(Ordering::Relaxed) > 0);

    stream.stop.store(true, Ordering::Relaxed);
    let sent_before = stream.packets_tx.load(Ordering::Relaxed);
    for _ in 0..5 {
        advance(&mut now, 10_000_000);
        tx_io.tx_once(&ctx, &interface, &now);
    }
    assert_eq!(stream.packets_tx.load(Ordering::Relaxed), sent_before);
    let _ = tx_peer.pull_all();
}
