//! TX worker load balancing: streams land on the least reserved
//! worker, credited by their configured rate.

extern crate bngen;
extern crate pnet;

mod common;

use bngen::io::{IoDirection, IoStats, IoThread};
use bngen::packet::bbl::BblDirection;
use bngen::stack::{Interface, TxAttachment};
use bngen::stream::{Scheduler, Stream, StreamConfig};

use pnet::util::MacAddr;

use std::net::Ipv4Addr;
use std::sync::Arc;

#[test]
fn streams_spread_across_tx_workers() {
    let ctx = common::test_context();
    let netif = common::test_netif();

    let interface = Interface::new("veth0".to_owned(), 1, MacAddr(2, 0, 0, 0, 0, 1));
    let mut workers = Vec::new();
    for index in 0..4 {
        let scheduler = Arc::new(Scheduler::new());
        let thread = IoThread::new(format!("tx:veth0:{}", index),
                                   IoDirection::Egress,
                                   256,
                                   Arc::new(IoStats::default()),
                                   scheduler.clone(),
                                   None);
        interface.tx_attachments.lock().unwrap().push(TxAttachment {
            scheduler: scheduler,
            thread: Some(thread.clone()),
        });
        workers.push(thread);
    }
    let interface = Arc::new(interface);

    let stream_pps = 100.0;
    for index in 0..1000 {
        let config = StreamConfig {
            name: format!("S{}", index),
            pps: stream_pps,
            ipv4_destination_address: Some(Ipv4Addr::new(10, 0, 0, 99)),
            ..StreamConfig::default()
        };
        let flow_id = ctx.flows().allocate_flow_id();
        let mut stream = Stream::new(flow_id, Arc::new(config), BblDirection::Down, None);
        stream.network_interface = Some(netif.clone());
        interface.attach_stream(Arc::new(stream)).unwrap();
    }

    let reserved: Vec<f64> = workers.iter().map(|worker| worker.pps_reserved()).collect();
    let total: f64 = reserved.iter().sum();
    assert_eq!(total, 1000.0 * stream_pps);
    let max = reserved.iter().cloned().fold(0.0, f64::max);
    let min = reserved.iter().cloned().fold(::std::f64::INFINITY, f64::min);
    assert!(max - min <= stream_pps,
            "imbalance: min {} max {}",
            min,
            max);
    // Every worker actually got streams.
    for attachment in interface.tx_attachments.lock().unwrap().iter() {
        assert!(attachment.scheduler.stream_count() >= 200);
    }
}
