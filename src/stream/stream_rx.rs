//! Stream receive path: flow lookup, first-packet verification,
//! sequence/loss accounting and one-way delay measurement.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use packet::bbl::{BblHeader, BblType};
use packet::EthernetFrame;
use session::Session;
use stream::{FlowRegistry, Stream};

/// Matches one received test packet against its flow.
///
/// `session` is the session the packet was delivered to (when it
/// arrived on an access interface); it is compared against the
/// identifiers embedded at transmit time to classify mis-delivery.
/// The first packet that matches every expectation marks the stream
/// verified, bumps the verified-flow bookkeeping and, when
/// `stop_verified` is set, stops the stream. Returns the stream when
/// the packet counted; mismatches and unknown flows return `None` and
/// the packet is dropped.
pub fn stream_rx(registry: &FlowRegistry,
                 frame: &EthernetFrame,
                 bbl: &BblHeader,
                 session: Option<&Arc<Session>>,
                 stop_verified: bool)
                 -> Option<Arc<Stream>> {
    if bbl.bbl_type != BblType::UnicastSession {
        return None;
    }
    let stream = registry.get(bbl.flow_id)?;

    let mut rx = stream.rx.lock().unwrap();
    if rx.first_seq != 0 {
        // Flow already verified; only sequence accounting remains.
        if bbl.flow_seq > rx.last_seq + 1 {
            let loss = bbl.flow_seq - (rx.last_seq + 1);
            stream.loss.fetch_add(loss, Ordering::Relaxed);
            trace!("loss flow {} seq {} last {}",
                   bbl.flow_id,
                   bbl.flow_seq,
                   rx.last_seq);
        }
    } else {
        // First packet of the flow: verify expectations.
        rx.priority = frame.tos;
        rx.outer_vlan_pbit = frame.vlan_outer_priority;
        rx.inner_vlan_pbit = frame.vlan_inner_priority;
        rx.mpls1 = frame.mpls.outer().cloned();
        rx.mpls2 = frame.mpls.inner().cloned();
        if let Some(expected) = stream.config.rx_mpls1_label {
            if rx.mpls1.map(|m| m.label) != Some(expected) {
                return None;
            }
            if let Some(expected) = stream.config.rx_mpls2_label {
                if rx.mpls2.map(|m| m.label) != Some(expected) {
                    return None;
                }
            }
        }
        if bbl.sub_type != stream.stream_type || bbl.direction != stream.direction {
            return None;
        }
        if let Some(session) = session {
            if stream.session_traffic {
                if bbl.outer_vlan != session.key.outer_vlan ||
                   bbl.inner_vlan != session.key.inner_vlan ||
                   bbl.session_id != session.session_id {
                    stream.wrong_session.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
        stream.rx_len.store(frame.length, Ordering::Relaxed);
        rx.first_seq = bbl.flow_seq;
        rx.verified = true;
        if stream.session_traffic {
            if let Some(ref session) = stream.session {
                session.flows_verified.fetch_add(1, Ordering::Relaxed);
            }
            let verified = registry.session_flows_verified.fetch_add(1, Ordering::Relaxed) + 1;
            if verified == registry.session_flows.load(Ordering::Relaxed) {
                info!("all session traffic flows verified");
            }
        } else {
            let verified = registry.stream_flows_verified.fetch_add(1, Ordering::Relaxed) + 1;
            if verified == registry.stream_flows.load(Ordering::Relaxed) {
                info!("all stream traffic flows verified");
            }
        }
        if stop_verified {
            stream.stop.store(true, Ordering::Relaxed);
        }
    }

    stream.packets_rx.fetch_add(1, Ordering::Relaxed);
    rx.last_seq = bbl.flow_seq;

    // One-way delay from the embedded transmit timestamp; min is
    // first-sample initialized so zero keeps meaning "no sample".
    let delay = frame.timestamp.saturating_nanos_since(&bbl.timestamp);
    if delay > rx.max_delay_ns {
        rx.max_delay_ns = delay;
    }
    if rx.min_delay_ns == 0 || delay < rx.min_delay_ns {
        rx.min_delay_ns = delay;
    }
    drop(rx);
    Some(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use packet::bbl::{BblDirection, BblSubType};
    use packet::{decode_ethernet, EthernetBuilder, Ipv4Builder, UdpBuilder};
    use Payload;
    use packet::bbl::BblPayload;
    use pnet::util::MacAddr;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use stream::{Stream, StreamConfig};
    use timer::Timestamp;

    fn registry_with_stream(config: StreamConfig) -> (FlowRegistry, Arc<Stream>) {
        let registry = FlowRegistry::new();
        let flow_id = registry.allocate_flow_id();
        let stream = Arc::new(Stream::new(flow_id,
                                          Arc::new(config),
                                          BblDirection::Up,
                                          None));
        registry.insert(stream.clone()).unwrap();
        (registry, stream)
    }

    fn frame_bytes(header: &BblHeader) -> Vec<u8> {
        let udp = UdpBuilder::new(::BBL_UDP_PORT, ::BBL_UDP_PORT, BblPayload::new(*header, 0));
        let ip = Ipv4Builder::new(Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 1), udp);
        let mut eth = EthernetBuilder::new(MacAddr::new(2, 0, 0, 0, 0, 1),
                                           MacAddr::new(2, 0, 0, 0, 0, 2),
                                           ip);
        let mut buffer = vec![0; eth.len()];
        eth.build(&mut buffer);
        buffer
    }

    fn receive(registry: &FlowRegistry, header: &BblHeader, rx_time: Timestamp) -> bool {
        let bytes = frame_bytes(header);
        let mut frame = decode_ethernet(&bytes).unwrap();
        frame.timestamp = rx_time;
        let bbl = frame.bbl.unwrap();
        stream_rx(registry, &frame, &bbl, None, false).is_some()
    }

    fn header_for(stream: &Stream, seq: u64) -> BblHeader {
        let mut header = BblHeader::unicast(BblSubType::Ipv4, BblDirection::Up);
        header.flow_id = stream.flow_id;
        header.flow_seq = seq;
        header.timestamp = Timestamp {
            sec: 100,
            nsec: 0,
        };
        header
    }

    #[test]
    fn gap_in_sequence_counts_as_loss() {
        let (registry, stream) = registry_with_stream(StreamConfig::default());
        let rx_time = Timestamp {
            sec: 100,
            nsec: 500,
        };
        assert!(receive(&registry, &header_for(&stream, 1), rx_time));
        assert!(receive(&registry, &header_for(&stream, 2), rx_time));
        // 3..=5 dropped en route.
        assert!(receive(&registry, &header_for(&stream, 6), rx_time));
        assert_eq!(stream.loss.load(::std::sync::atomic::Ordering::Relaxed), 3);
        assert_eq!(stream.packets_rx.load(::std::sync::atomic::Ordering::Relaxed),
                   3);
        let rx = stream.rx.lock().unwrap();
        assert_eq!(rx.first_seq, 1);
        assert_eq!(rx.last_seq, 6);
        // received + loss covers the whole sequence range.
        assert_eq!(3 + 3, rx.last_seq - rx.first_seq + 1);
    }

    #[test]
    fn delay_min_max_from_embedded_timestamp() {
        let (registry, stream) = registry_with_stream(StreamConfig::default());
        assert!(receive(&registry,
                        &header_for(&stream, 1),
                        Timestamp {
                            sec: 100,
                            nsec: 2000,
                        }));
        assert!(receive(&registry,
                        &header_for(&stream, 2),
                        Timestamp {
                            sec: 100,
                            nsec: 700,
                        }));
        let rx = stream.rx.lock().unwrap();
        assert_eq!(rx.min_delay_ns, 700);
        assert_eq!(rx.max_delay_ns, 2000);
    }

    #[test]
    fn wrong_subtype_never_verifies() {
        let (registry, stream) = registry_with_stream(StreamConfig::default());
        let mut header = BblHeader::unicast(BblSubType::Ipv6, BblDirection::Up);
        header.flow_id = stream.flow_id;
        header.flow_seq = 1;
        assert!(!receive(&registry,
                         &header,
                         Timestamp {
                             sec: 100,
                             nsec: 0,
                         }));
        assert_eq!(stream.packets_rx.load(::std::sync::atomic::Ordering::Relaxed),
                   0);
        assert_eq!(stream.rx.lock().unwrap().first_seq, 0);
    }

    #[test]
    fn mpls_expectation_gates_verification() {
        let config = StreamConfig {
            rx_mpls1_label: Some(100),
            ..StreamConfig::default()
        };
        let (registry, stream) = registry_with_stream(config);
        // No label on the received frame: not verified, no counting.
        assert!(!receive(&registry,
                         &header_for(&stream, 1),
                         Timestamp {
                             sec: 100,
                             nsec: 0,
                         }));
        assert_eq!(stream.packets_rx.load(::std::sync::atomic::Ordering::Relaxed),
                   0);
        assert_eq!(stream.rx.lock().unwrap().first_seq, 0);
    }

    #[test]
    fn first_matching_packet_verifies_the_flow() {
        let (registry, stream) = registry_with_stream(StreamConfig::default());
        assert!(!stream.rx.lock().unwrap().verified);
        assert!(receive(&registry,
                        &header_for(&stream, 1),
                        Timestamp {
                            sec: 100,
                            nsec: 0,
                        }));
        assert!(stream.rx.lock().unwrap().verified);
        assert_eq!(registry.stream_flows_verified
                       .load(::std::sync::atomic::Ordering::Relaxed),
                   1);
        // Subsequent packets do not count the flow again.
        assert!(receive(&registry,
                        &header_for(&stream, 2),
                        Timestamp {
                            sec: 100,
                            nsec: 0,
                        }));
        assert_eq!(registry.stream_flows_verified
                       .load(::std::sync::atomic::Ordering::Relaxed),
                   1);
        assert!(!stream.stop.load(::std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn stop_verified_stops_the_stream_on_first_packet() {
        let (registry, stream) = registry_with_stream(StreamConfig::default());
        let bytes = frame_bytes(&header_for(&stream, 1));
        let mut frame = decode_ethernet(&bytes).unwrap();
        frame.timestamp = Timestamp {
            sec: 100,
            nsec: 0,
        };
        let bbl = frame.bbl.unwrap();
        assert!(stream_rx(&registry, &frame, &bbl, None, true).is_some());
        assert!(stream.rx.lock().unwrap().verified);
        assert!(stream.stop.load(::std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn unknown_flow_is_dropped() {
        let (registry, stream) = registry_with_stream(StreamConfig::default());
        let mut header = header_for(&stream, 1);
        header.flow_id = 9999;
        assert!(!receive(&registry,
                         &header,
                         Timestamp {
                             sec: 100,
                             nsec: 0,
                         }));
    }
}
