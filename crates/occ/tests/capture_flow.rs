// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Full capture loop runs: a TCP simulator peer, and gzip bad packet logs.

#![allow(clippy::missing_panics_doc)]

use occ::capture::{Capture, CaptureOptions, Step};
use occ::config::DumpPolicy;
use occ::feedback::BadPacketLog;
use occ::packet::builder::{build_event_packet, build_ramp_packet, build_rtdl_packet};
use occ::packet::PacketAnalyzer;
use occ::transport::{
    CancelToken, InterfaceKind, OccDevice, RingTransport, SocketTransport, Transport,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn quiet_options() -> CaptureOptions {
    CaptureOptions {
        wait_timeout: Duration::from_millis(50),
        metrics_interval: None,
        ..CaptureOptions::default()
    }
}

#[test]
fn test_capture_from_socket_peer() {
    let mut transport = SocketTransport::listen("127.0.0.1:0").unwrap();
    transport.enable_receive(true).unwrap();
    let addr = transport.local_addr().unwrap();

    let cancel = CancelToken::new();
    let stop = cancel.clone();
    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        let (ramp, _) = build_ramp_packet(0, 32);
        for frame in [build_rtdl_packet(), build_event_packet(64), ramp] {
            // Split writes so frames straddle reads.
            let (head, tail) = frame.split_at(frame.len() / 2);
            stream.write_all(head).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(5));
            stream.write_all(tail).unwrap();
        }
        thread::sleep(Duration::from_millis(200));
        stop.cancel();
        stream
    });

    let mut capture = Capture::new(transport, PacketAnalyzer::default(), quiet_options()).unwrap();
    let summary = capture.run(&cancel).unwrap();
    drop(peer.join().unwrap());

    assert_eq!(summary.packets, 3);
    assert_eq!(summary.bad_packets, 0);
    assert_eq!(summary.framing_errors, 0);
    assert_eq!(capture.transport_mut().status().unwrap().dq_used, 0);
    let snapshot = capture.metrics().snapshot();
    assert_eq!(snapshot.rtdl.good, 1);
    assert_eq!(snapshot.event.good, 1);
    assert_eq!(snapshot.ramp.good, 1);
}

#[test]
fn test_bad_packets_logged_gzip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad_packets.log.gz");

    let device = Arc::new(OccDevice::simulated().unwrap());
    let transport = RingTransport::open_local(Arc::clone(&device), InterfaceKind::Lvds).unwrap();
    let options = CaptureOptions {
        dump: DumpPolicy {
            dump_bad_packets: true,
            ..DumpPolicy::default()
        },
        ..quiet_options()
    };
    let mut capture = Capture::new(transport, PacketAnalyzer::default(), options)
        .unwrap()
        .with_bad_packet_log(BadPacketLog::create(&path).unwrap());

    let mut rtdl = build_rtdl_packet();
    rtdl[24 + 9 * 4 + 3] = 0x77;
    device.receive(&rtdl).unwrap();
    device.receive(&build_event_packet(8)).unwrap();

    let cancel = CancelToken::new();
    assert_eq!(
        capture.step(&cancel).unwrap(),
        Step::Consumed {
            consumed: rtdl.len() + 24 + 64,
            packets: 2,
            bad: 1
        }
    );
    let (_transport, summary) = capture.into_parts();
    assert_eq!(summary.bad_packets, 1);

    let mut text = String::new();
    flate2::read::GzDecoder::new(std::fs::File::open(&path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    assert!(text.starts_with("bad rtdl"), "{text}");
    assert!(text.contains("bad index = 9"), "{text}");
}
