// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Split-queue boards on the optical link: packets travel through the
// hardware sub-queues and the ring emulator before the consumer sees them.

#![allow(clippy::missing_panics_doc)]

use occ::config::{FrameRules, VerifyLimits};
use occ::metrics::VerificationMetrics;
use occ::packet::builder::{build_event_packet, build_ramp_packet, build_rtdl_packet, PacketBuilder};
use occ::packet::PacketAnalyzer;
use occ::transport::{
    BoardCapabilities, BoardType, CancelToken, InterfaceKind, OccDevice, RingTransport,
    StatusFlags, Transport, TransportError, WaitOutcome,
};
use std::sync::Arc;
use std::time::Duration;

fn split_device(ring_size: usize) -> Arc<OccDevice> {
    let caps = BoardCapabilities::lookup(BoardType::Pcix, 0x2210_0817).unwrap();
    assert!(caps.split_queues);
    Arc::new(
        OccDevice::new(caps, ring_size)
            .unwrap()
            .with_optical_settle(Duration::ZERO),
    )
}

fn wait_data(transport: &mut RingTransport) -> Vec<u8> {
    match transport
        .wait_for_data(Duration::from_millis(200), &CancelToken::new())
        .unwrap()
    {
        WaitOutcome::Data(data) => data.to_vec(),
        other => panic!("expected data, got {other:?}"),
    }
}

#[test]
fn test_mixed_traffic_arrives_in_order() {
    let dev = split_device(64 * 1024);
    let mut transport =
        RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Optical).unwrap();

    let command = PacketBuilder::command(0x21).words(&[0x00C0_FFEE, 7]).build();
    let (ramp, _) = build_ramp_packet(0, 16);
    let frames = [build_rtdl_packet(), command, build_event_packet(32), ramp];
    let mut expected = Vec::new();
    for frame in &frames {
        dev.receive(frame).unwrap();
        expected.extend_from_slice(frame);
    }

    let data = wait_data(&mut transport);
    assert_eq!(data, expected);

    let metrics = Arc::new(VerificationMetrics::new());
    let mut analyzer = PacketAnalyzer::with_metrics(
        FrameRules::default(),
        VerifyLimits::default(),
        Arc::clone(&metrics),
    );
    let report = analyzer.analyze(&data);
    assert_eq!(report.packets, 4);
    assert!(report.bad.is_empty());
    assert_eq!(report.consumed, expected.len());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.commands.good, 1);
    assert_eq!(snapshot.rtdl.good, 1);
    assert_eq!(snapshot.event.good, 1);
    assert_eq!(snapshot.ramp.good, 1);

    transport.advance_consumer(report.consumed).unwrap();
    assert_eq!(dev.status().dq_used, 0);
}

#[test]
fn test_emulated_ring_wraps_cleanly() {
    let dev = split_device(1024);
    let mut transport =
        RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Optical).unwrap();
    let mut analyzer = PacketAnalyzer::default();
    let frame = build_event_packet(12);

    let mut packets = 0;
    for _ in 0..40 {
        dev.receive(&frame).unwrap();
        let data = wait_data(&mut transport);
        assert_eq!(data, frame);
        let report = analyzer.analyze(&data);
        assert!(report.bad.is_empty());
        packets += report.packets;
        transport.advance_consumer(report.consumed).unwrap();
    }
    assert_eq!(packets, 40);
    assert!(!dev.status().status.contains(StatusFlags::DMA_STALLED));
}

#[test]
fn test_truncated_frame_stalls_until_reset() {
    let dev = split_device(64 * 1024);
    let mut transport =
        RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Optical).unwrap();

    // Header announces 64 payload bytes, only 16 reach the data queue.
    let mut truncated = build_event_packet(8);
    truncated.truncate(24 + 16);
    dev.receive(&truncated).unwrap();
    assert!(dev.status().status.contains(StatusFlags::DMA_STALLED));
    assert!(matches!(
        transport.wait_for_data(Duration::from_millis(50), &CancelToken::new()),
        Err(TransportError::Stalled)
    ));
    assert!(matches!(
        dev.receive(&build_event_packet(1)),
        Err(TransportError::Stalled)
    ));

    transport.enable_receive(true).unwrap();
    let frame = build_event_packet(4);
    dev.receive(&frame).unwrap();
    assert_eq!(wait_data(&mut transport), frame);
}

#[test]
fn test_lvds_bypasses_emulation() {
    let dev = split_device(4096);
    let mut transport =
        RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();

    // Without emulation the truncated frame is copied as-is.
    let mut truncated = build_event_packet(8);
    truncated.truncate(24 + 16);
    assert_eq!(dev.receive(&truncated).unwrap(), truncated.len());
    assert!(!dev.status().status.contains(StatusFlags::DMA_STALLED));

    let data = wait_data(&mut transport);
    assert_eq!(data, truncated);
    let report = PacketAnalyzer::default().analyze(&data);
    assert_eq!(report.consumed, 0);
    assert_eq!(report.packets, 0);
}

#[test]
fn test_missing_transceiver_falls_back_to_lvds() {
    let caps = BoardCapabilities::lookup(BoardType::Pcix, 0x2210_0817).unwrap();
    let dev = Arc::new(
        OccDevice::new(caps, 4096)
            .unwrap()
            .with_optical_present(false),
    );
    let mut transport =
        RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Optical).unwrap();

    let flags = transport.status().unwrap().status;
    assert!(!flags.contains(StatusFlags::OPTICAL_PRESENT));
    assert!(!flags.contains(StatusFlags::MODE_OPTICAL));

    let frame = build_event_packet(4);
    dev.receive(&frame).unwrap();
    assert_eq!(wait_data(&mut transport), frame);
}
