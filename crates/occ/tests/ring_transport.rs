// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// End-to-end ring transport tests against the in-process device model:
// wraparound through the rollover buffer, rollover growth, resets seen by
// blocked waiters, transmit timeouts and session rules.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_panics_doc)]

use occ::config::{RolloverConfig, TxTiming};
use occ::packet::builder::build_event_packet;
use occ::packet::{PacketAnalyzer, ScanEnd};
use occ::transport::{
    BoardCapabilities, BoardType, CancelToken, InterfaceKind, OccDevice, Operation, RingTransport,
    StatusFlags, StuckLink, Transport, TransportError, WaitOutcome,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const FRAME_EVENTS: usize = 12;
const FRAME_LEN: usize = 24 + FRAME_EVENTS * 8;

fn pcie_device(ring_size: usize) -> Arc<OccDevice> {
    let caps = BoardCapabilities::lookup(BoardType::Pcie, 0x000b_0001).unwrap();
    Arc::new(OccDevice::new(caps, ring_size).unwrap())
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

/// Fill and drain the first 960 bytes so the next frame straddles the end.
fn move_to_wrap(dev: &OccDevice, transport: &mut RingTransport) {
    let frame = build_event_packet(FRAME_EVENTS);
    assert_eq!(frame.len(), FRAME_LEN);
    for _ in 0..8 {
        dev.receive(&frame).unwrap();
    }
    let data = wait_data(transport);
    assert_eq!(data.len(), 8 * FRAME_LEN);
    transport.advance_consumer(data.len()).unwrap();
    assert_eq!(dev.status().dq_used, 0);
}

#[test]
fn test_wrapped_frame_is_linearized() {
    let dev = pcie_device(1024);
    let mut transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
    move_to_wrap(&dev, &mut transport);

    let frame = build_event_packet(FRAME_EVENTS);
    dev.receive(&frame).unwrap();
    let data = wait_data(&mut transport);
    assert_eq!(data, frame);

    let mut analyzer = PacketAnalyzer::default();
    let report = analyzer.analyze(&data);
    assert_eq!(report.consumed, FRAME_LEN);
    transport.advance_consumer(report.consumed).unwrap();
    assert_eq!(transport.pending(), 0);
}

#[test]
fn test_rollover_grows_until_frame_fits() {
    let dev = pcie_device(1024);
    let mut transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds)
        .unwrap()
        .with_rollover(RolloverConfig {
            initial: 32,
            max: 128,
        });
    move_to_wrap(&dev, &mut transport);
    dev.receive(&build_event_packet(FRAME_EVENTS)).unwrap();

    let mut analyzer = PacketAnalyzer::default();
    let mut views = Vec::new();
    loop {
        let data = wait_data(&mut transport);
        views.push(data.len());
        let report = analyzer.analyze(&data);
        if report.consumed > 0 {
            transport.advance_consumer(report.consumed).unwrap();
            break;
        }
        assert!(matches!(report.end, ScanEnd::NeedMore { .. }));
        assert!(views.len() < 5, "rollover never grew: {views:?}");
    }
    // Head only, head in a 64 byte scratch, then the whole frame.
    assert_eq!(views, vec![64, 64, FRAME_LEN]);
    assert_eq!(transport.rollover_len(), 128);
}

#[test]
fn test_rollover_limit_reports_out_of_memory() {
    let dev = pcie_device(1024);
    let mut transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds)
        .unwrap()
        .with_rollover(RolloverConfig {
            initial: 32,
            max: 64,
        });
    move_to_wrap(&dev, &mut transport);
    dev.receive(&build_event_packet(FRAME_EVENTS)).unwrap();

    assert_eq!(wait_data(&mut transport).len(), 64);
    assert_eq!(wait_data(&mut transport).len(), 64);
    assert!(matches!(
        transport.wait_for_data(Duration::from_millis(50), &CancelToken::new()),
        Err(TransportError::OutOfMemory { requested: 128 })
    ));
}

#[test]
fn test_acknowledge_beyond_view_is_clamped() {
    let dev = pcie_device(4096);
    let mut transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
    let frame = build_event_packet(4);
    dev.receive(&frame).unwrap();
    let data = wait_data(&mut transport);

    dev.receive(&frame).unwrap();
    // Only the bytes of the last view can be released.
    transport.advance_consumer(data.len() + frame.len()).unwrap();
    assert_eq!(dev.status().dq_used as usize, frame.len());
}

#[test]
fn test_reset_wakes_blocked_wait() {
    let dev = pcie_device(4096);
    let mut transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
    let waiter = thread::spawn(move || {
        let result = transport
            .wait_for_data(Duration::from_secs(5), &CancelToken::new())
            .map(|_| ());
        (result, transport)
    });

    thread::sleep(Duration::from_millis(50));
    dev.reset(InterfaceKind::Lvds).unwrap();
    let (result, mut transport) = waiter.join().unwrap();
    assert!(matches!(result, Err(TransportError::ConnectionReset)));

    // PCIe boards keep RX off after a reset until re-enabled.
    transport.enable_receive(true).unwrap();
    dev.receive(&build_event_packet(2)).unwrap();
    assert_eq!(wait_data(&mut transport), build_event_packet(2));
}

#[test]
fn test_cancel_ends_wait() {
    let dev = pcie_device(4096);
    let mut transport = RingTransport::open_local(dev, InterfaceKind::Lvds).unwrap();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        trigger.cancel();
    });
    let outcome = transport.wait_for_data(Duration::from_secs(5), &cancel).unwrap();
    assert_eq!(outcome, WaitOutcome::Cancelled);
    canceller.join().unwrap();
}

#[test]
fn test_transmit_times_out_on_stuck_link() {
    let caps = BoardCapabilities::lookup(BoardType::Pcie, 0x000b_0001).unwrap();
    let timing = TxTiming {
        spin_iterations: 4,
        spin_delay: Duration::from_micros(1),
        sleep_iterations: 5,
        sleep_delay: Duration::from_millis(1),
    };
    let dev = Arc::new(
        OccDevice::new(caps, 4096)
            .unwrap()
            .with_link(Arc::new(StuckLink))
            .with_tx_timing(timing),
    );
    let mut transport = RingTransport::open_local(dev, InterfaceKind::Lvds).unwrap();
    assert!(matches!(
        transport.send(&[0xAA; 16]),
        Err(TransportError::Timeout)
    ));
}

#[test]
fn test_exclusive_and_debug_sessions() {
    let dev = pcie_device(4096);
    let mut owner = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
    assert!(matches!(
        RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds),
        Err(TransportError::Busy)
    ));

    let mut observer =
        RingTransport::open_local_debug(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
    let frame = build_event_packet(3);
    dev.receive(&frame).unwrap();

    // The observer sees the data but its acknowledge stays local.
    assert_eq!(wait_data(&mut observer), frame);
    observer.advance_consumer(frame.len()).unwrap();
    assert_eq!(dev.status().dq_used as usize, frame.len());
    assert!(matches!(
        observer.enable_error_packets(true),
        Err(TransportError::NotPermitted(Operation::EnableErrorPackets))
    ));

    assert_eq!(wait_data(&mut owner), frame);
    owner.advance_consumer(frame.len()).unwrap();
    assert_eq!(dev.status().dq_used, 0);

    drop(owner);
    assert!(RingTransport::open_local(dev, InterfaceKind::Lvds).is_ok());
}

#[test]
fn test_stall_surfaces_until_reset() {
    let dev = pcie_device(256);
    let mut transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
    let frame = build_event_packet(FRAME_EVENTS);
    dev.receive(&frame).unwrap();
    dev.receive(&frame).unwrap();
    assert!(matches!(dev.receive(&frame), Err(TransportError::Stalled)));
    assert!(dev.status().status.contains(StatusFlags::DMA_STALLED));

    // Data queued before the stall is still readable.
    let data = wait_data(&mut transport);
    assert_eq!(data.len(), 2 * FRAME_LEN);
    transport.advance_consumer(data.len()).unwrap();
    assert!(matches!(
        transport.wait_for_data(Duration::from_millis(50), &CancelToken::new()),
        Err(TransportError::Stalled)
    ));

    transport.enable_receive(true).unwrap();
    assert!(!dev.status().status.contains(StatusFlags::DMA_STALLED));
    dev.receive(&frame).unwrap();
    assert_eq!(wait_data(&mut transport), frame);
}
