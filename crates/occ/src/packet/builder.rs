// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Helpers to build wire packets for simulation, benches and tests.

use super::event::NeutronEvent;
use super::header::{PacketHeader, INFO_COMMAND, SUBTYPE_EVENT, SUBTYPE_RAMP, SUBTYPE_RTDL};
use super::verify::{RAMP_COUNTER_MASK, RTDL_REFERENCE, RTDL_WORDS};

/// Builder for one packet (header plus payload).
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// Data packet with the given subtype bits in `info`.
    #[must_use]
    pub fn data(subtype: u32) -> Self {
        Self {
            header: PacketHeader {
                info: subtype,
                ..PacketHeader::default()
            },
            payload: Vec::new(),
        }
    }

    /// Command packet; `code` lands in the low bits of `info`.
    #[must_use]
    pub fn command(code: u32) -> Self {
        Self {
            header: PacketHeader {
                info: INFO_COMMAND | code,
                ..PacketHeader::default()
            },
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn destination(mut self, destination: u32) -> Self {
        self.header.destination = destination;
        self
    }

    #[must_use]
    pub fn source(mut self, source: u32) -> Self {
        self.header.source = source;
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload.extend_from_slice(payload);
        self
    }

    #[must_use]
    pub fn words(mut self, words: &[u32]) -> Self {
        for w in words {
            self.payload.extend_from_slice(&w.to_le_bytes());
        }
        self
    }

    #[must_use]
    pub fn events(mut self, events: &[NeutronEvent]) -> Self {
        for ev in events {
            self.payload.extend_from_slice(&ev.to_bytes());
        }
        self
    }

    /// Serialize; `payload_length` is the payload size as given.
    #[must_use]
    pub fn build(mut self) -> Vec<u8> {
        self.header.payload_length = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        let mut out = Vec::with_capacity(self.header.frame_len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// RTDL packet whose payload matches the reference sequence.
#[must_use]
pub fn build_rtdl_packet() -> Vec<u8> {
    let words: Vec<u32> = (0..RTDL_WORDS)
        .map(|i| (u32::from(RTDL_REFERENCE[i]) << 24) | i as u32)
        .collect();
    PacketBuilder::data(SUBTYPE_RTDL).words(&words).build()
}

/// Neutron event packet with `count` in-range events.
#[must_use]
pub fn build_event_packet(count: usize) -> Vec<u8> {
    let events: Vec<NeutronEvent> = (0..count)
        .map(|i| NeutronEvent {
            tof: (i as u32 * 17) % 0x32000,
            pixel_id: (i as u32) % 3024,
        })
        .collect();
    PacketBuilder::data(SUBTYPE_EVENT).events(&events).build()
}

/// Ramp self-test packet of `count` events starting at counter `start`.
///
/// Each event holds two consecutive counter values (`tof`, then
/// `pixel_id`). Returns the packet and the counter value following it.
#[must_use]
pub fn build_ramp_packet(start: u32, count: usize) -> (Vec<u8>, u32) {
    let mut value = start & RAMP_COUNTER_MASK;
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let tof = value;
        let pixel_id = (value + 1) & RAMP_COUNTER_MASK;
        value = (value + 2) & RAMP_COUNTER_MASK;
        events.push(NeutronEvent { tof, pixel_id });
    }
    (PacketBuilder::data(SUBTYPE_RAMP).events(&events).build(), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_payload_length() {
        let pkt = PacketBuilder::command(0x30)
            .destination(0x000f_10cc)
            .words(&[1, 2, 3])
            .build();
        let header = PacketHeader::parse(&pkt).unwrap();
        assert_eq!(header.payload_length, 12);
        assert_eq!(header.destination, 0x000f_10cc);
        assert_eq!(pkt.len(), 36);
    }

    #[test]
    fn test_ramp_packets_chain() {
        let (_, next) = build_ramp_packet(0x0FFF_FFFE, 2);
        assert_eq!(next, 2);
    }
}
