// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Neutron event records carried in data packet payloads.

/// Size of one event record on the wire.
pub const EVENT_SIZE: usize = 8;

/// Pixel ids with this bit set are detector diagnostic codes.
pub const SPECIAL_PIXEL_BIT: u32 = 0x4000_0000;

/// Pixel id bits compared against the detector range.
pub const PIXEL_ID_MASK: u32 = 0x3FFF_FFFF;

/// One `(time-of-flight, pixel id)` record, two little-endian words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeutronEvent {
    pub tof: u32,
    pub pixel_id: u32,
}

impl NeutronEvent {
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..EVENT_SIZE)?;
        Some(Self {
            tof: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            pixel_id: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut out = [0u8; EVENT_SIZE];
        out[..4].copy_from_slice(&self.tof.to_le_bytes());
        out[4..].copy_from_slice(&self.pixel_id.to_le_bytes());
        out
    }

    #[inline]
    #[must_use]
    pub const fn is_special(&self) -> bool {
        self.pixel_id & SPECIAL_PIXEL_BIT != 0
    }
}

/// Iterate the whole events of `payload`; a trailing partial record is ignored.
pub fn events(payload: &[u8]) -> impl Iterator<Item = NeutronEvent> + '_ {
    payload.chunks_exact(EVENT_SIZE).filter_map(NeutronEvent::parse)
}

/// Number of whole event records in `payload`.
#[inline]
#[must_use]
pub const fn event_count(payload: &[u8]) -> usize {
    payload.len() / EVENT_SIZE
}
