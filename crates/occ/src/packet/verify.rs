// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-subtype semantic checks.
//!
//! Verification never stops a scan: a failing packet is counted bad and the
//! next adjacent frame is still processed.

use super::event::{event_count, events, NeutronEvent, PIXEL_ID_MASK, SPECIAL_PIXEL_BIT};
use super::framer::Packet;
use super::header::{DataKind, PacketKind, PAYLOAD_LENGTH_WORD};
use crate::config::VerifyLimits;
use std::fmt;

/// RTDL payload size in words.
pub const RTDL_WORDS: usize = 32;

/// Expected upper byte of every RTDL payload word.
pub const RTDL_REFERENCE: [u8; RTDL_WORDS] = [
    0, 0, 0, 0, 0, 0, 4, 5, 6, 7, 8, 15, 17, 24, 25, 26, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37,
    38, 39, 40, 41, 1, 2,
];

/// First RTDL word compared against [`RTDL_REFERENCE`].
pub const RTDL_FIRST_CHECKED: usize = 6;

/// Leading event slots reused for RTDL words in meta and event packets.
pub const SKIPPED_EVENTS: usize = 3;

/// Ramp counters wrap at 28 bits.
pub const RAMP_COUNTER_MASK: u32 = 0x0FFF_FFFF;

/// Why a packet failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Payload size out of bounds for the subtype.
    Length { payload_length: usize },
    /// RTDL word with an unexpected upper byte.
    Word { index: usize, expected: u8, found: u8 },
    /// Event out of detector bounds or not a known diagnostic code.
    Event { index: usize, event: NeutronEvent },
    /// Ramp counter discontinuity.
    Ramp { index: usize, expected: u32, found: u32 },
}

impl VerifyError {
    /// Error offset: a word index for RTDL and length errors, an event index
    /// for event-carrying packets.
    #[must_use]
    pub const fn offset(&self) -> usize {
        match *self {
            Self::Length { .. } => PAYLOAD_LENGTH_WORD,
            Self::Word { index, .. } | Self::Event { index, .. } | Self::Ramp { index, .. } => {
                index
            }
        }
    }

    /// True when `offset()` indexes events rather than words.
    #[must_use]
    pub const fn is_event_offset(&self) -> bool {
        matches!(self, Self::Event { .. } | Self::Ramp { .. })
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length { payload_length } => {
                write!(f, "payload length {} out of bounds", payload_length)
            }
            Self::Word {
                index,
                expected,
                found,
            } => write!(
                f,
                "word {} upper byte 0x{:02x}, expected 0x{:02x}",
                index, found, expected
            ),
            Self::Event { index, event } => write!(
                f,
                "event {} out of range (tof 0x{:x} pixel 0x{:x})",
                index, event.tof, event.pixel_id
            ),
            Self::Ramp {
                index,
                expected,
                found,
            } => write!(
                f,
                "ramp event {} value 0x{:x}, expected 0x{:x}",
                index, found, expected
            ),
        }
    }
}

impl std::error::Error for VerifyError {}

pub type VerifyResult = std::result::Result<(), VerifyError>;

/// RTDL: exactly 32 words whose upper bytes from word 6 on match the reference.
pub fn verify_rtdl(payload: &[u8]) -> VerifyResult {
    if payload.len() / 4 != RTDL_WORDS {
        return Err(VerifyError::Length {
            payload_length: payload.len(),
        });
    }
    let words = payload.chunks_exact(4).enumerate().skip(RTDL_FIRST_CHECKED);
    for (index, word) in words {
        let found = word[3];
        let expected = RTDL_REFERENCE[index];
        if found != expected {
            return Err(VerifyError::Word {
                index,
                expected,
                found,
            });
        }
    }
    Ok(())
}

fn in_detector_range(event: &NeutronEvent, limits: &VerifyLimits) -> bool {
    event.tof <= limits.max_tof && event.pixel_id & PIXEL_ID_MASK <= limits.max_pixel_id
}

fn is_known_diagnostic(pixel_id: u32) -> bool {
    match pixel_id & !1 {
        0x4001_0000 | 0x4002_0000 => pixel_id & 1 == 1,
        0x7001_0000 | 0x7002_0000 | 0x7003_0000 => true,
        _ => false,
    }
}

/// Metadata: at most `max_meta_events`; diagnostic pixels must be known codes,
/// plain pixels below the special bit must lie inside the detector bounds.
/// Pixels with only the top bit set pass unchecked.
pub fn verify_meta(payload: &[u8], limits: &VerifyLimits) -> VerifyResult {
    if event_count(payload) > limits.max_meta_events {
        return Err(VerifyError::Length {
            payload_length: payload.len(),
        });
    }
    for (index, event) in events(payload).enumerate().skip(SKIPPED_EVENTS) {
        let ok = if event.is_special() {
            is_known_diagnostic(event.pixel_id)
        } else {
            event.pixel_id >= SPECIAL_PIXEL_BIT || in_detector_range(&event, limits)
        };
        if !ok {
            return Err(VerifyError::Event { index, event });
        }
    }
    Ok(())
}

/// Neutron events: at most `max_events_per_packet`, every event in bounds.
pub fn verify_event(payload: &[u8], limits: &VerifyLimits) -> VerifyResult {
    if event_count(payload) > limits.max_events_per_packet {
        return Err(VerifyError::Length {
            payload_length: payload.len(),
        });
    }
    for (index, event) in events(payload).enumerate().skip(SKIPPED_EVENTS) {
        if !in_detector_range(&event, limits) {
            return Err(VerifyError::Event { index, event });
        }
    }
    Ok(())
}

/// Ramp counter carried across packets.
///
/// Every event holds two consecutive counter values. `None` means no
/// expectation: the next packet's first value is accepted as the start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RampTracker {
    next: Option<u32>,
}

impl RampTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: None }
    }

    /// Value expected at the start of the next ramp packet.
    #[inline]
    #[must_use]
    pub const fn expected(&self) -> Option<u32> {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = None;
    }

    /// Check one ramp payload.
    ///
    /// A discontinuity drops the expectation so the following packet is
    /// not reported as well. An oversized packet is reported bad and the
    /// counter resynchronizes to the value after its last event.
    pub fn verify(&mut self, payload: &[u8], limits: &VerifyLimits) -> VerifyResult {
        let count = event_count(payload);
        if count > limits.max_events_per_packet {
            if let Some(last) = events(payload).last() {
                self.next = Some(last.pixel_id.wrapping_add(1) & RAMP_COUNTER_MASK);
            }
            return Err(VerifyError::Length {
                payload_length: payload.len(),
            });
        }

        let mut it = events(payload).peekable();
        let Some(first) = it.peek() else {
            return Ok(());
        };
        let mut expected = self.next.unwrap_or(first.tof);

        for (index, event) in it.enumerate() {
            for found in [event.tof, event.pixel_id] {
                if found != expected {
                    self.next = None;
                    return Err(VerifyError::Ramp {
                        index,
                        expected,
                        found,
                    });
                }
                expected = expected.wrapping_add(1) & RAMP_COUNTER_MASK;
            }
        }
        self.next = Some(expected);
        Ok(())
    }
}

/// Dispatches packets to the checks of their subtype.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    limits: VerifyLimits,
    ramp: RampTracker,
}

impl Verifier {
    #[must_use]
    pub fn new(limits: VerifyLimits) -> Self {
        Self {
            limits,
            ramp: RampTracker::new(),
        }
    }

    #[must_use]
    pub fn limits(&self) -> &VerifyLimits {
        &self.limits
    }

    #[must_use]
    pub fn ramp(&self) -> &RampTracker {
        &self.ramp
    }

    /// Forget carried state (after a ring reset).
    pub fn reset(&mut self) {
        self.ramp.reset();
    }

    /// Commands and `other` data carry no structure and always pass.
    pub fn verify(&mut self, packet: &Packet<'_>) -> VerifyResult {
        match packet.kind() {
            PacketKind::Command | PacketKind::Data(DataKind::Other) => Ok(()),
            PacketKind::Data(DataKind::Rtdl) => verify_rtdl(packet.payload),
            PacketKind::Data(DataKind::Meta) => verify_meta(packet.payload, &self.limits),
            PacketKind::Data(DataKind::Event) => verify_event(packet.payload, &self.limits),
            PacketKind::Data(DataKind::Ramp) => self.ramp.verify(packet.payload, &self.limits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::builder::{build_ramp_packet, build_rtdl_packet};
    use crate::packet::HEADER_SIZE;

    fn ev(tof: u32, pixel_id: u32) -> [u8; 8] {
        NeutronEvent { tof, pixel_id }.to_bytes()
    }

    fn payload_of(events: &[[u8; 8]]) -> Vec<u8> {
        events.concat()
    }

    #[test]
    fn test_rtdl_reference_passes() {
        let pkt = build_rtdl_packet();
        assert_eq!(verify_rtdl(&pkt[HEADER_SIZE..]), Ok(()));
    }

    #[test]
    fn test_rtdl_flipped_byte_reports_word_index() {
        for word in RTDL_FIRST_CHECKED..RTDL_WORDS {
            let mut pkt = build_rtdl_packet();
            pkt[HEADER_SIZE + word * 4 + 3] ^= 0x80;
            let err = verify_rtdl(&pkt[HEADER_SIZE..]).unwrap_err();
            assert_eq!(err.offset(), word);
        }
    }

    #[test]
    fn test_rtdl_first_words_unchecked() {
        let mut pkt = build_rtdl_packet();
        pkt[HEADER_SIZE + 3] = 0xFF;
        assert!(verify_rtdl(&pkt[HEADER_SIZE..]).is_ok());
    }

    #[test]
    fn test_rtdl_wrong_size() {
        let err = verify_rtdl(&[0; 120]).unwrap_err();
        assert_eq!(err, VerifyError::Length { payload_length: 120 });
        assert_eq!(err.offset(), PAYLOAD_LENGTH_WORD);
    }

    #[test]
    fn test_meta_diagnostic_codes() {
        let limits = VerifyLimits::default();
        let skipped = [ev(u32::MAX, u32::MAX); 3];
        let mut good = skipped.to_vec();
        good.extend([
            ev(0, 0x4001_0001),
            ev(0, 0x4002_0001),
            ev(0, 0x7003_0000),
            ev(0x32000, 3023),
        ]);
        assert!(verify_meta(&payload_of(&good), &limits).is_ok());

        let mut bad = skipped.to_vec();
        bad.push(ev(0, 0x4001_0000));
        let err = verify_meta(&payload_of(&bad), &limits).unwrap_err();
        assert_eq!(err.offset(), 3);

        let mut bad = skipped.to_vec();
        bad.extend([ev(1, 1), ev(0x32001, 1)]);
        assert_eq!(verify_meta(&payload_of(&bad), &limits).unwrap_err().offset(), 4);

        // Top bit without the special bit is left alone, whatever the tof.
        let mut high = skipped.to_vec();
        high.extend([ev(0x32001, 0x8000_0000), ev(0, 0x8000_0FFF)]);
        assert!(verify_meta(&payload_of(&high), &limits).is_ok());
    }

    #[test]
    fn test_meta_too_many_events() {
        let limits = VerifyLimits::default();
        let payload = vec![0u8; 501 * 8];
        assert!(matches!(
            verify_meta(&payload, &limits),
            Err(VerifyError::Length { .. })
        ));
    }

    #[test]
    fn test_event_bounds() {
        let limits = VerifyLimits::default();
        assert!(verify_event(&[0; 3600], &limits).is_ok());

        let mut events = vec![ev(0, 0); 5];
        events[4] = ev(0, 3024);
        let err = verify_event(&payload_of(&events), &limits).unwrap_err();
        assert_eq!(err.offset(), 4);

        // Special bit is masked off for plain events.
        events[4] = ev(0, SPECIAL_PIXEL_BIT | 12);
        assert!(verify_event(&payload_of(&events), &limits).is_ok());

        assert!(verify_event(&vec![0; 1801 * 8], &limits).is_err());
    }

    #[test]
    fn test_ramp_skip_then_recover() {
        let limits = VerifyLimits::default();
        let mut ramp = RampTracker::new();

        let (pkt, next) = build_ramp_packet(100, 10);
        assert!(ramp.verify(&pkt[HEADER_SIZE..], &limits).is_ok());
        assert_eq!(ramp.expected(), Some(next));

        // Skip one counter value inside event 4.
        let (mut pkt, _) = build_ramp_packet(next, 10);
        let off = HEADER_SIZE + 4 * 8;
        pkt[off..off + 4].copy_from_slice(&(next + 9).to_le_bytes());
        let err = ramp.verify(&pkt[HEADER_SIZE..], &limits).unwrap_err();
        assert_eq!(err.offset(), 4);
        assert_eq!(ramp.expected(), None);

        // The next good packet starts a fresh expectation.
        let (pkt, after) = build_ramp_packet(5000, 10);
        assert!(ramp.verify(&pkt[HEADER_SIZE..], &limits).is_ok());
        assert_eq!(ramp.expected(), Some(after));
    }

    #[test]
    fn test_ramp_oversized_reports_and_resyncs() {
        let limits = VerifyLimits {
            max_events_per_packet: 4,
            ..VerifyLimits::default()
        };
        let mut ramp = RampTracker::new();
        let (big, next) = build_ramp_packet(0, 6);
        assert!(matches!(
            ramp.verify(&big[HEADER_SIZE..], &limits),
            Err(VerifyError::Length { .. })
        ));
        assert_eq!(ramp.expected(), Some(next));

        let (pkt, _) = build_ramp_packet(next, 4);
        assert!(ramp.verify(&pkt[HEADER_SIZE..], &limits).is_ok());
    }

    #[test]
    fn test_ramp_counter_wraps_at_28_bits() {
        let limits = VerifyLimits::default();
        let mut ramp = RampTracker::new();
        let (pkt, next) = build_ramp_packet(RAMP_COUNTER_MASK - 3, 4);
        assert!(ramp.verify(&pkt[HEADER_SIZE..], &limits).is_ok());
        assert_eq!(next, 4);
    }
}
