// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carving a readable ring range into packets.

use super::header::{PacketHeader, PacketKind, HEADER_SIZE};
use crate::config::FrameRules;
use crate::ring::is_aligned;
use std::fmt;

/// Borrowed view of one framed packet.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    /// `payload_length` bytes following the header.
    pub payload: &'a [u8],
    /// Header plus payload as they sit in the range.
    pub frame: &'a [u8],
}

impl Packet<'_> {
    /// Total frame length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        self.header.kind()
    }

    /// Payload as little-endian words.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.payload
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }
}

/// Header whose length cannot describe a valid frame. Scanning must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Frame length is not a multiple of the alignment unit.
    Misaligned {
        offset: usize,
        frame_len: usize,
        unit: usize,
    },
    /// Frame length exceeds the largest frame the link can carry.
    Oversized {
        offset: usize,
        frame_len: usize,
        max: usize,
    },
}

impl FramingError {
    /// Byte offset of the offending header within the scanned range.
    #[must_use]
    pub const fn offset(&self) -> usize {
        match *self {
            Self::Misaligned { offset, .. } | Self::Oversized { offset, .. } => offset,
        }
    }

    const fn rebase(self, base: usize) -> Self {
        match self {
            Self::Misaligned {
                offset,
                frame_len,
                unit,
            } => Self::Misaligned {
                offset: offset + base,
                frame_len,
                unit,
            },
            Self::Oversized {
                offset,
                frame_len,
                max,
            } => Self::Oversized {
                offset: offset + base,
                frame_len,
                max,
            },
        }
    }
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned {
                offset,
                frame_len,
                unit,
            } => write!(
                f,
                "Frame at offset {} has length {} not aligned to {} bytes",
                offset, frame_len, unit
            ),
            Self::Oversized {
                offset,
                frame_len,
                max,
            } => write!(
                f,
                "Frame at offset {} has length {} above maximum {}",
                offset, frame_len, max
            ),
        }
    }
}

impl std::error::Error for FramingError {}

/// Frame the packet at the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds less than a complete frame (the tail
/// is left for the next read). The header length is checked as soon as the
/// header is available, so a corrupt length is reported without waiting for
/// data that will never arrive.
///
/// # Errors
///
/// Returns a [`FramingError`] (offset 0) for an impossible frame length.
pub fn next_frame<'a>(
    buf: &'a [u8],
    rules: &FrameRules,
) -> std::result::Result<Option<Packet<'a>>, FramingError> {
    let Some(header) = PacketHeader::parse(buf) else {
        return Ok(None);
    };
    let frame_len = header.frame_len();
    let unit = rules.unit.bytes();

    if !is_aligned(frame_len, unit) {
        return Err(FramingError::Misaligned {
            offset: 0,
            frame_len,
            unit,
        });
    }
    if frame_len > rules.max_frame_len {
        return Err(FramingError::Oversized {
            offset: 0,
            frame_len,
            max: rules.max_frame_len,
        });
    }
    if frame_len > buf.len() {
        return Ok(None);
    }

    let frame = &buf[..frame_len];
    Ok(Some(Packet {
        header,
        payload: &frame[HEADER_SIZE..],
        frame,
    }))
}

/// Iterator over the packets of one readable range.
///
/// Yields packets until the remaining bytes hold no complete frame, or
/// yields one `Err` and stops. [`Framer::consumed`] is the number of bytes
/// covered by the packets yielded so far.
#[derive(Debug, Clone)]
pub struct Framer<'a> {
    buf: &'a [u8],
    pos: usize,
    rules: FrameRules,
    error: Option<FramingError>,
}

impl<'a> Framer<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8], rules: FrameRules) -> Self {
        Self {
            buf,
            pos: 0,
            rules,
            error: None,
        }
    }

    /// Bytes of complete packets returned so far.
    #[inline]
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.pos
    }

    /// Framing error that stopped the scan, if any.
    #[inline]
    #[must_use]
    pub const fn error(&self) -> Option<FramingError> {
        self.error
    }

    /// Bytes left after the last complete packet.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

impl<'a> Iterator for Framer<'a> {
    type Item = std::result::Result<Packet<'a>, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() {
            return None;
        }
        match next_frame(&self.buf[self.pos..], &self.rules) {
            Ok(Some(packet)) => {
                self.pos += packet.len();
                Some(Ok(packet))
            }
            Ok(None) => None,
            Err(e) => {
                let e = e.rebase(self.pos);
                self.error = Some(e);
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::builder::PacketBuilder;
    use crate::ring::AlignUnit;

    #[test]
    fn test_frames_adjacent_packets_and_leaves_tail() {
        let mut buf = PacketBuilder::data(0x0C).payload(&[0; 16]).build();
        buf.extend(PacketBuilder::command(0x22).payload(&[1; 8]).build());
        let third = PacketBuilder::data(0x08).payload(&[0; 64]).build();
        buf.extend_from_slice(&third[..40]);

        let mut framer = Framer::new(&buf, FrameRules::default());
        assert_eq!(framer.next().unwrap().unwrap().len(), 40);
        let cmd = framer.next().unwrap().unwrap();
        assert!(cmd.header.is_command());
        assert_eq!(cmd.payload, &[1; 8]);
        assert!(framer.next().is_none());
        assert_eq!(framer.consumed(), 72);
        assert_eq!(framer.remaining().len(), 40);
    }

    #[test]
    fn test_misaligned_length_is_framing_error() {
        let mut buf = PacketBuilder::data(0x0C).payload(&[0; 8]).build();
        let mut bad = PacketBuilder::data(0x0C).payload(&[0; 8]).build();
        bad[12..16].copy_from_slice(&6u32.to_le_bytes());
        buf.extend(bad);

        let mut framer = Framer::new(&buf, FrameRules::default());
        assert!(framer.next().unwrap().is_ok());
        let err = framer.next().unwrap().unwrap_err();
        assert_eq!(err.offset(), 32);
        assert!(matches!(err, FramingError::Misaligned { frame_len: 30, .. }));
        assert!(framer.next().is_none());
        assert_eq!(framer.consumed(), 32);
    }

    #[test]
    fn test_unit_four_accepts_word_aligned_frames() {
        let buf = PacketBuilder::data(0x0C).payload(&[0; 4]).build();
        let rules = FrameRules {
            unit: AlignUnit::Four,
            ..FrameRules::default()
        };
        assert_eq!(next_frame(&buf, &rules).unwrap().unwrap().len(), 28);
        assert!(next_frame(&buf, &FrameRules::default()).is_err());
    }

    #[test]
    fn test_oversized_reported_before_data_arrives() {
        let mut header = PacketBuilder::data(0x0C).build();
        header[12..16].copy_from_slice(&(1u32 << 20).to_le_bytes());
        let err = next_frame(&header, &FrameRules::default()).unwrap_err();
        assert!(matches!(err, FramingError::Oversized { .. }));
    }

    #[test]
    fn test_short_header_needs_more() {
        assert!(next_frame(&[0; 20], &FrameRules::default()).unwrap().is_none());
    }
}
