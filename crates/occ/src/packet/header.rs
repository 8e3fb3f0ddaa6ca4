// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire packet header and classification.
//!
//! # Layout (24 bytes, little-endian words)
//!
//! ```text
//! word 0  destination
//! word 1  source
//! word 2  info            bit31 command, bit29 response (with bit31),
//!                         bit28 passthrough, bits 7..2 data subtype
//! word 3  payload_length
//! word 4  reserved1
//! word 5  reserved2
//! ```

use std::fmt;

/// Size of the fixed packet header.
pub const HEADER_SIZE: usize = 24;

/// Header word holding `payload_length` (reported as the offset of length errors).
pub const PAYLOAD_LENGTH_WORD: usize = 3;

pub const INFO_COMMAND: u32 = 0x8000_0000;
pub const INFO_RESPONSE: u32 = INFO_COMMAND | 0x2000_0000;
pub const INFO_PASSTHROUGH: u32 = 0x1000_0000;

/// Mask selecting the data subtype bits of `info`.
pub const DATA_SUBTYPE_MASK: u32 = 0xFC;
pub const SUBTYPE_RTDL: u32 = 0xFC;
pub const SUBTYPE_META: u32 = 0x08;
pub const SUBTYPE_EVENT: u32 = 0x0C;
pub const SUBTYPE_RAMP: u32 = 0x2C;

/// Data packet subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Rtdl,
    Meta,
    Event,
    Ramp,
    Other,
}

impl DataKind {
    /// Classify from the `info` word.
    #[must_use]
    pub const fn from_info(info: u32) -> Self {
        match info & DATA_SUBTYPE_MASK {
            SUBTYPE_RTDL => Self::Rtdl,
            SUBTYPE_META => Self::Meta,
            SUBTYPE_EVENT => Self::Event,
            SUBTYPE_RAMP => Self::Ramp,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rtdl => "rtdl",
            Self::Meta => "meta",
            Self::Event => "event",
            Self::Ramp => "ramp",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Top-level packet class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Command,
    Data(DataKind),
}

/// Parsed packet header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub destination: u32,
    pub source: u32,
    pub info: u32,
    pub payload_length: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl PacketHeader {
    /// Parse the first [`HEADER_SIZE`] bytes of `bytes`.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..HEADER_SIZE)?;
        let mut words = raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        let mut next = || words.next().unwrap_or_default();
        Some(Self {
            destination: next(),
            source: next(),
            info: next(),
            payload_length: next(),
            reserved1: next(),
            reserved2: next(),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let words = [
            self.destination,
            self.source,
            self.info,
            self.payload_length,
            self.reserved1,
            self.reserved2,
        ];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// The six header words in wire order.
    #[must_use]
    pub const fn words(&self) -> [u32; 6] {
        [
            self.destination,
            self.source,
            self.info,
            self.payload_length,
            self.reserved1,
            self.reserved2,
        ]
    }

    /// Header plus payload length, before any alignment check.
    #[inline]
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_command(&self) -> bool {
        self.info & INFO_COMMAND != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.info & INFO_RESPONSE == INFO_RESPONSE
    }

    #[inline]
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.info & INFO_PASSTHROUGH != 0
    }

    /// Anything that is not a command carries data.
    #[inline]
    #[must_use]
    pub const fn is_data(&self) -> bool {
        !self.is_command()
    }

    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        if self.is_command() {
            PacketKind::Command
        } else {
            PacketKind::Data(DataKind::from_info(self.info))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let mut h = PacketHeader {
            info: SUBTYPE_EVENT,
            ..Default::default()
        };
        assert_eq!(h.kind(), PacketKind::Data(DataKind::Event));
        h.info = 0x0000_00FC;
        assert_eq!(h.kind(), PacketKind::Data(DataKind::Rtdl));
        h.info = 0x0000_002D;
        assert_eq!(h.kind(), PacketKind::Data(DataKind::Ramp));
        h.info = 0x0000_0040;
        assert_eq!(h.kind(), PacketKind::Data(DataKind::Other));
        h.info = INFO_RESPONSE | 0x22;
        assert_eq!(h.kind(), PacketKind::Command);
        assert!(h.is_response());
        assert!(!h.is_data());
    }

    #[test]
    fn test_parse_reads_little_endian_words() {
        let mut bytes = [0u8; 24];
        bytes[8..12].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        bytes[12..16].copy_from_slice(&3600u32.to_le_bytes());
        let h = PacketHeader::parse(&bytes).unwrap();
        assert!(h.is_command());
        assert_eq!(h.frame_len(), 3624);
        assert!(PacketHeader::parse(&bytes[..23]).is_none());
    }
}
