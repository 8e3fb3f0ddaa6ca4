// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending message descriptors (IMQ entries).
//!
//! # Layout
//!
//! ```text
//! +-------------+---------+--------+--------+---------+---------+
//! | destination | source  |  type  | length | info[0] | info[1] |   24 bytes, LE
//! +-------------+---------+--------+--------+---------+---------+
//! ```
//!
//! The hardware message queue stores the same six words followed by two
//! unused words (32 bytes per entry).

use crate::ring::align_up;

/// Size of a descriptor as copied into the unified ring.
pub const DESCRIPTOR_SIZE: usize = 24;

/// Size of one hardware message queue entry.
pub const HW_DESCRIPTOR_SIZE: usize = 32;

/// `type` flag selecting the command sub-queue.
pub const TYPE_COMMAND: u32 = 0x8000_0000;

/// One framed unit waiting in a hardware sub-queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingMessageDescriptor {
    pub destination: u32,
    pub source: u32,
    pub msg_type: u32,
    pub length: u32,
    pub info: [u32; 2],
}

impl PendingMessageDescriptor {
    /// Parse from at least [`DESCRIPTOR_SIZE`] little-endian bytes.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DESCRIPTOR_SIZE {
            return None;
        }
        let word = |i: usize| {
            let at = i * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Some(Self {
            destination: word(0),
            source: word(1),
            msg_type: word(2),
            length: word(3),
            info: [word(4), word(5)],
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut out = [0u8; DESCRIPTOR_SIZE];
        let words = [
            self.destination,
            self.source,
            self.msg_type,
            self.length,
            self.info[0],
            self.info[1],
        ];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Payload lives in the command sub-queue.
    #[inline]
    #[must_use]
    pub const fn is_command(&self) -> bool {
        self.msg_type & TYPE_COMMAND != 0
    }

    /// Payload length rounded to the 4-byte granularity of the hardware queues.
    #[inline]
    #[must_use]
    pub const fn aligned_length(&self) -> usize {
        align_up(self.length as usize, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matches_to_bytes() {
        let desc = PendingMessageDescriptor {
            destination: 0x0F10_CC00,
            source: 0x1234,
            msg_type: TYPE_COMMAND | 0x22,
            length: 10,
            info: [7, 8],
        };
        let bytes = desc.to_bytes();
        assert_eq!(&bytes[12..16], &10u32.to_le_bytes());
        assert_eq!(PendingMessageDescriptor::parse(&bytes), Some(desc));
        assert!(desc.is_command());
        assert_eq!(desc.aligned_length(), 12);
    }

    #[test]
    fn test_parse_short_input() {
        assert_eq!(PendingMessageDescriptor::parse(&[0u8; 20]), None);
    }
}
