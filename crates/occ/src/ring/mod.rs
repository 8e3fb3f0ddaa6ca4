// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Circular data queue (CDQ).
//!
//! The byte ring every received packet passes through on its way from the
//! device to the application.
//!
//! # Architecture
//!
//! ```text
//!   producer (device DMA / emulation)          consumer (application)
//!          |                                           ^
//!          v                                           |
//!   ProducerCursor --write--> DmaRegion --linearize--> view --consume-->
//!          |                      ^                               |
//!          +--- publish prod ---> RingIndex <--- advance cons ----+
//! ```
//!
//! # Invariants
//!
//! - `used = (producer - consumer + capacity) % capacity`
//! - `used <= capacity - unit` (one unit of slack disambiguates full/empty)
//! - both indices are always multiples of the unit (4 or 8 bytes)

mod align;
mod index;
mod queue;
mod region;

pub use align::{align_down, align_up, is_aligned, AlignUnit};
pub use index::RingIndex;
pub use queue::CircularQueue;
pub use region::{linearize, DmaRegion, PeekView, ProducerCursor};

use std::fmt;

/// Destination of producer-side copies (the unified ring).
pub trait RingSink {
    /// Bytes that can still be appended.
    fn room(&mut self) -> usize;

    /// Append `bytes`. The caller has checked `room()` beforehand.
    fn append(&mut self, bytes: &[u8]);

    /// Make everything appended so far visible to the consumer.
    fn commit(&mut self) {}
}

/// Errors raised by ring construction and index validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Capacity is not a multiple of the unit or too small.
    InvalidCapacity { capacity: usize, unit: AlignUnit },

    /// Published index is unaligned or beyond the ring.
    IndexOutOfRange { index: usize, capacity: usize },

    /// Acknowledge would move the consumer past the producer.
    AdvanceOutOfRange { len: usize, used: usize },
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity { capacity, unit } => {
                write!(f, "Invalid ring capacity: {capacity} (unit {unit})")
            }
            Self::IndexOutOfRange { index, capacity } => {
                write!(f, "Ring index {index} out of range (capacity {capacity})")
            }
            Self::AdvanceOutOfRange { len, used } => {
                write!(f, "Cannot advance consumer by {len} bytes, {used} bytes valid")
            }
        }
    }
}

impl std::error::Error for RingError {}

/// Result type for ring operations
pub type Result<T> = std::result::Result<T, RingError>;
