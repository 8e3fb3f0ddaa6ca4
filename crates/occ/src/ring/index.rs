// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer/consumer index arithmetic.
//!
//! [`RingIndex`] is a plain `Copy` value: the owning [`super::CircularQueue`],
//! the device model and the transport client each keep one (or a snapshot
//! of one) and agree on the same arithmetic.
//!
//! ```text
//!  0                consumer            producer              capacity
//!  +-------------------+=====================+--------------------+
//!  |       free        |        used         |        free        |
//!  +-------------------+=====================+--------------------+
//! ```
//!
//! One unit of slack is always kept free, so `producer == consumer` only
//! ever means "empty".

use super::align::{is_aligned, AlignUnit};
use super::{Result, RingError};

/// Index pair of a byte ring, always unit aligned and modulo `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    capacity: usize,
    unit: AlignUnit,
    producer: usize,
    consumer: usize,
}

impl RingIndex {
    /// Create an empty index for a ring of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidCapacity`] unless `capacity` is a
    /// multiple of the unit and larger than one unit.
    pub fn new(capacity: usize, unit: AlignUnit) -> Result<Self> {
        if capacity <= unit.bytes() || !is_aligned(capacity, unit.bytes()) {
            return Err(RingError::InvalidCapacity { capacity, unit });
        }
        Ok(Self {
            capacity,
            unit,
            producer: 0,
            consumer: 0,
        })
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub const fn unit(&self) -> AlignUnit {
        self.unit
    }

    #[inline]
    #[must_use]
    pub const fn producer(&self) -> usize {
        self.producer
    }

    #[inline]
    #[must_use]
    pub const fn consumer(&self) -> usize {
        self.consumer
    }

    /// Bytes between consumer and producer.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        (self.producer + self.capacity - self.consumer) % self.capacity
    }

    /// Bytes the producer may still write.
    #[inline]
    #[must_use]
    pub const fn free(&self) -> usize {
        self.capacity - self.used() - self.unit.bytes()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.producer == self.consumer
    }

    /// True when the valid range crosses the end of the buffer.
    #[inline]
    #[must_use]
    pub const fn wraps(&self) -> bool {
        self.producer < self.consumer
    }

    /// Contiguous readable bytes starting at the consumer index.
    #[inline]
    #[must_use]
    pub const fn head_len(&self) -> usize {
        if self.wraps() {
            self.capacity - self.consumer
        } else {
            self.producer - self.consumer
        }
    }

    /// Readable bytes at the start of the buffer (only nonzero when wrapped).
    #[inline]
    #[must_use]
    pub const fn tail_len(&self) -> usize {
        if self.wraps() {
            self.producer
        } else {
            0
        }
    }

    /// Move the producer forward. `len` must be aligned and fit in `free()`.
    #[inline]
    pub fn advance_producer(&mut self, len: usize) {
        debug_assert!(is_aligned(len, self.unit.bytes()));
        debug_assert!(len <= self.free());
        self.producer = (self.producer + len) % self.capacity;
    }

    /// Move the consumer forward. `len` must be aligned and fit in `used()`.
    #[inline]
    pub fn advance_consumer(&mut self, len: usize) {
        debug_assert!(is_aligned(len, self.unit.bytes()));
        debug_assert!(len <= self.used());
        self.consumer = (self.consumer + len) % self.capacity;
    }

    /// Overwrite the producer index (value published by the other side).
    ///
    /// # Errors
    ///
    /// Returns [`RingError::IndexOutOfRange`] for an unaligned or
    /// out-of-bounds index.
    pub fn set_producer(&mut self, producer: usize) -> Result<()> {
        if producer >= self.capacity || !is_aligned(producer, self.unit.bytes()) {
            return Err(RingError::IndexOutOfRange {
                index: producer,
                capacity: self.capacity,
            });
        }
        self.producer = producer;
        Ok(())
    }

    /// Validate an acknowledge of `len` bytes and return the new consumer index.
    ///
    /// `len` is rounded up to the unit first. The resulting index must lie in
    /// `(consumer, producer]`, counting the producer past the wrap when the
    /// valid range crosses the buffer end.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::AdvanceOutOfRange`] when the advance would move
    /// past the producer or wrap the whole ring.
    pub fn check_advance(&self, len: usize) -> Result<usize> {
        let len = super::align_up(len, self.unit.bytes());
        if len >= self.capacity {
            return Err(RingError::AdvanceOutOfRange {
                len,
                used: self.used(),
            });
        }
        let target = self.consumer + len;
        let producer = if self.wraps() {
            self.producer + self.capacity
        } else {
            self.producer
        };
        if target > self.consumer && target <= producer {
            Ok(target % self.capacity)
        } else {
            Err(RingError::AdvanceOutOfRange {
                len,
                used: self.used(),
            })
        }
    }

    /// Overwrite the consumer index with a value from [`Self::check_advance`].
    #[inline]
    pub fn set_consumer(&mut self, consumer: usize) {
        debug_assert!(consumer < self.capacity);
        self.consumer = consumer;
    }

    /// Drop all data.
    pub fn reset(&mut self) {
        self.producer = 0;
        self.consumer = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(cap: usize) -> RingIndex {
        RingIndex::new(cap, AlignUnit::Eight).unwrap()
    }

    #[test]
    fn test_rejects_bad_capacity() {
        assert!(RingIndex::new(8, AlignUnit::Eight).is_err());
        assert!(RingIndex::new(130, AlignUnit::Eight).is_err());
        assert!(RingIndex::new(132, AlignUnit::Four).is_ok());
    }

    #[test]
    fn test_free_keeps_one_unit_slack() {
        let idx = index(128);
        assert_eq!(idx.used(), 0);
        assert_eq!(idx.free(), 120);
    }

    #[test]
    fn test_wrapped_segments() {
        let mut idx = index(128);
        idx.advance_producer(112);
        idx.advance_consumer(96);
        idx.advance_producer(32);
        assert!(idx.wraps());
        assert_eq!(idx.head_len(), 32);
        assert_eq!(idx.tail_len(), 16);
        assert_eq!(idx.used(), 48);
    }

    #[test]
    fn test_check_advance_bounds() {
        let mut idx = index(128);
        idx.advance_producer(64);
        assert_eq!(idx.check_advance(64).unwrap(), 64);
        assert_eq!(idx.check_advance(3).unwrap(), 8);
        assert!(idx.check_advance(72).is_err());
        assert!(idx.check_advance(0).is_err());
        assert!(idx.check_advance(128).is_err());
    }

    #[test]
    fn test_check_advance_across_wrap() {
        let mut idx = index(128);
        idx.advance_producer(112);
        idx.advance_consumer(112);
        idx.advance_producer(40);
        assert_eq!(idx.producer(), 24);
        assert_eq!(idx.check_advance(40).unwrap(), 24);
        assert_eq!(idx.check_advance(16).unwrap(), 0);
        assert!(idx.check_advance(48).is_err());
    }

    #[test]
    fn test_set_producer_validation() {
        let mut idx = index(128);
        assert!(idx.set_producer(128).is_err());
        assert!(idx.set_producer(12).is_err());
        idx.set_producer(16).unwrap();
        assert_eq!(idx.used(), 16);
    }
}
