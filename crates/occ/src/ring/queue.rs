// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Owning circular data queue.
//!
//! Single-owner version of the ring: `push`, `peek` and `consume` all take
//! `&mut self`, so the region accessors are trivially exclusive. The device
//! model splits the same arithmetic across two threads instead.

use super::align::{align_down, is_aligned, AlignUnit};
use super::index::RingIndex;
use super::region::{linearize, DmaRegion, PeekView};
use super::{Result, RingSink};

/// Fixed-capacity byte ring with unit-aligned indices.
#[derive(Debug)]
pub struct CircularQueue {
    region: DmaRegion,
    index: RingIndex,
    /// Length returned by the last `peek`, `None` once consumed.
    last_peek: Option<usize>,
}

impl CircularQueue {
    /// Create an empty queue.
    ///
    /// # Errors
    ///
    /// Returns [`super::RingError::InvalidCapacity`] for a capacity that is
    /// not a multiple of `unit` or not larger than one unit.
    pub fn new(capacity: usize, unit: AlignUnit) -> Result<Self> {
        let index = RingIndex::new(capacity, unit)?;
        Ok(Self {
            region: DmaRegion::alloc(capacity),
            index,
            last_peek: None,
        })
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    #[inline]
    #[must_use]
    pub fn unit(&self) -> AlignUnit {
        self.index.unit()
    }

    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.index.used()
    }

    /// Bytes that can still be pushed (`capacity - used - unit`).
    #[inline]
    #[must_use]
    pub fn free(&self) -> usize {
        self.index.free()
    }

    /// Current index pair.
    #[inline]
    #[must_use]
    pub fn index(&self) -> &RingIndex {
        &self.index
    }

    /// Copy as many whole units of `data` as fit. Returns the bytes copied,
    /// 0 when the queue is full.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let len = align_down(data.len().min(self.free()), self.unit().bytes());
        if len == 0 {
            return 0;
        }
        // SAFETY: &mut self makes us the only producer and consumer; len <= free().
        let next = unsafe { self.region.write_wrapping(self.index.producer(), &data[..len]) };
        self.index.advance_producer(len);
        debug_assert_eq!(next, self.index.producer());
        len
    }

    /// Readable bytes at the consumer index.
    ///
    /// Wrapped data is assembled in `scratch`; when the part up to the end of
    /// the buffer is larger than `scratch`, only that part is returned.
    pub fn peek<'a>(&'a mut self, scratch: &'a mut [u8]) -> &'a [u8] {
        // SAFETY: &mut self, nobody writes the region while the view lives.
        let view = unsafe { linearize(&self.region, &self.index, scratch) };
        self.last_peek = Some(view.len());
        match view {
            // SAFETY: offset/len come from the valid range computed above.
            PeekView::Direct { offset, len } => unsafe { self.region.slice(offset, len) },
            PeekView::Scratch { len } => &scratch[..len],
        }
    }

    /// Release `len` bytes. The length is clamped to the last `peek` result
    /// (or to `used()` when nothing was peeked) and rounded down to the unit.
    /// Returns the bytes actually released.
    pub fn consume(&mut self, len: usize) -> usize {
        let bound = self.last_peek.take().unwrap_or_else(|| self.used());
        let mut accepted = len.min(bound).min(self.used());
        if !is_aligned(accepted, self.unit().bytes()) {
            log::debug!(
                "[ring] consume({}) not aligned to {}, rounding down",
                accepted,
                self.unit()
            );
            accepted = align_down(accepted, self.unit().bytes());
        }
        if accepted < len {
            log::debug!("[ring] consume({}) clamped to {}", len, accepted);
        }
        self.index.advance_consumer(accepted);
        accepted
    }

    /// Drop all queued data.
    pub fn reset(&mut self) {
        self.index.reset();
        self.last_peek = None;
    }
}

impl RingSink for CircularQueue {
    fn room(&mut self) -> usize {
        self.free()
    }

    fn append(&mut self, bytes: &[u8]) {
        let pushed = self.push(bytes);
        debug_assert_eq!(pushed, bytes.len(), "append must be unit aligned and fit");
    }
}
