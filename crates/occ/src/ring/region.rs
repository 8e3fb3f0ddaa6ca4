// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte region shared by the producer and the consumer of a ring.
//!
//! The region is either heap memory (device model, owning queues) or a
//! mapping of the device's DMA buffer. Access is split by protocol, not by
//! the type system: the producer only writes the free part of the ring, the
//! consumer only reads `[consumer, producer)`. The raw accessors are
//! therefore `unsafe` and document which half they touch.

use super::align::align_down;
use super::index::RingIndex;
use super::RingSink;
use std::io;
use std::ptr;

enum Backing {
    Heap,
    Mapped,
}

/// Fixed-size byte region backing a ring.
pub struct DmaRegion {
    ptr: *mut u8,
    len: usize,
    backing: Backing,
}

// SAFETY: DmaRegion hands out raw access only through unsafe methods whose
// contracts require producer and consumer to touch disjoint byte ranges.
// Index publication happens under the owner's lock, which orders the writes.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Allocate a zeroed heap region.
    #[must_use]
    pub fn alloc(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(boxed).cast::<u8>();
        Self {
            ptr,
            len,
            backing: Backing::Heap,
        }
    }

    /// Map `len` bytes of `fd` at byte `offset` read/write and shared.
    ///
    /// # Errors
    ///
    /// Returns the OS error when `mmap` fails.
    pub fn map(fd: libc::c_int, len: usize, offset: libc::off_t) -> io::Result<Self> {
        // SAFETY:
        // - A null hint lets the kernel choose the address
        // - PROT_READ | PROT_WRITE with MAP_SHARED matches how the device exports its buffers
        // - fd is owned by the caller and stays open for the duration of the call
        // - mmap returns MAP_FAILED on error (checked below), otherwise a valid pointer
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            ptr: addr.cast::<u8>(),
            len,
            backing: Backing::Mapped,
        })
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// No writer may touch `[offset, offset + len)` while the slice lives.
    /// The range must lie inside the region.
    #[inline]
    pub unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        // SAFETY: bounds asserted above; exclusivity is the caller's contract.
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset), len) }
    }

    /// Copy `bytes` starting at `offset`, wrapping to the start of the region.
    /// Returns the offset just past the last byte written.
    ///
    /// # Safety
    ///
    /// The caller must be the only writer of the target range and no reader
    /// may be looking at it (it lies in the free part of the ring).
    pub unsafe fn write_wrapping(&self, offset: usize, bytes: &[u8]) -> usize {
        debug_assert!(bytes.len() <= self.len);
        let head = bytes.len().min(self.len - offset);
        let tail = bytes.len() - head;
        // SAFETY:
        // - offset < len and head <= len - offset, so the head copy stays in bounds
        // - tail < len, the tail copy starts at the region base
        // - the source is a distinct Rust slice, so ranges never overlap
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), head);
            ptr::copy_nonoverlapping(bytes.as_ptr().add(head), self.ptr, tail);
        }
        (offset + bytes.len()) % self.len
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`, wrapping.
    ///
    /// # Safety
    ///
    /// The source range must be readable data no writer touches concurrently.
    pub unsafe fn read_wrapping(&self, offset: usize, dst: &mut [u8]) {
        debug_assert!(dst.len() <= self.len);
        let head = dst.len().min(self.len - offset);
        let tail = dst.len() - head;
        // SAFETY: same bounds reasoning as write_wrapping, roles swapped.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), head);
            ptr::copy_nonoverlapping(self.ptr, dst.as_mut_ptr().add(head), tail);
        }
    }

    /// Zero the whole region.
    ///
    /// # Safety
    ///
    /// Nobody may read or write the region concurrently.
    pub unsafe fn clear(&self) {
        // SAFETY: exclusivity is the caller's contract, bounds are the region.
        unsafe { ptr::write_bytes(self.ptr, 0, self.len) };
    }

    /// Volatile 32-bit load, for register windows.
    ///
    /// # Safety
    ///
    /// The region must come from [`Self::map`] (page aligned), `offset`
    /// must be 4-aligned and `offset + 4 <= len()`.
    #[inline]
    pub unsafe fn read_word(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.len);
        // SAFETY: in bounds per the caller's contract; a page-aligned base
        // plus a 4-aligned offset gives an aligned u32 pointer.
        unsafe { ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    /// Volatile 32-bit store, for register windows.
    ///
    /// # Safety
    ///
    /// Same as [`Self::read_word`].
    #[inline]
    pub unsafe fn write_word(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.len);
        // SAFETY: see read_word.
        unsafe { ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value) }
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap => {
                // SAFETY: ptr/len come from Box::into_raw of a boxed slice of
                // exactly len bytes in DmaRegion::alloc and are released once.
                drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr, self.len)) });
            }
            Backing::Mapped => {
                // SAFETY: ptr/len describe a live mapping created by DmaRegion::map.
                let ret = unsafe { libc::munmap(self.ptr.cast::<libc::c_void>(), self.len) };
                if ret != 0 {
                    log::warn!("[ring] munmap failed: {}", io::Error::last_os_error());
                }
            }
        }
    }
}

impl std::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backing {
            Backing::Heap => "heap",
            Backing::Mapped => "mapped",
        };
        f.debug_struct("DmaRegion")
            .field("len", &self.len)
            .field("backing", &kind)
            .finish()
    }
}

/// Where [`linearize`] placed the readable bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekView {
    /// Bytes are in the region itself, at `offset`.
    Direct { offset: usize, len: usize },
    /// Bytes were assembled at the start of the caller's scratch buffer.
    Scratch { len: usize },
}

impl PeekView {
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        match *self {
            Self::Direct { len, .. } | Self::Scratch { len } => len,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute the readable view at the consumer index.
///
/// Unwrapped data is returned in place. Wrapped data is copied head then
/// tail into `scratch` when the head fits; when the head alone is larger
/// than `scratch` only the head is returned and the tail waits for a later
/// call. The length is always a whole number of units.
///
/// # Safety
///
/// `[consumer, producer)` of `region` must not be written while the view
/// (or the scratch copy) is being used.
pub unsafe fn linearize(region: &DmaRegion, index: &RingIndex, scratch: &mut [u8]) -> PeekView {
    let unit = index.unit().bytes();
    let head = index.head_len();
    if !index.wraps() || head > scratch.len() {
        return PeekView::Direct {
            offset: index.consumer(),
            len: align_down(head, unit),
        };
    }

    let tail = (scratch.len() - head).min(index.tail_len());
    let len = align_down(head + tail, unit);
    // SAFETY: the caller guarantees the valid range is stable; head + tail
    // never exceeds used() so the copy stays inside it.
    unsafe { region.read_wrapping(index.consumer(), &mut scratch[..len]) };
    PeekView::Scratch { len }
}

/// Producer-side writer over a shared region.
///
/// Bytes written through the cursor are invisible to the consumer until the
/// owner publishes [`ProducerCursor::producer`] as the new producer index.
pub struct ProducerCursor<'a> {
    region: &'a DmaRegion,
    offset: usize,
    room: usize,
}

impl<'a> ProducerCursor<'a> {
    /// Start writing at the snapshot's producer index.
    ///
    /// # Safety
    ///
    /// The caller must be the only producer of the ring and `snapshot` must
    /// be taken after the last publish, so the free range is really free.
    pub unsafe fn new(region: &'a DmaRegion, snapshot: &RingIndex) -> Self {
        Self {
            region,
            offset: snapshot.producer(),
            room: snapshot.free(),
        }
    }

    /// Producer index to publish once writing is done.
    #[inline]
    #[must_use]
    pub const fn producer(&self) -> usize {
        self.offset
    }
}

impl RingSink for ProducerCursor<'_> {
    fn room(&mut self) -> usize {
        self.room
    }

    fn append(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.room);
        let len = bytes.len().min(self.room);
        // SAFETY: the constructor contract makes [offset, offset + room) free
        // and exclusively ours; len <= room keeps us inside it.
        self.offset = unsafe { self.region.write_wrapping(self.offset, &bytes[..len]) };
        self.room -= len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::AlignUnit;

    #[test]
    fn test_write_and_read_wrapping() {
        let region = DmaRegion::alloc(16);
        let next = unsafe { region.write_wrapping(12, &[1, 2, 3, 4, 5, 6, 7, 8]) };
        assert_eq!(next, 4);
        let mut out = [0u8; 8];
        unsafe { region.read_wrapping(12, &mut out) };
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(unsafe { region.slice(0, 4) }, &[5, 6, 7, 8]);
    }

    #[test]
    fn test_linearize_head_only_when_scratch_small() {
        let region = DmaRegion::alloc(64);
        let mut idx = RingIndex::new(64, AlignUnit::Four).unwrap();
        idx.advance_producer(56);
        idx.advance_consumer(24);
        idx.advance_producer(8);
        // head = 40 bytes, scratch 32 -> head only
        let mut scratch = [0u8; 32];
        let view = unsafe { linearize(&region, &idx, &mut scratch) };
        assert_eq!(view, PeekView::Direct { offset: 24, len: 40 });
    }

    #[test]
    fn test_cursor_room_shrinks() {
        let region = DmaRegion::alloc(32);
        let idx = RingIndex::new(32, AlignUnit::Four).unwrap();
        let mut cursor = unsafe { ProducerCursor::new(&region, &idx) };
        assert_eq!(cursor.room(), 28);
        cursor.append(&[9; 12]);
        assert_eq!(cursor.room(), 16);
        assert_eq!(cursor.producer(), 12);
    }
}
