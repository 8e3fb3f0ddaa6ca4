// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hardware side of split-queue boards.
//!
//! Boards without a unified ring deliver every message as a descriptor in a
//! small message queue plus a payload in either the command or the data
//! sub-queue. [`HardwareQueues`] models those three queues together with
//! their producer registers (advanced by the board) and consumer registers
//! (advanced by the emulation layer).

use super::descriptor::{PendingMessageDescriptor, HW_DESCRIPTOR_SIZE};
use super::{EmulationError, Result};
use crate::config::{COMMAND_QUEUE_SIZE, DATA_QUEUE_SIZE, HW_MESSAGE_QUEUE_ENTRIES};
use crate::ring::align_up;
use parking_lot::Mutex;

/// Which payload sub-queue a descriptor points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Command,
    Data,
}

impl QueueKind {
    #[must_use]
    pub const fn of(descriptor: &PendingMessageDescriptor) -> Self {
        if descriptor.is_command() {
            Self::Command
        } else {
            Self::Data
        }
    }
}

#[derive(Debug)]
struct SubQueue {
    buf: Vec<u8>,
    prod: usize,
    cons: usize,
}

impl SubQueue {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            prod: 0,
            cons: 0,
        }
    }

    fn used(&self) -> usize {
        (self.prod + self.buf.len() - self.cons) % self.buf.len()
    }

    fn free(&self) -> usize {
        self.buf.len() - self.used() - 4
    }

    fn write(&mut self, bytes: &[u8]) {
        let size = self.buf.len();
        let head = bytes.len().min(size - self.prod);
        self.buf[self.prod..self.prod + head].copy_from_slice(&bytes[..head]);
        self.buf[..bytes.len() - head].copy_from_slice(&bytes[head..]);
        self.prod = (self.prod + bytes.len()) % size;
    }
}

#[derive(Debug)]
struct HwState {
    imq: Vec<[u8; HW_DESCRIPTOR_SIZE]>,
    imq_prod: usize,
    imq_cons: usize,
    command: SubQueue,
    data: SubQueue,
}

impl HwState {
    fn queue(&self, kind: QueueKind) -> &SubQueue {
        match kind {
            QueueKind::Command => &self.command,
            QueueKind::Data => &self.data,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut SubQueue {
        match kind {
            QueueKind::Command => &mut self.command,
            QueueKind::Data => &mut self.data,
        }
    }
}

/// The three hardware queues of a split-queue board.
#[derive(Debug)]
pub struct HardwareQueues {
    state: Mutex<HwState>,
}

impl Default for HardwareQueues {
    fn default() -> Self {
        Self::new(COMMAND_QUEUE_SIZE, DATA_QUEUE_SIZE)
    }
}

impl HardwareQueues {
    /// Create queues with the given sub-queue sizes (multiples of 4).
    #[must_use]
    pub fn new(command_size: usize, data_size: usize) -> Self {
        Self {
            state: Mutex::new(HwState {
                imq: vec![[0u8; HW_DESCRIPTOR_SIZE]; HW_MESSAGE_QUEUE_ENTRIES],
                imq_prod: 0,
                imq_cons: 0,
                command: SubQueue::new(align_up(command_size, 4)),
                data: SubQueue::new(align_up(data_size, 4)),
            }),
        }
    }

    /// Deliver one message the way the board does: payload first, then the
    /// descriptor announcing it.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::HardwareFull`] when the message queue or the
    /// payload sub-queue has no room.
    pub fn inject(&self, descriptor: PendingMessageDescriptor, payload: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        let kind = QueueKind::of(&descriptor);
        let padded = align_up(payload.len(), 4);
        if st.queue(kind).free() < padded || Self::imq_free(&st) == 0 {
            return Err(EmulationError::HardwareFull);
        }
        let mut bytes = payload.to_vec();
        bytes.resize(padded, 0);
        st.queue_mut(kind).write(&bytes);
        Self::push_descriptor(&mut st, &descriptor);
        Ok(())
    }

    /// Announce a descriptor without writing any payload (for boards that
    /// misreport lengths).
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::HardwareFull`] when the message queue is full.
    pub fn inject_descriptor(&self, descriptor: PendingMessageDescriptor) -> Result<()> {
        let mut st = self.state.lock();
        if Self::imq_free(&st) == 0 {
            return Err(EmulationError::HardwareFull);
        }
        Self::push_descriptor(&mut st, &descriptor);
        Ok(())
    }

    fn imq_free(st: &HwState) -> usize {
        let entries = st.imq.len();
        entries - 1 - (st.imq_prod + entries - st.imq_cons) % entries
    }

    fn push_descriptor(st: &mut HwState, descriptor: &PendingMessageDescriptor) {
        let mut entry = [0u8; HW_DESCRIPTOR_SIZE];
        entry[..super::DESCRIPTOR_SIZE].copy_from_slice(&descriptor.to_bytes());
        let slot = st.imq_prod;
        st.imq[slot] = entry;
        st.imq_prod = (slot + 1) % st.imq.len();
    }

    /// Message queue producer register.
    #[must_use]
    pub fn message_producer(&self) -> usize {
        self.state.lock().imq_prod
    }

    /// Message queue consumer register.
    #[must_use]
    pub fn message_consumer(&self) -> usize {
        self.state.lock().imq_cons
    }

    /// Number of entries in the message queue.
    #[must_use]
    pub fn message_entries(&self) -> usize {
        self.state.lock().imq.len()
    }

    /// Read the descriptor stored at `slot`.
    #[must_use]
    pub fn descriptor(&self, slot: usize) -> Option<PendingMessageDescriptor> {
        let st = self.state.lock();
        st.imq
            .get(slot)
            .and_then(|entry| PendingMessageDescriptor::parse(entry))
    }

    /// Write the message queue consumer register.
    pub fn set_message_consumer(&self, cons: usize) {
        let mut st = self.state.lock();
        st.imq_cons = cons % st.imq.len();
    }

    /// Producer register of a payload sub-queue.
    #[must_use]
    pub fn producer(&self, kind: QueueKind) -> usize {
        self.state.lock().queue(kind).prod
    }

    /// Size of a payload sub-queue.
    #[must_use]
    pub fn size(&self, kind: QueueKind) -> usize {
        self.state.lock().queue(kind).buf.len()
    }

    /// Write the consumer register of a payload sub-queue.
    pub fn set_consumer(&self, kind: QueueKind, cons: usize) {
        let mut st = self.state.lock();
        let q = st.queue_mut(kind);
        q.cons = cons % q.buf.len();
    }

    /// Hand `len` bytes starting at `cons` to `out`, as one or two slices
    /// when the range wraps.
    pub fn read_payload(
        &self,
        kind: QueueKind,
        cons: usize,
        len: usize,
        out: &mut dyn FnMut(&[u8]),
    ) {
        let st = self.state.lock();
        let q = st.queue(kind);
        let size = q.buf.len();
        let head = len.min(size - cons);
        out(&q.buf[cons..cons + head]);
        if len > head {
            out(&q.buf[..len - head]);
        }
    }

    /// Reset all queue registers.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.imq_prod = 0;
        st.imq_cons = 0;
        for kind in [QueueKind::Command, QueueKind::Data] {
            let q = st.queue_mut(kind);
            q.prod = 0;
            q.cons = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::TYPE_COMMAND;

    fn descriptor(msg_type: u32, length: u32) -> PendingMessageDescriptor {
        PendingMessageDescriptor {
            msg_type,
            length,
            ..Default::default()
        }
    }

    #[test]
    fn test_inject_routes_by_type() {
        let hw = HardwareQueues::new(64, 128);
        hw.inject(descriptor(TYPE_COMMAND, 6), &[1, 2, 3, 4, 5, 6]).unwrap();
        hw.inject(descriptor(0, 16), &[9; 16]).unwrap();
        assert_eq!(hw.producer(QueueKind::Command), 8);
        assert_eq!(hw.producer(QueueKind::Data), 16);
        assert_eq!(hw.message_producer(), 2);
        assert!(hw.descriptor(0).unwrap().is_command());
    }

    #[test]
    fn test_message_queue_full() {
        let hw = HardwareQueues::new(64, 64);
        for _ in 0..HW_MESSAGE_QUEUE_ENTRIES - 1 {
            hw.inject_descriptor(descriptor(0, 0)).unwrap();
        }
        assert_eq!(
            hw.inject_descriptor(descriptor(0, 0)),
            Err(EmulationError::HardwareFull)
        );
    }

    #[test]
    fn test_read_payload_wraps() {
        let hw = HardwareQueues::new(64, 32);
        hw.inject(descriptor(0, 28), &[1; 28]).unwrap();
        hw.set_consumer(QueueKind::Data, 28);
        hw.inject(descriptor(0, 8), &[2, 2, 2, 2, 3, 3, 3, 3]).unwrap();
        assert_eq!(hw.producer(QueueKind::Data), 4);
        let mut seen = Vec::new();
        hw.read_payload(QueueKind::Data, 28, 8, &mut |part| seen.push(part.to_vec()));
        assert_eq!(seen, vec![vec![2; 4], vec![3; 4]]);
    }
}
