// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Software merge of the hardware sub-queues into the unified ring.
//!
//! # Protocol
//!
//! 1. `drain_descriptors`: move new hardware message-queue entries into the
//!    larger software descriptor ring and release the hardware slots.
//! 2. `copy_one`: for the oldest software descriptor, copy the descriptor and
//!    its payload into the unified ring, then release the payload in the
//!    hardware sub-queue.
//! 3. `run_batch`: at most `budget` copies per call; the caller reschedules
//!    while [`BatchOutcome::Reschedule`] is returned.
//!
//! A descriptor that cannot be copied stays at the head of the software ring:
//! the caller raises a stall and only a reset clears it.

use super::descriptor::{PendingMessageDescriptor, DESCRIPTOR_SIZE};
use super::hardware::{HardwareQueues, QueueKind};
use super::{EmulationError, Result};
use crate::config::{EMULATION_BATCH_BUDGET, SW_MESSAGE_QUEUE_ENTRIES};
use crate::ring::RingSink;
use std::fmt;

/// Why a copy could not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// Descriptor claims more payload than the sub-queue holds.
    ShortSubQueue {
        kind: QueueKind,
        claimed: usize,
        available: usize,
    },
    /// Unified ring lacks room for descriptor plus payload.
    RingFull { needed: usize, room: usize },
    /// Software descriptor ring overflowed.
    DescriptorRingFull,
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortSubQueue {
                kind,
                claimed,
                available,
            } => write!(
                f,
                "{kind:?} queue holds {available} bytes, descriptor claims {claimed}"
            ),
            Self::RingFull { needed, room } => {
                write!(f, "unified ring has {room} bytes free, {needed} needed")
            }
            Self::DescriptorRingFull => write!(f, "software descriptor ring full"),
        }
    }
}

/// Result of one `copy_one` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// No pending descriptor.
    Idle,
    /// Descriptor and payload copied; `bytes` landed in the unified ring.
    Copied { bytes: usize },
    /// Fail-stop condition, nothing was copied.
    Stalled(StallReason),
}

/// Result of one budgeted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Everything pending was copied.
    Idle,
    /// Budget exhausted with work left; call again.
    Reschedule,
    Stalled(StallReason),
}

/// Software side of the ring emulation.
#[derive(Debug)]
pub struct RingEmulator {
    ring: Vec<PendingMessageDescriptor>,
    prod: usize,
    cons: usize,
    hw_imq_cons: usize,
    command_cons: usize,
    data_cons: usize,
    budget: usize,
}

impl Default for RingEmulator {
    fn default() -> Self {
        Self::new(SW_MESSAGE_QUEUE_ENTRIES, EMULATION_BATCH_BUDGET)
    }
}

impl RingEmulator {
    /// Create an emulator with `entries` software descriptor slots.
    #[must_use]
    pub fn new(entries: usize, budget: usize) -> Self {
        Self {
            ring: vec![PendingMessageDescriptor::default(); entries.max(2)],
            prod: 0,
            cons: 0,
            hw_imq_cons: 0,
            command_cons: 0,
            data_cons: 0,
            budget: budget.max(1),
        }
    }

    /// Descriptors waiting for `copy_one`.
    #[must_use]
    pub fn pending(&self) -> usize {
        (self.prod + self.ring.len() - self.cons) % self.ring.len()
    }

    /// Copy new hardware descriptors into the software ring.
    ///
    /// Returns how many were moved. Descriptors moved before the ring filled
    /// up are kept.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::NoSpace`] when the next software slot is the
    /// one still waiting to be copied.
    pub fn drain_descriptors(&mut self, hw: &HardwareQueues) -> Result<usize> {
        let entries = hw.message_entries();
        let mut moved = 0;
        let mut result = Ok(());
        let mut hw_prod = hw.message_producer();

        'outer: while self.hw_imq_cons != hw_prod {
            while self.hw_imq_cons != hw_prod {
                let next = (self.prod + 1) % self.ring.len();
                if next == self.cons {
                    log::warn!("[rel] no descriptor space ({} pending)", self.pending());
                    result = Err(EmulationError::NoSpace);
                    break 'outer;
                }
                let Some(descriptor) = hw.descriptor(self.hw_imq_cons) else {
                    break 'outer;
                };
                self.ring[self.prod] = descriptor;
                self.prod = next;
                self.hw_imq_cons = (self.hw_imq_cons + 1) % entries;
                moved += 1;
            }
            hw_prod = hw.message_producer();
        }

        hw.set_message_consumer(self.hw_imq_cons);
        result.map(|()| moved)
    }

    /// Copy the oldest pending descriptor and its payload into `sink`.
    pub fn copy_one(&mut self, hw: &HardwareQueues, sink: &mut dyn RingSink) -> CopyOutcome {
        if self.prod == self.cons {
            return CopyOutcome::Idle;
        }
        let descriptor = self.ring[self.cons];
        let kind = QueueKind::of(&descriptor);
        let length = descriptor.aligned_length();
        let size = hw.size(kind);
        let cons = self.sub_consumer(kind);
        let available = (hw.producer(kind) + size - cons) % size;

        if length > available {
            log::error!(
                "[rel] descriptor length {} exceeds {:?} queue content {}",
                length,
                kind,
                available
            );
            return CopyOutcome::Stalled(StallReason::ShortSubQueue {
                kind,
                claimed: length,
                available,
            });
        }

        let needed = DESCRIPTOR_SIZE + length;
        let room = sink.room();
        if needed > room {
            log::warn!("[rel] consumer stalled rx ({} needed, {} free)", needed, room);
            return CopyOutcome::Stalled(StallReason::RingFull { needed, room });
        }

        sink.append(&descriptor.to_bytes());
        hw.read_payload(kind, cons, length, &mut |part| sink.append(part));
        sink.commit();

        let next = (cons + length) % size;
        self.set_sub_consumer(kind, next);
        hw.set_consumer(kind, next);
        self.cons = (self.cons + 1) % self.ring.len();
        CopyOutcome::Copied { bytes: needed }
    }

    /// Run at most `budget` copies.
    pub fn run_batch(&mut self, hw: &HardwareQueues, sink: &mut dyn RingSink) -> BatchOutcome {
        for _ in 0..self.budget {
            match self.copy_one(hw, sink) {
                CopyOutcome::Idle => return BatchOutcome::Idle,
                CopyOutcome::Copied { .. } => {}
                CopyOutcome::Stalled(reason) => return BatchOutcome::Stalled(reason),
            }
        }
        if self.pending() == 0 {
            BatchOutcome::Idle
        } else {
            BatchOutcome::Reschedule
        }
    }

    /// Forget pending descriptors and resynchronize with the hardware:
    /// every consumer register jumps to its producer.
    pub fn reset(&mut self, hw: &HardwareQueues) {
        self.prod = 0;
        self.cons = 0;
        self.hw_imq_cons = hw.message_producer();
        hw.set_message_consumer(self.hw_imq_cons);
        for kind in [QueueKind::Command, QueueKind::Data] {
            let prod = hw.producer(kind);
            self.set_sub_consumer(kind, prod);
            hw.set_consumer(kind, prod);
        }
    }

    fn sub_consumer(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Command => self.command_cons,
            QueueKind::Data => self.data_cons,
        }
    }

    fn set_sub_consumer(&mut self, kind: QueueKind, cons: usize) {
        match kind {
            QueueKind::Command => self.command_cons = cons,
            QueueKind::Data => self.data_cons = cons,
        }
    }
}
