// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ring emulation layer (REL).
//!
//! Some boards deliver received messages through three hardware queues
//! instead of one ring:
//!
//! ```text
//!   message queue (64 descriptors) ---+
//!   command queue (64 KiB)  ----------+--> RingEmulator --> unified ring
//!   data queue (2 MiB)      ----------+
//! ```
//!
//! The emulator merges them into the single ring the consumer expects, one
//! `descriptor + payload` record per message.

mod descriptor;
mod emulator;
mod hardware;

pub use descriptor::{
    PendingMessageDescriptor, DESCRIPTOR_SIZE, HW_DESCRIPTOR_SIZE, TYPE_COMMAND,
};
pub use emulator::{BatchOutcome, CopyOutcome, RingEmulator, StallReason};
pub use hardware::{HardwareQueues, QueueKind};

use std::fmt;

/// Errors raised by the emulation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulationError {
    /// Software descriptor ring is full (backpressure, not fatal).
    NoSpace,

    /// Hardware queue model cannot accept another message.
    HardwareFull,
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => write!(f, "No space in software descriptor ring"),
            Self::HardwareFull => write!(f, "Hardware queue full"),
        }
    }
}

impl std::error::Error for EmulationError {}

/// Result type for emulation operations
pub type Result<T> = std::result::Result<T, EmulationError>;
