// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Character device command set.
//!
//! Commands are selected by the file offset of a `pread`/`pwrite`; write
//! commands carry one little-endian `u32` argument, except transmit which
//! carries the frame itself.

use super::{InterfaceKind, Operation};

/// Offset of the transmit write.
pub const CMD_TX: u64 = 9;

/// Read-side commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCommand {
    /// Block until data or a state change: `(producer, status)`, 8 bytes.
    Rx,
    /// Driver protocol version: `(major, minor)`, 8 bytes.
    Version,
    /// Status record; clears the reset-occurred flag.
    Status,
}

impl ReadCommand {
    #[must_use]
    pub const fn offset(self) -> u64 {
        match self {
            Self::Rx => 1,
            Self::Version => 2,
            Self::Status => 3,
        }
    }
}

/// Write-side commands with a single word argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Accept the legacy packet format.
    OldPackets(bool),
    /// Release bytes of the DMA ring.
    Advance(u32),
    /// Reset and select the receive interface.
    Reset(InterfaceKind),
    RxEnable(bool),
    /// Deliver packets that failed hardware checks.
    ErrorPackets(bool),
}

impl Command {
    #[must_use]
    pub const fn offset(self) -> u64 {
        match self {
            Self::OldPackets(_) => 4,
            Self::Advance(_) => 10,
            Self::Reset(_) => 11,
            Self::RxEnable(_) => 12,
            Self::ErrorPackets(_) => 13,
        }
    }

    #[must_use]
    pub const fn argument(self) -> u32 {
        match self {
            Self::OldPackets(on) | Self::RxEnable(on) | Self::ErrorPackets(on) => on as u32,
            Self::Advance(len) => len,
            Self::Reset(InterfaceKind::Optical) => 1,
            Self::Reset(_) => 0,
        }
    }

    #[must_use]
    pub const fn encode(self) -> [u8; 4] {
        self.argument().to_le_bytes()
    }

    /// Session operation this command is checked against.
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::OldPackets(_) => Operation::EnableOldPackets,
            Self::Advance(_) => Operation::Acknowledge,
            Self::Reset(_) => Operation::Reset,
            Self::RxEnable(_) => Operation::EnableReceive,
            Self::ErrorPackets(_) => Operation::EnableErrorPackets,
        }
    }

    /// Rebuild a command from its offset and argument word.
    #[must_use]
    pub const fn decode(offset: u64, argument: u32) -> Option<Self> {
        let on = argument != 0;
        match offset {
            4 => Some(Self::OldPackets(on)),
            10 => Some(Self::Advance(argument)),
            11 => Some(Self::Reset(if argument == 1 {
                InterfaceKind::Optical
            } else {
                InterfaceKind::Lvds
            })),
            12 => Some(Self::RxEnable(on)),
            13 => Some(Self::ErrorPackets(on)),
            _ => None,
        }
    }
}
