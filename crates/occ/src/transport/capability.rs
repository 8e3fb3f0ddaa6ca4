// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per board/firmware feature table, resolved once at open.

use super::status::BoardType;
use super::{Result, TransportError};
use crate::config::{TX_FIFO_LEN_PCIE, TX_FIFO_LEN_PCIX, TX_FIFO_SLACK};

/// What a given board and firmware revision can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardCapabilities {
    pub board: BoardType,
    pub firmware_ver: u32,
    /// Incoming data arrives through separate command/data queues that the
    /// driver merges (ring emulation) instead of a single DMA ring.
    pub split_queues: bool,
    /// Transmit FIFO size in bytes.
    pub tx_fifo_len: usize,
    /// Firmware can clear its CRC/length/frame error counters.
    pub reset_errcnt: bool,
    /// RX stays disabled after reset until explicitly enabled.
    pub late_rx_enable: bool,
    pub msi: bool,
}

const fn pcix(firmware_ver: u32, split_queues: bool) -> BoardCapabilities {
    BoardCapabilities {
        board: BoardType::Pcix,
        firmware_ver,
        split_queues,
        tx_fifo_len: TX_FIFO_LEN_PCIX,
        reset_errcnt: false,
        late_rx_enable: false,
        msi: false,
    }
}

const fn pcie(firmware_ver: u32, msi: bool) -> BoardCapabilities {
    BoardCapabilities {
        board: BoardType::Pcie,
        firmware_ver,
        split_queues: false,
        tx_fifo_len: TX_FIFO_LEN_PCIE,
        reset_errcnt: true,
        late_rx_enable: true,
        msi,
    }
}

/// Every supported board/firmware combination.
pub const SUPPORTED_BOARDS: &[BoardCapabilities] = &[
    pcix(0x3112_1106, false),
    pcix(0x3113_0603, false),
    pcix(0x2210_0817, true),
    pcie(0x000a_0001, false),
    pcie(0x000b_0001, false),
    pcie(0x000b_0002, true),
];

impl BoardCapabilities {
    /// Look up a board/firmware pair.
    ///
    /// # Errors
    ///
    /// [`TransportError::Unsupported`] when the combination is unknown.
    pub fn lookup(board: BoardType, firmware_ver: u32) -> Result<Self> {
        SUPPORTED_BOARDS
            .iter()
            .find(|c| c.board == board && c.firmware_ver == firmware_ver)
            .copied()
            .ok_or(TransportError::Unsupported {
                board: board.raw(),
                firmware_ver,
            })
    }

    /// Capabilities of the socket simulator: no hardware limits beyond a PCIe FIFO.
    #[must_use]
    pub const fn simulator() -> Self {
        BoardCapabilities {
            board: BoardType::Simulator,
            firmware_ver: 0x000f_0001,
            split_queues: false,
            tx_fifo_len: TX_FIFO_LEN_PCIE,
            reset_errcnt: false,
            late_rx_enable: false,
            msi: false,
        }
    }

    /// Largest accepted single transmit.
    #[inline]
    #[must_use]
    pub const fn max_send_len(&self) -> usize {
        self.tx_fifo_len - TX_FIFO_SLACK
    }
}
