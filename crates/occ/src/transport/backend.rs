// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Seam between the ring client and whatever owns the DMA ring.

use super::command::Command;
use super::device::OccDevice;
use super::session::{Operation, Session};
use super::status::{RingStatus, StatusFlags};
use super::{CancelToken, Result};
use crate::ring::DmaRegion;
use std::sync::Arc;
use std::time::Duration;

/// Answer of a receive wait: producer index plus status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxReport {
    pub producer: u32,
    pub status: StatusFlags,
}

impl RxReport {
    /// Wire size of a report read from the character device.
    pub const SIZE: usize = 8;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..Self::SIZE)?;
        Some(Self {
            producer: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            status: StatusFlags::from_bits(u32::from_le_bytes([b[4], b[5], b[6], b[7]])),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(&self.producer.to_le_bytes());
        out[4..].copy_from_slice(&self.status.bits().to_le_bytes());
        out
    }
}

/// Driver-side operations used by [`super::RingTransport`].
pub trait RingBackend: Send {
    /// Protocol version `(major, minor)`.
    fn version(&self) -> Result<(u32, u32)>;

    /// Status record; clears the reset-occurred flag.
    fn status(&self) -> Result<RingStatus>;

    /// Block until the producer moves or the status changes; `None` on
    /// timeout or cancellation.
    fn wait_rx(&self, timeout: Duration, cancel: &CancelToken) -> Result<Option<RxReport>>;

    /// Memory of the unified ring.
    fn ring(&self) -> &DmaRegion;

    fn command(&self, command: Command) -> Result<()>;

    fn transmit(&self, data: &[u8]) -> Result<()>;

    fn io_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> Result<usize>;

    fn io_write(&self, bar: usize, offset: usize, words: &[u32]) -> Result<usize>;
}

/// Backend talking to an in-process [`OccDevice`].
#[derive(Debug)]
pub struct LocalBackend {
    device: Arc<OccDevice>,
    session: Session,
}

impl LocalBackend {
    /// Attach a session to `device`.
    ///
    /// # Errors
    ///
    /// [`super::TransportError::Busy`] when an exclusive session already exists.
    pub fn open(device: Arc<OccDevice>, session: Session) -> Result<Self> {
        device.acquire(session)?;
        Ok(Self { device, session })
    }

    #[must_use]
    pub fn device(&self) -> &Arc<OccDevice> {
        &self.device
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        self.device.release(self.session);
    }
}

impl RingBackend for LocalBackend {
    fn version(&self) -> Result<(u32, u32)> {
        Ok(self.device.version())
    }

    fn status(&self) -> Result<RingStatus> {
        Ok(self.device.status())
    }

    fn wait_rx(&self, timeout: Duration, cancel: &CancelToken) -> Result<Option<RxReport>> {
        self.device.wait_rx(timeout, cancel)
    }

    fn ring(&self) -> &DmaRegion {
        self.device.ring()
    }

    fn command(&self, command: Command) -> Result<()> {
        // The driver lets debug sessions reset and nothing else.
        if self.session.is_debug() {
            self.session.check(command.operation())?;
        }
        match command {
            Command::OldPackets(on) => {
                self.device.enable_old_packets(on);
                Ok(())
            }
            Command::Advance(len) => self.device.advance(len),
            Command::Reset(interface) => self.device.reset(interface),
            Command::RxEnable(on) => self.device.enable_rx(on),
            Command::ErrorPackets(on) => {
                self.device.enable_error_packets(on);
                Ok(())
            }
        }
    }

    fn transmit(&self, data: &[u8]) -> Result<()> {
        self.session.check(Operation::Send)?;
        self.device.transmit(data)
    }

    fn io_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> Result<usize> {
        self.device.io_read(bar, offset, out)
    }

    fn io_write(&self, bar: usize, offset: usize, words: &[u32]) -> Result<usize> {
        self.device.io_write(bar, offset, words)
    }
}
