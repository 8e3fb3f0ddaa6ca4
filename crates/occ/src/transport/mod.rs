// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device transport adapter (DTA).
//!
//! Everything between the capture card and the packet scanner: opening a
//! device, reset and enable commands, transmit, waiting for the producer
//! index to move and acknowledging consumed bytes.
//!
//! # Architecture
//!
//! ```text
//!   Transport (consumer API)
//!     |-- RingTransport -- RingBackend -+- LocalBackend --> OccDevice (model)
//!     |                                 +- CharDevice   --> /dev/snsocbN
//!     +-- SocketTransport (TCP simulator, own buffer)
//! ```
//!
//! The consumer keeps its own consumer index and reads the ring memory
//! directly; the backend only reports the producer index and status bits.

mod backend;
mod capability;
#[cfg(target_os = "linux")]
mod chardev;
mod client;
mod command;
mod device;
mod session;
mod socket;
mod status;

pub use backend::{LocalBackend, RingBackend, RxReport};
pub use capability::{BoardCapabilities, SUPPORTED_BOARDS};
#[cfg(target_os = "linux")]
pub use chardev::CharDevice;
pub use client::RingTransport;
pub use command::{Command, ReadCommand};
pub use device::{regs, LinkPort, LoopbackLink, OccDevice, StuckLink};
pub use session::{Operation, Session};
pub use socket::{SocketTransport, SOCKET_BUFFER_SIZE};
pub use status::{
    supply_volts, temperature_celsius, BoardType, DecodedStatus, FirmwareDate, OpticalSignal,
    RingStatus, StatusFlags, STATUS_RECORD_SIZE,
};

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Physical link the board receives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    #[default]
    Lvds,
    Optical,
    /// TCP simulator peer.
    Socket,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lvds => write!(f, "LVDS"),
            Self::Optical => write!(f, "optical"),
            Self::Socket => write!(f, "socket"),
        }
    }
}

/// Cooperative cancellation flag shared between a waiter and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Result of a wait for incoming data.
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome<'a> {
    /// Contiguous readable bytes starting at the consumer index.
    Data(&'a [u8]),
    TimedOut,
    Cancelled,
}

/// Consumer-side transport API.
pub trait Transport {
    /// Capabilities resolved at open.
    fn capabilities(&self) -> &BoardCapabilities;

    /// Reinitialize the device and the ring; pending data is dropped.
    fn reset(&mut self) -> Result<()>;

    fn enable_receive(&mut self, enable: bool) -> Result<()>;

    fn enable_error_packets(&mut self, enable: bool) -> Result<()>;

    /// Transmit one buffer to the link.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Block until data is readable, `timeout` elapses or `cancel` fires.
    fn wait_for_data(&mut self, timeout: Duration, cancel: &CancelToken)
        -> Result<WaitOutcome<'_>>;

    /// Release `len` bytes of the last returned view.
    fn advance_consumer(&mut self, len: usize) -> Result<()>;

    fn status(&mut self) -> Result<RingStatus>;
}

/// Errors raised by the transport layer.
#[derive(Debug)]
pub enum TransportError {
    /// Underlying system call failed
    Io(io::Error),

    /// Device file missing or not an OCC device
    DeviceUnavailable(String),

    /// Device already opened exclusively
    Busy,

    /// Driver speaks another protocol version
    VersionMismatch { driver: (u32, u32), library: (u32, u32) },

    /// Scratch or buffer allocation limit reached
    OutOfMemory { requested: usize },

    /// Offset or length beyond the valid range
    Overflow { value: usize, limit: usize },

    /// Malformed request
    InvalidArgument(&'static str),

    /// Device was reset; pending waits and views are invalid
    ConnectionReset,

    /// Ring full, reception stopped until reset
    Stalled,

    /// Receive FIFO overflowed in hardware
    FifoOverflow,

    /// Transmit did not complete in time
    Timeout,

    /// Operation not allowed in this session
    NotPermitted(Operation),

    /// Board/firmware combination not in the capability table
    Unsupported { board: u32, firmware_ver: u32 },

    /// Peer or device closed
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DeviceUnavailable(path) => write!(f, "Device unavailable: {path}"),
            Self::Busy => write!(f, "Device busy"),
            Self::VersionMismatch { driver, library } => write!(
                f,
                "Driver version {}.{} incompatible with library {}.{}",
                driver.0, driver.1, library.0, library.1
            ),
            Self::OutOfMemory { requested } => {
                write!(f, "Out of memory: {requested} bytes requested")
            }
            Self::Overflow { value, limit } => write!(f, "Overflow: {value} exceeds {limit}"),
            Self::InvalidArgument(what) => write!(f, "Invalid argument: {what}"),
            Self::ConnectionReset => write!(f, "Connection reset"),
            Self::Stalled => write!(f, "DMA stalled, reset required"),
            Self::FifoOverflow => write!(f, "Receive FIFO overflow"),
            Self::Timeout => write!(f, "Timed out"),
            Self::NotPermitted(op) => write!(f, "Operation {op} not permitted"),
            Self::Unsupported {
                board,
                firmware_ver,
            } => write!(
                f,
                "Unsupported board {board} firmware 0x{firmware_ver:08x}"
            ),
            Self::Closed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_error_source() {
        use std::error::Error;
        let e = TransportError::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(e.source().is_some());
        assert!(TransportError::Stalled.source().is_none());
        assert_eq!(
            TransportError::Overflow { value: 9, limit: 8 }.to_string(),
            "Overflow: 9 exceeds 8"
        );
    }
}
