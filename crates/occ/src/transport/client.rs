// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-side ring client.
//!
//! [`RingTransport`] keeps its own copy of the ring indices: the producer is
//! refreshed from every wait, the consumer moves on acknowledge. Readable
//! data is handed out in place, or through a rollover scratch buffer when it
//! wraps around the ring end.

use super::backend::{LocalBackend, RingBackend};
use super::capability::BoardCapabilities;
use super::command::Command;
use super::device::{regs, OccDevice};
use super::session::{Operation, Session};
use super::status::{BoardType, RingStatus, StatusFlags};
use super::{CancelToken, InterfaceKind, Result, Transport, TransportError, WaitOutcome};
use crate::config::{
    RolloverConfig, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR, WAIT_POLL_SLICE,
};
use crate::ring::{align_down, align_up, linearize, AlignUnit, PeekView, RingIndex};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Resolve the capability table entry for a status record.
fn capabilities_of(status: &RingStatus) -> Result<BoardCapabilities> {
    match BoardType::from_raw(status.board_type) {
        BoardType::Simulator => Ok(BoardCapabilities::simulator()),
        board => BoardCapabilities::lookup(board, status.firmware_ver),
    }
}

/// Ring client over any [`RingBackend`].
pub struct RingTransport {
    backend: Box<dyn RingBackend>,
    session: Session,
    interface: InterfaceKind,
    caps: BoardCapabilities,
    index: RingIndex,
    /// Length of the last view handed out; acknowledges are clamped to it.
    last_count: usize,
    scratch: Vec<u8>,
    rollover: RolloverConfig,
    /// Consumer index and length of the last view taken while the data wrapped.
    last_wrapped: Option<(usize, usize)>,
}

impl RingTransport {
    /// Attach to `backend`.
    ///
    /// Exclusive sessions reset the device and enable reception; debug
    /// sessions leave the device untouched.
    ///
    /// # Errors
    ///
    /// - [`TransportError::VersionMismatch`] when the major version differs
    ///   or the driver is older than this library
    /// - [`TransportError::Unsupported`] for an unknown board/firmware pair
    /// - any error of the initial reset
    pub fn connect(
        backend: Box<dyn RingBackend>,
        session: Session,
        interface: InterfaceKind,
    ) -> Result<Self> {
        let driver = backend.version()?;
        let library = (PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR);
        if driver.0 != library.0 || driver.1 < library.1 {
            return Err(TransportError::VersionMismatch { driver, library });
        }

        let status = backend.status()?;
        let caps = capabilities_of(&status)?;
        let index = RingIndex::new(backend.ring().len(), AlignUnit::Four)
            .map_err(|_| TransportError::InvalidArgument("device ring size"))?;
        let rollover = RolloverConfig::default();

        let mut transport = Self {
            backend,
            session,
            interface,
            caps,
            index,
            last_count: 0,
            scratch: vec![0u8; rollover.initial],
            rollover,
            last_wrapped: None,
        };
        if session.is_debug() {
            // Observe from the owner's current consumer index.
            let mut cons = [0u32; 1];
            if transport.backend.io_read(0, regs::DQ_CONS_IDX, &mut cons).is_ok() {
                let at = align_down(cons[0] as usize % index.capacity(), 4);
                if transport.index.set_producer(at).is_ok() {
                    transport.index.set_consumer(at);
                }
            }
        } else {
            transport.enable_receive(true)?;
        }
        log::debug!(
            "[dta] opened {:?} session on {} board fw 0x{:08x} ({})",
            session,
            caps.board,
            caps.firmware_ver,
            interface
        );
        Ok(transport)
    }

    /// Exclusive session on an in-process device.
    ///
    /// # Errors
    ///
    /// See [`Self::connect`]; [`TransportError::Busy`] when already owned.
    pub fn open_local(device: Arc<OccDevice>, interface: InterfaceKind) -> Result<Self> {
        let backend = LocalBackend::open(device, Session::Exclusive)?;
        Self::connect(Box::new(backend), Session::Exclusive, interface)
    }

    /// Debug session on an in-process device.
    ///
    /// # Errors
    ///
    /// See [`Self::connect`].
    pub fn open_local_debug(device: Arc<OccDevice>, interface: InterfaceKind) -> Result<Self> {
        let backend = LocalBackend::open(device, Session::Debug)?;
        Self::connect(Box::new(backend), Session::Debug, interface)
    }

    /// Exclusive session on a character device such as `/dev/snsocb0`.
    ///
    /// # Errors
    ///
    /// [`TransportError::DeviceUnavailable`] when the path cannot be opened,
    /// [`TransportError::Busy`] when another process owns it, then see
    /// [`Self::connect`].
    #[cfg(target_os = "linux")]
    pub fn open<P: AsRef<std::path::Path>>(path: P, interface: InterfaceKind) -> Result<Self> {
        let backend = super::CharDevice::open(path.as_ref(), Session::Exclusive)?;
        Self::connect(Box::new(backend), Session::Exclusive, interface)
    }

    /// Debug session on a character device.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    #[cfg(target_os = "linux")]
    pub fn open_debug<P: AsRef<std::path::Path>>(
        path: P,
        interface: InterfaceKind,
    ) -> Result<Self> {
        let backend = super::CharDevice::open(path.as_ref(), Session::Debug)?;
        Self::connect(Box::new(backend), Session::Debug, interface)
    }

    /// Replace the rollover sizing; the scratch buffer restarts at `initial`.
    #[must_use]
    pub fn with_rollover(mut self, rollover: RolloverConfig) -> Self {
        self.scratch = vec![0u8; rollover.initial.max(4)];
        self.rollover = rollover;
        self.last_wrapped = None;
        self
    }

    #[inline]
    #[must_use]
    pub fn session(&self) -> Session {
        self.session
    }

    #[inline]
    #[must_use]
    pub fn interface(&self) -> InterfaceKind {
        self.interface
    }

    /// Current size of the rollover scratch buffer.
    #[inline]
    #[must_use]
    pub fn rollover_len(&self) -> usize {
        self.scratch.len()
    }

    /// Bytes known to be readable at the local consumer index.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.index.used()
    }

    /// Switch to the legacy packet format. Reception is paused while the
    /// format changes.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotPermitted`] in debug sessions, or the device error.
    pub fn enable_old_packets(&mut self, enable: bool) -> Result<()> {
        self.session.check(Operation::EnableOldPackets)?;
        let pause = self.caps.late_rx_enable
            && self
                .backend
                .status()?
                .status
                .contains(StatusFlags::RX_ENABLED);
        if pause {
            self.backend.command(Command::RxEnable(false))?;
        }
        self.backend.command(Command::OldPackets(enable))?;
        if pause {
            self.backend.command(Command::RxEnable(true))?;
        }
        Ok(())
    }

    /// Wait for data, copy up to `buf.len()` bytes and acknowledge them
    /// (debug sessions only move their local index).
    ///
    /// Returns `Ok(0)` when cancelled.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] when nothing arrived in time, otherwise
    /// the errors of [`Transport::wait_for_data`].
    pub fn read(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<usize> {
        self.session.check(Operation::Read)?;
        let unit = self.index.unit().bytes();
        let count = match self.wait_for_data(timeout, cancel)? {
            WaitOutcome::Data(data) => {
                let count = if buf.len() < data.len() {
                    align_down(buf.len(), unit)
                } else {
                    data.len()
                };
                buf[..count].copy_from_slice(&data[..count]);
                count
            }
            WaitOutcome::TimedOut => return Err(TransportError::Timeout),
            WaitOutcome::Cancelled => return Ok(0),
        };

        if self.session.is_debug() {
            self.advance_local(count)?;
        } else {
            self.advance_consumer(count)?;
        }
        Ok(count)
    }

    /// Read consecutive BAR registers.
    ///
    /// # Errors
    ///
    /// See [`OccDevice::io_read`].
    pub fn io_read(&mut self, bar: usize, offset: usize, out: &mut [u32]) -> Result<usize> {
        self.session.check(Operation::IoRead)?;
        self.backend.io_read(bar, offset, out)
    }

    /// Write consecutive BAR registers.
    ///
    /// # Errors
    ///
    /// See [`OccDevice::io_write`].
    pub fn io_write(&mut self, bar: usize, offset: usize, words: &[u32]) -> Result<usize> {
        self.session.check(Operation::IoWrite)?;
        self.backend.io_write(bar, offset, words)
    }

    /// Write a human-readable status report.
    ///
    /// # Errors
    ///
    /// Device errors, or [`TransportError::Io`] when writing fails.
    pub fn report(&mut self, out: &mut dyn Write) -> Result<()> {
        let status = self.status()?;
        writeln!(out, "Session:           {:?}", self.session)?;
        writeln!(out, "Requested link:    {}", self.interface)?;
        writeln!(out, "{}", status.decode())?;
        writeln!(
            out,
            "Client view:       consumer {} producer {} rollover {} bytes",
            self.index.consumer(),
            self.index.producer(),
            self.scratch.len()
        )?;
        Ok(())
    }

    fn advance_local(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let cons = self
            .index
            .check_advance(len)
            .map_err(|_| TransportError::Overflow {
                value: len,
                limit: self.index.used(),
            })?;
        self.index.set_consumer(cons);
        self.last_count -= len.min(self.last_count);
        Ok(())
    }

    /// Grow the rollover scratch when the caller could not make progress on
    /// the last wrapped view.
    fn maybe_grow_rollover(&mut self) -> Result<()> {
        if !self.index.wraps() {
            return Ok(());
        }
        let Some((consumer, len)) = self.last_wrapped else {
            return Ok(());
        };
        if consumer != self.index.consumer() || len >= self.index.used() {
            return Ok(());
        }
        let requested = self.scratch.len() * 2;
        if requested > self.rollover.max {
            log::warn!(
                "[dta] rollover buffer at {} bytes cannot hold the wrapped packet",
                self.scratch.len()
            );
            return Err(TransportError::OutOfMemory { requested });
        }
        log::debug!("[dta] rollover buffer grown to {} bytes", requested);
        self.scratch.resize(requested, 0);
        Ok(())
    }

    fn check_rx_status(status: StatusFlags) -> Result<()> {
        if status.contains(StatusFlags::RX_MSG) {
            return Ok(());
        }
        if status.contains(StatusFlags::RESET_OCCURRED) {
            return Err(TransportError::ConnectionReset);
        }
        if status.contains(StatusFlags::DMA_STALLED) {
            return Err(TransportError::Stalled);
        }
        if status.contains(StatusFlags::FIFO_OVERFLOW) {
            return Err(TransportError::FifoOverflow);
        }
        Ok(())
    }
}

impl fmt::Debug for RingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingTransport")
            .field("session", &self.session)
            .field("interface", &self.interface)
            .field("caps", &self.caps)
            .field("index", &self.index)
            .field("last_count", &self.last_count)
            .field("rollover_len", &self.scratch.len())
            .finish_non_exhaustive()
    }
}

impl Transport for RingTransport {
    fn capabilities(&self) -> &BoardCapabilities {
        &self.caps
    }

    fn reset(&mut self) -> Result<()> {
        self.session.check(Operation::Reset)?;
        self.backend.command(Command::Reset(self.interface))?;
        self.index.reset();
        self.last_count = 0;
        self.last_wrapped = None;
        // Reading the status clears the reset-occurred flag.
        self.backend.status()?;
        Ok(())
    }

    fn enable_receive(&mut self, enable: bool) -> Result<()> {
        self.session.check(Operation::EnableReceive)?;
        if enable {
            self.reset()?;
        }
        self.backend.command(Command::RxEnable(enable))
    }

    fn enable_error_packets(&mut self, enable: bool) -> Result<()> {
        self.session.check(Operation::EnableErrorPackets)?;
        self.backend.command(Command::ErrorPackets(enable))
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.session.check(Operation::Send)?;
        let padded_len = align_up(data.len(), 4);
        if data.is_empty() || padded_len > self.caps.max_send_len() {
            return Err(TransportError::InvalidArgument("send length"));
        }
        if padded_len == data.len() {
            return self.backend.transmit(data);
        }
        let mut padded = data.to_vec();
        padded.resize(padded_len, 0);
        self.backend.transmit(&padded)
    }

    fn wait_for_data(
        &mut self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome<'_>> {
        self.session.check(Operation::Wait)?;
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let remaining =
                deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
            let Some(report) = self.backend.wait_rx(remaining, cancel)? else {
                return Ok(if cancel.is_cancelled() {
                    WaitOutcome::Cancelled
                } else {
                    WaitOutcome::TimedOut
                });
            };
            Self::check_rx_status(report.status)?;
            self.index
                .set_producer(report.producer as usize)
                .map_err(|_| TransportError::Overflow {
                    value: report.producer as usize,
                    limit: self.index.capacity(),
                })?;
            if !self.index.is_empty() {
                break;
            }

            // Device has data we already consumed locally (debug observer).
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(WaitOutcome::TimedOut);
            }
            thread::sleep(WAIT_POLL_SLICE);
        }

        self.maybe_grow_rollover()?;
        // SAFETY: the producer never writes [consumer, producer) until we
        // acknowledge, and the view is dropped before the next acknowledge.
        let view = unsafe { linearize(self.backend.ring(), &self.index, &mut self.scratch) };
        self.last_wrapped = self
            .index
            .wraps()
            .then(|| (self.index.consumer(), view.len()));
        self.last_count = view.len();
        if view.is_empty() {
            return Ok(WaitOutcome::TimedOut);
        }

        let data = match view {
            // SAFETY: see above; offset + len stays inside the head segment.
            PeekView::Direct { offset, len } => unsafe { self.backend.ring().slice(offset, len) },
            PeekView::Scratch { len } => &self.scratch[..len],
        };
        Ok(WaitOutcome::Data(data))
    }

    fn advance_consumer(&mut self, len: usize) -> Result<()> {
        self.session.check(Operation::Acknowledge)?;
        if len % self.index.unit().bytes() != 0 {
            return Err(TransportError::InvalidArgument("acknowledge length not aligned"));
        }
        let len = len.min(self.last_count);
        if len == 0 {
            return Ok(());
        }
        let cons = self
            .index
            .check_advance(len)
            .map_err(|_| TransportError::Overflow {
                value: len,
                limit: self.index.used(),
            })?;
        let word = u32::try_from(len).map_err(|_| TransportError::Overflow {
            value: len,
            limit: u32::MAX as usize,
        })?;
        self.backend.command(Command::Advance(word))?;
        self.index.set_consumer(cons);
        self.last_count -= len;
        Ok(())
    }

    fn status(&mut self) -> Result<RingStatus> {
        self.session.check(Operation::Status)?;
        self.backend.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::build_event_packet;

    fn device() -> Arc<OccDevice> {
        Arc::new(OccDevice::new(BoardCapabilities::simulator(), 4096).unwrap())
    }

    #[test]
    fn test_open_resets_and_enables() {
        let dev = device();
        let mut transport =
            RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        let status = transport.status().unwrap();
        assert!(status.status.contains(StatusFlags::RX_ENABLED));
        assert!(!status.status.contains(StatusFlags::RESET_OCCURRED));
        assert_eq!(transport.capabilities().board, BoardType::Simulator);
    }

    #[test]
    fn test_version_mismatch() {
        let dev = Arc::new(
            OccDevice::new(BoardCapabilities::simulator(), 4096)
                .unwrap()
                .with_protocol_version(1, 8),
        );
        assert!(matches!(
            RingTransport::open_local(dev, InterfaceKind::Lvds),
            Err(TransportError::VersionMismatch {
                driver: (1, 8),
                library: (1, 9)
            })
        ));
    }

    #[test]
    fn test_wait_and_acknowledge() {
        let dev = device();
        let mut transport =
            RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        let cancel = CancelToken::new();
        assert_eq!(
            transport
                .wait_for_data(Duration::from_millis(5), &cancel)
                .unwrap(),
            WaitOutcome::TimedOut
        );

        let frame = build_event_packet(8);
        dev.receive(&frame).unwrap();
        match transport.wait_for_data(Duration::from_millis(50), &cancel).unwrap() {
            WaitOutcome::Data(data) => assert_eq!(data, &frame[..]),
            other => panic!("unexpected {other:?}"),
        }
        // Clamped to the view length.
        transport.advance_consumer(frame.len() * 4).unwrap();
        assert_eq!(transport.pending(), 0);
        assert_eq!(dev.status().dq_used, 0);
    }

    #[test]
    fn test_unaligned_acknowledge_rejected() {
        let dev = device();
        let mut transport =
            RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        let frame = build_event_packet(16);
        dev.receive(&frame).unwrap();
        let len = match transport
            .wait_for_data(Duration::from_millis(50), &CancelToken::new())
            .unwrap()
        {
            WaitOutcome::Data(data) => data.len(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(len, frame.len());

        assert!(matches!(
            transport.advance_consumer(1),
            Err(TransportError::InvalidArgument(_))
        ));
        assert_eq!(dev.status().dq_used as usize, len);
        assert_eq!(transport.pending(), len);

        let unit = transport.index.unit().bytes();
        transport.advance_consumer(unit).unwrap();
        transport.advance_consumer(len - unit).unwrap();
        assert_eq!(transport.pending(), 0);
        assert_eq!(dev.status().dq_used, 0);
    }

    #[test]
    fn test_wait_honors_deadline() {
        let dev = device();
        let mut transport =
            RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        let start = Instant::now();
        assert_eq!(
            transport
                .wait_for_data(Duration::from_millis(30), &CancelToken::new())
                .unwrap(),
            WaitOutcome::TimedOut
        );
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_send_pads_and_checks_length() {
        let dev = device();
        let mut transport = RingTransport::open_local(dev, InterfaceKind::Lvds).unwrap();
        transport.send(&[1, 2, 3, 4, 5]).unwrap();
        let too_big = vec![0u8; transport.capabilities().max_send_len() + 1];
        assert!(matches!(
            transport.send(&too_big),
            Err(TransportError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reset_occurred_reported() {
        let dev = device();
        let mut transport =
            RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        dev.reset(InterfaceKind::Lvds).unwrap();
        assert!(matches!(
            transport.wait_for_data(Duration::from_millis(50), &CancelToken::new()),
            Err(TransportError::ConnectionReset)
        ));
        transport.reset().unwrap();
        assert_eq!(
            transport
                .wait_for_data(Duration::from_millis(5), &CancelToken::new())
                .unwrap(),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_debug_session_restrictions() {
        let dev = device();
        let _owner = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        let mut debug = RingTransport::open_local_debug(dev, InterfaceKind::Lvds).unwrap();
        assert!(debug.status().is_ok());
        assert!(matches!(
            debug.send(&[0u8; 8]),
            Err(TransportError::NotPermitted(Operation::Send))
        ));
        assert!(matches!(
            debug.advance_consumer(8),
            Err(TransportError::NotPermitted(Operation::Acknowledge))
        ));
        assert!(matches!(
            debug.enable_old_packets(true),
            Err(TransportError::NotPermitted(Operation::EnableOldPackets))
        ));
    }

    #[test]
    fn test_report_mentions_board() {
        let dev = device();
        let mut transport = RingTransport::open_local(dev, InterfaceKind::Lvds).unwrap();
        let mut out = Vec::new();
        transport.report(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("simulator"));
        assert!(text.contains("Session:           Exclusive"));
    }
}
