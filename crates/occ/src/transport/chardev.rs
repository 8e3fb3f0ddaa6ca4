// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Linux character device backend (`/dev/snsocbN`).
//!
//! Commands are `pread`/`pwrite` at fixed offsets, the DMA ring and the BARs
//! are mapped into the process, and waits use `poll` followed by an RX read.
//!
//! ```text
//!   mmap page 0..2   BAR0..BAR2 registers
//!   mmap page 6      RX DMA ring (dq_size bytes)
//! ```

use super::backend::{RingBackend, RxReport};
use super::command::{Command, ReadCommand, CMD_TX};
use super::session::{Operation, Session};
use super::status::{RingStatus, STATUS_RECORD_SIZE};
use super::{CancelToken, Result, TransportError};
use crate::config::WAIT_POLL_SLICE;
use crate::ring::DmaRegion;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Page index of the RX DMA mapping.
const RX_DMA_PAGE: usize = 6;

fn page_size() -> usize {
    // SAFETY: sysconf only reads a system constant.
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps > 0 {
        ps as usize
    } else {
        4096
    }
}

/// Translate a driver errno into a transport error.
fn map_errno(err: io::Error, op: Operation, value: usize) -> TransportError {
    match err.raw_os_error() {
        Some(libc::ECONNRESET) => TransportError::ConnectionReset,
        Some(libc::ENOBUFS) => TransportError::Stalled,
        Some(libc::EBUSY) => TransportError::Busy,
        Some(libc::ETIME | libc::ETIMEDOUT) => TransportError::Timeout,
        Some(libc::EPERM | libc::EACCES) => TransportError::NotPermitted(op),
        Some(libc::EINVAL) => TransportError::InvalidArgument("rejected by driver"),
        Some(libc::ENOMEM) => TransportError::OutOfMemory { requested: value },
        Some(libc::EOVERFLOW) => TransportError::Overflow { value, limit: 0 },
        _ => TransportError::Io(err),
    }
}

/// Backend over the OCC kernel driver.
#[derive(Debug)]
pub struct CharDevice {
    file: File,
    path: PathBuf,
    session: Session,
    ring: DmaRegion,
    bars: [Option<DmaRegion>; 3],
}

impl CharDevice {
    /// Open and map a device.
    ///
    /// Exclusive sessions open with `O_EXCL`, which the driver enforces.
    ///
    /// # Errors
    ///
    /// - [`TransportError::DeviceUnavailable`] when the node is missing
    /// - [`TransportError::Busy`] when another exclusive session exists
    /// - [`TransportError::Io`] when reading the status or mapping fails
    pub fn open(path: &Path, session: Session) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if !session.is_debug() {
            options.custom_flags(libc::O_EXCL);
        }
        let file = options.open(path).map_err(|e| match e.raw_os_error() {
            Some(libc::EBUSY) => TransportError::Busy,
            Some(libc::ENOENT | libc::ENODEV | libc::ENXIO) => {
                TransportError::DeviceUnavailable(path.display().to_string())
            }
            _ => TransportError::Io(e),
        })?;

        let mut record = [0u8; STATUS_RECORD_SIZE];
        read_exact_at(&file, &mut record, ReadCommand::Status.offset())
            .map_err(|e| map_errno(e, Operation::Status, 0))?;
        let status = RingStatus::parse(&record)
            .ok_or_else(|| TransportError::DeviceUnavailable(path.display().to_string()))?;

        let page = page_size();
        let fd = file.as_raw_fd();
        let ring_offset = (RX_DMA_PAGE * page) as libc::off_t;
        let ring = DmaRegion::map(fd, status.dq_size as usize, ring_offset)?;

        let mut bars: [Option<DmaRegion>; 3] = [None, None, None];
        for (i, slot) in bars.iter_mut().enumerate() {
            let len = status.bars[i] as usize;
            if len == 0 {
                continue;
            }
            match DmaRegion::map(fd, len, (i * page) as libc::off_t) {
                Ok(region) => *slot = Some(region),
                Err(e) => log::debug!("[dta] BAR{} not mapped: {}", i, e),
            }
        }

        log::debug!(
            "[dta] opened {} ({:?}), ring {} bytes",
            path.display(),
            session,
            status.dq_size
        );
        Ok(Self {
            file,
            path: path.to_path_buf(),
            session,
            ring,
            bars,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bar(&self, bar: usize, offset: usize) -> Result<&DmaRegion> {
        let region = self
            .bars
            .get(bar)
            .ok_or(TransportError::InvalidArgument("BAR index"))?
            .as_ref()
            .ok_or_else(|| TransportError::DeviceUnavailable(format!("BAR{bar}")))?;
        if offset % 4 != 0 {
            return Err(TransportError::InvalidArgument("unaligned register offset"));
        }
        if offset >= region.len() {
            return Err(TransportError::Overflow {
                value: offset,
                limit: region.len(),
            });
        }
        Ok(region)
    }

    fn poll_readable(&self, slice: Duration) -> Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = i32::try_from(slice.as_millis()).unwrap_or(i32::MAX).max(1);
        loop {
            // SAFETY: poll_target points to our stack-allocated pollfd structure.
            let poll_target = std::ptr::addr_of_mut!(pollfd);
            let res = unsafe { libc::poll(poll_target, 1, timeout_ms) };
            if res == 0 {
                return Ok(false);
            }
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Io(err));
            }
            if pollfd.revents & libc::POLLERR != 0 {
                return Err(TransportError::ConnectionReset);
            }
            return Ok(true);
        }
    }
}

fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let n = file.read_at(buf, offset)?;
    if n != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read: {} of {} bytes", n, buf.len()),
        ));
    }
    Ok(())
}

fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    let n = file.write_at(buf, offset)?;
    if n != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {} of {} bytes", n, buf.len()),
        ));
    }
    Ok(())
}

impl RingBackend for CharDevice {
    fn version(&self) -> Result<(u32, u32)> {
        let mut buf = [0u8; 8];
        read_exact_at(&self.file, &mut buf, ReadCommand::Version.offset())?;
        Ok((
            u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        ))
    }

    fn status(&self) -> Result<RingStatus> {
        let mut record = [0u8; STATUS_RECORD_SIZE];
        read_exact_at(&self.file, &mut record, ReadCommand::Status.offset())
            .map_err(|e| map_errno(e, Operation::Status, 0))?;
        RingStatus::parse(&record).ok_or(TransportError::Closed)
    }

    fn wait_rx(&self, timeout: Duration, cancel: &CancelToken) -> Result<Option<RxReport>> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).min(WAIT_POLL_SLICE)
                }
                None => WAIT_POLL_SLICE,
            };
            if self.poll_readable(slice)? {
                break;
            }
        }

        let mut buf = [0u8; RxReport::SIZE];
        read_exact_at(&self.file, &mut buf, ReadCommand::Rx.offset())
            .map_err(|e| map_errno(e, Operation::Wait, 0))?;
        Ok(RxReport::parse(&buf))
    }

    fn ring(&self) -> &DmaRegion {
        &self.ring
    }

    fn command(&self, command: Command) -> Result<()> {
        if self.session.is_debug() {
            self.session.check(command.operation())?;
        }
        write_all_at(&self.file, &command.encode(), command.offset()).map_err(|e| {
            let value = match command {
                Command::Advance(len) => len as usize,
                _ => 0,
            };
            map_errno(e, command.operation(), value)
        })
    }

    fn transmit(&self, data: &[u8]) -> Result<()> {
        self.session.check(Operation::Send)?;
        write_all_at(&self.file, data, CMD_TX)
            .map_err(|e| map_errno(e, Operation::Send, data.len()))
    }

    fn io_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> Result<usize> {
        let region = self.bar(bar, offset)?;
        let count = out.len().min((region.len() - offset) / 4);
        for (i, word) in out[..count].iter_mut().enumerate() {
            // SAFETY: BAR regions are page-aligned mappings; offset is
            // 4-aligned and offset + 4 * count <= len.
            *word = unsafe { region.read_word(offset + i * 4) };
        }
        Ok(count)
    }

    fn io_write(&self, bar: usize, offset: usize, words: &[u32]) -> Result<usize> {
        let region = self.bar(bar, offset)?;
        let count = words.len().min((region.len() - offset) / 4);
        for (i, word) in words[..count].iter().enumerate() {
            // SAFETY: same bounds as io_read.
            unsafe { region.write_word(offset + i * 4, *word) };
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device() {
        let err = CharDevice::open(Path::new("/dev/snsocb-does-not-exist"), Session::Exclusive)
            .unwrap_err();
        assert!(matches!(err, TransportError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_errno_mapping() {
        let err = |code| io::Error::from_raw_os_error(code);
        assert!(matches!(
            map_errno(err(libc::ECONNRESET), Operation::Wait, 0),
            TransportError::ConnectionReset
        ));
        assert!(matches!(
            map_errno(err(libc::ENOBUFS), Operation::Wait, 0),
            TransportError::Stalled
        ));
        assert!(matches!(
            map_errno(err(libc::EOVERFLOW), Operation::Acknowledge, 64),
            TransportError::Overflow { value: 64, .. }
        ));
        assert!(matches!(
            map_errno(err(libc::EPERM), Operation::Send, 0),
            TransportError::NotPermitted(Operation::Send)
        ));
        assert!(matches!(
            map_errno(err(libc::EIO), Operation::Status, 0),
            TransportError::Io(_)
        ));
    }
}
