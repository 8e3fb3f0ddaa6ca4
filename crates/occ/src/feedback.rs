// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Diagnostics written when verification or framing goes wrong.
//!
//! - Bad packet log: text records, one per failed packet.
//! - DMA window dump: raw bytes of the readable range at a framing error.
//! - Register dump: named BAR0 registers, one per line.
//!
//! Files whose name ends in `.gz` are gzip compressed.

use crate::config::DumpPolicy;
use crate::packet::{events, DataKind, Packet, PacketKind, VerifyError, SKIPPED_EVENTS};
use crate::transport::RingStatus;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Most RTDL words printed for one packet.
const MAX_DUMP_WORDS: usize = 100;

const MISMATCH: &str = " *** MISMATCH";

fn unix_secs(when: SystemTime) -> u64 {
    when.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn title(kind: PacketKind) -> &'static str {
    match kind {
        PacketKind::Command => "bad command",
        PacketKind::Data(DataKind::Rtdl) => "bad rtdl",
        PacketKind::Data(DataKind::Meta) => "bad meta",
        PacketKind::Data(DataKind::Event) => "bad event data",
        PacketKind::Data(DataKind::Ramp) => "bad ramp",
        PacketKind::Data(DataKind::Other) => "other",
    }
}

/// Text record for one packet that failed verification.
#[must_use]
pub fn format_bad_packet(packet: &Packet<'_>, error: &VerifyError, when: SystemTime) -> String {
    let h = &packet.header;
    let bad_index = error.offset();
    let mut out = String::new();

    let _ = writeln!(out, "{} at {}: {}", title(packet.kind()), unix_secs(when), error);
    let _ = writeln!(
        out,
        "imq source {} dest {:08x} pckinfo {:08x} len {:08x} rsv1 {:08x} rsv2 {:08x}",
        h.source, h.destination, h.info, h.payload_length, h.reserved1, h.reserved2
    );

    let mark = |i: usize| if i == bad_index { MISMATCH } else { "" };
    match packet.kind() {
        PacketKind::Data(DataKind::Meta | DataKind::Event | DataKind::Ramp) => {
            let first = if packet.kind() == PacketKind::Data(DataKind::Meta) {
                SKIPPED_EVENTS
            } else {
                0
            };
            for (i, ev) in events(packet.payload).enumerate().skip(first) {
                let tag = if error.is_event_offset() { mark(i) } else { "" };
                let _ = writeln!(out, "{} tof {:08x} pix {:08x}{}", i, ev.tof, ev.pixel_id, tag);
            }
        }
        _ => {
            for (i, word) in packet.words().take(MAX_DUMP_WORDS).enumerate() {
                let tag = if error.is_event_offset() { "" } else { mark(i) };
                let _ = writeln!(out, "{} {:08x}{}", i, word, tag);
            }
        }
    }

    let _ = writeln!(out, "bad index = {}", bad_index);
    out.push('\n');
    out
}

/// Named register values, right-aligned names.
#[must_use]
pub fn format_registers(registers: &[(&str, u32)]) -> String {
    let mut out = String::new();
    for (name, value) in registers {
        let _ = writeln!(out, "{:>20} 0x{:08x}", name, value);
    }
    out
}

/// Open `path` for writing, gzip compressed when it ends in `.gz`.
pub fn create_dump_file(path: &Path) -> io::Result<Box<dyn Write + Send>> {
    let file = BufWriter::new(File::create(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(file))
    }
}

/// Write `bytes` to `path` (gzip for `.gz`) in one go.
pub fn write_dump(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut out = create_dump_file(path)?;
    out.write_all(bytes)?;
    out.flush()
}

/// Destination of bad packet records.
pub struct BadPacketLog {
    out: Box<dyn Write + Send>,
    path: PathBuf,
    written: u64,
}

impl BadPacketLog {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let out = create_dump_file(&path)?;
        log::info!("[feedback] saving bad packets to {}", path.display());
        Ok(Self {
            out,
            path,
            written: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn record(&mut self, packet: &Packet<'_>, error: &VerifyError) -> io::Result<()> {
        let text = format_bad_packet(packet, error, SystemTime::now());
        self.out.write_all(text.as_bytes())?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl Drop for BadPacketLog {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            log::warn!("[feedback] flushing {} failed: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for BadPacketLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BadPacketLog")
            .field("path", &self.path)
            .field("written", &self.written)
            .finish()
    }
}

/// Persist the DMA window that held a framing error.
///
/// Returns the written path, or `None` when the policy disables DMA dumps.
pub fn dump_dma_window(
    policy: &DumpPolicy,
    window: &[u8],
    when: SystemTime,
) -> io::Result<Option<PathBuf>> {
    if !policy.dump_dma_on_framing_error {
        return Ok(None);
    }
    let name = format!("occ_dma_{}.bin.gz", unix_secs(when));
    let path = match &policy.dump_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    };
    write_dump(&path, window)?;
    log::warn!(
        "[feedback] DMA window ({} bytes) dumped to {}",
        window.len(),
        path.display()
    );
    Ok(Some(path))
}

/// How far the consumer lags behind the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Backlog {
    /// Below half of the ring.
    Normal,
    /// Half the ring or more.
    Elevated,
    /// 90% or more; a stall is imminent.
    Critical,
}

impl Backlog {
    #[must_use]
    pub fn from_usage(used: usize, size: usize) -> Self {
        if size == 0 {
            return Self::Normal;
        }
        let pct = used.saturating_mul(100) / size;
        if pct >= 90 {
            Self::Critical
        } else if pct >= 50 {
            Self::Elevated
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub fn from_status(status: &RingStatus) -> Self {
        Self::from_usage(status.dq_used as usize, status.dq_size as usize)
    }
}
