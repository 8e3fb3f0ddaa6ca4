// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame, classify, verify and account one readable range.

use super::framer::{FramingError, Framer};
use super::header::PacketKind;
use super::verify::{VerifyError, Verifier};
use crate::config::{FrameRules, VerifyLimits};
use crate::metrics::VerificationMetrics;
use std::sync::Arc;

/// A packet that failed verification, located inside the scanned range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadPacket {
    pub offset: usize,
    pub len: usize,
    pub kind: PacketKind,
    pub error: VerifyError,
}

/// Why the scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Remaining bytes hold no complete frame; keep them for the next read.
    NeedMore { remaining: usize },
    /// Corrupt header; nothing past `consumed` can be trusted until reset.
    Framing(FramingError),
}

/// Outcome of [`PacketAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Bytes covered by complete packets; safe to acknowledge.
    pub consumed: usize,
    /// Packets framed in this range.
    pub packets: usize,
    pub bad: Vec<BadPacket>,
    pub end: ScanEnd,
}

impl ScanReport {
    #[must_use]
    pub const fn framing_error(&self) -> Option<FramingError> {
        match self.end {
            ScanEnd::Framing(e) => Some(e),
            ScanEnd::NeedMore { .. } => None,
        }
    }
}

/// Packet scanner with carried verification state and shared metrics.
#[derive(Debug)]
pub struct PacketAnalyzer {
    rules: FrameRules,
    verifier: Verifier,
    metrics: Arc<VerificationMetrics>,
}

impl Default for PacketAnalyzer {
    fn default() -> Self {
        Self::new(FrameRules::default(), VerifyLimits::default())
    }
}

impl PacketAnalyzer {
    #[must_use]
    pub fn new(rules: FrameRules, limits: VerifyLimits) -> Self {
        Self::with_metrics(rules, limits, Arc::new(VerificationMetrics::new()))
    }

    /// Account into an existing metrics instance (shared with a display thread).
    #[must_use]
    pub fn with_metrics(
        rules: FrameRules,
        limits: VerifyLimits,
        metrics: Arc<VerificationMetrics>,
    ) -> Self {
        Self {
            rules,
            verifier: Verifier::new(limits),
            metrics,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<VerificationMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn rules(&self) -> &FrameRules {
        &self.rules
    }

    /// Drop carried verification state after the ring was reset.
    pub fn reset(&mut self) {
        self.verifier.reset();
    }

    /// Scan `range` packet by packet.
    ///
    /// Verification failures are recorded and scanning continues with the
    /// next frame. Only a framing error stops the scan early.
    pub fn analyze(&mut self, range: &[u8]) -> ScanReport {
        let mut framer = Framer::new(range, self.rules);
        let mut packets = 0;
        let mut bad = Vec::new();
        let mut offset = 0;

        for item in framer.by_ref() {
            let Ok(packet) = item else {
                break;
            };
            let kind = packet.kind();
            let result = self.verifier.verify(&packet);
            self.metrics.record(kind, packet.len(), result.is_ok());
            if let Err(error) = result {
                log::debug!(
                    "[pfve] bad {:?} packet at offset {}: {}",
                    kind,
                    offset,
                    error
                );
                bad.push(BadPacket {
                    offset,
                    len: packet.len(),
                    kind,
                    error,
                });
            }
            packets += 1;
            offset += packet.len();
        }

        let end = match framer.error() {
            Some(e) => {
                log::warn!("[pfve] framing error: {}", e);
                ScanEnd::Framing(e)
            }
            None => ScanEnd::NeedMore {
                remaining: framer.remaining().len(),
            },
        };

        ScanReport {
            consumed: framer.consumed(),
            packets,
            bad,
            end,
        }
    }
}
