// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OCC configuration - single source of truth
//!
//! All ring sizes, timing constants and verifier limits live here.
//! **Never hardcode them elsewhere.**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time constants (protocol version, queue sizes)
//! - **Level 2 (Dynamic)**: [`OccConfig`] and its parts, built with `Default`
//!   and overridden from CLI flags or (feature `config-file`) a YAML file.

use crate::ring::AlignUnit;
use std::time::Duration;

// =======================================================================
// Protocol
// =======================================================================

/// Major version of the device protocol this library speaks.
pub const PROTOCOL_VERSION_MAJOR: u32 = 1;

/// Minor version of the device protocol this library speaks.
pub const PROTOCOL_VERSION_MINOR: u32 = 9;

/// Status record layout version (`occ_ver` field of the status record).
pub const STATUS_RECORD_VERSION: u32 = 1;

// =======================================================================
// Ring geometry
// =======================================================================

/// Unified DMA ring size (2 MiB).
pub const DEFAULT_RING_SIZE: usize = 2 * 1024 * 1024;

/// Hardware command sub-queue size (split-queue boards).
pub const COMMAND_QUEUE_SIZE: usize = 64 * 1024;

/// Hardware data sub-queue size (split-queue boards).
pub const DATA_QUEUE_SIZE: usize = 2 * 1024 * 1024;

/// Entries in the hardware message queue.
pub const HW_MESSAGE_QUEUE_ENTRIES: usize = 64;

/// Entries in the software descriptor ring kept by the emulation layer.
pub const SW_MESSAGE_QUEUE_ENTRIES: usize = 4096;

/// Descriptors copied per emulation batch before rescheduling.
pub const EMULATION_BATCH_BUDGET: usize = 32;

/// Initial rollover scratch size used to linearize wrapped data.
pub const INIT_ROLLOVER_SIZE: usize = 8 * 1024;

/// Largest rollover scratch the client grows to (two max-size packets).
pub const MAX_ROLLOVER_SIZE: usize = 128 * 1024;

// =======================================================================
// Transmit path
// =======================================================================

/// TX FIFO length on PCI-X boards.
pub const TX_FIFO_LEN_PCIX: usize = 8192;

/// TX FIFO length on PCIe boards.
pub const TX_FIFO_LEN_PCIE: usize = 32 * 1024;

/// Bytes of the TX FIFO that are never filled (producer == consumer means empty).
pub const TX_FIFO_SLACK: usize = 8;

/// Short spin iterations (1 us each) before escalating to sleeping.
pub const TX_SPIN_ITERATIONS: u32 = 20;

/// Sleep iterations (1 ms each) before giving up on a transmission.
pub const TX_SLEEP_ITERATIONS: u32 = 5000;

/// Settle time after switching the link to the optical transceiver.
pub const OPTICAL_SETTLE_TIME: Duration = Duration::from_millis(100);

/// Longest uninterrupted sleep of a receive wait; cancellation is checked
/// between slices.
pub const WAIT_POLL_SLICE: Duration = Duration::from_millis(10);

// =======================================================================
// Packet verification
// =======================================================================

/// Largest payload the framer accepts before declaring a framing error.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// Maximum time-of-flight value of a valid neutron event.
pub const MAX_TOF: u32 = 0x32000;

/// Maximum pixel id of a regular detector pixel.
pub const MAX_PIXEL_ID: u32 = 3023;

/// Maximum events in a metadata packet.
pub const MAX_META_EVENTS: usize = 500;

/// Maximum events in a neutron event or ramp packet.
pub const MAX_EVENTS_PER_PACKET: usize = 1800;

// =======================================================================
// Capture loop
// =======================================================================

/// Default wait timeout of the capture loop.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Minimum interval between two metrics lines.
pub const METRICS_PRINT_INTERVAL: Duration = Duration::from_secs(1);

// =======================================================================
// Runtime configuration
// =======================================================================

/// Timing of the transmit completion wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct TxTiming {
    /// Iterations of the short busy-wait phase.
    pub spin_iterations: u32,
    /// Delay between busy-wait checks.
    pub spin_delay: Duration,
    /// Iterations of the sleeping phase.
    pub sleep_iterations: u32,
    /// Delay between sleeping checks.
    pub sleep_delay: Duration,
}

impl Default for TxTiming {
    fn default() -> Self {
        Self {
            spin_iterations: TX_SPIN_ITERATIONS,
            spin_delay: Duration::from_micros(1),
            sleep_iterations: TX_SLEEP_ITERATIONS,
            sleep_delay: Duration::from_millis(1),
        }
    }
}

impl TxTiming {
    /// Worst-case time before a transmission is declared timed out.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.spin_delay * self.spin_iterations + self.sleep_delay * self.sleep_iterations
    }
}

/// Rollover scratch sizing of the transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct RolloverConfig {
    /// Initial scratch size in bytes.
    pub initial: usize,
    /// Upper bound the scratch may grow to.
    pub max: usize,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            initial: INIT_ROLLOVER_SIZE,
            max: MAX_ROLLOVER_SIZE,
        }
    }
}

/// Bounds applied by the neutron event verifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct VerifyLimits {
    pub max_tof: u32,
    pub max_pixel_id: u32,
    pub max_meta_events: usize,
    pub max_events_per_packet: usize,
}

impl Default for VerifyLimits {
    fn default() -> Self {
        Self {
            max_tof: MAX_TOF,
            max_pixel_id: MAX_PIXEL_ID,
            max_meta_events: MAX_META_EVENTS,
            max_events_per_packet: MAX_EVENTS_PER_PACKET,
        }
    }
}

/// Framing rules of the packet scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct FrameRules {
    /// Alignment every frame length must honour.
    pub unit: AlignUnit,
    /// Largest accepted frame, header included.
    pub max_frame_len: usize,
}

impl Default for FrameRules {
    fn default() -> Self {
        Self {
            unit: AlignUnit::Eight,
            max_frame_len: MAX_PAYLOAD_LEN + crate::packet::HEADER_SIZE,
        }
    }
}

/// What the capture loop writes out when something goes wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct DumpPolicy {
    /// Write a text dump of every packet failing verification.
    pub dump_bad_packets: bool,
    /// Persist the whole DMA window when a framing error is detected.
    pub dump_dma_on_framing_error: bool,
    /// Directory receiving dump files (current directory when `None`).
    pub dump_dir: Option<std::path::PathBuf>,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct OccConfig {
    pub tx: TxTiming,
    pub rollover: RolloverConfig,
    pub limits: VerifyLimits,
    pub framing: FrameRules,
    pub dump: DumpPolicy,
}

#[cfg(feature = "config-file")]
impl OccConfig {
    /// Load a configuration from a YAML file. Missing keys keep their defaults.
    ///
    /// # Example YAML
    ///
    /// ```yaml
    /// framing:
    ///   unit: Eight
    ///   max_frame_len: 65560
    /// dump:
    ///   dump_bad_packets: true
    /// ```
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, String> {
        let yaml_content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read YAML file: {}", e))?;
        Self::parse_yaml(&yaml_content)
    }

    /// Parse YAML content.
    pub fn parse_yaml(yaml_content: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml_content).map_err(|e| format!("Failed to parse YAML: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_budget_matches_constants() {
        let timing = TxTiming::default();
        assert_eq!(
            timing.budget(),
            Duration::from_micros(20) + Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_default_frame_rules() {
        let rules = FrameRules::default();
        assert_eq!(rules.unit.bytes(), 8);
        assert_eq!(rules.max_frame_len, 64 * 1024 + 24);
    }

    #[test]
    fn test_rollover_bounds_are_ordered() {
        let rollover = RolloverConfig::default();
        assert!(rollover.initial <= rollover.max);
        assert!(rollover.max.is_power_of_two());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_parse_yaml_partial() {
        let cfg = OccConfig::parse_yaml("dump:\n  dump_bad_packets: true\n").unwrap();
        assert!(cfg.dump.dump_bad_packets);
        assert_eq!(cfg.limits, VerifyLimits::default());
    }
}
