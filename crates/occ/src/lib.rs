// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # OCC - neutron detector capture stack
//!
//! Moves neutron-detector data from an OCC capture card into user-space
//! memory, frames and verifies the packets, and keeps the DMA ring flowing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use occ::capture::{Capture, CaptureOptions};
//! use occ::packet::PacketAnalyzer;
//! use occ::transport::{CancelToken, InterfaceKind, OccDevice, RingTransport};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = Arc::new(OccDevice::simulated()?);
//! let transport = RingTransport::open_local(device, InterfaceKind::Lvds)?;
//! let analyzer = PacketAnalyzer::default();
//! let mut capture = Capture::new(transport, analyzer, CaptureOptions::default())?;
//!
//! let cancel = CancelToken::new();
//! let summary = capture.run(&cancel)?;
//! println!("{} packets", summary.packets);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------------+
//! |  capture        wait -> analyze -> acknowledge, dumps, resets   |
//! +-----------------------------------------------------------------+
//! |  packet         framing, classification, verification (PFVE)   |
//! |  metrics        per-category counters and rates                |
//! |  feedback       bad packet log, DMA dumps, backlog             |
//! +-----------------------------------------------------------------+
//! |  transport      device, char device, socket simulator (DTA)    |
//! +-----------------------------------------------------------------+
//! |  emulation      split hardware queues -> unified ring (REL)    |
//! |  ring           circular queue indices and DMA memory (CDQ)    |
//! +-----------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`transport`] - open a device, wait for data, acknowledge (start here)
//! - [`packet`] - frame and verify readable ranges
//! - [`capture`] - the complete loop
//! - [`config`] - constants and runtime configuration

/// Capture loop tying transport, analyzer and diagnostics together.
pub mod capture;
/// Compile-time constants and runtime configuration.
pub mod config;
/// Ring emulation over split hardware queues.
pub mod emulation;
/// Diagnostics: bad packet records, DMA dumps, backlog.
pub mod feedback;
/// Verification counters.
pub mod metrics;
/// Packet framing, classification and verification.
pub mod packet;
/// Circular queue indices, alignment and DMA memory.
pub mod ring;
/// Device transport adapter.
pub mod transport;

pub use capture::{Capture, CaptureError, CaptureOptions, CaptureSummary};
pub use config::OccConfig;
pub use metrics::VerificationMetrics;
pub use packet::{Packet, PacketAnalyzer};
pub use transport::{CancelToken, InterfaceKind, RingTransport, Transport, TransportError};
