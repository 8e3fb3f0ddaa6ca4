// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet framing and verification (PFVE).
//!
//! # Pipeline
//!
//! ```text
//! readable range --Framer--> Packet<'_> --classify--> PacketKind
//!                                |                        |
//!                                +------ Verifier <-------+
//!                                            |
//!                                VerificationMetrics, BadPacket list
//! ```
//!
//! Packets are parsed from byte slices: the header is copied into a
//! [`PacketHeader`] and the payload stays a borrowed slice of the ring.

mod analyzer;
pub mod builder;
mod event;
mod framer;
mod header;
mod verify;

pub use analyzer::{BadPacket, PacketAnalyzer, ScanEnd, ScanReport};
pub use builder::{build_event_packet, build_ramp_packet, build_rtdl_packet, PacketBuilder};
pub use event::{event_count, events, NeutronEvent, EVENT_SIZE, PIXEL_ID_MASK, SPECIAL_PIXEL_BIT};
pub use framer::{next_frame, Framer, FramingError, Packet};
pub use header::{
    DataKind, PacketHeader, PacketKind, DATA_SUBTYPE_MASK, HEADER_SIZE, INFO_COMMAND,
    INFO_PASSTHROUGH, INFO_RESPONSE, PAYLOAD_LENGTH_WORD, SUBTYPE_EVENT, SUBTYPE_META,
    SUBTYPE_RAMP, SUBTYPE_RTDL,
};
pub use verify::{
    verify_event, verify_meta, verify_rtdl, RampTracker, Verifier, VerifyError, VerifyResult,
    RAMP_COUNTER_MASK, RTDL_FIRST_CHECKED, RTDL_REFERENCE, RTDL_WORDS, SKIPPED_EVENTS,
};
