// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use occ::config::FrameRules;
use occ::packet::Framer;

fuzz_target!(|data: &[u8]| {
    let mut framer = Framer::new(data, FrameRules::default());
    let mut framed = 0;
    for packet in framer.by_ref() {
        match packet {
            Ok(packet) => framed += packet.len(),
            Err(_) => break,
        }
    }

    // Framed packets and the unframed tail cover the input exactly.
    assert_eq!(framed + framer.remaining().len(), data.len());
});
