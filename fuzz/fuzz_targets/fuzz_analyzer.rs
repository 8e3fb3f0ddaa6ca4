// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use occ::packet::PacketAnalyzer;

fuzz_target!(|data: &[u8]| {
    let mut analyzer = PacketAnalyzer::default();
    let report = analyzer.analyze(data);
    assert!(report.consumed <= data.len());
    assert!(report.bad.len() <= report.packets);

    // Verification state carried over must not break a second pass.
    let _ = analyzer.analyze(&data[report.consumed..]);
});
