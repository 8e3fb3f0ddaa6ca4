// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Verification metrics
//!
//! Per-category packet and byte counters updated by the packet analyzer and
//! read by the display/feedback side.
//!
//! # Categories
//!
//! - `total`: every framed packet
//! - `commands`: command and response packets
//! - `data`: every non-command packet
//! - `rtdl`, `meta`, `event`, `ramp`, `other`: data subtypes
//!
//! Counters only grow; there is no runtime reset.

use crate::packet::{DataKind, PacketKind};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Byte, good and bad counters of one category.
#[derive(Debug, Default)]
pub struct Counter {
    bytes: AtomicU64,
    good: AtomicU64,
    bad: AtomicU64,
}

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            good: AtomicU64::new(0),
            bad: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, bytes: u64, good: bool) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        if good {
            self.good.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bad.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            bytes: self.bytes.load(Ordering::Relaxed),
            good: self.good.load(Ordering::Relaxed),
            bad: self.bad.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of a [`Counter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub bytes: u64,
    pub good: u64,
    pub bad: u64,
}

impl CounterSnapshot {
    /// Good plus bad packets.
    #[inline]
    #[must_use]
    pub const fn packets(&self) -> u64 {
        self.good + self.bad
    }

    /// Packet and byte rates since `earlier`.
    #[must_use]
    pub fn rate_since(&self, earlier: &Self, elapsed: Duration) -> Rate {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Rate::default();
        }
        Rate {
            packets_per_sec: self.packets().saturating_sub(earlier.packets()) as f64 / secs,
            bytes_per_sec: self.bytes.saturating_sub(earlier.bytes) as f64 / secs,
        }
    }
}

/// Counters of all categories.
#[derive(Debug, Default)]
pub struct VerificationMetrics {
    pub total: Counter,
    pub commands: Counter,
    pub data: Counter,
    pub rtdl: Counter,
    pub meta: Counter,
    pub event: Counter,
    pub ramp: Counter,
    pub other: Counter,
}

impl VerificationMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total: Counter::new(),
            commands: Counter::new(),
            data: Counter::new(),
            rtdl: Counter::new(),
            meta: Counter::new(),
            event: Counter::new(),
            ramp: Counter::new(),
            other: Counter::new(),
        }
    }

    /// Account one packet of `bytes` under its category, `data` and `total`.
    pub fn record(&self, kind: PacketKind, bytes: usize, good: bool) {
        let bytes = bytes as u64;
        match kind {
            PacketKind::Command => self.commands.record(bytes, good),
            PacketKind::Data(sub) => {
                self.subtype(sub).record(bytes, good);
                self.data.record(bytes, good);
            }
        }
        self.total.record(bytes, good);
    }

    #[must_use]
    pub fn subtype(&self, kind: DataKind) -> &Counter {
        match kind {
            DataKind::Rtdl => &self.rtdl,
            DataKind::Meta => &self.meta,
            DataKind::Event => &self.event,
            DataKind::Ramp => &self.ramp,
            DataKind::Other => &self.other,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total.snapshot(),
            commands: self.commands.snapshot(),
            data: self.data.snapshot(),
            rtdl: self.rtdl.snapshot(),
            meta: self.meta.snapshot(),
            event: self.event.snapshot(),
            ramp: self.ramp.snapshot(),
            other: self.other.snapshot(),
        }
    }
}

/// Snapshot of all categories (non-atomic, for reporting).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total: CounterSnapshot,
    pub commands: CounterSnapshot,
    pub data: CounterSnapshot,
    pub rtdl: CounterSnapshot,
    pub meta: CounterSnapshot,
    pub event: CounterSnapshot,
    pub ramp: CounterSnapshot,
    pub other: CounterSnapshot,
}

impl MetricsSnapshot {
    /// Rows in display order: label, current counters, rate since `earlier`.
    #[must_use]
    pub fn rows(
        &self,
        earlier: &Self,
        elapsed: Duration,
    ) -> [(&'static str, CounterSnapshot, Rate); 8] {
        let row = |label, now: &CounterSnapshot, then: &CounterSnapshot| {
            (label, *now, now.rate_since(then, elapsed))
        };
        [
            row("Total   ", &self.total, &earlier.total),
            row("Commands", &self.commands, &earlier.commands),
            row("Data    ", &self.data, &earlier.data),
            row("|- RTDL ", &self.rtdl, &earlier.rtdl),
            row("|- Meta ", &self.meta, &earlier.meta),
            row("|- Event", &self.event, &earlier.event),
            row("|- Ramp ", &self.ramp, &earlier.ramp),
            row("|- Other", &self.other, &earlier.other),
        ]
    }

    /// Multi-line report with rates computed against `earlier`.
    #[must_use]
    pub fn report(&self, earlier: &Self, elapsed: Duration) -> String {
        let mut out = String::from("OCC incoming packets metrics\n");
        for (i, (label, counter, rate)) in self.rows(earlier, elapsed).iter().enumerate() {
            let counts = if i < 3 {
                format!("{}: {} packets", label, counter.packets())
            } else {
                format!("{}: {} ({} bad) packets", label, counter.good, counter.bad)
            };
            out.push_str(&format!("{:<40}{}\n", counts, rate));
        }
        out
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OCC Metrics: total={} ({} bad, {} bytes), commands={}, data={}, \
             rtdl={}/{}, meta={}/{}, event={}/{}, ramp={}/{}, other={}",
            self.total.packets(),
            self.total.bad,
            self.total.bytes,
            self.commands.packets(),
            self.data.packets(),
            self.rtdl.good,
            self.rtdl.bad,
            self.meta.good,
            self.meta.bad,
            self.event.good,
            self.event.bad,
            self.ramp.good,
            self.ramp.bad,
            self.other.packets(),
        )
    }
}

/// Packet and byte throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rate {
    pub packets_per_sec: f64,
    pub bytes_per_sec: f64,
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (p, ptag) = scale(self.packets_per_sec);
        let (b, btag) = scale(self.bytes_per_sec);
        write!(f, "[{:6.2}{}p/s {:6.2}{}B/s]", p, ptag, b, btag)
    }
}

/// Scale a rate to the largest decimal prefix it exceeds.
#[must_use]
pub fn scale(value: f64) -> (f64, char) {
    if value > 1e9 {
        (value / 1e9, 'G')
    } else if value > 1e6 {
        (value / 1e6, 'M')
    } else if value > 1e3 {
        (value / 1e3, 'K')
    } else {
        (value, ' ')
    }
}
