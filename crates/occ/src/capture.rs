// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capture loop: wait, analyze, acknowledge.
//!
//! ```text
//!   wait_for_data --Data--> PacketAnalyzer::analyze --> advance_consumer(consumed)
//!        |                          |
//!     TimedOut                 framing error --> dump DMA window --> reset + enable
//! ```
//!
//! Bad packets are written to an optional [`BadPacketLog`]; metrics live in
//! the analyzer and can be shared with a display thread.

use crate::config::{DumpPolicy, DEFAULT_WAIT_TIMEOUT, METRICS_PRINT_INTERVAL};
use crate::feedback::{dump_dma_window, Backlog, BadPacketLog};
use crate::metrics::{MetricsSnapshot, VerificationMetrics};
use crate::packet::{next_frame, BadPacket, PacketAnalyzer, ScanReport};
use crate::transport::{CancelToken, RingStatus, Transport, TransportError, WaitOutcome};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// Capture loop settings.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Longest single wait for data.
    pub wait_timeout: Duration,
    /// Interval of the `[capture]` metrics log line; `None` disables it.
    pub metrics_interval: Option<Duration>,
    /// Reset and re-enable the transport after a framing error. When off,
    /// capture stalls on the corrupt frame until the transport is reset
    /// externally; the stall is counted and dumped once.
    pub reset_on_framing_error: bool,
    /// Resynchronize (instead of failing) when the device was reset underneath.
    pub resync_on_reset: bool,
    pub dump: DumpPolicy,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            metrics_interval: Some(METRICS_PRINT_INTERVAL),
            reset_on_framing_error: true,
            resync_on_reset: true,
            dump: DumpPolicy::default(),
        }
    }
}

/// Counters of one capture run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Waits that returned data.
    pub reads: u64,
    /// Bytes acknowledged.
    pub bytes: u64,
    pub packets: u64,
    pub bad_packets: u64,
    pub framing_errors: u64,
    /// Resets issued by the loop or detected on the transport.
    pub resets: u64,
    /// DMA windows written to disk.
    pub dumps: Vec<PathBuf>,
}

/// What one [`Capture::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Data was analyzed; `consumed` bytes were acknowledged.
    Consumed { consumed: usize, packets: usize, bad: usize },
    /// Framing error; the transport was reset (when enabled).
    Resynced { offset: usize },
    /// The corrupt frame already reported is still at the consumer.
    Stalled,
    /// The device was reset underneath the loop.
    DeviceReset,
    TimedOut,
    Cancelled,
}

/// Errors ending a capture run.
#[derive(Debug)]
pub enum CaptureError {
    Transport(TransportError),
    /// Writing a bad packet record or a dump failed
    Io(io::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::Io(e) => write!(f, "Dump I/O error: {e}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<TransportError> for CaptureError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<io::Error> for CaptureError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Capture loop bound to one transport.
#[derive(Debug)]
pub struct Capture<T: Transport> {
    transport: T,
    analyzer: PacketAnalyzer,
    options: CaptureOptions,
    bad_log: Option<BadPacketLog>,
    summary: CaptureSummary,
    backlog: Backlog,
    stalled: bool,
    last_print: Instant,
    last_snapshot: MetricsSnapshot,
}

impl<T: Transport> Capture<T> {
    /// Wrap an opened transport.
    ///
    /// # Errors
    ///
    /// Fails when the initial status read fails.
    pub fn new(
        mut transport: T,
        analyzer: PacketAnalyzer,
        options: CaptureOptions,
    ) -> Result<Self> {
        transport.status()?;
        let last_snapshot = analyzer.metrics().snapshot();
        Ok(Self {
            transport,
            analyzer,
            options,
            bad_log: None,
            summary: CaptureSummary::default(),
            backlog: Backlog::Normal,
            stalled: false,
            last_print: Instant::now(),
            last_snapshot,
        })
    }

    /// Record every packet failing verification into `log`.
    #[must_use]
    pub fn with_bad_packet_log(mut self, log: BadPacketLog) -> Self {
        self.bad_log = Some(log);
        self
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<VerificationMetrics> {
        self.analyzer.metrics()
    }

    #[must_use]
    pub fn summary(&self) -> &CaptureSummary {
        &self.summary
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport and the final counters.
    pub fn into_parts(self) -> (T, CaptureSummary) {
        (self.transport, self.summary)
    }

    /// Run until `cancel` fires or an unrecoverable error occurs.
    ///
    /// # Errors
    ///
    /// Transport errors other than a resynchronizable reset, and I/O errors
    /// while writing diagnostics.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<CaptureSummary> {
        log::info!("[capture] started");
        loop {
            match self.step(cancel)? {
                Step::Cancelled => break,
                // The view returns at once while the corrupt frame is pending.
                Step::Stalled => thread::sleep(self.options.wait_timeout),
                _ => {}
            }
            self.maybe_print_metrics();
        }
        if let Some(log) = self.bad_log.as_mut() {
            log.flush()?;
        }
        log::info!(
            "[capture] stopped: {} packets, {} bad, {} framing errors, {} resets",
            self.summary.packets,
            self.summary.bad_packets,
            self.summary.framing_errors,
            self.summary.resets
        );
        Ok(self.summary.clone())
    }

    /// One wait plus the processing of whatever it returned.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub fn step(&mut self, cancel: &CancelToken) -> Result<Step> {
        let outcome = match self.transport.wait_for_data(self.options.wait_timeout, cancel) {
            Ok(outcome) => outcome,
            Err(TransportError::ConnectionReset) if self.options.resync_on_reset => {
                log::warn!("[capture] device reset detected, resynchronizing");
                self.restart()?;
                return Ok(Step::DeviceReset);
            }
            Err(e) => return Err(e.into()),
        };
        let range = match outcome {
            WaitOutcome::Data(range) => range,
            WaitOutcome::TimedOut => return Ok(Step::TimedOut),
            WaitOutcome::Cancelled => return Ok(Step::Cancelled),
        };

        self.summary.reads += 1;
        let report = self.analyzer.analyze(range);
        let framing = report.framing_error().map(|e| e.offset());
        if self.stalled && framing == Some(0) {
            return Ok(Step::Stalled);
        }
        self.stalled = false;
        self.summary.packets += report.packets as u64;
        self.summary.bad_packets += report.bad.len() as u64;

        if self.options.dump.dump_bad_packets && !report.bad.is_empty() {
            if let Some(log) = self.bad_log.as_mut() {
                record_bad_packets(log, range, &report.bad, &self.analyzer)?;
            }
        }
        if framing.is_some() {
            if let Some(path) = dump_dma_window(&self.options.dump, range, SystemTime::now())? {
                self.summary.dumps.push(path);
            }
        }

        // Occupancy before this read is acknowledged.
        let status = self.transport.status()?;
        self.update_backlog(&status);

        if let Some(offset) = framing {
            self.summary.framing_errors += 1;
            self.recover(&report)?;
            return Ok(Step::Resynced { offset });
        }

        let step = Step::Consumed {
            consumed: report.consumed,
            packets: report.packets,
            bad: report.bad.len(),
        };
        if report.consumed > 0 {
            self.transport.advance_consumer(report.consumed)?;
            self.summary.bytes += report.consumed as u64;
        }
        Ok(step)
    }

    fn update_backlog(&mut self, status: &RingStatus) {
        let backlog = Backlog::from_status(status);
        if backlog == self.backlog {
            return;
        }
        if backlog == Backlog::Critical {
            log::warn!(
                "[capture] backlog critical: {} of {} bytes",
                status.dq_used,
                status.dq_size
            );
        } else {
            log::debug!("[capture] backlog {:?}", backlog);
        }
        self.backlog = backlog;
    }

    fn recover(&mut self, report: &ScanReport) -> Result<()> {
        if !self.options.reset_on_framing_error {
            // Keep the good prefix; the corrupt frame stays at the consumer.
            if report.consumed > 0 {
                self.transport.advance_consumer(report.consumed)?;
                self.summary.bytes += report.consumed as u64;
            }
            log::warn!("[capture] stalled on framing error until reset");
            self.stalled = true;
            return Ok(());
        }
        log::warn!("[capture] resetting after framing error");
        self.restart()
    }

    /// Reset the transport, re-enable receive and drop carried verifier state.
    fn restart(&mut self) -> Result<()> {
        self.transport.reset()?;
        self.transport.enable_receive(true)?;
        self.analyzer.reset();
        self.stalled = false;
        self.summary.resets += 1;
        Ok(())
    }

    fn maybe_print_metrics(&mut self) {
        let Some(interval) = self.options.metrics_interval else {
            return;
        };
        let elapsed = self.last_print.elapsed();
        if elapsed < interval {
            return;
        }
        let now = self.analyzer.metrics().snapshot();
        if now != self.last_snapshot {
            log::info!("[capture] {}", now);
            log::debug!("[capture]\n{}", now.report(&self.last_snapshot, elapsed));
        }
        self.last_snapshot = now;
        self.last_print = Instant::now();
    }
}

fn record_bad_packets(
    log: &mut BadPacketLog,
    range: &[u8],
    bad: &[BadPacket],
    analyzer: &PacketAnalyzer,
) -> io::Result<()> {
    for entry in bad {
        let Some(bytes) = range.get(entry.offset..entry.offset + entry.len) else {
            continue;
        };
        if let Ok(Some(packet)) = next_frame(bytes, analyzer.rules()) {
            log.record(&packet, &entry.error)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::builder::{build_event_packet, build_rtdl_packet, PacketBuilder};
    use crate::packet::SUBTYPE_EVENT;
    use crate::transport::{BoardCapabilities, InterfaceKind, OccDevice, RingTransport};
    use std::io::Read;

    fn setup() -> (Arc<OccDevice>, Capture<RingTransport>) {
        let dev = Arc::new(OccDevice::simulated().unwrap());
        let transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        let options = CaptureOptions {
            wait_timeout: Duration::from_millis(20),
            metrics_interval: None,
            ..CaptureOptions::default()
        };
        let capture = Capture::new(transport, PacketAnalyzer::default(), options).unwrap();
        (dev, capture)
    }

    #[test]
    fn test_step_consumes_packets() {
        let (dev, mut capture) = setup();
        let cancel = CancelToken::new();
        assert_eq!(capture.step(&cancel).unwrap(), Step::TimedOut);

        let frame = build_event_packet(10);
        dev.receive(&frame).unwrap();
        dev.receive(&build_rtdl_packet()).unwrap();
        let step = capture.step(&cancel).unwrap();
        assert!(matches!(step, Step::Consumed { packets: 2, bad: 0, .. }));
        assert_eq!(dev.status().dq_used, 0);
        assert_eq!(capture.metrics().snapshot().total.good, 2);
        assert_eq!(capture.summary().packets, 2);
    }

    #[test]
    fn test_framing_error_dumps_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, mut capture) = setup();
        capture.options.dump = DumpPolicy {
            dump_bad_packets: false,
            dump_dma_on_framing_error: true,
            dump_dir: Some(dir.path().to_path_buf()),
        };

        let mut corrupt = PacketBuilder::data(SUBTYPE_EVENT).payload(&[0; 8]).build();
        corrupt[12] = 3;
        dev.receive(&build_rtdl_packet()).unwrap();
        dev.receive(&corrupt).unwrap();

        let step = capture.step(&CancelToken::new()).unwrap();
        assert_eq!(
            step,
            Step::Resynced {
                offset: build_rtdl_packet().len()
            }
        );
        let summary = capture.summary();
        assert_eq!((summary.framing_errors, summary.resets), (1, 1));
        assert_eq!(summary.dumps.len(), 1);
        assert_eq!(dev.status().dq_used, 0);

        // The dump holds the good prefix as well as the corrupt frame.
        let mut window = Vec::new();
        flate2::read::GzDecoder::new(std::fs::File::open(&summary.dumps[0]).unwrap())
            .read_to_end(&mut window)
            .unwrap();
        assert_eq!(window.len(), build_rtdl_packet().len() + corrupt.len());
        assert_eq!(&window[..build_rtdl_packet().len()], &build_rtdl_packet()[..]);
        assert_eq!(&window[build_rtdl_packet().len()..], &corrupt[..]);
    }

    #[test]
    fn test_framing_error_without_reset_stalls_once() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, mut capture) = setup();
        capture.options.reset_on_framing_error = false;
        capture.options.dump = DumpPolicy {
            dump_bad_packets: false,
            dump_dma_on_framing_error: true,
            dump_dir: Some(dir.path().to_path_buf()),
        };

        let mut corrupt = PacketBuilder::data(SUBTYPE_EVENT).payload(&[0; 8]).build();
        corrupt[12] = 3;
        dev.receive(&build_rtdl_packet()).unwrap();
        dev.receive(&corrupt).unwrap();

        let cancel = CancelToken::new();
        assert!(matches!(capture.step(&cancel).unwrap(), Step::Resynced { .. }));
        assert_eq!(dev.status().dq_used as usize, corrupt.len());
        for _ in 0..3 {
            assert_eq!(capture.step(&cancel).unwrap(), Step::Stalled);
        }
        let summary = capture.summary();
        assert_eq!((summary.framing_errors, summary.resets), (1, 0));
        assert_eq!(summary.dumps.len(), 1);

        capture.transport_mut().enable_receive(true).unwrap();
        assert_eq!(capture.step(&cancel).unwrap(), Step::TimedOut);
        dev.receive(&build_event_packet(4)).unwrap();
        assert!(matches!(capture.step(&cancel).unwrap(), Step::Consumed { packets: 1, .. }));
    }

    #[test]
    fn test_backlog_follows_ring_occupancy() {
        let dev = Arc::new(OccDevice::new(BoardCapabilities::simulator(), 4096).unwrap());
        let transport = RingTransport::open_local(Arc::clone(&dev), InterfaceKind::Lvds).unwrap();
        let options = CaptureOptions {
            wait_timeout: Duration::from_millis(20),
            metrics_interval: None,
            ..CaptureOptions::default()
        };
        let mut capture = Capture::new(transport, PacketAnalyzer::default(), options).unwrap();
        let cancel = CancelToken::new();
        let frame = build_event_packet(60);

        // Move the consumer near the end so the next batch wraps.
        for _ in 0..6 {
            dev.receive(&frame).unwrap();
        }
        assert!(matches!(capture.step(&cancel).unwrap(), Step::Consumed { packets: 6, .. }));
        assert_eq!(capture.backlog, Backlog::Elevated);

        for _ in 0..8 {
            dev.receive(&frame).unwrap();
        }
        let mut packets = 0;
        while packets < 8 {
            let before = dev.status().dq_used as usize;
            match capture.step(&cancel).unwrap() {
                Step::Consumed { packets: n, .. } => packets += n,
                other => panic!("unexpected {other:?}"),
            }
            if before == 8 * frame.len() {
                assert_eq!(capture.backlog, Backlog::Critical);
            }
        }
        assert_eq!(dev.status().dq_used, 0);
    }

    #[test]
    fn test_bad_packets_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        let (dev, capture) = setup();
        let mut capture = capture.with_bad_packet_log(BadPacketLog::create(&path).unwrap());
        capture.options.dump.dump_bad_packets = true;

        let mut rtdl = build_rtdl_packet();
        rtdl[24 + 7 * 4 + 3] = 0xEE;
        dev.receive(&rtdl).unwrap();
        let step = capture.step(&CancelToken::new()).unwrap();
        assert!(matches!(step, Step::Consumed { bad: 1, .. }));
        drop(capture);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("bad rtdl at "));
        assert!(text.contains("bad index = 7\n"));
    }

    #[test]
    fn test_run_stops_on_cancel() {
        let (dev, mut capture) = setup();
        let cancel = CancelToken::new();
        let stopper = cancel.clone();
        let feeder = thread::spawn(move || {
            for _ in 0..5 {
                dev.receive(&build_event_packet(4)).unwrap();
                thread::sleep(Duration::from_millis(5));
            }
            thread::sleep(Duration::from_millis(50));
            stopper.cancel();
        });
        let summary = capture.run(&cancel).unwrap();
        feeder.join().unwrap();
        assert_eq!(summary.packets, 5);
        assert_eq!(summary.bad_packets, 0);
        assert_eq!(summary.bytes, 5 * build_event_packet(4).len() as u64);
    }

    #[test]
    fn test_device_reset_resyncs() {
        let (dev, mut capture) = setup();
        dev.reset(InterfaceKind::Lvds).unwrap();
        assert_eq!(capture.step(&CancelToken::new()).unwrap(), Step::DeviceReset);
        assert_eq!(capture.summary().resets, 1);

        dev.receive(&build_rtdl_packet()).unwrap();
        let step = capture.step(&CancelToken::new()).unwrap();
        assert!(matches!(step, Step::Consumed { packets: 1, .. }));
    }
}
