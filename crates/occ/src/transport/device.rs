// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process model of an OCC board and its driver.
//!
//! [`OccDevice`] owns the unified DMA ring, the split hardware queues of
//! older boards, a register file for the three BARs and the transmit link.
//! Frames arriving from the link are written by the producer role; the
//! consumer side (a [`super::LocalBackend`]) waits on the producer index and
//! acknowledges consumed bytes.
//!
//! # Locking
//!
//! ```text
//!   producer (RingEmulator)  ->  state (RxState)  ->  bars[n]
//! ```
//!
//! Locks are always taken in that order. The producer snapshots the index
//! under `state`, writes ring memory with no lock held, then publishes under
//! `state` again only if no reset happened in between (generation check).

use super::backend::RxReport;
use super::capability::BoardCapabilities;
use super::session::Session;
use super::status::{RingStatus, StatusFlags};
use super::{CancelToken, InterfaceKind, Result, TransportError};
use crate::config::{
    TxTiming, DEFAULT_RING_SIZE, OPTICAL_SETTLE_TIME, PROTOCOL_VERSION_MAJOR,
    PROTOCOL_VERSION_MINOR, STATUS_RECORD_VERSION, WAIT_POLL_SLICE,
};
use crate::emulation::{
    BatchOutcome, HardwareQueues, PendingMessageDescriptor, RingEmulator, DESCRIPTOR_SIZE,
};
use crate::ring::{align_up, AlignUnit, DmaRegion, ProducerCursor, RingIndex, RingSink};
use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Register map of BAR0 (byte offsets) and CONFIG bits.
pub mod regs {
    pub const VERSION: usize = 0x000;
    pub const CONFIG: usize = 0x004;
    pub const STATUS: usize = 0x008;
    pub const MODULE_ID: usize = 0x014;
    pub const SERNO_LO: usize = 0x018;
    pub const SERNO_HI: usize = 0x01c;
    pub const DQ_ADDR0: usize = 0x070;
    pub const DQ_ADDR1: usize = 0x074;
    pub const DQ_CONS_IDX: usize = 0x080;
    pub const DQ_PROD_IDX: usize = 0x084;
    pub const DQ_LENGTH: usize = 0x088;
    pub const TXBUF_CONS_IDX: usize = 0x090;
    pub const TXBUF_PROD_IDX: usize = 0x094;
    pub const TXBUF_LENGTH: usize = 0x098;
    pub const INTERRUPT_STATUS: usize = 0x0c0;
    pub const INTERRUPT_ENABLE: usize = 0x0c4;
    pub const DATE_CODE: usize = 0x100;
    pub const ERROR_CRC_COUNTER: usize = 0x180;
    pub const ERROR_LENGTH_COUNTER: usize = 0x184;
    pub const ERROR_FRAME_COUNTER: usize = 0x188;
    pub const RX_RATE: usize = 0x18c;
    pub const PCI_COMMAND_REG: usize = 0x300;
    pub const PCI_DEVICE_CNTL: usize = 0x304;
    pub const PCI_DEVICE_CNTL2: usize = 0x308;
    pub const PCI_DEVICE_CNTL3: usize = 0x30c;
    pub const SYSMON_TEMP: usize = 0x310;
    pub const SYSMON_VCCINT: usize = 0x314;
    pub const SYSMON_VCCAUX: usize = 0x318;
    pub const HW_PKTSIM_1: usize = 0x380;
    pub const HW_PKTSIM_2: usize = 0x384;

    pub const CONF_TX_ENABLE: u32 = 0x0000_0001;
    pub const CONF_RX_ENABLE: u32 = 0x0000_0002;
    pub const CONF_SELECT_OPTICAL: u32 = 0x0000_0008;
    pub const CONF_OPTICAL_ENABLE: u32 = 0x0000_0010;
    /// PCIe onboard packet generator.
    pub const CONF_PKTSIM_ENABLE: u32 = 0x0000_0180;
    pub const CONF_ERR_PKTS_ENABLE: u32 = 0x0004_0000;
    pub const CONF_OLD_PKTS_DISABLE: u32 = 0x0008_0000;
    pub const CONF_ERRORS_RESET: u32 = 0x0400_0000;
    pub const CONF_RESET: u32 = 0x8000_0000;

    /// Size of each BAR in bytes.
    pub const BAR_LEN: usize = 4096;

    /// Registers shown by register dumps, in display order.
    pub const NAMED: &[(&str, usize)] = &[
        ("VERSION", VERSION),
        ("CONFIG", CONFIG),
        ("STATUS_0", STATUS),
        ("MODULE_ID", MODULE_ID),
        ("DQ_ADDR0", DQ_ADDR0),
        ("DQ_ADDR1", DQ_ADDR1),
        ("DQ_CONS_IDX", DQ_CONS_IDX),
        ("DQ_PROD_IDX", DQ_PROD_IDX),
        ("DQ_LENGTH", DQ_LENGTH),
        ("TXBUF_CONS_IDX", TXBUF_CONS_IDX),
        ("TXBUF_PROD_IDX", TXBUF_PROD_IDX),
        ("TXBUF_LENGTH", TXBUF_LENGTH),
        ("INTERRUPT_STATUS", INTERRUPT_STATUS),
        ("INTERRUPT_ENABLE", INTERRUPT_ENABLE),
        ("DATE_CODE", DATE_CODE),
        ("PCI_COMMAND_REG", PCI_COMMAND_REG),
        ("PCI_DEVICE_CNTL", PCI_DEVICE_CNTL),
        ("PCI_DEVICE_CNTL2", PCI_DEVICE_CNTL2),
        ("PCI_DEVICE_CNTL3", PCI_DEVICE_CNTL3),
        ("SYSMON_TEMP", SYSMON_TEMP),
        ("SYSMON_VCCINT", SYSMON_VCCINT),
        ("SYSMON_VCCAUX", SYSMON_VCCAUX),
        ("HW_PKTSIM_1", HW_PKTSIM_1),
        ("HW_PKTSIM_2", HW_PKTSIM_2),
    ];
}

/// Firmware build date reported by the model (BCD `0xVVYYMMDD`).
const MODEL_FIRMWARE_DATE: u32 = 0x0124_0611;

/// Sysmon readings of an idle board (~34 C, 1.0 V, 2.5 V).
const MODEL_SYSMON: [(usize, u32); 3] = [
    (regs::SYSMON_TEMP, 40_000),
    (regs::SYSMON_VCCINT, 21_845),
    (regs::SYSMON_VCCAUX, 54_613),
];

/// Transmit side of the physical link.
pub trait LinkPort: Send + Sync {
    /// Start transmitting one frame, already padded to 8 bytes.
    fn submit(&self, frame: &[u8]);

    /// The last submitted frame has left the TX FIFO.
    fn tx_done(&self) -> bool;
}

/// Link that completes every transmission at once and keeps a copy.
#[derive(Debug, Default)]
pub struct LoopbackLink {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl LoopbackLink {
    /// Frames submitted since the last call.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl LinkPort for LoopbackLink {
    fn submit(&self, frame: &[u8]) {
        self.sent.lock().push(frame.to_vec());
    }

    fn tx_done(&self) -> bool {
        true
    }
}

/// Link whose transmitter never drains.
#[derive(Debug, Default, Clone, Copy)]
pub struct StuckLink;

impl LinkPort for StuckLink {
    fn submit(&self, _frame: &[u8]) {}

    fn tx_done(&self) -> bool {
        false
    }
}

/// Receive-side driver state, guarded by `OccDevice::state`.
#[derive(Debug)]
struct RxState {
    index: RingIndex,
    /// Bumped at the start of every reset; producers and waiters compare it.
    generation: u64,
    reset_in_progress: bool,
    reset_occurred: bool,
    stalled: bool,
    fifo_overflow: bool,
    rx_enabled: bool,
    err_pkts: bool,
    old_pkts: bool,
    interface: InterfaceKind,
    /// Split hardware queues are merged by the ring emulator.
    emulate: bool,
}

impl RxState {
    fn config_word(&self) -> u32 {
        let mut conf = regs::CONF_TX_ENABLE;
        if self.rx_enabled {
            conf |= regs::CONF_RX_ENABLE;
        }
        if self.interface == InterfaceKind::Optical {
            conf |= regs::CONF_SELECT_OPTICAL | regs::CONF_OPTICAL_ENABLE;
        }
        if self.err_pkts {
            conf |= regs::CONF_ERR_PKTS_ENABLE;
        }
        if !self.old_pkts {
            conf |= regs::CONF_OLD_PKTS_DISABLE;
        }
        conf
    }
}

/// Board plus driver, shared between the link side and consumer sessions.
pub struct OccDevice {
    caps: BoardCapabilities,
    ring: DmaRegion,
    state: Mutex<RxState>,
    rx_ready: Condvar,
    /// Producer role; also owns the emulator of split-queue boards.
    producer: Mutex<RingEmulator>,
    hw: HardwareQueues,
    tx_lock: Mutex<()>,
    bars: [Mutex<Vec<u32>>; 3],
    link: Arc<dyn LinkPort>,
    exclusive: AtomicBool,
    tx_timing: TxTiming,
    optical_settle: Duration,
    optical_present: bool,
    version: (u32, u32),
    serial: u64,
}

impl OccDevice {
    /// Create a device with a unified ring of `ring_size` bytes, freshly
    /// reset on the LVDS interface.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidArgument`] when `ring_size` is not a usable
    /// multiple of 4.
    pub fn new(caps: BoardCapabilities, ring_size: usize) -> Result<Self> {
        let index = RingIndex::new(ring_size, AlignUnit::Four)
            .map_err(|_| TransportError::InvalidArgument("ring size"))?;
        let state = RxState {
            index,
            generation: 0,
            reset_in_progress: false,
            reset_occurred: false,
            stalled: false,
            fifo_overflow: false,
            rx_enabled: !caps.late_rx_enable,
            err_pkts: false,
            old_pkts: false,
            interface: InterfaceKind::Lvds,
            emulate: false,
        };
        let serial = 0x0a5a_0000_0000_0000 | u64::from(caps.firmware_ver);
        let device = Self {
            caps,
            ring: DmaRegion::alloc(ring_size),
            rx_ready: Condvar::new(),
            producer: Mutex::new(RingEmulator::default()),
            hw: HardwareQueues::default(),
            tx_lock: Mutex::new(()),
            bars: [
                Mutex::new(vec![0; regs::BAR_LEN / 4]),
                Mutex::new(vec![0; regs::BAR_LEN / 4]),
                Mutex::new(vec![0; regs::BAR_LEN / 4]),
            ],
            link: Arc::new(LoopbackLink::default()),
            exclusive: AtomicBool::new(false),
            tx_timing: TxTiming::default(),
            optical_settle: OPTICAL_SETTLE_TIME,
            optical_present: true,
            version: (PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR),
            serial,
            state: Mutex::new(state),
        };
        device.init_registers(ring_size);
        log::debug!(
            "[dta] {} board fw 0x{:08x}, ring {} bytes",
            caps.board,
            caps.firmware_ver,
            ring_size
        );
        Ok(device)
    }

    /// Simulator board with the default ring size.
    ///
    /// # Errors
    ///
    /// Never fails with the default geometry; see [`Self::new`].
    pub fn simulated() -> Result<Self> {
        Self::new(BoardCapabilities::simulator(), DEFAULT_RING_SIZE)
    }

    #[must_use]
    pub fn with_link(mut self, link: Arc<dyn LinkPort>) -> Self {
        self.link = link;
        self
    }

    #[must_use]
    pub fn with_tx_timing(mut self, timing: TxTiming) -> Self {
        self.tx_timing = timing;
        self
    }

    #[must_use]
    pub fn with_optical_settle(mut self, settle: Duration) -> Self {
        self.optical_settle = settle;
        self
    }

    /// Whether an optical transceiver is plugged in.
    #[must_use]
    pub fn with_optical_present(mut self, present: bool) -> Self {
        self.optical_present = present;
        self
    }

    /// Protocol version reported to clients.
    #[must_use]
    pub fn with_protocol_version(mut self, major: u32, minor: u32) -> Self {
        self.version = (major, minor);
        self
    }

    fn init_registers(&self, ring_size: usize) {
        let conf = self.state.lock().config_word();
        let mut bar0 = self.bars[0].lock();
        bar0[regs::VERSION / 4] = self.caps.firmware_ver;
        bar0[regs::MODULE_ID / 4] = self.caps.board.raw();
        bar0[regs::SERNO_LO / 4] = self.serial as u32;
        bar0[regs::SERNO_HI / 4] = (self.serial >> 32) as u32;
        bar0[regs::DQ_LENGTH / 4] = ring_size as u32;
        bar0[regs::TXBUF_LENGTH / 4] = self.caps.tx_fifo_len as u32;
        bar0[regs::DATE_CODE / 4] = MODEL_FIRMWARE_DATE;
        for (reg, value) in MODEL_SYSMON {
            bar0[reg / 4] = value;
        }
        bar0[regs::CONFIG / 4] = conf;
    }

    fn write_reg(&self, reg: usize, value: u32) {
        self.bars[0].lock()[reg / 4] = value;
    }

    fn read_reg(&self, reg: usize) -> u32 {
        self.bars[0].lock()[reg / 4]
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &BoardCapabilities {
        &self.caps
    }

    /// Memory of the unified ring.
    #[inline]
    #[must_use]
    pub fn ring(&self) -> &DmaRegion {
        &self.ring
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Hardware sub-queues of split-queue boards.
    #[inline]
    #[must_use]
    pub fn hardware(&self) -> &HardwareQueues {
        &self.hw
    }

    #[must_use]
    pub fn interface(&self) -> InterfaceKind {
        self.state.lock().interface
    }

    /// Protocol version `(major, minor)`.
    #[must_use]
    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    // ---------------------------------------------------------------
    // Sessions
    // ---------------------------------------------------------------

    /// Register a session.
    ///
    /// # Errors
    ///
    /// [`TransportError::Busy`] when an exclusive session is already open.
    pub fn acquire(&self, session: Session) -> Result<()> {
        if session.is_debug() {
            return Ok(());
        }
        self.exclusive
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| TransportError::Busy)
    }

    pub fn release(&self, session: Session) {
        if !session.is_debug() {
            self.exclusive.store(false, Ordering::Release);
        }
    }

    // ---------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------

    fn flags(&self, st: &RxState) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::OPTICAL_PRESENT, self.optical_present);
        flags.set(
            StatusFlags::MODE_OPTICAL,
            st.interface == InterfaceKind::Optical,
        );
        flags.set(StatusFlags::RESET_OCCURRED, st.reset_occurred);
        flags.set(StatusFlags::DMA_STALLED, st.stalled);
        flags.set(StatusFlags::RX_MSG, !st.index.is_empty());
        flags.set(StatusFlags::RX_ENABLED, st.rx_enabled);
        flags.set(StatusFlags::ERR_PKTS_ENABLED, st.err_pkts);
        flags.set(StatusFlags::FIFO_OVERFLOW, st.fifo_overflow);
        flags
    }

    /// Status record; clears the reset-occurred flag.
    pub fn status(&self) -> RingStatus {
        let mut st = self.state.lock();
        let flags = self.flags(&st);
        st.reset_occurred = false;
        let bar0 = self.bars[0].lock();
        let reg = |r: usize| bar0[r / 4];
        RingStatus {
            occ_ver: STATUS_RECORD_VERSION,
            board_type: self.caps.board.raw(),
            hardware_ver: 1,
            firmware_ver: self.caps.firmware_ver,
            firmware_date: reg(regs::DATE_CODE),
            fpga_serial: self.serial,
            status: flags,
            dq_size: st.index.capacity() as u32,
            dq_used: st.index.used() as u32,
            rx_rate: reg(regs::RX_RATE),
            bars: [regs::BAR_LEN as u32; 3],
            err_crc: reg(regs::ERROR_CRC_COUNTER),
            err_length: reg(regs::ERROR_LENGTH_COUNTER),
            err_frame: reg(regs::ERROR_FRAME_COUNTER),
            fpga_temp: reg(regs::SYSMON_TEMP),
            fpga_core_volt: reg(regs::SYSMON_VCCINT),
            fpga_aux_volt: reg(regs::SYSMON_VCCAUX),
        }
    }

    // ---------------------------------------------------------------
    // Consumer side
    // ---------------------------------------------------------------

    /// Block until data is present or the device state changes.
    ///
    /// Returns `None` on timeout or cancellation.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectionReset`] when a reset starts while waiting.
    pub fn wait_rx(&self, timeout: Duration, cancel: &CancelToken) -> Result<Option<RxReport>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut st = self.state.lock();
        let generation = st.generation;
        loop {
            if st.reset_in_progress || st.generation != generation {
                return Err(TransportError::ConnectionReset);
            }
            if st.stalled || st.reset_occurred || st.fifo_overflow || !st.index.is_empty() {
                return Ok(Some(RxReport {
                    producer: st.index.producer() as u32,
                    status: self.flags(&st),
                }));
            }
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
            self.rx_ready.wait_for(&mut st, slice);
        }
    }

    /// Release `len` bytes at the consumer index (rounded up to 4).
    ///
    /// # Errors
    ///
    /// - [`TransportError::ConnectionReset`] while a reset is in progress
    /// - [`TransportError::Overflow`] when the advance passes the producer
    pub fn advance(&self, len: u32) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut st = self.state.lock();
        if st.reset_in_progress {
            return Err(TransportError::ConnectionReset);
        }
        let cons = st
            .index
            .check_advance(len as usize)
            .map_err(|_| TransportError::Overflow {
                value: len as usize,
                limit: st.index.used(),
            })?;
        st.index.set_consumer(cons);
        self.write_reg(regs::DQ_CONS_IDX, cons as u32);
        let service = st.emulate && !st.stalled;
        drop(st);

        if service {
            self.service_rx();
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------

    /// Reinitialize the board and select `interface`.
    ///
    /// Every blocked waiter and transmitter returns
    /// [`TransportError::ConnectionReset`].
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidArgument`] for [`InterfaceKind::Socket`].
    pub fn reset(&self, interface: InterfaceKind) -> Result<()> {
        let interface = match interface {
            InterfaceKind::Socket => {
                return Err(TransportError::InvalidArgument("socket interface on a device"))
            }
            InterfaceKind::Optical if !self.optical_present => {
                log::warn!("[dta] no optical transceiver, falling back to LVDS");
                InterfaceKind::Lvds
            }
            other => other,
        };

        {
            let mut st = self.state.lock();
            st.reset_in_progress = true;
            st.generation = st.generation.wrapping_add(1);
        }
        self.rx_ready.notify_all();

        // Wait for an in-flight producer to finish with ring memory.
        let mut emulator = self.producer.lock();
        self.write_reg(regs::CONFIG, 0);
        thread::sleep(Duration::from_millis(1));
        let mut conf = regs::CONF_RESET;
        if self.caps.reset_errcnt {
            conf |= regs::CONF_ERRORS_RESET;
            for reg in [
                regs::ERROR_CRC_COUNTER,
                regs::ERROR_LENGTH_COUNTER,
                regs::ERROR_FRAME_COUNTER,
            ] {
                self.write_reg(reg, 0);
            }
        }
        self.write_reg(regs::CONFIG, conf);

        self.hw.reset();
        emulator.reset(&self.hw);
        let emulate = interface == InterfaceKind::Optical && self.caps.split_queues;

        {
            let mut st = self.state.lock();
            st.index.reset();
            st.stalled = false;
            st.fifo_overflow = false;
            st.err_pkts = false;
            st.interface = interface;
            st.emulate = emulate;
            st.rx_enabled = !self.caps.late_rx_enable;
            st.reset_occurred = true;
            st.reset_in_progress = false;
            self.write_reg(regs::DQ_CONS_IDX, 0);
            self.write_reg(regs::DQ_PROD_IDX, 0);
            self.write_reg(regs::CONFIG, st.config_word());
        }
        drop(emulator);

        if interface == InterfaceKind::Optical && !self.optical_settle.is_zero() {
            thread::sleep(self.optical_settle);
        }
        log::debug!(
            "[dta] reset on {} (emulation {})",
            interface,
            if emulate { "on" } else { "off" }
        );
        self.rx_ready.notify_all();
        Ok(())
    }

    /// # Errors
    ///
    /// [`TransportError::InvalidArgument`] when disabling on a board whose
    /// receiver cannot be turned off.
    pub fn enable_rx(&self, enable: bool) -> Result<()> {
        let mut st = self.state.lock();
        if self.caps.late_rx_enable {
            st.rx_enabled = enable;
        } else if !enable {
            return Err(TransportError::InvalidArgument(
                "receiver cannot be disabled on this board",
            ));
        }
        self.write_reg(regs::CONFIG, st.config_word());
        Ok(())
    }

    pub fn enable_error_packets(&self, enable: bool) {
        let mut st = self.state.lock();
        st.err_pkts = enable;
        self.write_reg(regs::CONFIG, st.config_word());
    }

    pub fn enable_old_packets(&self, enable: bool) {
        let mut st = self.state.lock();
        st.old_pkts = enable;
        self.write_reg(regs::CONFIG, st.config_word());
    }

    // ---------------------------------------------------------------
    // Transmit
    // ---------------------------------------------------------------

    /// Transmit one frame and wait for the TX FIFO to drain.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidArgument`] for an empty, unaligned or
    ///   oversized frame
    /// - [`TransportError::ConnectionReset`] when a reset interrupts the wait
    /// - [`TransportError::Timeout`] when the link never completes
    pub fn transmit(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() % 4 != 0 {
            return Err(TransportError::InvalidArgument(
                "transmit length must be a non-zero multiple of 4",
            ));
        }
        if data.len() > self.caps.max_send_len() {
            return Err(TransportError::InvalidArgument("transmit larger than TX FIFO"));
        }

        let _tx = self.tx_lock.lock();
        let generation = {
            let st = self.state.lock();
            if st.reset_in_progress {
                return Err(TransportError::ConnectionReset);
            }
            st.generation
        };

        let mut frame = data.to_vec();
        frame.resize(align_up(data.len(), 8), 0);
        self.link.submit(&frame);
        let prod = (self.read_reg(regs::TXBUF_PROD_IDX) as usize + frame.len())
            % self.caps.tx_fifo_len;
        self.write_reg(regs::TXBUF_PROD_IDX, prod as u32);

        let timing = self.tx_timing;
        for _ in 0..timing.spin_iterations {
            if self.tx_complete(generation)? {
                return Ok(());
            }
            spin_for(timing.spin_delay);
        }
        for _ in 0..timing.sleep_iterations {
            if self.tx_complete(generation)? {
                return Ok(());
            }
            thread::sleep(timing.sleep_delay);
        }
        if self.tx_complete(generation)? {
            return Ok(());
        }
        log::warn!("[dta] transmit of {} bytes timed out", data.len());
        Err(TransportError::Timeout)
    }

    fn tx_complete(&self, generation: u64) -> Result<bool> {
        {
            let st = self.state.lock();
            if st.reset_in_progress || st.generation != generation {
                return Err(TransportError::ConnectionReset);
            }
        }
        if self.link.tx_done() {
            self.write_reg(regs::TXBUF_CONS_IDX, self.read_reg(regs::TXBUF_PROD_IDX));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ---------------------------------------------------------------
    // Producer side
    // ---------------------------------------------------------------

    /// Deliver one frame from the link, header included.
    ///
    /// Returns the bytes made visible to the consumer; `0` when the receiver
    /// is disabled or a reset discarded the frame.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Stalled`] when the ring is full (or already stalled)
    /// - [`TransportError::FifoOverflow`] when the hardware queues are full
    /// - [`TransportError::InvalidArgument`] for a frame shorter than a header
    ///   on a split-queue board
    pub fn receive(&self, frame: &[u8]) -> Result<usize> {
        let emulate = {
            let st = self.state.lock();
            if !st.rx_enabled {
                log::debug!("[dta] rx disabled, dropping {} bytes", frame.len());
                return Ok(0);
            }
            if st.stalled {
                return Err(TransportError::Stalled);
            }
            st.emulate
        };

        if emulate {
            self.inject_split(frame)?;
            self.service_rx();
            return Ok(frame.len());
        }

        let _role = self.producer.lock();
        self.dma_write(frame)
    }

    fn dma_write(&self, frame: &[u8]) -> Result<usize> {
        let padded = align_up(frame.len(), 4);
        let (snapshot, generation) = {
            let mut st = self.state.lock();
            if st.index.free() < padded {
                log::warn!(
                    "[dta] ring full ({} free, {} needed)",
                    st.index.free(),
                    padded
                );
                self.stall(&mut st);
                return Err(TransportError::Stalled);
            }
            (st.index, st.generation)
        };

        // SAFETY:
        // - The producer lock is held by our caller, so we are the only producer
        // - `snapshot` was taken after the last publish
        let mut cursor = unsafe { ProducerCursor::new(&self.ring, &snapshot) };
        cursor.append(frame);
        if padded > frame.len() {
            cursor.append(&[0u8; 3][..padded - frame.len()]);
        }
        if self.publish(cursor.producer(), generation) {
            Ok(padded)
        } else {
            Ok(0)
        }
    }

    fn inject_split(&self, frame: &[u8]) -> Result<()> {
        let Some(descriptor) = PendingMessageDescriptor::parse(frame) else {
            return Err(TransportError::InvalidArgument("frame shorter than a header"));
        };
        if self.hw.inject(descriptor, &frame[DESCRIPTOR_SIZE..]).is_err() {
            let mut st = self.state.lock();
            st.fifo_overflow = true;
            drop(st);
            log::warn!("[rel] hardware queues full, frame dropped");
            self.rx_ready.notify_all();
            return Err(TransportError::FifoOverflow);
        }
        Ok(())
    }

    /// Merge pending hardware messages into the unified ring.
    fn service_rx(&self) {
        let mut emulator = self.producer.lock();
        {
            let mut st = self.state.lock();
            if !st.emulate || st.stalled || st.reset_in_progress {
                return;
            }
            if let Err(e) = emulator.drain_descriptors(&self.hw) {
                log::warn!("[rel] {}", e);
                self.stall(&mut st);
                return;
            }
        }

        loop {
            let mut sink = DeviceSink {
                device: self,
                cursor: None,
            };
            match emulator.run_batch(&self.hw, &mut sink) {
                BatchOutcome::Idle => break,
                BatchOutcome::Reschedule => {}
                BatchOutcome::Stalled(reason) => {
                    log::warn!("[rel] stalled: {}", reason);
                    let mut st = self.state.lock();
                    self.stall(&mut st);
                    break;
                }
            }
        }
    }

    fn stall(&self, st: &mut RxState) {
        st.stalled = true;
        self.rx_ready.notify_all();
    }

    /// Make `[old producer, producer)` visible unless a reset intervened.
    fn publish(&self, producer: usize, generation: u64) -> bool {
        let mut st = self.state.lock();
        if st.reset_in_progress || st.generation != generation {
            log::debug!("[dta] reset during copy, discarding");
            return false;
        }
        if let Err(e) = st.index.set_producer(producer) {
            log::error!("[dta] bad producer index: {}", e);
            return false;
        }
        self.write_reg(regs::DQ_PROD_IDX, producer as u32);
        drop(st);
        self.rx_ready.notify_all();
        true
    }

    // ---------------------------------------------------------------
    // Register access
    // ---------------------------------------------------------------

    fn bar_range(&self, bar: usize, offset: usize, words: usize) -> Result<(usize, usize)> {
        if bar >= self.bars.len() {
            return Err(TransportError::InvalidArgument("BAR index"));
        }
        if offset % 4 != 0 {
            return Err(TransportError::InvalidArgument("unaligned register offset"));
        }
        if offset >= regs::BAR_LEN {
            return Err(TransportError::Overflow {
                value: offset,
                limit: regs::BAR_LEN,
            });
        }
        let start = offset / 4;
        let count = words.min(regs::BAR_LEN / 4 - start);
        Ok((start, count))
    }

    /// Read consecutive registers; returns how many were read.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidArgument`] for a bad BAR or unaligned offset,
    /// [`TransportError::Overflow`] for an offset past the BAR.
    pub fn io_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> Result<usize> {
        let (start, count) = self.bar_range(bar, offset, out.len())?;
        let regs = self.bars[bar].lock();
        out[..count].copy_from_slice(&regs[start..start + count]);
        Ok(count)
    }

    /// Write consecutive registers; returns how many were written.
    ///
    /// # Errors
    ///
    /// Same as [`Self::io_read`].
    pub fn io_write(&self, bar: usize, offset: usize, words: &[u32]) -> Result<usize> {
        let (start, count) = self.bar_range(bar, offset, words.len())?;
        let mut regs = self.bars[bar].lock();
        regs[start..start + count].copy_from_slice(&words[..count]);
        Ok(count)
    }
}

impl fmt::Debug for OccDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OccDevice")
            .field("caps", &self.caps)
            .field("ring", &self.ring)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

fn spin_for(delay: Duration) {
    let backoff = Backoff::new();
    let until = Instant::now() + delay;
    while Instant::now() < until {
        backoff.spin();
    }
}

/// Emulator output that writes straight into the device ring.
struct DeviceSink<'a> {
    device: &'a OccDevice,
    cursor: Option<(ProducerCursor<'a>, u64)>,
}

impl RingSink for DeviceSink<'_> {
    fn room(&mut self) -> usize {
        let (snapshot, generation) = {
            let st = self.device.state.lock();
            (st.index, st.generation)
        };
        // SAFETY: service_rx holds the producer lock for the sink's lifetime
        // and the snapshot postdates the last publish.
        let cursor = unsafe { ProducerCursor::new(&self.device.ring, &snapshot) };
        self.cursor = Some((cursor, generation));
        snapshot.free()
    }

    fn append(&mut self, bytes: &[u8]) {
        if let Some((cursor, _)) = self.cursor.as_mut() {
            cursor.append(bytes);
        }
    }

    fn commit(&mut self) {
        if let Some((cursor, generation)) = self.cursor.take() {
            self.device.publish(cursor.producer(), generation);
        }
    }
}
