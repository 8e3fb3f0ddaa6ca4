// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device status record.
//!
//! # Layout (88 bytes, little-endian)
//!
//! ```text
//! 0   occ_ver          4   board_type       8   hardware_ver
//! 12  firmware_ver     16  firmware_date    20  (pad)
//! 24  fpga_serial u64  32  status           36  dq_size
//! 40  dq_used          44  rx_rate          48  bars[3]
//! 60  err_crc          64  err_length       68  err_frame
//! 72  fpga_temp        76  fpga_core_volt   80  fpga_aux_volt
//! 84  (pad)
//! ```

use super::InterfaceKind;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Size of the serialized status record.
pub const STATUS_RECORD_SIZE: usize = 88;

/// Status word bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusFlags(u32);

impl StatusFlags {
    pub const NOSIGNAL: Self = Self(1 << 0);
    pub const OPTICAL_PRESENT: Self = Self(1 << 1);
    pub const MODE_OPTICAL: Self = Self(1 << 2);
    pub const RESET_OCCURRED: Self = Self(1 << 3);
    pub const DMA_STALLED: Self = Self(1 << 4);
    pub const RX_MSG: Self = Self(1 << 5);
    pub const RX_ENABLED: Self = Self(1 << 6);
    pub const ERR_PKTS_ENABLED: Self = Self(1 << 7);
    pub const FIFO_OVERFLOW: Self = Self(1 << 8);
    pub const OPTICAL_FAULT: Self = Self(1 << 9);

    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Board family reported in `board_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardType {
    Pcix,
    Pcie,
    GePcie,
    Simulator,
    Unknown(u32),
}

impl BoardType {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Pcix,
            2 => Self::Pcie,
            3 => Self::GePcie,
            15 => Self::Simulator,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Pcix => 1,
            Self::Pcie => 2,
            Self::GePcie => 3,
            Self::Simulator => 15,
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcix => write!(f, "PCI-X"),
            Self::Pcie => write!(f, "PCIe"),
            Self::GePcie => write!(f, "GE PCIe"),
            Self::Simulator => write!(f, "simulator"),
            Self::Unknown(raw) => write!(f, "unknown ({})", raw),
        }
    }
}

/// Firmware build date, BCD encoded as `0xVVYYMMDD`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareDate {
    pub version: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

const fn bcd(byte: u32) -> u32 {
    (byte >> 4 & 0xF) * 10 + (byte & 0xF)
}

impl FirmwareDate {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            version: bcd(raw >> 24 & 0xFF) as u8,
            year: 2000 + bcd(raw >> 16 & 0xFF) as u16,
            month: bcd(raw >> 8 & 0xFF) as u8,
            day: bcd(raw & 0xFF) as u8,
        }
    }
}

impl fmt::Display for FirmwareDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}/{:02}/{:02} (rev {})",
            self.year, self.month, self.day, self.version
        )
    }
}

/// Optical link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpticalSignal {
    NotPresent,
    Fault,
    NoSignal,
    Ok,
}

impl fmt::Display for OpticalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotPresent => "not present",
            Self::Fault => "fault",
            Self::NoSignal => "no signal",
            Self::Ok => "ok",
        };
        f.write_str(s)
    }
}

/// FPGA temperature sensor reading to degrees Celsius.
#[must_use]
pub fn temperature_celsius(raw: u32) -> f64 {
    503.975 * f64::from(raw) / 65536.0 - 273.15
}

/// FPGA supply sensor reading to volts.
#[must_use]
pub fn supply_volts(raw: u32) -> f64 {
    3.0 * f64::from(raw) / 65536.0
}

/// Raw status record as returned by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStatus {
    pub occ_ver: u32,
    pub board_type: u32,
    pub hardware_ver: u32,
    pub firmware_ver: u32,
    pub firmware_date: u32,
    pub fpga_serial: u64,
    pub status: StatusFlags,
    pub dq_size: u32,
    pub dq_used: u32,
    pub rx_rate: u32,
    pub bars: [u32; 3],
    pub err_crc: u32,
    pub err_length: u32,
    pub err_frame: u32,
    pub fpga_temp: u32,
    pub fpga_core_volt: u32,
    pub fpga_aux_volt: u32,
}

fn word(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl RingStatus {
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..STATUS_RECORD_SIZE)?;
        let serial = u64::from(word(b, 24)) | (u64::from(word(b, 28)) << 32);
        Some(Self {
            occ_ver: word(b, 0),
            board_type: word(b, 4),
            hardware_ver: word(b, 8),
            firmware_ver: word(b, 12),
            firmware_date: word(b, 16),
            fpga_serial: serial,
            status: StatusFlags::from_bits(word(b, 32)),
            dq_size: word(b, 36),
            dq_used: word(b, 40),
            rx_rate: word(b, 44),
            bars: [word(b, 48), word(b, 52), word(b, 56)],
            err_crc: word(b, 60),
            err_length: word(b, 64),
            err_frame: word(b, 68),
            fpga_temp: word(b, 72),
            fpga_core_volt: word(b, 76),
            fpga_aux_volt: word(b, 80),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; STATUS_RECORD_SIZE] {
        let mut out = [0u8; STATUS_RECORD_SIZE];
        let mut put = |offset: usize, value: u32| {
            out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        };
        put(0, self.occ_ver);
        put(4, self.board_type);
        put(8, self.hardware_ver);
        put(12, self.firmware_ver);
        put(16, self.firmware_date);
        put(24, self.fpga_serial as u32);
        put(28, (self.fpga_serial >> 32) as u32);
        put(32, self.status.bits());
        put(36, self.dq_size);
        put(40, self.dq_used);
        put(44, self.rx_rate);
        put(48, self.bars[0]);
        put(52, self.bars[1]);
        put(56, self.bars[2]);
        put(60, self.err_crc);
        put(64, self.err_length);
        put(68, self.err_frame);
        put(72, self.fpga_temp);
        put(76, self.fpga_core_volt);
        put(80, self.fpga_aux_volt);
        out
    }

    #[must_use]
    pub fn decode(&self) -> DecodedStatus {
        let flags = self.status;
        let optical = if !flags.contains(StatusFlags::OPTICAL_PRESENT) {
            OpticalSignal::NotPresent
        } else if flags.contains(StatusFlags::OPTICAL_FAULT) {
            OpticalSignal::Fault
        } else if flags.contains(StatusFlags::NOSIGNAL) {
            OpticalSignal::NoSignal
        } else {
            OpticalSignal::Ok
        };
        DecodedStatus {
            board: BoardType::from_raw(self.board_type),
            interface: if flags.contains(StatusFlags::MODE_OPTICAL) {
                InterfaceKind::Optical
            } else {
                InterfaceKind::Lvds
            },
            hardware_ver: self.hardware_ver,
            firmware_ver: self.firmware_ver,
            firmware_date: FirmwareDate::from_raw(self.firmware_date),
            fpga_serial: self.fpga_serial,
            dma_size: self.dq_size,
            dma_used: self.dq_used,
            optical,
            rx_enabled: flags.contains(StatusFlags::RX_ENABLED),
            error_packets: flags.contains(StatusFlags::ERR_PKTS_ENABLED),
            stalled: flags.contains(StatusFlags::DMA_STALLED),
            fifo_overflow: flags.contains(StatusFlags::FIFO_OVERFLOW),
            rx_rate: self.rx_rate,
            fpga_temp_c: temperature_celsius(self.fpga_temp),
            fpga_core_volts: supply_volts(self.fpga_core_volt),
            fpga_aux_volts: supply_volts(self.fpga_aux_volt),
            err_crc: self.err_crc,
            err_length: self.err_length,
            err_frame: self.err_frame,
        }
    }
}

/// Status in engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedStatus {
    pub board: BoardType,
    pub interface: InterfaceKind,
    pub hardware_ver: u32,
    pub firmware_ver: u32,
    pub firmware_date: FirmwareDate,
    pub fpga_serial: u64,
    pub dma_size: u32,
    pub dma_used: u32,
    pub optical: OpticalSignal,
    pub rx_enabled: bool,
    pub error_packets: bool,
    pub stalled: bool,
    pub fifo_overflow: bool,
    pub rx_rate: u32,
    pub fpga_temp_c: f64,
    pub fpga_core_volts: f64,
    pub fpga_aux_volts: f64,
    pub err_crc: u32,
    pub err_length: u32,
    pub err_frame: u32,
}

impl fmt::Display for DecodedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(f, "Board type:        {}", self.board)?;
        writeln!(f, "Hardware version:  0x{:08x}", self.hardware_ver)?;
        writeln!(f, "Firmware version:  0x{:08x}", self.firmware_ver)?;
        writeln!(f, "Firmware date:     {}", self.firmware_date)?;
        writeln!(f, "FPGA serial:       0x{:016x}", self.fpga_serial)?;
        writeln!(f, "Interface:         {}", self.interface)?;
        writeln!(f, "Optical signal:    {}", self.optical)?;
        writeln!(f, "RX enabled:        {}", yes_no(self.rx_enabled))?;
        writeln!(f, "Error packets:     {}", yes_no(self.error_packets))?;
        writeln!(f, "DMA stalled:       {}", yes_no(self.stalled))?;
        writeln!(f, "FIFO overflow:     {}", yes_no(self.fifo_overflow))?;
        writeln!(f, "DMA used:          {} / {} bytes", self.dma_used, self.dma_size)?;
        writeln!(f, "RX rate:           {} B/s", self.rx_rate)?;
        writeln!(f, "FPGA temperature:  {:.2} C", self.fpga_temp_c)?;
        writeln!(f, "FPGA core voltage: {:.2} V", self.fpga_core_volts)?;
        writeln!(f, "FPGA aux voltage:  {:.2} V", self.fpga_aux_volts)?;
        write!(
            f,
            "Errors:            crc {} length {} frame {}",
            self.err_crc, self.err_length, self.err_frame
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_bit_exact() {
        let status = RingStatus {
            occ_ver: 1,
            board_type: 2,
            fpga_serial: 0x1122_3344_5566_7788,
            status: StatusFlags::RX_ENABLED | StatusFlags::MODE_OPTICAL,
            dq_size: 0x20_0000,
            bars: [0x1000, 0x2000, 0x3000],
            fpga_aux_volt: 0xABCD,
            ..RingStatus::default()
        };
        let bytes = status.to_bytes();
        assert_eq!(&bytes[24..32], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[32..36], &0x44u32.to_le_bytes());
        assert_eq!(&bytes[52..56], &0x2000u32.to_le_bytes());
        assert_eq!(&bytes[80..84], &0xABCDu32.to_le_bytes());
        assert_eq!(RingStatus::parse(&bytes), Some(status));
        assert!(RingStatus::parse(&bytes[..87]).is_none());
    }

    #[test]
    fn test_conversions() {
        assert!((temperature_celsius(0) + 273.15).abs() < 1e-9);
        assert!((temperature_celsius(40000) - 34.4523).abs() < 1e-3);
        assert!((supply_volts(21845) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_firmware_date_bcd() {
        let d = FirmwareDate::from_raw(0x0214_0603);
        assert_eq!(
            d,
            FirmwareDate {
                version: 2,
                year: 2014,
                month: 6,
                day: 3
            }
        );
        assert_eq!(d.to_string(), "2014/06/03 (rev 2)");
    }

    #[test]
    fn test_decode_optical_states() {
        let mut s = RingStatus::default();
        assert_eq!(s.decode().optical, OpticalSignal::NotPresent);
        s.status = StatusFlags::OPTICAL_PRESENT | StatusFlags::NOSIGNAL;
        assert_eq!(s.decode().optical, OpticalSignal::NoSignal);
        s.status |= StatusFlags::OPTICAL_FAULT;
        assert_eq!(s.decode().optical, OpticalSignal::Fault);
        s.status = StatusFlags::OPTICAL_PRESENT | StatusFlags::MODE_OPTICAL;
        let d = s.decode();
        assert_eq!(d.optical, OpticalSignal::Ok);
        assert_eq!(d.interface, InterfaceKind::Optical);
        assert_eq!(BoardType::from_raw(s.board_type), BoardType::Unknown(0));
    }
}
