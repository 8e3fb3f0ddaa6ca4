// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! occ-status - Inspect an OCC board
//!
//! Opens the board in a debug session (so it can run next to a capture),
//! prints the decoded status record and optionally the BAR0 registers.

use clap::Parser;
use colored::*;
use occ::feedback::{format_registers, Backlog};
use occ::transport::{
    regs, DecodedStatus, InterfaceKind, OccDevice, OpticalSignal, RingTransport, Transport,
    TransportError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Inspect an OCC board
#[derive(Parser, Debug)]
#[command(name = "occ-status")]
#[command(version = "0.1.0")]
#[command(about = "Print the status and registers of an OCC board")]
struct Args {
    /// Full path to the OCC board device file
    #[arg(short, long = "device-file", default_value = "/dev/snsocb0")]
    device: PathBuf,

    /// Inspect the in-process device model instead of a board
    #[arg(long)]
    simulate: bool,

    /// Also dump the named BAR0 registers
    #[arg(short, long)]
    registers: bool,

    /// Reset the board before printing (LVDS unless --optical)
    #[arg(long)]
    reset: bool,

    /// Select the optical link when resetting
    #[arg(long, requires = "reset")]
    optical: bool,

    /// Refresh every N seconds until interrupted
    #[arg(short, long)]
    watch: Option<u64>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let interface = if args.optical {
        InterfaceKind::Optical
    } else {
        InterfaceKind::Lvds
    };
    let mut transport = if args.simulate {
        let device = Arc::new(OccDevice::simulated()?);
        RingTransport::open_local_debug(device, interface)?
    } else {
        open_device(args, interface)?
    };

    if args.reset {
        transport.reset()?;
        println!("{}", "Board reset".yellow());
    }

    loop {
        let status = transport.status()?;
        print_status(&status.decode(), Backlog::from_status(&status));
        if args.registers {
            print_registers(&mut transport)?;
        }
        let Some(secs) = args.watch else {
            return Ok(());
        };
        thread::sleep(Duration::from_secs(secs.max(1)));
        println!();
    }
}

#[cfg(target_os = "linux")]
fn open_device(args: &Args, interface: InterfaceKind) -> Result<RingTransport, TransportError> {
    RingTransport::open_debug(&args.device, interface)
}

#[cfg(not(target_os = "linux"))]
fn open_device(args: &Args, _interface: InterfaceKind) -> Result<RingTransport, TransportError> {
    Err(TransportError::DeviceUnavailable(args.device.display().to_string()))
}

fn yes_no(flag: bool, good_when: bool) -> ColoredString {
    let text = if flag { "yes" } else { "no" };
    if flag == good_when {
        text.green()
    } else {
        text.red()
    }
}

fn print_status(status: &DecodedStatus, backlog: Backlog) {
    println!("{}", "=== OCC Board Status ===".bold());
    println!("  Board:            {}", status.board.to_string().cyan());
    println!("  Hardware version: 0x{:08x}", status.hardware_ver);
    println!("  Firmware version: 0x{:08x}", status.firmware_ver);
    println!("  Firmware date:    {}", status.firmware_date);
    println!("  FPGA serial:      0x{:016x}", status.fpga_serial);
    println!("  Interface:        {}", status.interface);

    let optical = match status.optical {
        OpticalSignal::Ok => "ok".green(),
        OpticalSignal::NotPresent => "not present".dimmed(),
        other => other.to_string().red(),
    };
    println!("  Optical signal:   {}", optical);
    println!("  RX enabled:       {}", yes_no(status.rx_enabled, true));
    println!("  Error packets:    {}", yes_no(status.error_packets, false));
    println!("  DMA stalled:      {}", yes_no(status.stalled, false));
    println!("  FIFO overflow:    {}", yes_no(status.fifo_overflow, false));

    let fill = if status.dma_size > 0 {
        f64::from(status.dma_used) * 100.0 / f64::from(status.dma_size)
    } else {
        0.0
    };
    let backlog_badge = match backlog {
        Backlog::Normal => "NORMAL".green(),
        Backlog::Elevated => "ELEVATED".yellow(),
        Backlog::Critical => "CRITICAL".red().bold(),
    };
    println!(
        "  DMA usage:        {}/{} bytes ({:.1}%) [{}]",
        status.dma_used, status.dma_size, fill, backlog_badge
    );
    println!("  RX rate:          {} B/s", status.rx_rate);

    println!("{}", "--- Sensors ---".dimmed());
    println!("  FPGA temperature: {:.2} C", status.fpga_temp_c);
    println!("  FPGA core:        {:.2} V", status.fpga_core_volts);
    println!("  FPGA aux:         {:.2} V", status.fpga_aux_volts);

    println!("{}", "--- Link errors ---".dimmed());
    println!(
        "  CRC: {}  Length: {}  Frame: {}",
        status.err_crc, status.err_length, status.err_frame
    );
}

fn print_registers(transport: &mut RingTransport) -> Result<(), TransportError> {
    let mut values = Vec::with_capacity(regs::NAMED.len());
    for (name, offset) in regs::NAMED {
        let mut word = [0u32];
        transport.io_read(0, *offset, &mut word)?;
        values.push((*name, word[0]));
    }
    println!("{}", "--- BAR0 registers ---".dimmed());
    print!("{}", format_registers(&values));
    Ok(())
}
