// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! occ-analyzer - Capture and verify incoming OCC packets
//!
//! Reads the DMA ring of a board (or a TCP simulator peer, or the in-process
//! device model), verifies every packet and prints per-category rates.

use clap::Parser;
use occ::capture::{Capture, CaptureOptions};
use occ::config::{OccConfig, METRICS_PRINT_INTERVAL};
use occ::feedback::BadPacketLog;
use occ::metrics::VerificationMetrics;
use occ::packet::builder::{build_event_packet, build_ramp_packet, build_rtdl_packet};
use occ::packet::PacketAnalyzer;
use occ::transport::{
    regs, BoardType, CancelToken, InterfaceKind, OccDevice, RingTransport, SocketTransport,
    Transport, TransportError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Data generator clock of the PCIe board, in Hz.
const PCIE_GENERATOR_CLOCK: u32 = 125_000_000;

/// Capture and verify incoming OCC detector data
#[derive(Parser, Debug)]
#[command(name = "occ-analyzer")]
#[command(version = "0.1.0")]
#[command(about = "Analyze incoming DAS data")]
struct Args {
    /// Full path to the OCC board device file
    #[arg(short, long = "device-file", default_value = "/dev/snsocb0")]
    device: PathBuf,

    /// Listen for a simulator peer on host:port instead of opening a board
    #[arg(long, conflicts_with = "simulate")]
    socket: Option<String>,

    /// Run against the in-process device model fed by a packet generator
    #[arg(long)]
    simulate: bool,

    /// Packets per second produced by the simulator generator
    #[arg(long, default_value = "2000")]
    sim_rate: u64,

    /// Corrupt every Nth simulated RTDL packet (0 = never)
    #[arg(long, default_value = "0")]
    sim_corrupt_every: u64,

    /// Receive on the optical link instead of LVDS
    #[arg(long)]
    optical: bool,

    /// File to save bad packets to (gzip when it ends in .gz)
    #[arg(short, long = "output-file")]
    output: Option<PathBuf>,

    /// Dump the DMA window to this directory on framing errors
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Enable the onboard PCIe data generator with this neutron data rate (Hz)
    #[arg(short = 'e', long = "pcie-gen-rate")]
    pcie_gen_rate: Option<u32>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => OccConfig::load_from_file(path)?,
        None => OccConfig::default(),
    };
    if args.output.is_some() {
        config.dump.dump_bad_packets = true;
    }
    if let Some(dir) = &args.dump_dir {
        config.dump.dump_dma_on_framing_error = true;
        config.dump.dump_dir = Some(dir.clone());
    }
    let interface = if args.optical {
        InterfaceKind::Optical
    } else {
        InterfaceKind::Lvds
    };

    let cancel = CancelToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || {
        c.cancel();
    })?;
    if let Some(secs) = args.duration {
        let c = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            c.cancel();
        });
    }

    if let Some(address) = &args.socket {
        let mut transport = SocketTransport::listen(address)?;
        println!("Waiting for a simulator peer on {}", transport.local_addr()?);
        transport.enable_receive(true)?;
        return analyze(transport, args, &config, &cancel);
    }

    if args.simulate {
        let device = Arc::new(OccDevice::simulated()?.with_tx_timing(config.tx));
        let transport = RingTransport::open_local(Arc::clone(&device), interface)?
            .with_rollover(config.rollover);
        let generator = spawn_generator(device, args.sim_rate, args.sim_corrupt_every, &cancel);
        let result = analyze(transport, args, &config, &cancel);
        cancel.cancel();
        if generator.join().is_err() {
            log::warn!("[sim] generator thread panicked");
        }
        return result;
    }

    let mut transport = open_device(args, interface)?.with_rollover(config.rollover);
    if let Some(rate) = args.pcie_gen_rate {
        enable_pcie_generator(&mut transport, rate)?;
    }
    analyze(transport, args, &config, &cancel)
}

#[cfg(target_os = "linux")]
fn open_device(args: &Args, interface: InterfaceKind) -> Result<RingTransport, TransportError> {
    RingTransport::open(&args.device, interface)
}

#[cfg(not(target_os = "linux"))]
fn open_device(args: &Args, _interface: InterfaceKind) -> Result<RingTransport, TransportError> {
    Err(TransportError::DeviceUnavailable(args.device.display().to_string()))
}

/// Program the PCIe board's built-in packet generator.
fn enable_pcie_generator(
    transport: &mut RingTransport,
    rate: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if transport.capabilities().board != BoardType::Pcie {
        return Err("PCIe data generator not available on this board".into());
    }
    let sim_enable = regs::CONF_PKTSIM_ENABLE;
    if rate != 0 {
        // 1024-dword fixed-size packets, forced neutron data.
        let packet_cfg = 0x400 | (0x400 << 16) | (0x3 << 28);
        transport.io_write(0, regs::HW_PKTSIM_1, &[packet_cfg])?;
        let divider = (PCIE_GENERATOR_CLOCK / rate) & 0x7FF;
        transport.io_write(0, regs::HW_PKTSIM_2, &[divider])?;
    }
    let mut conf = [0u32];
    transport.io_read(0, regs::CONFIG, &mut conf)?;
    if rate == 0 {
        conf[0] &= !sim_enable;
    } else {
        conf[0] |= sim_enable;
    }
    transport.io_write(0, regs::CONFIG, &conf)?;
    println!("PCIe data generator {}", if rate == 0 { "disabled" } else { "enabled" });
    Ok(())
}

fn analyze<T: Transport>(
    transport: T,
    args: &Args,
    config: &OccConfig,
    cancel: &CancelToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(VerificationMetrics::new());
    let analyzer =
        PacketAnalyzer::with_metrics(config.framing, config.limits, Arc::clone(&metrics));
    let options = CaptureOptions {
        metrics_interval: None,
        dump: config.dump.clone(),
        ..CaptureOptions::default()
    };
    let mut capture = Capture::new(transport, analyzer, options)?;
    if let Some(path) = &args.output {
        capture = capture.with_bad_packet_log(BadPacketLog::create(path)?);
    }

    let display = spawn_display(metrics, cancel.clone());
    let result = capture.run(cancel);
    cancel.cancel();
    if display.join().is_err() {
        log::warn!("[analyzer] display thread panicked");
    }

    let summary = result?;
    println!("\n=== Results ===");
    println!("  Reads: {}", summary.reads);
    println!("  Bytes: {}", summary.bytes);
    println!("  Packets: {} ({} bad)", summary.packets, summary.bad_packets);
    println!("  Framing errors: {}", summary.framing_errors);
    println!("  Resets: {}", summary.resets);
    for path in &summary.dumps {
        println!("  DMA dump: {}", path.display());
    }
    Ok(())
}

/// Print the metrics table once per interval until cancelled.
fn spawn_display(
    metrics: Arc<VerificationMetrics>,
    cancel: CancelToken,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut previous = metrics.snapshot();
        let mut last = Instant::now();
        while !cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(100));
            let elapsed = last.elapsed();
            if elapsed < METRICS_PRINT_INTERVAL {
                continue;
            }
            let now = metrics.snapshot();
            println!("{}", now.report(&previous, elapsed));
            previous = now;
            last = Instant::now();
        }
    })
}

/// Feed the device model with RTDL, event and ramp packets at `rate` per second.
fn spawn_generator(
    device: Arc<OccDevice>,
    rate: u64,
    corrupt_every: u64,
    cancel: &CancelToken,
) -> thread::JoinHandle<()> {
    let cancel = cancel.clone();
    thread::spawn(move || {
        let interval = Duration::from_micros(1_000_000 / rate.max(1));
        let mut ramp = 0u32;
        let mut sent = 0u64;
        while !cancel.is_cancelled() {
            let frame = match sent % 3 {
                0 => {
                    let mut rtdl = build_rtdl_packet();
                    if corrupt_every != 0 && (sent / 3) % corrupt_every == corrupt_every - 1 {
                        rtdl[24 + 10 * 4 + 3] ^= 0xFF;
                    }
                    rtdl
                }
                1 => build_event_packet(200),
                _ => {
                    let (bytes, next) = build_ramp_packet(ramp, 64);
                    ramp = next;
                    bytes
                }
            };
            match device.receive(&frame) {
                Ok(_) => sent += 1,
                Err(TransportError::Stalled) => {
                    log::warn!("[sim] ring stalled after {} packets", sent);
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    log::error!("[sim] generator stopped: {}", e);
                    break;
                }
            }
            spin_sleep::sleep(interval);
        }
        log::debug!("[sim] generator sent {} packets", sent);
    })
}
