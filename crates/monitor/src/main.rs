//! knx-usb-monitor
//!
//! Opens a KNX USB interface, prints every received CEMI frame as hex and
//! optionally sends frames given on the command line.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use monitor::config::{self, MonitorConfig};
use monitor::hex;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use transport::{
    DeviceIdentifier, Frame, LibUsbLocator, ShutdownReport, TransportController, TransportHealth,
    WorkerState,
};

/// Frames buffered between the receive worker and the printer
const INBOUND_CAPACITY: usize = 1024;

const HEALTH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "knx-usb-monitor")]
#[command(author, version, about = "Monitor and send CEMI frames over a KNX USB interface")]
#[command(long_about = "
Opens the first attached KNX USB interface matching the configured vendor and
product id, prints every received CEMI frame as hex, and sends the frames
given with --send.

EXAMPLES:
    # Monitor with default config
    knx-usb-monitor

    # List attached KNX USB interfaces
    knx-usb-monitor --list-devices

    # Send a frame to a specific interface
    knx-usb-monitor --vendor-id 0e77 --product-id 0104 --send '11 00 bc e0 00 00 00 01 01 00 81'

CONFIGURATION:
    The monitor looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/knx-usb/monitor.toml
    3. /etc/knx-usb/monitor.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// USB vendor id in hex, overrides the config file
    #[arg(long, value_name = "HEX")]
    vendor_id: Option<String>,

    /// USB product id in hex, overrides the config file
    #[arg(long, value_name = "HEX")]
    product_id: Option<String>,

    /// List attached KNX USB interfaces and exit
    #[arg(long)]
    list_devices: bool,

    /// Frame to send after start, as hex (repeatable)
    #[arg(short, long, value_name = "HEX")]
    send: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = MonitorConfig::default();
        let path = MonitorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => config::load_config(path).context("Failed to load configuration")?,
        None => MonitorConfig::load_or_default(),
    };

    let log_level = config
        .log_level(args.log_level.as_deref())
        .context("Invalid --log-level")?;
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("knx-usb-monitor v{}", env!("CARGO_PKG_VERSION"));

    let identifier = identifier_from(&args, &config)?;
    let frames = args
        .send
        .iter()
        .map(|input| hex::parse_frame(input).map(Frame::from))
        .collect::<Result<Vec<_>>>()
        .context("Invalid --send frame")?;

    let locator = LibUsbLocator::new().context("Failed to initialize libusb")?;

    if args.list_devices {
        return list_devices(&locator);
    }

    run(identifier, locator, &config, frames).await
}

fn identifier_from(args: &Args, config: &MonitorConfig) -> Result<DeviceIdentifier> {
    let vendor_id = match &args.vendor_id {
        Some(id) => hex::parse_id(id).context("Invalid --vendor-id")?,
        None => config.device.vendor_id,
    };
    let product_id = match &args.product_id {
        Some(id) => hex::parse_id(id).context("Invalid --product-id")?,
        None => config.device.product_id,
    };
    Ok(DeviceIdentifier::new(vendor_id, product_id))
}

fn list_devices(locator: &LibUsbLocator) -> Result<()> {
    let devices = locator
        .find_all_candidates()
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No KNX USB interfaces found.");
    } else {
        println!("Found {} KNX USB interface(s):\n", devices.len());
        for device in devices {
            println!("  {}", device);
        }
    }

    Ok(())
}

async fn run(
    identifier: DeviceIdentifier,
    locator: LibUsbLocator,
    config: &MonitorConfig,
    frames: Vec<Frame>,
) -> Result<()> {
    let (inbound_tx, inbound_rx) = async_channel::bounded(INBOUND_CAPACITY);
    let mut controller = TransportController::new(identifier, locator, inbound_tx)
        .with_settings(config.transport.clone())
        .context("Invalid transport settings")?;

    // Start and stop block on the worker threads
    tokio::task::block_in_place(|| controller.start())
        .with_context(|| format!("Failed to start transport for {}", identifier))?;

    if let Some(device) = controller.device_info() {
        info!("Monitoring {}", device);
    }

    for frame in frames {
        controller
            .send(frame)
            .context("Failed to queue frame for sending")?;
    }

    info!("Press Ctrl+C to stop");

    let mut received: u64 = 0;
    let mut health = tokio::time::interval(HEALTH_INTERVAL);

    let result = loop {
        tokio::select! {
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Received Ctrl+C, shutting down..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                break Ok(());
            }
            frame = inbound_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        received += 1;
                        println!("[{:>6}] {}", received, frame);
                    }
                    Err(_) => break Err(anyhow!("Inbound channel closed")),
                }
            }
            _ = health.tick() => {
                let snapshot = controller.health();
                if !snapshot.is_healthy() {
                    break Err(anyhow!("Transport unhealthy: {}", describe_failure(&snapshot)));
                }
            }
        }
    };

    let report = tokio::task::block_in_place(|| controller.stop());
    log_report(&report);
    info!("Received {} frame(s)", received);

    result
}

fn describe_failure(health: &TransportHealth) -> String {
    let workers = [
        ("send worker", &health.send_worker),
        ("receive worker", &health.receive_worker),
    ];
    for (name, snapshot) in workers {
        match snapshot {
            Some(s) if s.state != WorkerState::Running => {
                return match &s.last_error {
                    Some(e) => format!("{} is {} after: {}", name, s.state, e),
                    None => format!("{} is {}", name, s.state),
                };
            }
            Some(_) => {}
            None => return format!("{} not running", name),
        }
    }
    format!("controller is {}", health.state)
}

fn log_report(report: &ShutdownReport) {
    if !report.all_joined() {
        warn!("A worker did not stop within the join timeout");
    }
    if report.evicted > 0 {
        warn!("{} queued frame(s) were evicted from a full queue", report.evicted);
    }
    if report.abandoned_frames() > 0 {
        warn!("{} queued frame(s) were never sent", report.abandoned_frames());
    }
    if let Some(e) = report.fatal_error() {
        error!("Transport failed: {}", e);
    }
    info!("Shutdown complete");
}
