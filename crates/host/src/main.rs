//! usb-serial-host
//!
//! Bridge process that gives a JavaScript host access to USB serial devices.
//! Requests arrive on stdin as JSON lines and replies leave on stdout; logs
//! go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use host::config::{BridgeConfig, load_config};
use host::facade::SerialPortModule;
use host::serve::serve;
use host::usb::{MockUsbHost, Preset, RusbHost, UsbHost};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-serial-host")]
#[command(
    author,
    version,
    about = "USB serial host - device access for a JavaScript bridge"
)]
#[command(long_about = "
Exposes USB serial devices (enumeration, permission, open/write/close) to a
JavaScript host over a line-delimited JSON protocol on stdin/stdout.

EXAMPLES:
    # Serve the bridge with the default config
    usb-serial-host

    # Serve a receipt printer profile
    usb-serial-host --profile receipt-printer

    # List USB devices without serving
    usb-serial-host --list-devices

    # Try the protocol against a simulated POS-80 printer
    echo '{\"id\":1,\"op\":\"listDevices\"}' | usb-serial-host --simulate

CONFIGURATION:
    The host looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-serial-bridge/host.toml
    3. /etc/usb-serial-bridge/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save the configuration to the default location (or --config) and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Use a simulated device instead of libusb
    #[arg(long)]
    simulate: bool,

    /// Device profile preset, overriding the configured one
    #[arg(short, long, value_enum)]
    profile: Option<Preset>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let mut config = BridgeConfig::default();
        config.profile.preset = args.profile;
        let path = match &args.config {
            Some(path) => std::path::PathBuf::from(shellexpand::tilde(path).as_ref()),
            None => BridgeConfig::default_path(),
        };
        config.save(&path).context("Failed to save configuration")?;
        eprintln!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let mut config = match &args.config {
        Some(path) => load_config(path).context("Failed to load configuration")?,
        None => BridgeConfig::load_or_default(),
    };
    if let Some(preset) = args.profile {
        config.profile.preset = Some(preset);
    }

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.bridge.log_level.clone());
    setup_logging(&log_level).context("Failed to setup logging")?;

    info!("usb-serial-host v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    if args.simulate {
        info!("Using simulated USB host");
        let (host, _controller) = MockUsbHost::simulated();
        run(host, &config, args.list_devices).await
    } else {
        let host = RusbHost::new(config.usb.detach_kernel_driver)
            .context("Failed to initialize libusb")?;
        run(host, &config, args.list_devices).await
    }
}

async fn run<H: UsbHost>(host: H, config: &BridgeConfig, list_only: bool) -> Result<()> {
    let module = Arc::new(
        SerialPortModule::start(host, config.worker_settings())
            .context("Failed to start USB worker")?,
    );

    let result = if list_only {
        list_devices_mode(&module).await
    } else {
        info!("Serving bridge on stdin/stdout");
        let reader = BufReader::new(tokio::io::stdin());
        tokio::select! {
            result = serve(module.clone(), reader, tokio::io::stdout()) => result,
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Received Ctrl+C, shutting down"),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                Ok(())
            }
        }
    };

    info!("Shutting down USB subsystem...");
    module.shutdown().await;
    result
}

/// List USB devices and exit
async fn list_devices_mode(module: &SerialPortModule) -> Result<()> {
    let devices = module
        .list_devices()
        .await
        .context("Failed to list devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!(
            "  [{}] {:04x}:{:04x} - {} {}",
            device.device_id,
            device.vendor_id,
            device.product_id,
            device
                .manufacturer_name
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product_name.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      {} class {:#04x} interfaces {}",
            device.device_name, device.device_class, device.interface_count
        );
        let permitted = module
            .has_permission(device.device_id)
            .await
            .unwrap_or(false);
        println!("      Access: {}", if permitted { "granted" } else { "none" });
        println!();
    }

    Ok(())
}
