use std::time::Duration;

use clap::Parser;
use fota_core::boot::{BootError, Bootloader, ImageVersion, Reboot};
use fota_core::client::UpdateClient;
use fota_core::config::ClientConfig;
use fota_core::flash::{FlashLayout, SimFlash};
use fota_core::transport::TcpNetDriver;
use tracing::{error, info, warn};

// Host demo flash map: a small state region followed by the bank.
const STATE_OFFSET: usize = 0x0;
const STATE_SIZE: usize = 0x1000;
const BANK_OFFSET: usize = 0x1000;
const BANK_SIZE: usize = 0x60000;

#[derive(Parser, Debug)]
#[command(author, version, about = "hawkBit DDI update client (Pure Rust)", long_about = None)]
struct Args {
    /// Path to a TOML client configuration file
    #[arg(long)]
    config: Option<String>,

    /// Update server host (overrides the config file)
    #[arg(long)]
    server: Option<String>,

    /// Update server port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Device product name used in the controller id
    #[arg(long)]
    device_name: Option<String>,

    /// Device serial number used in the controller id
    #[arg(long)]
    serial: Option<u64>,

    /// Poll interval in seconds until the server overrides it
    #[arg(long)]
    poll_interval: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Host stand-in for the device bootloader: the simulated flash carries
/// no real boot trailer, so the running image is always confirmed.
struct HostBoot;

impl Bootloader for HostBoot {
    fn read_bank_header(&mut self, _offset: usize) -> Result<ImageVersion, BootError> {
        Err(BootError::InvalidImage)
    }

    fn is_image_confirmed(&mut self) -> bool {
        true
    }

    fn confirm_image(&mut self) -> Result<(), BootError> {
        Ok(())
    }

    fn request_upgrade(&mut self) -> Result<(), BootError> {
        info!("Secondary bank marked for swap");
        Ok(())
    }

    fn erase_secondary_bank(&mut self) -> Result<(), BootError> {
        Ok(())
    }
}

/// Host stand-in for a device reset: end the process and let the
/// supervisor restart it.
struct HostReboot;

impl Reboot for HostReboot {
    fn reboot(&self) {
        warn!("Reboot requested, exiting");
        std::process::exit(0);
    }
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = &args.server {
        config.server_host = server.clone();
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(name) = &args.device_name {
        config.device_name = name.clone();
    }
    if let Some(serial) = args.serial {
        config.serial_number = serial;
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval_secs = secs;
    }
    Ok(config)
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    info!(
        server = %config.host_header(),
        controller = %config.controller_id(),
        "Starting update client"
    );

    let driver = TcpNetDriver::new(Duration::from_millis(config.connect_timeout_ms));
    let flash = SimFlash::new(STATE_SIZE + BANK_SIZE);
    let layout = FlashLayout {
        state_offset: STATE_OFFSET,
        state_size: STATE_SIZE,
        bank_offset: BANK_OFFSET,
        bank_size: BANK_SIZE,
    };

    let mut client = UpdateClient::new(config, driver, flash, layout, HostBoot, HostReboot);
    client.start()?;
    client.run()
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}
