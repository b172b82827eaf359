use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use edbg_core::dap::query_identity;
use edbg_core::session::{ProbeSession, RetryMode, SessionConfig};
use edbg_core::toolinfo::default_report_size;
use edbg_core::{
    AvrCommandChannel, CancelToken, DeviceRegistry, HidApiTransport, NegotiationStrategy, ReadMode,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Atmel/Microchip CMSIS-DAP AVR command tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Session config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// USB serial number of the tool
    #[arg(short, long, global = true)]
    serial: Option<String>,

    /// Tool short name (atmelice, nedbg, ...) or product string
    #[arg(short, long, global = true)]
    tool: Option<String>,

    /// Response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Poll for responses until Ctrl-C
    #[arg(long, global = true)]
    no_timeout: bool,

    /// Spin on non-blocking HID reads, giving up after this many milliseconds
    #[arg(long, global = true)]
    nonblocking_ms: Option<u64>,

    /// Force a report size negotiation strategy
    #[arg(long, global = true, value_enum)]
    negotiation: Option<Strategy>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected CMSIS-DAP tools
    List,
    /// Show DAP_Info of the selected tool
    Info,
    /// Poll AVR events until Ctrl-C
    Events {
        /// Delay between polls in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },
    /// Send one AVR command given as hex and print the response
    Command { hex: String },
    /// Write the effective configuration to a file
    SaveConfig { path: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    Passive,
    Active,
}

impl From<Strategy> for NegotiationStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Passive => NegotiationStrategy::Passive,
            Strategy::Active => NegotiationStrategy::Active,
        }
    }
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

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    match args.command {
        Command::List => list_tools(),
        Command::Info => show_info(config),
        Command::Events { interval_ms, count } => watch_events(config, interval_ms, count),
        Command::Command { hex } => send_command(config, &hex),
        Command::SaveConfig { path } => save_config(&config, &path),
    }
}

/// File config first, then command-line overrides.
fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };

    if let Some(serial) = &args.serial {
        config.serial_number = Some(serial.clone());
    }
    if let Some(tool) = &args.tool {
        config.product = Some(tool.clone());
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.channel.timeout_ms = timeout_ms;
    }
    if args.no_timeout {
        config.channel.retry = RetryMode::Unbounded;
    }
    if let Some(ms) = args.nonblocking_ms {
        config.channel.read_mode = ReadMode::NonBlocking {
            timeout_ms: Some(ms),
        };
    }
    if let Some(strategy) = args.negotiation {
        config.channel.negotiation = Some(strategy.into());
    }
    Ok(config)
}

/// Open the configured tool. `streaming` commands run until interrupted.
fn open_channel(
    config: SessionConfig,
    streaming: bool,
) -> Result<(AvrCommandChannel<HidApiTransport>, CancelToken)> {
    let interruptible = streaming || config.channel.retry == RetryMode::Unbounded;
    let session = ProbeSession::new(config);
    let cancel = session.cancel_token();
    if interruptible {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if interrupt(&cancel) {
                std::process::exit(130);
            }
        })
        .context("failed to install Ctrl-C handler")?;
    }
    let channel = session.connect().context("failed to connect to tool")?;
    Ok((channel, cancel))
}

/// First Ctrl-C cancels gracefully. Returns true when the process should exit now.
fn interrupt(cancel: &CancelToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    warn!("Interrupted, stopping (Ctrl-C again to quit)");
    cancel.cancel();
    false
}

fn list_tools() -> Result<()> {
    let registry = DeviceRegistry::enumerate().context("failed to enumerate HID devices")?;
    if registry.is_empty() {
        warn!("No CMSIS-DAP tools found");
        return Ok(());
    }
    for device in registry.iter() {
        println!(
            "{:04X}:{:04X}  {:<16} {} ({}, default report size {})",
            device.vendor_id,
            device.product_id,
            device.serial_number,
            device.product_string,
            device.manufacturer_string,
            default_report_size(device.product_id)
        );
    }
    Ok(())
}

fn show_info(config: SessionConfig) -> Result<()> {
    let (channel, _) = open_channel(config, false)?;
    let identity = query_identity(channel.transport()).context("DAP_Info query failed")?;
    let unknown = || "-".to_string();

    println!("Vendor:       {}", identity.vendor.unwrap_or_else(unknown));
    println!("Product:      {}", identity.product.unwrap_or_else(unknown));
    println!("Serial:       {}", identity.serial_number.unwrap_or_else(unknown));
    println!("Firmware:     {}", identity.firmware_version.unwrap_or_else(unknown));
    println!("Packet size:  {}", identity.packet_size);
    println!("Packet count: {}", identity.packet_count);
    println!("Frame size:   {}", channel.frame_size());
    Ok(())
}

fn watch_events(config: SessionConfig, interval_ms: u64, count: Option<usize>) -> Result<()> {
    let (mut channel, cancel) = open_channel(config, true)?;
    info!("Polling AVR events, Ctrl-C to stop");

    let mut received = 0usize;
    while !cancel.is_cancelled() && count.is_none_or(|n| received < n) {
        if let Some(event) = channel.poll_events()? {
            println!("{}", hex::encode(&event));
            received += 1;
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }
    info!(received, "Event polling stopped");
    Ok(())
}

fn send_command(config: SessionConfig, input: &str) -> Result<()> {
    let command = parse_hex(input)?;
    let (mut channel, _) = open_channel(config, false)?;
    let response = channel.command_response(&command)?;
    println!("{}", hex::encode(&response));
    Ok(())
}

fn save_config(config: &SessionConfig, path: &Path) -> Result<()> {
    config
        .save_to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "Configuration saved");
    Ok(())
}

/// Accepts `0102ff`, `01 02 ff` and `01:02:ff`.
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).with_context(|| format!("invalid hex command: {input}"))
}
