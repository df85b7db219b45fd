//! simgate — SIM800L modem monitor
//!
//! Opens the serial device, runs the driver's cold-boot sequence and prints
//! every driver event to stdout until interrupted. Useful for bring-up,
//! antenna placement and watching the supervisor recover a flaky modem.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use simgate_core::{Modem, ModemConfig, ModemEvent, NullCodec, SerialTransport};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// SIM800L modem monitor
#[derive(Parser, Debug)]
#[command(name = "simgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watch a SIM800L modem over UART", long_about = None)]
struct Args {
    /// Serial device path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    device: String,

    /// Baud rate (8-N-1)
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// SIM PIN, applied only when the SIM reports NEED_PIN
    #[arg(long)]
    pin: Option<String>,

    /// AT+CNMI configuration string
    #[arg(long, default_value = simgate_core::DEFAULT_CNMI)]
    cnmi: String,

    /// Print events as JSON lines instead of plain text
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    info!("opening {} at {} baud", args.device, args.baud);
    let link = SerialTransport::open(&args.device, args.baud)
        .with_context(|| format!("failed to open serial device {}", args.device))?;

    let mut config = ModemConfig::default().with_cnmi(args.cnmi);
    if let Some(pin) = args.pin {
        config = config.with_pin(pin);
    }

    // monitoring only: no PDU codec is wired, so SMS sending is unavailable
    let modem = Modem::new(link, config, Arc::new(NullCodec));
    let mut events = modem.subscribe();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupted, final state: {:?}", modem.status());
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, args.json)?,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

fn print_event(event: &ModemEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{event:?}");
    }
    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    Ok(())
}
