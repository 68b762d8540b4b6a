//! # Regbus Server Binary
//!
//! Hosts the shared register array of a cell and serves it over Modbus TCP.
//!
//! # Usage
//!
//! ```bash
//! # Built-in cell layout on port 502
//! regbus_server
//!
//! # Configuration file with a port override
//! regbus_server --config config/regbus.toml --port 1502
//!
//! # Debug logging in JSON
//! regbus_server -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use regbus_common::config::LogLevel;
use regbus_server::{BusServer, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Regbus Server - shared register bus over Modbus TCP
#[derive(Parser, Debug)]
#[command(name = "regbus_server")]
#[command(version)]
#[command(about = "Shared 16-bit register bus served over Modbus TCP")]
#[command(long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML).
    /// The built-in cell layout is used when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address override
    #[arg(long)]
    host: Option<String>,

    /// Listen port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Answered unit id override (1..=247)
    #[arg(short, long)]
    unit_id: Option<u8>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Server startup failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BusServer::load_config(path)?,
        None => ServerConfig::with_defaults("regbus"),
    };
    if let Some(host) = &args.host {
        config.bus.host = host.clone();
    }
    if let Some(port) = args.port {
        config.bus.port = port;
    }
    if let Some(unit_id) = args.unit_id {
        config.bus.unit_id = unit_id;
    }

    setup_tracing(&args, config.shared.log_level);

    info!("Regbus Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let server = BusServer::new(config)?;

    let cancel = server.cancel_token();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        cancel.cancel();
    })?;

    let listener = server.bind()?;
    if let Err(e) = server.run(listener) {
        error!("Accept loop error: {}", e);
    }

    server.shutdown()?;
    info!("Regbus Server shutdown complete");
    Ok(())
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = match args.verbose {
        0 => configured,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
