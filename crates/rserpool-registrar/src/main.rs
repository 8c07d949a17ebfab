// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSerPool Registrar
//!
//! # Usage
//!
//! ```bash
//! # Start a registrar on the default ASAP port (3863)
//! rserpool-registrar
//!
//! # Fixed identifier, custom port, no multicast announces
//! rserpool-registrar --identifier 0x1001 --port 9863 --no-announce
//!
//! # Load all settings from a file
//! rserpool-registrar --config registrar.json
//! ```

use clap::Parser;
use rserpool_registrar::{Registrar, RegistrarConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// RSerPool ASAP registrar - pool registration and handle resolution
#[derive(Parser, Debug)]
#[command(name = "rserpool-registrar")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "3863")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Registrar identifier, decimal or 0x-prefixed hex (0 = random)
    #[arg(short, long, default_value = "0", value_parser = parse_identifier)]
    identifier: u32,

    /// Address announced to pool users and elements (ip:port)
    #[arg(long)]
    advertise: Option<String>,

    /// Do not send SERVER_ANNOUNCE messages
    #[arg(long, default_value = "false")]
    no_announce: bool,

    /// Log filter, e.g. `debug` or `rserpool_registrar=trace` (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_identifier(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid identifier '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        RegistrarConfig::from_file(&config_path)?
    } else {
        RegistrarConfig {
            registrar_identifier: args.identifier,
            bind_address: args.bind.parse()?,
            port: args.port,
            advertised_address: args.advertise.as_deref().map(str::parse).transpose()?,
            announce_enabled: !args.no_announce,
            ..Default::default()
        }
    };

    let registrar = Registrar::new(config.clone())?;

    info!("+----------------------------------------------------+");
    info!(
        "|       RSerPool Registrar v{}                    |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Id:       {:38} |", format!("${:08x}", registrar.identifier()));
    info!("|  Bind:     {:38} |", config.listen_address());
    info!(
        "|  Announce: {:38} |",
        if config.announce_enabled {
            config.announce_address.to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!(
        "|  KeepAlive:{:38} |",
        format!(
            "{}ms / {}ms",
            config.keep_alive_transmission_interval_ms, config.keep_alive_timeout_ms
        )
    );
    info!("+----------------------------------------------------+");

    // Handle shutdown signals
    let registrar_handle = registrar.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping registrar...");
        registrar_handle.shutdown();
    });

    registrar.run().await?;

    info!("Registrar stopped");
    Ok(())
}
