//! CLI entry point for the DCSS Data Handling Server.
//!
//! Usage:
//!
//! ```bash
//! dcss-dhs BL831            # loads config/BL831.config
//! dcss-dhs SIM831 loopDHS   # announce as "loopDHS" instead
//! dcss-dhs -vv BL831        # debug logging
//! ```
//!
//! The beamline name selects the configuration file; the optional second
//! argument overrides the DHS name DCSS expects this server to use.
//! SIGINT/SIGTERM trigger an orderly shutdown.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use dcss_dhs::config::Settings;
use dcss_dhs::logging::{self, LogConfig};
use dcss_dhs::operations::EchoOperation;
use dcss_dhs::server::Dhs;

#[derive(Parser)]
#[command(name = "dcss-dhs", version, about = "DCSS Data Handling Server for synchrotron beamlines", long_about = None)]
struct Cli {
    /// Beamline name (e.g. BL-831 or SIM831); selects the config file to
    /// load from the config directory.
    beamline: String,

    /// Optional alternate DHS name (what DCSS expects this server to be
    /// named). Defaults to the name in the config file, then the binary
    /// name.
    dhs_name: Option<String>,

    /// Raise logging verbosity (repeatable, -v to -vvv).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_for_beamline(&cli.beamline)?;
    if let Some(name) = cli.dhs_name {
        settings.dhs.name = Some(name);
    }
    settings.validate()?;

    let log_config =
        LogConfig::from_verbosity(cli.verbosity).with_log_file(settings.dhs.log_file.clone());
    logging::init(&log_config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "initializing DHS");
    info!(beamline = %cli.beamline, dhs_name = %settings.dhs_name(), "configuration loaded");
    info!(dcss = %settings.dcss_addr(), "sequencer endpoint");

    let settings = Arc::new(settings);
    let mut dhs = Dhs::new(Arc::clone(&settings))?;
    dhs.define_operation("echo", Arc::new(EchoOperation))?;

    dhs.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
