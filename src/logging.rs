//! Tracing infrastructure.
//!
//! Structured, async-aware logging built on `tracing` and
//! `tracing-subscriber`. The repeatable `-v` flag on the command line maps to
//! a [`tracing::Level`], and an optional log file from the beamline
//! configuration gets its own plain-text layer alongside the console output.
//!
//! # Example
//! ```no_run
//! use dcss_dhs::logging::{self, LogConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LogConfig::from_verbosity(2);
//! logging::init(&config)?;
//! tracing::info!("DHS starting");
//! # Ok(())
//! # }
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::error::{DhsError, DhsResult};

/// Console output format.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Compact single-line format (default).
    Compact,
    /// Pretty multi-line format for interactive debugging.
    Pretty,
    /// JSON for log aggregation.
    Json,
}

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum level to emit.
    pub level: Level,
    /// Console output format.
    pub format: LogFormat,
    /// ANSI colors on the console.
    pub ansi: bool,
    /// Optional log file receiving a plain-text copy of the output.
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            ansi: true,
            log_file: None,
        }
    }
}

impl LogConfig {
    /// Map a `-v` repeat count to a logging level.
    ///
    /// No flag keeps the console quiet (warnings only); each repeat raises
    /// the chattiness, topping out at TRACE for `-vvv` and beyond.
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            ..Default::default()
        }
    }

    /// Attach a log file.
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Set the console output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG` when set, otherwise filters at the configured level.
/// This function is idempotent: if a subscriber is already installed it
/// returns `Ok(())`, which makes it safe to call from tests.
pub fn init(config: &LogConfig) -> DhsResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    let console_layer = match config.format {
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(config.ansi)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_ansi(config.ansi).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .or_else(|e| {
            // Re-init happens in tests and is harmless.
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(DhsError::Logging(format!(
                    "Failed to initialize tracing: {e}"
                )))
            }
        })
}
