//! Beamline configuration loading.
//!
//! This module provides strongly-typed configuration for one beamline.
//! Configuration is loaded from:
//! 1. a per-beamline YAML file, selected on the command line
//!    (`config/<beamline>.config`)
//! 2. environment variables (prefixed with `DHS_`)
//!
//! The settings are immutable after startup. Everything the protocol core
//! reads (the DCSS endpoint, the local DHS name, the shutdown grace
//! period) is a plain struct field here, validated once before the server
//! starts talking to DCSS.

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DhsError, DhsResult};

/// DHS name used when neither the config file nor the command line names one.
pub const DEFAULT_DHS_NAME: &str = "dcss-dhs";

/// Top-level settings for one beamline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// DCSS sequencer endpoint.
    pub dcss: DcssSettings,
    /// Local server settings.
    #[serde(default)]
    pub dhs: DhsSettings,
}

/// Where to find the DCSS sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcssSettings {
    /// Sequencer host name or address.
    pub host: String,
    /// Sequencer TCP port.
    pub port: u16,
}

/// Settings for the local DHS process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhsSettings {
    /// Name this DHS announces to DCSS. The command line may override it.
    #[serde(default)]
    pub name: Option<String>,

    /// Optional log file; console logging is always on.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// How long in-flight operations get to finish during shutdown.
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,

    /// Delay before re-dialing DCSS after the connection drops.
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for DhsSettings {
    fn default() -> Self {
        Self {
            name: None,
            log_file: None,
            shutdown_grace: default_shutdown_grace(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

impl Settings {
    /// Load settings for a named beamline from `config/<beamline>.config`.
    pub fn load_for_beamline(beamline: &str) -> DhsResult<Self> {
        Self::load_from(Path::new("config").join(format!("{beamline}.config")))
    }

    /// Load settings from a specific file path, with `DHS_` environment
    /// variable overrides (e.g. `DHS_DCSS_HOST=bl831ws1`).
    pub fn load_from<P: AsRef<Path>>(path: P) -> DhsResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("DHS_").split("_"))
            .extract()?;
        Ok(settings)
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> DhsResult<()> {
        if self.dcss.host.trim().is_empty() {
            return Err(DhsError::Configuration("dcss.host must not be empty".into()));
        }
        if self.dcss.port == 0 {
            return Err(DhsError::Configuration("dcss.port must not be 0".into()));
        }
        if self.dhs.shutdown_grace.is_zero() {
            return Err(DhsError::Configuration(
                "dhs.shutdown_grace must be greater than zero".into(),
            ));
        }
        if let Some(name) = &self.dhs.name {
            if name.trim().is_empty() || name.contains(char::is_whitespace) {
                return Err(DhsError::Configuration(format!(
                    "dhs.name '{name}' must be a single non-empty word"
                )));
            }
        }
        Ok(())
    }

    /// The `host:port` address of the DCSS sequencer.
    pub fn dcss_addr(&self) -> String {
        format!("{}:{}", self.dcss.host, self.dcss.port)
    }

    /// The name this DHS announces during the handshake.
    pub fn dhs_name(&self) -> &str {
        self.dhs.name.as_deref().unwrap_or(DEFAULT_DHS_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(contents.as_bytes())
            .expect("Failed to write config");
        file
    }

    #[test]
    fn loads_minimal_config() {
        let file = write_config(
            r#"
dcss:
  host: bl831ws1
  port: 14242
"#,
        );
        let settings = Settings::load_from(file.path()).expect("Failed to load config");
        assert_eq!(settings.dcss_addr(), "bl831ws1:14242");
        assert_eq!(settings.dhs_name(), DEFAULT_DHS_NAME);
        assert_eq!(settings.dhs.shutdown_grace, Duration::from_secs(5));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn loads_full_config() {
        let file = write_config(
            r#"
dcss:
  host: localhost
  port: 14242
dhs:
  name: loopDHS
  log_file: logs/loopdhs.log
  shutdown_grace: 2s
  reconnect_delay: 500ms
"#,
        );
        let settings = Settings::load_from(file.path()).expect("Failed to load config");
        assert_eq!(settings.dhs_name(), "loopDHS");
        assert_eq!(settings.dhs.shutdown_grace, Duration::from_secs(2));
        assert_eq!(settings.dhs.reconnect_delay, Duration::from_millis(500));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_missing_host() {
        let file = write_config("dcss:\n  host: ''\n  port: 14242\n");
        let settings = Settings::load_from(file.path()).expect("Failed to load config");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_port_zero() {
        let file = write_config("dcss:\n  host: localhost\n  port: 0\n");
        let settings = Settings::load_from(file.path()).expect("Failed to load config");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_dhs_name_with_spaces() {
        let file = write_config(
            "dcss:\n  host: localhost\n  port: 14242\ndhs:\n  name: 'two words'\n",
        );
        let settings = Settings::load_from(file.path()).expect("Failed to load config");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = Settings::load_from("/nonexistent/beamline.config");
        assert!(matches!(result, Err(DhsError::Config(_))));
    }
}
