//! Custom error types for the application.
//!
//! This module defines the primary error type, `DhsError`, used across the
//! whole server. Using the `thiserror` crate, it provides a centralized way
//! to classify failures, from configuration and I/O problems to protocol
//! anomalies on the DCSS connection.
//!
//! The taxonomy follows the operational rules of the server:
//!
//! - **`Config` / `Configuration`**: parse failures and semantic mistakes in
//!   the beamline configuration, plus startup-time wiring mistakes such as a
//!   duplicate operation definition or a duplicate dispatcher binding. These
//!   are fatal at startup and must never surface once the server is talking
//!   to DCSS.
//! - **`Io`**: file and socket errors.
//! - **`Frame`**: a DCSS wire frame that could not be decoded, or a message
//!   that does not fit in one frame.
//! - **`UnknownOperation` / `HandleInUse` / `StaleHandle`**: operation
//!   lifecycle violations. These are logged and recovered locally; they never
//!   take the control loop down.
//! - **`ChannelClosed`**: an internal channel endpoint disappeared, which is
//!   expected during disconnects and shutdown.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type DhsResult<T> = std::result::Result<T, DhsError>;

#[derive(Error, Debug)]
pub enum DhsError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed DCSS message: {0}")]
    Frame(String),

    #[error("Operation '{0}' is not registered")]
    UnknownOperation(String),

    #[error("Operation handle '{0}' is already active")]
    HandleInUse(String),

    #[error("Operation handle '{0}' is unknown or already terminal")]
    StaleHandle(String),

    #[error("Channel '{0}' closed")]
    ChannelClosed(&'static str),

    #[error("Logging setup error: {0}")]
    Logging(String),
}
